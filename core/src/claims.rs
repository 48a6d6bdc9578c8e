//! Capability claims and the identity-provider seams.
//!
//! The identity provider owns two boolean claims per user that gate RSVP
//! features across the wider platform. They are modelled as one explicit
//! record, [`AdmissionClaims`], instead of loose attribute lookups, and the
//! authorization checks that read them live here.

use crate::error::AdmissionError;
use crate::types::UserId;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Admission capability flags attached to a user identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionClaims {
    /// Attendance confirmed. Terminal success flag.
    pub rsvp_verified: bool,
    /// The user has used their single pass through the waitlist.
    pub has_joined_waitlist: bool,
}

impl AdmissionClaims {
    /// Apply a partial update.
    #[must_use]
    pub fn patched(self, patch: &ClaimsPatch) -> Self {
        Self {
            rsvp_verified: patch.rsvp_verified.unwrap_or(self.rsvp_verified),
            has_joined_waitlist: patch
                .has_joined_waitlist
                .unwrap_or(self.has_joined_waitlist),
        }
    }

    /// Check the preconditions of joining the waitlist.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::AlreadyVerified`] if the user already holds an RSVP
    /// - [`AdmissionError::WaitlistForfeited`] if the one-time pass was used
    pub const fn ensure_can_join(&self) -> Result<(), AdmissionError> {
        if self.rsvp_verified {
            return Err(AdmissionError::AlreadyVerified);
        }
        if self.has_joined_waitlist {
            return Err(AdmissionError::WaitlistForfeited);
        }
        Ok(())
    }

    /// Gate for RSVP-only features (ticket issuance, route guards).
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::LimitReached`] when the user holds no RSVP.
    pub const fn ensure_rsvp_gate(&self) -> Result<(), AdmissionError> {
        if self.rsvp_verified {
            Ok(())
        } else {
            Err(AdmissionError::LimitReached)
        }
    }
}

/// Partial claims update. `None` leaves a flag untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsPatch {
    /// New `rsvpVerified` value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsvp_verified: Option<bool>,
    /// New `hasJoinedWaitlist` value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_joined_waitlist: Option<bool>,
}

impl ClaimsPatch {
    /// Mark the one-time waitlist pass as used.
    #[must_use]
    pub const fn joined_waitlist() -> Self {
        Self {
            rsvp_verified: None,
            has_joined_waitlist: Some(true),
        }
    }

    /// Set or clear the RSVP flag.
    #[must_use]
    pub const fn rsvp_verified(value: bool) -> Self {
        Self {
            rsvp_verified: Some(value),
            has_joined_waitlist: None,
        }
    }
}

/// Display details used to address notifications.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Stable user id
    pub user_id: UserId,
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallerIdentity {
    /// Who is calling
    pub profile: UserProfile,
}

impl CallerIdentity {
    /// Wrap an authenticated profile.
    #[must_use]
    pub const fn new(profile: UserProfile) -> Self {
        Self { profile }
    }

    /// Caller's user id.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.profile.user_id
    }
}

/// Errors from the claims store or identity provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    /// The identity provider has no record of this user.
    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    /// The identity backend failed.
    #[error("Claims backend error: {0}")]
    Backend(String),
}

/// Per-user claims owned by the identity provider.
///
/// Uses boxed futures so the store can be shared as `Arc<dyn ClaimsStore>`.
pub trait ClaimsStore: Send + Sync {
    /// Read the user's admission claims.
    ///
    /// # Errors
    ///
    /// [`ClaimsError::UnknownUser`] if the user has no identity record.
    fn get(&self, user_id: &UserId) -> BoxFuture<'_, Result<AdmissionClaims, ClaimsError>>;

    /// Atomically apply `patch` and return the claims as they were *before*.
    ///
    /// Returning the previous value lets callers act only on a real
    /// transition, which keeps duplicate concurrent submissions harmless.
    ///
    /// # Errors
    ///
    /// [`ClaimsError::UnknownUser`] or [`ClaimsError::Backend`].
    fn set(
        &self,
        user_id: &UserId,
        patch: ClaimsPatch,
    ) -> BoxFuture<'_, Result<AdmissionClaims, ClaimsError>>;

    /// Invalidate every outstanding session credential of the user.
    ///
    /// # Errors
    ///
    /// [`ClaimsError::Backend`] if revocation could not be recorded.
    fn revoke_sessions(&self, user_id: &UserId) -> BoxFuture<'_, Result<(), ClaimsError>>;

    /// Look up notification details for a user.
    ///
    /// # Errors
    ///
    /// [`ClaimsError::UnknownUser`] if the user has no identity record.
    fn profile(&self, user_id: &UserId) -> BoxFuture<'_, Result<UserProfile, ClaimsError>>;
}

/// Resolves bearer credentials into caller identities.
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token. `Ok(None)` means unknown or revoked.
    ///
    /// # Errors
    ///
    /// [`ClaimsError::Backend`] if the provider could not be reached.
    fn authenticate(&self, token: &str)
    -> BoxFuture<'_, Result<Option<CallerIdentity>, ClaimsError>>;
}
