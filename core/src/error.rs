//! Admission error taxonomy.

use crate::claims::ClaimsError;
use crate::ledger::LedgerError;
use thiserror::Error;

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Every way an admission operation can end other than success.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    // ═══════════════════════════════════════════════════════════
    // Identity
    // ═══════════════════════════════════════════════════════════
    /// No valid caller identity.
    #[error("Authentication required")]
    Unauthenticated,

    /// The identity provider holds no claims for the caller.
    #[error("Missing admission claims for user")]
    MissingClaims,

    // ═══════════════════════════════════════════════════════════
    // Preconditions
    // ═══════════════════════════════════════════════════════════
    /// The caller already holds an RSVP. Callers treat this as success.
    #[error("RSVP already verified")]
    AlreadyVerified,

    /// The caller already has a waitlist entry.
    #[error("Already on the waitlist")]
    AlreadyWaitlisted,

    /// The caller used their one pass through the waitlist.
    #[error("Waitlist already used; rejoining is not allowed")]
    WaitlistForfeited,

    // ═══════════════════════════════════════════════════════════
    // Verification
    // ═══════════════════════════════════════════════════════════
    /// No reservation exists for the caller.
    #[error("No spot available")]
    LimitReached,

    /// The caller's reservation lapsed before confirmation.
    #[error("Reserved spot has expired")]
    SpotExpired,

    // ═══════════════════════════════════════════════════════════
    // System
    // ═══════════════════════════════════════════════════════════
    /// The ledger or claims backend failed; the whole operation may be retried.
    #[error("Store unavailable: {reason}")]
    StoreUnavailable {
        /// Internal detail, logged but never shown to end users
        reason: String,
    },
}

impl AdmissionError {
    /// Build a `StoreUnavailable` from any displayable backend failure.
    #[must_use]
    pub fn store(reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable {
            reason: reason.to_string(),
        }
    }

    /// Returns `true` if the caller can fix this by changing what they do.
    ///
    /// # Examples
    ///
    /// ```
    /// # use admission_core::AdmissionError;
    /// assert!(AdmissionError::SpotExpired.is_user_error());
    /// assert!(!AdmissionError::store("boom").is_user_error());
    /// ```
    #[must_use]
    pub const fn is_user_error(&self) -> bool {
        !matches!(self, Self::StoreUnavailable { .. } | Self::Unauthenticated)
    }

    /// HTTP status the error maps to at the callable boundary.
    #[must_use]
    pub const fn http_status_hint(&self) -> u16 {
        match self {
            Self::AlreadyVerified => 200,
            Self::Unauthenticated => 401,
            Self::StoreUnavailable { .. } => 500,
            Self::MissingClaims
            | Self::AlreadyWaitlisted
            | Self::WaitlistForfeited
            | Self::LimitReached
            | Self::SpotExpired => 400,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::MissingClaims => "MISSING_CLAIMS",
            Self::AlreadyVerified => "ALREADY_VERIFIED",
            Self::AlreadyWaitlisted => "ALREADY_WAITLISTED",
            Self::WaitlistForfeited => "WAITLIST_FORFEITED",
            Self::LimitReached => "LIMIT_REACHED",
            Self::SpotExpired => "SPOT_EXPIRED",
            Self::StoreUnavailable { .. } => "STORE_UNAVAILABLE",
        }
    }
}

impl From<LedgerError> for AdmissionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Duplicate { .. } => Self::AlreadyWaitlisted,
            other => Self::store(other),
        }
    }
}

impl From<ClaimsError> for AdmissionError {
    fn from(err: ClaimsError) -> Self {
        match err {
            ClaimsError::UnknownUser(_) => Self::MissingClaims,
            ClaimsError::Backend(reason) => Self::StoreUnavailable { reason },
        }
    }
}
