//! Domain types for waitlist admission.
//!
//! Value objects and ledger documents shared by the reducer, the runtime, and
//! every ledger backend.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Stable user identifier supplied by the external identity provider.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap an identity-provider user id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Subject of transactions that act on behalf of no particular user,
    /// such as operator capacity releases.
    #[must_use]
    pub fn system() -> Self {
        Self::new("$system")
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a waitlist or reservation document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Creates a new random `DocumentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `DocumentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Ledger documents
// ============================================================================

/// Well-known key of the singleton spot counter document.
pub const SPOT_COUNTER_KEY: &str = "spotCounter";

/// Default reservation time-to-live: 24 hours, in milliseconds.
pub const DEFAULT_RESERVATION_TTL_MS: i64 = 24 * 60 * 60 * 1000;

/// Longest accepted reservation time-to-live: 365 days, in milliseconds.
pub const MAX_RESERVATION_TTL_MS: i64 = 365 * DEFAULT_RESERVATION_TTL_MS;

/// Unclaimed capacity that exists while nobody is waiting.
///
/// The count is unsigned, so it can never go below zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotCounter {
    count: u32,
}

impl SpotCounter {
    /// Counter holding `count` free spots.
    #[must_use]
    pub const fn new(count: u32) -> Self {
        Self { count }
    }

    /// Number of free spots.
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// Whether any spot is free.
    #[must_use]
    pub const fn has_capacity(&self) -> bool {
        self.count > 0
    }

    /// Return `n` spots to the pool.
    ///
    /// Saturates at `u32::MAX` rather than wrapping.
    pub const fn increment(&mut self, n: u32) {
        self.count = self.count.saturating_add(n);
    }

    /// Take one spot if one is free.
    ///
    /// Returns `false` and leaves the count untouched when the pool is empty.
    pub const fn decrement_if_positive(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        true
    }
}

/// A pending entrant, ordered by join time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    /// Document id
    pub id: DocumentId,
    /// Waiting user
    pub user_id: UserId,
    /// Server-assigned join time
    pub joined_at: DateTime<Utc>,
}

impl WaitlistEntry {
    /// New entry for `user_id` joined at `joined_at`.
    #[must_use]
    pub fn new(user_id: UserId, joined_at: DateTime<Utc>) -> Self {
        Self {
            id: DocumentId::new(),
            user_id,
            joined_at,
        }
    }
}

/// A time-boxed hold on one spot, awaiting confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotReservation {
    /// Document id
    pub id: DocumentId,
    /// Holder
    pub user_id: UserId,
    /// When the spot was granted
    pub granted_at: DateTime<Utc>,
    /// Last instant at which the hold can still be confirmed
    pub expires_at: DateTime<Utc>,
}

impl SpotReservation {
    /// Grant a spot to `user_id` at `now`, valid for `ttl`.
    ///
    /// A deadline past the representable range is clamped to the latest
    /// instant `DateTime<Utc>` can hold.
    #[must_use]
    pub fn grant(user_id: UserId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: DocumentId::new(),
            user_id,
            granted_at: now,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// A reservation is valid through its exact expiry instant.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Ledger record of a confirmed RSVP: the user holds one spot for good.
///
/// Written in the same commit that consumes the reservation and removed in
/// the commit that hands the spot back, so the ledger alone decides whether
/// a confirmation or a withdrawal already happened.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    /// Confirmed user
    pub user_id: UserId,
    /// When the reservation was confirmed
    pub confirmed_at: DateTime<Utc>,
}

impl Attendee {
    /// Record `user_id` as confirmed at `confirmed_at`.
    #[must_use]
    pub const fn new(user_id: UserId, confirmed_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            confirmed_at,
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Admission policy injected into the reducer as its environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionPolicy {
    /// How long a granted spot stays claimable.
    pub reservation_ttl: Duration,
}

impl AdmissionPolicy {
    /// Policy with a TTL given in milliseconds, capped at
    /// [`MAX_RESERVATION_TTL_MS`].
    #[must_use]
    pub fn with_ttl_millis(ttl_ms: i64) -> Self {
        Self {
            reservation_ttl: Duration::milliseconds(ttl_ms.min(MAX_RESERVATION_TTL_MS)),
        }
    }
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::with_ttl_millis(DEFAULT_RESERVATION_TTL_MS)
    }
}

// ============================================================================
// Projected per-user state
// ============================================================================

/// Where a user currently sits in the admission state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AdmissionStatus {
    /// Never joined.
    None,
    /// Waiting for a spot.
    Waitlisted {
        /// Join time
        joined_at: DateTime<Utc>,
        /// 1-based position in the queue
        position: u64,
    },
    /// Holding a spot that must be confirmed.
    Reserved {
        /// Confirmation deadline
        expires_at: DateTime<Utc>,
    },
    /// Attendance confirmed.
    Verified,
    /// Went through the waitlist without securing a spot; may not rejoin.
    Lapsed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_never_goes_negative() {
        let mut counter = SpotCounter::new(1);
        assert!(counter.decrement_if_positive());
        assert!(!counter.decrement_if_positive());
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn counter_increment_saturates() {
        let mut counter = SpotCounter::new(u32::MAX - 1);
        counter.increment(5);
        assert_eq!(counter.count(), u32::MAX);
    }

    #[test]
    fn reservation_valid_through_expiry_instant() {
        let now = Utc::now();
        let reservation = SpotReservation::grant(UserId::new("u1"), now, Duration::hours(24));

        assert!(!reservation.is_expired(reservation.expires_at));
        assert!(reservation.is_expired(reservation.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn grant_clamps_an_unrepresentable_deadline() {
        let now = Utc::now();
        let reservation = SpotReservation::grant(UserId::new("u1"), now, Duration::MAX);

        assert_eq!(reservation.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!reservation.is_expired(now));
    }

    #[test]
    fn policy_caps_the_ttl() {
        let policy = AdmissionPolicy::with_ttl_millis(i64::MAX);
        assert_eq!(
            policy.reservation_ttl,
            Duration::milliseconds(MAX_RESERVATION_TTL_MS)
        );
    }

    #[test]
    fn default_policy_is_one_day() {
        assert_eq!(AdmissionPolicy::default().reservation_ttl, Duration::hours(24));
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let json = serde_json::to_value(AdmissionStatus::Verified).unwrap_or_default();
        assert_eq!(json["state"], "verified");
    }
}
