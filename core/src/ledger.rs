//! Transactional ledger abstraction.
//!
//! The ledger holds the spot counter, the waitlist, the reservation
//! registry, and the attendee records of confirmed RSVPs. It is shaped like a document store with optimistic
//! concurrency:
//!
//! 1. [`AdmissionLedger::snapshot`] reads every document the admission
//!    reducer may need for one subject user, plus the version of each logical
//!    document it read (the [`ReadSet`]).
//! 2. The reducer decides on a list of [`LedgerWrite`]s.
//! 3. [`AdmissionLedger::commit`] applies the writes atomically if and only if
//!    no document in the read set changed in between, bumping the version of
//!    every document the writes touch. Otherwise it fails with
//!    [`LedgerError::ConcurrencyConflict`] and the caller retries from step 1.
//!
//! # Implementations
//!
//! - `InMemoryLedger` (in `admission-runtime`): single process, tests and demos
//! - `PostgresLedger` (in `admission-postgres`): production

use crate::types::{Attendee, DocumentId, SpotCounter, SpotReservation, UserId, WaitlistEntry};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Logical documents tracked by the concurrency protocol.
///
/// Queries are versioned too: `WaitlistHead` changes whenever any entry is
/// inserted or removed, so "who is oldest" cannot shift under a transaction.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentKey {
    /// The singleton spot counter.
    SpotCounter,
    /// The waitlist entry (if any) of one user.
    WaitlistOf(UserId),
    /// The reservations (if any) of one user.
    ReservationsOf(UserId),
    /// The oldest waitlist entry.
    WaitlistHead,
    /// The attendee record (if any) of one user.
    AttendeeOf(UserId),
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpotCounter => f.write_str(crate::types::SPOT_COUNTER_KEY),
            Self::WaitlistOf(user) => write!(f, "waitlist/{user}"),
            Self::ReservationsOf(user) => write!(f, "spots/{user}"),
            Self::WaitlistHead => f.write_str("waitlist#head"),
            Self::AttendeeOf(user) => write!(f, "attendees/{user}"),
        }
    }
}

/// Monotonic document version. Documents never written are at version 0.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    /// Create a version.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Version after one more write.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Versions observed by a snapshot, ordered by key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReadSet(BTreeMap<DocumentKey, Version>);

impl ReadSet {
    /// Empty read set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Record that `key` was read at `version`.
    pub fn record(&mut self, key: DocumentKey, version: Version) {
        self.0.insert(key, version);
    }

    /// Version `key` was read at, if it was read.
    #[must_use]
    pub fn version_of(&self, key: &DocumentKey) -> Option<Version> {
        self.0.get(key).copied()
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DocumentKey, &Version)> {
        self.0.iter()
    }

    /// Number of documents read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Everything the admission reducer may read for one subject user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// The user the transaction is about.
    pub subject: UserId,
    /// The store's notion of "now" when the snapshot was taken.
    pub observed_at: DateTime<Utc>,
    /// The spot counter.
    pub counter: SpotCounter,
    /// The subject's waitlist entry.
    pub waitlist_entry: Option<WaitlistEntry>,
    /// The subject's reservations, `expires_at` descending.
    pub reservations: Vec<SpotReservation>,
    /// The oldest waitlist entry of anyone.
    pub waitlist_head: Option<WaitlistEntry>,
    /// The subject's attendee record, present once an RSVP is confirmed.
    pub attendee: Option<Attendee>,
    /// Versions observed, for the commit check.
    pub read_set: ReadSet,
}

impl LedgerSnapshot {
    /// Empty ledger view for `subject` at `observed_at`.
    #[must_use]
    pub const fn empty(subject: UserId, observed_at: DateTime<Utc>) -> Self {
        Self {
            subject,
            observed_at,
            counter: SpotCounter::new(0),
            waitlist_entry: None,
            reservations: Vec::new(),
            waitlist_head: None,
            attendee: None,
            read_set: ReadSet::new(),
        }
    }

    /// Most recent reservation of the subject.
    ///
    /// Picks the latest `expires_at` if duplicates slipped in.
    #[must_use]
    pub fn latest_reservation(&self) -> Option<&SpotReservation> {
        self.reservations.iter().max_by_key(|r| r.expires_at)
    }

    /// Oldest waitlisted user other than the subject.
    #[must_use]
    pub fn promotable_head(&self) -> Option<&WaitlistEntry> {
        self.waitlist_head
            .as_ref()
            .filter(|head| head.user_id != self.subject)
    }
}

/// One document mutation inside a commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerWrite {
    /// Overwrite the spot counter.
    PutCounter(SpotCounter),
    /// Add a waitlist entry. Fails with [`LedgerError::Duplicate`] if the user has one.
    InsertWaitlistEntry(WaitlistEntry),
    /// Remove a user's waitlist entry. Idempotent.
    RemoveWaitlistEntry {
        /// Whose entry
        user_id: UserId,
    },
    /// Add a reservation.
    InsertReservation(SpotReservation),
    /// Delete one reservation. Idempotent.
    DeleteReservation {
        /// Reservation document
        id: DocumentId,
        /// Holder, for version bookkeeping
        user_id: UserId,
    },
    /// Record a confirmed RSVP. Overwrites an existing record.
    PutAttendee(Attendee),
    /// Remove a user's attendee record. Idempotent.
    RemoveAttendee {
        /// Whose record
        user_id: UserId,
    },
}

impl LedgerWrite {
    /// Logical documents whose version this write bumps.
    #[must_use]
    pub fn touched_keys(&self) -> Vec<DocumentKey> {
        match self {
            Self::PutCounter(_) => vec![DocumentKey::SpotCounter],
            Self::InsertWaitlistEntry(entry) => vec![
                DocumentKey::WaitlistOf(entry.user_id.clone()),
                DocumentKey::WaitlistHead,
            ],
            Self::RemoveWaitlistEntry { user_id } => vec![
                DocumentKey::WaitlistOf(user_id.clone()),
                DocumentKey::WaitlistHead,
            ],
            Self::InsertReservation(reservation) => {
                vec![DocumentKey::ReservationsOf(reservation.user_id.clone())]
            },
            Self::DeleteReservation { user_id, .. } => {
                vec![DocumentKey::ReservationsOf(user_id.clone())]
            },
            Self::PutAttendee(attendee) => vec![DocumentKey::AttendeeOf(attendee.user_id.clone())],
            Self::RemoveAttendee { user_id } => vec![DocumentKey::AttendeeOf(user_id.clone())],
        }
    }
}

/// Errors from ledger operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A document in the read set changed before commit. Retry the transaction.
    #[error("Concurrency conflict on {key}")]
    ConcurrencyConflict {
        /// Storage key of the conflicting document
        key: String,
    },

    /// Uniqueness on the waitlist's user id was violated.
    #[error("Waitlist entry already exists for {user_id}")]
    Duplicate {
        /// The user who already has an entry
        user_id: UserId,
    },

    /// Query or transaction failure.
    #[error("Database error: {0}")]
    Database(String),

    /// The backing store cannot be reached.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Whether retrying the whole transaction may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Transactional document store holding the admission ledger.
///
/// Uses boxed futures so implementations can be shared as
/// `Arc<dyn AdmissionLedger>` across request handlers and the sweeper.
pub trait AdmissionLedger: Send + Sync {
    /// Read everything the reducer may need about `subject`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Database`] or [`LedgerError::Unavailable`].
    fn snapshot(&self, subject: &UserId) -> BoxFuture<'_, Result<LedgerSnapshot, LedgerError>>;

    /// Atomically apply `writes` if every version in `read_set` is unchanged.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ConcurrencyConflict`] if a read document changed
    /// - [`LedgerError::Duplicate`] on a second waitlist entry for one user
    /// - [`LedgerError::Database`] on backend failure; nothing is applied
    fn commit(
        &self,
        read_set: ReadSet,
        writes: Vec<LedgerWrite>,
    ) -> BoxFuture<'_, Result<(), LedgerError>>;

    /// Reservations with `expires_at < now`, oldest expiry first, at most `limit`.
    ///
    /// This is a plain query; each result is re-checked transactionally.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Database`] or [`LedgerError::Unavailable`].
    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<SpotReservation>, LedgerError>>;

    /// 1-based queue position of the user's waitlist entry.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Database`] or [`LedgerError::Unavailable`].
    fn waitlist_position(&self, user_id: &UserId)
    -> BoxFuture<'_, Result<Option<u64>, LedgerError>>;

    /// Create the counter document with `count` spots unless it already exists.
    ///
    /// Returns `true` if this call created it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Database`] or [`LedgerError::Unavailable`].
    fn seed_counter(&self, count: u32) -> BoxFuture<'_, Result<bool, LedgerError>>;

    /// Cheap reachability check for readiness checks.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Unavailable`] if the store cannot be reached.
    fn ping(&self) -> BoxFuture<'_, Result<(), LedgerError>>;
}
