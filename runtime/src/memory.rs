//! In-memory backends for development and testing.
//!
//! [`InMemoryLedger`] implements the same optimistic-concurrency contract as
//! the PostgreSQL ledger, so the service behaves identically on both. Every
//! operation takes one short `std::sync::Mutex` critical section and never
//! holds it across an `.await`.
//!
//! [`InMemoryClaimsStore`] is a small identity directory: claims, profiles
//! and bearer tokens. It doubles as the [`IdentityProvider`] for the HTTP
//! layer when the server runs without an external identity provider.

use admission_core::claims::{
    AdmissionClaims, CallerIdentity, ClaimsError, ClaimsPatch, ClaimsStore, IdentityProvider,
    UserProfile,
};
use admission_core::environment::{Clock, SystemClock};
use admission_core::ledger::{
    AdmissionLedger, DocumentKey, LedgerError, LedgerSnapshot, LedgerWrite, ReadSet, Version,
};
use admission_core::types::{
    Attendee, DocumentId, SpotCounter, SpotReservation, UserId, WaitlistEntry,
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Ledger
// ============================================================================

#[derive(Clone, Debug, Default)]
struct LedgerData {
    counter: Option<SpotCounter>,
    /// Waitlist entries with their insertion sequence, the tie-breaker for
    /// equal join times.
    waitlist: HashMap<UserId, (u64, WaitlistEntry)>,
    reservations: HashMap<DocumentId, SpotReservation>,
    attendees: HashMap<UserId, Attendee>,
    versions: HashMap<DocumentKey, Version>,
    next_seq: u64,
}

impl LedgerData {
    fn version(&self, key: &DocumentKey) -> Version {
        self.versions.get(key).copied().unwrap_or_default()
    }

    fn bump(&mut self, key: DocumentKey) {
        let next = self.version(&key).next();
        self.versions.insert(key, next);
    }

    fn head(&self) -> Option<&WaitlistEntry> {
        self.waitlist
            .values()
            .min_by_key(|(seq, entry)| (entry.joined_at, *seq))
            .map(|(_, entry)| entry)
    }

    fn reservations_of(&self, user_id: &UserId) -> Vec<SpotReservation> {
        let mut held: Vec<_> = self
            .reservations
            .values()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        held.sort_by(|a, b| b.expires_at.cmp(&a.expires_at));
        held
    }

    fn apply(&mut self, write: LedgerWrite) -> Result<(), LedgerError> {
        match write {
            LedgerWrite::PutCounter(counter) => {
                self.counter = Some(counter);
            },
            LedgerWrite::InsertWaitlistEntry(entry) => {
                if self.waitlist.contains_key(&entry.user_id) {
                    return Err(LedgerError::Duplicate {
                        user_id: entry.user_id,
                    });
                }
                let seq = self.next_seq;
                self.next_seq += 1;
                self.waitlist.insert(entry.user_id.clone(), (seq, entry));
            },
            LedgerWrite::RemoveWaitlistEntry { user_id } => {
                self.waitlist.remove(&user_id);
            },
            LedgerWrite::InsertReservation(reservation) => {
                self.reservations.insert(reservation.id, reservation);
            },
            LedgerWrite::DeleteReservation { id, .. } => {
                self.reservations.remove(&id);
            },
            LedgerWrite::PutAttendee(attendee) => {
                self.attendees.insert(attendee.user_id.clone(), attendee);
            },
            LedgerWrite::RemoveAttendee { user_id } => {
                self.attendees.remove(&user_id);
            },
        }
        Ok(())
    }
}

/// In-memory admission ledger.
///
/// Cheap to clone; clones share the same data.
///
/// # Example
///
/// ```
/// use admission_runtime::memory::InMemoryLedger;
/// use admission_core::ledger::AdmissionLedger;
///
/// # async fn example() -> Result<(), admission_core::LedgerError> {
/// let ledger = InMemoryLedger::new();
/// assert!(ledger.seed_counter(10).await?);
/// assert!(!ledger.seed_counter(99).await?);
/// assert_eq!(ledger.counter()?.count(), 10);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryLedger {
    data: Arc<Mutex<LedgerData>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Empty ledger on the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty ledger whose "now" comes from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: Arc::new(Mutex::new(LedgerData::default())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate an outage: every operation fails with [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_data<T>(
        &self,
        f: impl FnOnce(&mut LedgerData) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("in-memory ledger offline".to_string()));
        }
        let mut guard = self
            .data
            .lock()
            .map_err(|_| LedgerError::Database("ledger mutex poisoned".to_string()))?;
        f(&mut guard)
    }

    /// Current counter (zero if never seeded).
    ///
    /// # Errors
    ///
    /// Returns error if the ledger is offline or the lock is poisoned.
    pub fn counter(&self) -> Result<SpotCounter, LedgerError> {
        self.with_data(|data| Ok(data.counter.unwrap_or_default()))
    }

    /// Waitlist in promotion order.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger is offline or the lock is poisoned.
    pub fn waitlist(&self) -> Result<Vec<WaitlistEntry>, LedgerError> {
        self.with_data(|data| {
            let mut entries: Vec<_> = data.waitlist.values().cloned().collect();
            entries.sort_by_key(|(seq, entry)| (entry.joined_at, *seq));
            Ok(entries.into_iter().map(|(_, entry)| entry).collect())
        })
    }

    /// Every reservation, soonest expiry first.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger is offline or the lock is poisoned.
    pub fn reservations(&self) -> Result<Vec<SpotReservation>, LedgerError> {
        self.with_data(|data| {
            let mut all: Vec<_> = data.reservations.values().cloned().collect();
            all.sort_by_key(|r| r.expires_at);
            Ok(all)
        })
    }

    /// Users with a confirmed RSVP, in id order.
    ///
    /// # Errors
    ///
    /// Returns error if the ledger is offline or the lock is poisoned.
    pub fn attendees(&self) -> Result<Vec<UserId>, LedgerError> {
        self.with_data(|data| {
            let mut users: Vec<_> = data.attendees.keys().cloned().collect();
            users.sort();
            Ok(users)
        })
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger").finish_non_exhaustive()
    }
}

impl AdmissionLedger for InMemoryLedger {
    fn snapshot(&self, subject: &UserId) -> BoxFuture<'_, Result<LedgerSnapshot, LedgerError>> {
        let subject = subject.clone();
        let observed_at = self.clock.now();
        let result = self.with_data(|data| {
            let mut snapshot = LedgerSnapshot::empty(subject.clone(), observed_at);
            snapshot.counter = data.counter.unwrap_or_default();
            snapshot.waitlist_entry = data.waitlist.get(&subject).map(|(_, e)| e.clone());
            snapshot.reservations = data.reservations_of(&subject);
            snapshot.waitlist_head = data.head().cloned();
            snapshot.attendee = data.attendees.get(&subject).cloned();

            for key in [
                DocumentKey::SpotCounter,
                DocumentKey::WaitlistOf(subject.clone()),
                DocumentKey::ReservationsOf(subject.clone()),
                DocumentKey::WaitlistHead,
                DocumentKey::AttendeeOf(subject.clone()),
            ] {
                let version = data.version(&key);
                snapshot.read_set.record(key, version);
            }
            Ok(snapshot)
        });
        Box::pin(async move { result })
    }

    fn commit(
        &self,
        read_set: ReadSet,
        writes: Vec<LedgerWrite>,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        let result = self.with_data(|data| {
            for (key, read_version) in read_set.iter() {
                if data.version(key) != *read_version {
                    return Err(LedgerError::ConcurrencyConflict {
                        key: key.to_string(),
                    });
                }
            }

            // Apply to a scratch copy so a failing write leaves nothing behind.
            let mut next = data.clone();
            let touched: BTreeSet<DocumentKey> =
                writes.iter().flat_map(LedgerWrite::touched_keys).collect();
            for write in writes {
                next.apply(write)?;
            }
            for key in touched {
                next.bump(key);
            }
            *data = next;
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<SpotReservation>, LedgerError>> {
        let result = self.with_data(|data| {
            let mut expired: Vec<_> = data
                .reservations
                .values()
                .filter(|r| r.is_expired(now))
                .cloned()
                .collect();
            expired.sort_by_key(|r| r.expires_at);
            expired.truncate(limit);
            Ok(expired)
        });
        Box::pin(async move { result })
    }

    fn waitlist_position(
        &self,
        user_id: &UserId,
    ) -> BoxFuture<'_, Result<Option<u64>, LedgerError>> {
        let result = self.with_data(|data| {
            let Some((own_seq, own)) = data.waitlist.get(user_id) else {
                return Ok(None);
            };
            let own_key = (own.joined_at, *own_seq);
            let ahead = data
                .waitlist
                .values()
                .filter(|(seq, entry)| (entry.joined_at, *seq) < own_key)
                .count();
            Ok(Some(u64::try_from(ahead).unwrap_or(u64::MAX).saturating_add(1)))
        });
        Box::pin(async move { result })
    }

    fn seed_counter(&self, count: u32) -> BoxFuture<'_, Result<bool, LedgerError>> {
        let result = self.with_data(|data| {
            if data.counter.is_some() {
                return Ok(false);
            }
            data.counter = Some(SpotCounter::new(count));
            data.bump(DocumentKey::SpotCounter);
            Ok(true)
        });
        Box::pin(async move { result })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), LedgerError>> {
        let result = self.with_data(|_| Ok(()));
        Box::pin(async move { result })
    }
}

// ============================================================================
// Claims store and identity provider
// ============================================================================

#[derive(Debug, Default)]
struct Directory {
    users: HashMap<UserId, (UserProfile, AdmissionClaims)>,
    tokens: HashMap<String, UserId>,
}

/// One user in an identity seed file.
#[derive(Clone, Debug, Deserialize)]
pub struct SeedUser {
    /// Identity-provider user id
    pub id: String,
    /// Display name
    pub name: String,
    /// Notification address
    pub email: String,
    /// Bearer tokens that authenticate as this user
    #[serde(default)]
    pub tokens: Vec<String>,
    /// Initial claims
    #[serde(default)]
    pub claims: AdmissionClaims,
}

/// Contents of an identity seed file: `{ "users": [...] }`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct IdentitySeed {
    /// Users to register
    pub users: Vec<SeedUser>,
}

impl IdentitySeed {
    /// Parse a seed from JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the document does not match the seed format.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// In-memory claims store, profile directory and bearer-token identity provider.
#[derive(Clone, Debug, Default)]
pub struct InMemoryClaimsStore {
    directory: Arc<Mutex<Directory>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryClaimsStore {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated from a seed.
    ///
    /// # Errors
    ///
    /// Returns error if the lock is poisoned.
    pub fn from_seed(seed: IdentitySeed) -> Result<Self, ClaimsError> {
        let store = Self::new();
        for user in seed.users {
            let user_id = UserId::new(user.id);
            store.register(UserProfile {
                user_id: user_id.clone(),
                name: user.name,
                email: user.email,
            })?;
            store.put_claims(&user_id, user.claims)?;
            for token in user.tokens {
                store.issue_token(&user_id, token)?;
            }
        }
        Ok(store)
    }

    /// Simulate an outage: every operation fails with [`ClaimsError::Backend`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_directory<T>(
        &self,
        f: impl FnOnce(&mut Directory) -> Result<T, ClaimsError>,
    ) -> Result<T, ClaimsError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClaimsError::Backend("claims store offline".to_string()));
        }
        let mut guard = self
            .directory
            .lock()
            .map_err(|_| ClaimsError::Backend("claims mutex poisoned".to_string()))?;
        f(&mut guard)
    }

    /// Register a user with default claims. Re-registering keeps existing claims.
    ///
    /// # Errors
    ///
    /// Returns error if the store is offline or the lock is poisoned.
    pub fn register(&self, profile: UserProfile) -> Result<(), ClaimsError> {
        self.with_directory(|dir| {
            let claims = dir
                .users
                .get(&profile.user_id)
                .map(|(_, claims)| *claims)
                .unwrap_or_default();
            dir.users.insert(profile.user_id.clone(), (profile, claims));
            Ok(())
        })
    }

    /// Overwrite a user's claims.
    ///
    /// # Errors
    ///
    /// [`ClaimsError::UnknownUser`] if the user was never registered.
    pub fn put_claims(&self, user_id: &UserId, claims: AdmissionClaims) -> Result<(), ClaimsError> {
        self.with_directory(|dir| {
            let (_, current) = dir
                .users
                .get_mut(user_id)
                .ok_or_else(|| ClaimsError::UnknownUser(user_id.clone()))?;
            *current = claims;
            Ok(())
        })
    }

    /// Let `token` authenticate as `user_id`.
    ///
    /// # Errors
    ///
    /// [`ClaimsError::UnknownUser`] if the user was never registered.
    pub fn issue_token(&self, user_id: &UserId, token: impl Into<String>) -> Result<(), ClaimsError> {
        let token = token.into();
        self.with_directory(|dir| {
            if !dir.users.contains_key(user_id) {
                return Err(ClaimsError::UnknownUser(user_id.clone()));
            }
            dir.tokens.insert(token, user_id.clone());
            Ok(())
        })
    }

    /// Number of live tokens for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the store is offline or the lock is poisoned.
    pub fn session_count(&self, user_id: &UserId) -> Result<usize, ClaimsError> {
        self.with_directory(|dir| Ok(dir.tokens.values().filter(|u| *u == user_id).count()))
    }
}

impl ClaimsStore for InMemoryClaimsStore {
    fn get(&self, user_id: &UserId) -> BoxFuture<'_, Result<AdmissionClaims, ClaimsError>> {
        let result = self.with_directory(|dir| {
            dir.users
                .get(user_id)
                .map(|(_, claims)| *claims)
                .ok_or_else(|| ClaimsError::UnknownUser(user_id.clone()))
        });
        Box::pin(async move { result })
    }

    fn set(
        &self,
        user_id: &UserId,
        patch: ClaimsPatch,
    ) -> BoxFuture<'_, Result<AdmissionClaims, ClaimsError>> {
        let result = self.with_directory(|dir| {
            let (_, claims) = dir
                .users
                .get_mut(user_id)
                .ok_or_else(|| ClaimsError::UnknownUser(user_id.clone()))?;
            let previous = *claims;
            *claims = previous.patched(&patch);
            Ok(previous)
        });
        Box::pin(async move { result })
    }

    fn revoke_sessions(&self, user_id: &UserId) -> BoxFuture<'_, Result<(), ClaimsError>> {
        let result = self.with_directory(|dir| {
            dir.tokens.retain(|_, owner| owner != user_id);
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn profile(&self, user_id: &UserId) -> BoxFuture<'_, Result<UserProfile, ClaimsError>> {
        let result = self.with_directory(|dir| {
            dir.users
                .get(user_id)
                .map(|(profile, _)| profile.clone())
                .ok_or_else(|| ClaimsError::UnknownUser(user_id.clone()))
        });
        Box::pin(async move { result })
    }
}

impl IdentityProvider for InMemoryClaimsStore {
    fn authenticate(
        &self,
        token: &str,
    ) -> BoxFuture<'_, Result<Option<CallerIdentity>, ClaimsError>> {
        let result = self.with_directory(|dir| {
            Ok(dir
                .tokens
                .get(token)
                .and_then(|user_id| dir.users.get(user_id))
                .map(|(profile, _)| CallerIdentity::new(profile.clone())))
        });
        Box::pin(async move { result })
    }
}
