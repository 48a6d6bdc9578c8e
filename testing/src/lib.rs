//! # Admission Testing
//!
//! Testing utilities and helpers for RSVP waitlist admission control.
//!
//! This crate provides:
//! - Mock implementations of environment traits (clocks, notifications,
//!   a claims store that fails on demand)
//! - [`ReducerTest`], a Given-When-Then harness for the admission reducer
//! - [`TestHarness`], a fully wired in-memory admission service
//! - proptest strategies for operation sequences
//!
//! ## Example
//!
//! ```
//! use admission_testing::TestHarness;
//! use admission_runtime::JoinOutcome;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let harness = TestHarness::with_spots(1).await;
//! let ada = harness.user("ada");
//!
//! let outcome = harness.service.join_waitlist(&ada).await;
//! assert!(matches!(outcome, Ok(JoinOutcome::Reserved { .. })));
//! assert_eq!(harness.counter(), 0);
//! # }
//! ```

use chrono::{DateTime, Utc};
use admission_core::environment::Clock;

pub mod reducer_test;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use admission_core::claims::{
        AdmissionClaims, ClaimsError, ClaimsPatch, ClaimsStore, UserProfile,
    };
    use admission_core::notification::{
        Notification, NotificationDispatcher, NotificationError, NotificationKind,
    };
    use admission_core::types::UserId;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use admission_testing::mocks::FixedClock;
    /// use admission_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Default instant for tests: 2025-01-01 00:00:00 UTC.
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which never happens.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the
    /// ledger and keep another to advance past reservation expiry.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Clock starting at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(start)),
            }
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner) = time;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_time())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self
                .time
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// Notification dispatcher that records instead of sending.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingDispatcher {
        sent: Arc<Mutex<Vec<Notification>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingDispatcher {
        /// Create an empty recorder.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every delivery fail (or succeed again).
        pub fn fail_deliveries(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Everything delivered so far, in delivery order.
        #[must_use]
        pub fn sent(&self) -> Vec<Notification> {
            self.sent
                .lock()
                .map(|sent| sent.clone())
                .unwrap_or_default()
        }

        /// Kinds delivered to `address`, in delivery order.
        #[must_use]
        pub fn kinds_sent_to(&self, address: &str) -> Vec<NotificationKind> {
            self.sent()
                .into_iter()
                .filter(|n| n.recipient_address == address)
                .map(|n| n.kind)
                .collect()
        }

        /// Wait until at least `count` notifications arrived, or one second passed.
        ///
        /// Notifications are dispatched on spawned tasks, so tests poll.
        pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
            for _ in 0..200 {
                let sent = self.sent();
                if sent.len() >= count {
                    return sent;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.sent()
        }
    }

    impl NotificationDispatcher for RecordingDispatcher {
        fn send(
            &self,
            notification: Notification,
        ) -> BoxFuture<'_, Result<(), NotificationError>> {
            Box::pin(async move {
                if self.failing.load(Ordering::SeqCst) {
                    return Err(NotificationError::Delivery {
                        kind: notification.kind,
                        reason: "recording dispatcher set to fail".to_string(),
                    });
                }
                if let Ok(mut sent) = self.sent.lock() {
                    sent.push(notification);
                }
                Ok(())
            })
        }
    }

    /// A [`ClaimsStore`] operation that [`ClaimsFaults`] can make fail.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ClaimsCall {
        /// [`ClaimsStore::get`]
        Get,
        /// [`ClaimsStore::set`]
        Set,
        /// [`ClaimsStore::revoke_sessions`]
        RevokeSessions,
    }

    /// Armed failures, shared between a test and its [`FlakyClaimsStore`].
    #[derive(Debug, Clone, Default)]
    pub struct ClaimsFaults {
        armed: Arc<Mutex<HashMap<ClaimsCall, u32>>>,
    }

    impl ClaimsFaults {
        /// Make the next `times` calls of `call` fail with [`ClaimsError::Backend`].
        pub fn fail_next(&self, call: ClaimsCall, times: u32) {
            if let Ok(mut armed) = self.armed.lock() {
                *armed.entry(call).or_default() += times;
            }
        }

        /// Whether any armed failure is still waiting to fire.
        #[must_use]
        pub fn pending(&self) -> bool {
            self.armed
                .lock()
                .map(|armed| armed.values().any(|left| *left > 0))
                .unwrap_or(false)
        }

        fn trip(&self, call: ClaimsCall) -> Result<(), ClaimsError> {
            let Ok(mut armed) = self.armed.lock() else {
                return Ok(());
            };
            match armed.get_mut(&call) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    Err(ClaimsError::Backend(format!("injected {call:?} failure")))
                },
                _ => Ok(()),
            }
        }
    }

    /// Claims store that delegates to `S` unless a failure is armed.
    ///
    /// # Example
    ///
    /// ```
    /// use admission_core::claims::{ClaimsPatch, ClaimsStore};
    /// use admission_core::types::UserId;
    /// use admission_runtime::InMemoryClaimsStore;
    /// use admission_testing::helpers::profile;
    /// use admission_testing::mocks::{ClaimsCall, ClaimsFaults, FlakyClaimsStore};
    ///
    /// # tokio_test::block_on(async {
    /// let inner = InMemoryClaimsStore::new();
    /// inner.register(profile("ada")).unwrap();
    /// let faults = ClaimsFaults::default();
    /// let store = FlakyClaimsStore::new(inner, faults.clone());
    ///
    /// faults.fail_next(ClaimsCall::Set, 1);
    /// let ada = UserId::new("ada");
    /// assert!(store.set(&ada, ClaimsPatch::joined_waitlist()).await.is_err());
    /// assert!(store.set(&ada, ClaimsPatch::joined_waitlist()).await.is_ok());
    /// # });
    /// ```
    #[derive(Debug, Clone)]
    pub struct FlakyClaimsStore<S> {
        inner: S,
        faults: ClaimsFaults,
    }

    impl<S> FlakyClaimsStore<S> {
        /// Wrap `inner`; failures are armed through `faults`.
        #[must_use]
        pub const fn new(inner: S, faults: ClaimsFaults) -> Self {
            Self { inner, faults }
        }
    }

    impl<S: ClaimsStore> ClaimsStore for FlakyClaimsStore<S> {
        fn get(&self, user_id: &UserId) -> BoxFuture<'_, Result<AdmissionClaims, ClaimsError>> {
            if let Err(err) = self.faults.trip(ClaimsCall::Get) {
                return Box::pin(async move { Err(err) });
            }
            self.inner.get(user_id)
        }

        fn set(
            &self,
            user_id: &UserId,
            patch: ClaimsPatch,
        ) -> BoxFuture<'_, Result<AdmissionClaims, ClaimsError>> {
            if let Err(err) = self.faults.trip(ClaimsCall::Set) {
                return Box::pin(async move { Err(err) });
            }
            self.inner.set(user_id, patch)
        }

        fn revoke_sessions(&self, user_id: &UserId) -> BoxFuture<'_, Result<(), ClaimsError>> {
            if let Err(err) = self.faults.trip(ClaimsCall::RevokeSessions) {
                return Box::pin(async move { Err(err) });
            }
            self.inner.revoke_sessions(user_id)
        }

        fn profile(&self, user_id: &UserId) -> BoxFuture<'_, Result<UserProfile, ClaimsError>> {
            self.inner.profile(user_id)
        }
    }
}

/// Fixtures and a wired in-memory service.
pub mod helpers {
    use crate::mocks::{ClaimsFaults, FlakyClaimsStore, ManualClock, RecordingDispatcher};
    use admission_core::claims::{AdmissionClaims, CallerIdentity, ClaimsStore, UserProfile};
    use admission_core::types::UserId;
    use admission_runtime::{
        AdmissionEnvironment, AdmissionService, InMemoryClaimsStore, InMemoryLedger, RetryPolicy,
    };
    use std::sync::Arc;
    use std::time::Duration;

    /// Profile with a predictable name and address.
    #[must_use]
    pub fn profile(id: &str) -> UserProfile {
        UserProfile {
            user_id: UserId::new(id),
            name: id.to_string(),
            email: email_of(id),
        }
    }

    /// Address used by [`profile`].
    #[must_use]
    pub fn email_of(id: &str) -> String {
        format!("{id}@example.com")
    }

    /// Retry policy for tests: many quick attempts, so races resolve fast.
    #[must_use]
    pub fn eager_retry() -> RetryPolicy {
        RetryPolicy::default()
            .with_attempts(50)
            .with_backoff(Duration::from_millis(1), Duration::from_millis(10))
    }

    /// Install a test-friendly tracing subscriber. Safe to call repeatedly.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();
    }

    /// An admission service over in-memory backends with handles to each.
    #[derive(Clone, Debug)]
    pub struct TestHarness {
        /// Shared by the ledger and the service
        pub clock: ManualClock,
        /// Ledger backing the service
        pub ledger: InMemoryLedger,
        /// Claims store and identity provider backing the service
        pub claims: InMemoryClaimsStore,
        /// Captures notifications
        pub notifier: RecordingDispatcher,
        /// Arms claims-store failures as the service sees them
        pub faults: ClaimsFaults,
        /// The service under test
        pub service: AdmissionService,
    }

    impl TestHarness {
        /// Harness with default policy, promotion on withdraw, and eager retries.
        #[must_use]
        pub fn new() -> Self {
            Self::with_environment(|env| env)
        }

        /// Harness whose environment is adjusted by `configure`.
        #[must_use]
        pub fn with_environment(
            configure: impl FnOnce(AdmissionEnvironment) -> AdmissionEnvironment,
        ) -> Self {
            let clock = ManualClock::default();
            let ledger = InMemoryLedger::with_clock(Arc::new(clock.clone()));
            let claims = InMemoryClaimsStore::new();
            let notifier = RecordingDispatcher::new();
            let faults = ClaimsFaults::default();

            let env = AdmissionEnvironment::new(
                Arc::new(ledger.clone()),
                Arc::new(FlakyClaimsStore::new(claims.clone(), faults.clone())),
                Arc::new(notifier.clone()),
            )
            .with_clock(Arc::new(clock.clone()))
            .with_retry(eager_retry());

            Self {
                clock,
                ledger,
                claims,
                notifier,
                faults,
                service: AdmissionService::new(configure(env)),
            }
        }

        /// Default harness with `spots` of capacity seeded.
        ///
        /// # Panics
        ///
        /// Panics if seeding the in-memory ledger fails.
        #[allow(clippy::expect_used)]
        pub async fn with_spots(spots: u32) -> Self {
            let harness = Self::new();
            harness
                .service
                .seed_capacity(spots)
                .await
                .expect("seeding the in-memory ledger should succeed");
            harness
        }

        /// Register `id` (if needed) and return its caller identity.
        ///
        /// # Panics
        ///
        /// Panics if the in-memory claims store rejects the registration.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn user(&self, id: &str) -> CallerIdentity {
            let profile = profile(id);
            self.claims
                .register(profile.clone())
                .expect("registering a test user should succeed");
            CallerIdentity::new(profile)
        }

        /// Free spots in the counter.
        ///
        /// # Panics
        ///
        /// Panics if the ledger is offline.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn counter(&self) -> u32 {
            self.ledger
                .counter()
                .expect("ledger should be online")
                .count()
        }

        /// User ids on the waitlist, oldest first.
        ///
        /// # Panics
        ///
        /// Panics if the ledger is offline.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn waitlisted(&self) -> Vec<UserId> {
            self.ledger
                .waitlist()
                .expect("ledger should be online")
                .into_iter()
                .map(|entry| entry.user_id)
                .collect()
        }

        /// User ids holding a reservation, soonest expiry first.
        ///
        /// # Panics
        ///
        /// Panics if the ledger is offline.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn reserved(&self) -> Vec<UserId> {
            self.ledger
                .reservations()
                .expect("ledger should be online")
                .into_iter()
                .map(|reservation| reservation.user_id)
                .collect()
        }

        /// Users holding a confirmed RSVP in the ledger, in id order.
        ///
        /// # Panics
        ///
        /// Panics if the ledger is offline.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn attendees(&self) -> Vec<UserId> {
            self.ledger.attendees().expect("ledger should be online")
        }

        /// Current claims of `id`.
        ///
        /// # Panics
        ///
        /// Panics if `id` was never registered.
        #[allow(clippy::expect_used)]
        pub async fn claims_of(&self, id: &str) -> AdmissionClaims {
            self.claims
                .get(&UserId::new(id))
                .await
                .expect("user should be registered")
        }
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One caller-driven step in a generated scenario.
    #[derive(Clone, Debug)]
    pub enum Step {
        /// User `n` joins
        Join(usize),
        /// User `n` verifies
        Verify(usize),
        /// User `n` withdraws
        Withdraw(usize),
        /// Time passes by this many hours
        Advance(i64),
        /// The reclaim sweep runs
        Sweep,
    }

    /// Steps over a population of `users` users.
    pub fn arb_step(users: usize) -> impl Strategy<Value = Step> {
        prop_oneof![
            4 => (0..users).prop_map(Step::Join),
            3 => (0..users).prop_map(Step::Verify),
            1 => (0..users).prop_map(Step::Withdraw),
            1 => (1_i64..30).prop_map(Step::Advance),
            1 => Just(Step::Sweep),
        ]
    }

    /// Scenarios of up to `max_len` steps.
    pub fn arb_scenario(users: usize, max_len: usize) -> impl Strategy<Value = Vec<Step>> {
        prop::collection::vec(arb_step(users), 1..max_len)
    }
}

// Re-export commonly used items
pub use helpers::TestHarness;
pub use mocks::{
    ClaimsCall, ClaimsFaults, FixedClock, FlakyClaimsStore, ManualClock, RecordingDispatcher,
    test_clock,
};
pub use reducer_test::ReducerTest;
