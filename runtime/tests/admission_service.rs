//! Integration tests for the admission service over in-memory backends.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use admission_core::claims::AdmissionClaims;
use admission_core::ledger::{AdmissionLedger, LedgerError, LedgerSnapshot, LedgerWrite, ReadSet};
use admission_core::notification::NotificationKind;
use admission_core::types::{AdmissionStatus, SpotReservation, UserId};
use admission_core::AdmissionError;
use admission_runtime::{
    AdmissionEnvironment, AdmissionService, InMemoryLedger, JoinOutcome, VerifyOutcome,
    WithdrawOutcome,
};
use admission_testing::helpers::{email_of, init_test_tracing};
use admission_testing::mocks::{ClaimsCall, test_time};
use admission_testing::TestHarness;
use chrono::{DateTime, Duration, Utc};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn past_ttl() -> Duration {
    Duration::hours(24) + Duration::milliseconds(1)
}

/// Everything a retried call must converge on.
#[derive(Debug, PartialEq)]
struct EndState {
    counter: u32,
    reserved: Vec<UserId>,
    waitlisted: Vec<UserId>,
    attendees: Vec<UserId>,
    claims: Vec<AdmissionClaims>,
}

async fn end_state(harness: &TestHarness, ids: &[&str]) -> EndState {
    let mut claims = Vec::new();
    for id in ids {
        claims.push(harness.claims_of(id).await);
    }
    EndState {
        counter: harness.counter(),
        reserved: harness.reserved(),
        waitlisted: harness.waitlisted(),
        attendees: harness.attendees(),
        claims,
    }
}

// ============================================================================
// JoinWaitlist
// ============================================================================

#[tokio::test]
async fn join_reserves_while_capacity_lasts_then_waitlists() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    let bo = harness.user("bo");

    let first = harness.service.join_waitlist(&ada).await.unwrap();
    let second = harness.service.join_waitlist(&bo).await.unwrap();

    assert!(matches!(first, JoinOutcome::Reserved { .. }));
    assert!(matches!(second, JoinOutcome::Waitlisted { .. }));
    assert_eq!(harness.counter(), 0);
    assert_eq!(harness.reserved(), vec![UserId::new("ada")]);
    assert_eq!(harness.waitlisted(), vec![UserId::new("bo")]);
    assert!(harness.claims_of("ada").await.has_joined_waitlist);
    assert!(harness.claims_of("bo").await.has_joined_waitlist);

    harness.notifier.wait_for(2).await;
    assert_eq!(
        harness.notifier.kinds_sent_to(&email_of("ada")),
        vec![NotificationKind::SpotAvailable]
    );
    assert_eq!(
        harness.notifier.kinds_sent_to(&email_of("bo")),
        vec![NotificationKind::JoinedWaitlist]
    );
}

#[tokio::test]
async fn second_join_is_forfeited_once_the_waitlist_was_used() {
    let harness = TestHarness::with_spots(0).await;
    let ada = harness.user("ada");

    harness.service.join_waitlist(&ada).await.unwrap();
    let err = harness.service.join_waitlist(&ada).await.unwrap_err();

    assert_eq!(err, AdmissionError::WaitlistForfeited);
    assert_eq!(harness.waitlisted().len(), 1);
}

#[tokio::test]
async fn join_by_verified_user_reports_already_verified() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.verify_rsvp(&ada).await.unwrap();

    let err = harness.service.join_waitlist(&ada).await.unwrap_err();

    assert_eq!(err, AdmissionError::AlreadyVerified);
    assert_eq!(err.http_status_hint(), 200);
}

#[tokio::test]
async fn join_by_unknown_user_is_missing_claims() {
    let harness = TestHarness::with_spots(1).await;
    let ghost = admission_core::claims::CallerIdentity::new(admission_testing::helpers::profile("ghost"));

    let err = harness.service.join_waitlist(&ghost).await.unwrap_err();

    assert_eq!(err, AdmissionError::MissingClaims);
    assert_eq!(harness.counter(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_joins_racing_for_the_last_spot() {
    init_test_tracing();
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    let bo = harness.user("bo");

    let (a, b) = tokio::join!(
        {
            let service = harness.service.clone();
            tokio::spawn(async move { service.join_waitlist(&ada).await })
        },
        {
            let service = harness.service.clone();
            tokio::spawn(async move { service.join_waitlist(&bo).await })
        }
    );
    let outcomes = [a.unwrap().unwrap(), b.unwrap().unwrap()];

    let reserved = outcomes
        .iter()
        .filter(|o| matches!(o, JoinOutcome::Reserved { .. }))
        .count();
    assert_eq!(reserved, 1);
    assert_eq!(harness.counter(), 0);
    assert_eq!(harness.reserved().len(), 1);
    assert_eq!(harness.waitlisted().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_joins_never_oversell() {
    let harness = TestHarness::with_spots(5).await;
    let mut tasks = Vec::new();
    for i in 0..20 {
        let caller = harness.user(&format!("user-{i}"));
        let service = harness.service.clone();
        tasks.push(tokio::spawn(async move { service.join_waitlist(&caller).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(harness.counter(), 0);
    assert_eq!(harness.reserved().len(), 5);
    assert_eq!(harness.waitlisted().len(), 15);

    let reserved: HashSet<_> = harness.reserved().into_iter().collect();
    assert!(harness.waitlisted().iter().all(|u| !reserved.contains(u)));
}

// ============================================================================
// VerifyRSVP
// ============================================================================

#[tokio::test]
async fn verify_is_idempotent() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();

    let first = harness.service.verify_rsvp(&ada).await.unwrap();
    let second = harness.service.verify_rsvp(&ada).await.unwrap();

    assert_eq!(first, VerifyOutcome::Verified);
    assert_eq!(second, VerifyOutcome::AlreadyVerified);
    assert!(harness.reserved().is_empty());
    assert!(harness.claims_of("ada").await.rsvp_verified);

    harness.notifier.wait_for(2).await;
    assert_eq!(
        harness.notifier.kinds_sent_to(&email_of("ada")),
        vec![NotificationKind::SpotAvailable, NotificationKind::RsvpConfirmed]
    );
}

#[tokio::test]
async fn verify_without_reservation_is_limit_reached() {
    let harness = TestHarness::with_spots(0).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();

    let err = harness.service.verify_rsvp(&ada).await.unwrap_err();

    assert_eq!(err, AdmissionError::LimitReached);
    assert_eq!(harness.waitlisted(), vec![UserId::new("ada")]);
}

#[tokio::test]
async fn verify_one_millisecond_late_expires_and_lapses() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();

    harness.clock.advance(past_ttl());
    let err = harness.service.verify_rsvp(&ada).await.unwrap_err();

    assert_eq!(err, AdmissionError::SpotExpired);
    assert!(harness.reserved().is_empty());
    assert_eq!(harness.counter(), 1);
    assert_eq!(
        harness.service.status(&UserId::new("ada")).await.unwrap(),
        AdmissionStatus::Lapsed
    );
    assert_eq!(
        harness.service.join_waitlist(&ada).await.unwrap_err(),
        AdmissionError::WaitlistForfeited
    );
}

#[tokio::test]
async fn verify_at_the_expiry_instant_still_succeeds() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();

    harness.clock.advance(Duration::hours(24));

    assert_eq!(
        harness.service.verify_rsvp(&ada).await.unwrap(),
        VerifyOutcome::Verified
    );
}

#[tokio::test]
async fn late_verify_hands_the_spot_to_the_oldest_waiter() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    let bo = harness.user("bo");
    let cy = harness.user("cy");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.join_waitlist(&bo).await.unwrap();
    harness.clock.advance(Duration::minutes(1));
    harness.service.join_waitlist(&cy).await.unwrap();

    harness.clock.advance(past_ttl());
    harness.service.verify_rsvp(&ada).await.unwrap_err();

    assert_eq!(harness.reserved(), vec![UserId::new("bo")]);
    assert_eq!(harness.waitlisted(), vec![UserId::new("cy")]);
    assert_eq!(harness.counter(), 0);
}

// ============================================================================
// WithdrawRSVP
// ============================================================================

#[tokio::test]
async fn withdraw_promotes_the_waitlist_before_the_counter() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    let bo = harness.user("bo");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.verify_rsvp(&ada).await.unwrap();
    harness.service.join_waitlist(&bo).await.unwrap();
    harness.claims.issue_token(&UserId::new("ada"), "ada-token").unwrap();

    let outcome = harness.service.withdraw_rsvp(&ada).await.unwrap();

    assert_eq!(
        outcome,
        WithdrawOutcome {
            withdrawn: true,
            promoted: Some(UserId::new("bo")),
        }
    );
    assert_eq!(harness.counter(), 0);
    assert_eq!(harness.reserved(), vec![UserId::new("bo")]);
    assert!(harness.waitlisted().is_empty());
    assert!(!harness.claims_of("ada").await.rsvp_verified);
    assert_eq!(harness.claims.session_count(&UserId::new("ada")).unwrap(), 0);

    harness.notifier.wait_for(4).await;
    assert!(
        harness
            .notifier
            .kinds_sent_to(&email_of("bo"))
            .contains(&NotificationKind::SpotAvailable)
    );
}

#[tokio::test]
async fn withdraw_without_waiters_returns_the_spot_to_the_counter() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.verify_rsvp(&ada).await.unwrap();

    let outcome = harness.service.withdraw_rsvp(&ada).await.unwrap();

    assert!(outcome.withdrawn);
    assert_eq!(outcome.promoted, None);
    assert_eq!(harness.counter(), 1);
}

#[tokio::test]
async fn withdraw_without_rsvp_is_a_no_op() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");

    let outcome = harness.service.withdraw_rsvp(&ada).await.unwrap();

    assert_eq!(outcome, WithdrawOutcome::default());
    assert_eq!(harness.counter(), 1);
}

#[tokio::test]
async fn withdraw_promotion_can_be_disabled() {
    let harness = TestHarness::with_environment(|env| env.with_promote_on_withdraw(false));
    harness.service.seed_capacity(1).await.unwrap();
    let ada = harness.user("ada");
    let bo = harness.user("bo");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.verify_rsvp(&ada).await.unwrap();
    harness.service.join_waitlist(&bo).await.unwrap();

    let outcome = harness.service.withdraw_rsvp(&ada).await.unwrap();

    assert!(outcome.withdrawn);
    assert_eq!(outcome.promoted, None);
    assert_eq!(harness.waitlisted(), vec![UserId::new("bo")]);
}

// ============================================================================
// Reclaim sweep, capacity release
// ============================================================================

#[tokio::test]
async fn sweep_promotes_in_join_order() {
    let harness = TestHarness::with_spots(2).await;
    for id in ["a1", "a2", "w1", "w2", "w3"] {
        harness.service.join_waitlist(&harness.user(id)).await.unwrap();
        harness.clock.advance(Duration::seconds(1));
    }

    harness.clock.advance(past_ttl());
    let report = harness.service.reclaim_expired(100).await.unwrap();

    assert_eq!(report.reclaimed, 2);
    assert_eq!(report.promoted, vec![UserId::new("w1"), UserId::new("w2")]);
    assert_eq!(harness.waitlisted(), vec![UserId::new("w3")]);
    assert_eq!(harness.counter(), 0);
}

#[tokio::test]
async fn sweep_without_waiters_restores_the_counter() {
    let harness = TestHarness::with_spots(1).await;
    harness.service.join_waitlist(&harness.user("ada")).await.unwrap();

    harness.clock.advance(past_ttl());
    let report = harness.service.reclaim_expired(100).await.unwrap();

    assert_eq!(report.reclaimed, 1);
    assert!(report.promoted.is_empty());
    assert_eq!(harness.counter(), 1);
}

#[tokio::test]
async fn sweep_leaves_live_reservations_alone() {
    let harness = TestHarness::with_spots(1).await;
    harness.service.join_waitlist(&harness.user("ada")).await.unwrap();

    let report = harness.service.reclaim_expired(100).await.unwrap();

    assert_eq!(report.examined, 0);
    assert_eq!(harness.reserved(), vec![UserId::new("ada")]);
}

#[tokio::test]
async fn concurrent_sweeps_reclaim_each_spot_once() {
    let harness = TestHarness::with_spots(3).await;
    for id in ["a", "b", "c"] {
        harness.service.join_waitlist(&harness.user(id)).await.unwrap();
    }
    harness.clock.advance(past_ttl());

    let (first, second) = tokio::join!(
        harness.service.reclaim_expired(100),
        harness.service.reclaim_expired(100)
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert_eq!(first.reclaimed + second.reclaimed, 3);
    assert_eq!(harness.counter(), 3);
}

#[tokio::test]
async fn released_capacity_drains_into_the_waitlist() {
    let harness = TestHarness::with_spots(0).await;
    for id in ["w1", "w2"] {
        harness.service.join_waitlist(&harness.user(id)).await.unwrap();
        harness.clock.advance(Duration::seconds(1));
    }

    let report = harness.service.release_capacity(3).await.unwrap();

    assert_eq!(report.promoted, vec![UserId::new("w1"), UserId::new("w2")]);
    assert_eq!(harness.counter(), 1);
    assert!(harness.waitlisted().is_empty());
}

#[tokio::test]
async fn seeding_is_create_only() {
    let harness = TestHarness::new();

    assert!(harness.service.seed_capacity(10).await.unwrap());
    assert!(!harness.service.seed_capacity(50).await.unwrap());
    assert_eq!(harness.counter(), 10);
}

// ============================================================================
// Claims failures after the ledger commit
// ============================================================================

#[tokio::test]
async fn join_retried_after_a_lost_claims_write_keeps_the_reservation() {
    init_test_tracing();
    let clean = TestHarness::with_spots(1).await;
    let expected = clean.service.join_waitlist(&clean.user("ada")).await.unwrap();

    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.faults.fail_next(ClaimsCall::Set, 1);

    let err = harness.service.join_waitlist(&ada).await.unwrap_err();
    assert!(matches!(err, AdmissionError::StoreUnavailable { .. }));
    assert!(!harness.claims_of("ada").await.has_joined_waitlist);

    let retried = harness.service.join_waitlist(&ada).await.unwrap();

    assert_eq!(retried, expected);
    assert_eq!(end_state(&harness, &["ada"]).await, end_state(&clean, &["ada"]).await);
    assert_eq!(harness.counter(), 0);
}

#[tokio::test]
async fn join_retried_after_a_lost_claims_write_keeps_the_queue_place() {
    let clean = TestHarness::with_spots(0).await;
    let expected = clean.service.join_waitlist(&clean.user("ada")).await.unwrap();

    let harness = TestHarness::with_spots(0).await;
    let ada = harness.user("ada");
    harness.faults.fail_next(ClaimsCall::Set, 1);

    harness.service.join_waitlist(&ada).await.unwrap_err();
    let retried = harness.service.join_waitlist(&ada).await.unwrap();

    assert_eq!(retried, expected);
    assert_eq!(end_state(&harness, &["ada"]).await, end_state(&clean, &["ada"]).await);
    assert_eq!(harness.waitlisted(), vec![UserId::new("ada")]);
}

#[tokio::test]
async fn verify_retried_after_a_lost_claims_write_keeps_the_spot() {
    init_test_tracing();
    let clean = TestHarness::with_spots(1).await;
    let clean_ada = clean.user("ada");
    clean.service.join_waitlist(&clean_ada).await.unwrap();
    clean.service.verify_rsvp(&clean_ada).await.unwrap();

    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.faults.fail_next(ClaimsCall::Set, 1);

    let err = harness.service.verify_rsvp(&ada).await.unwrap_err();
    assert!(matches!(err, AdmissionError::StoreUnavailable { .. }));
    assert!(harness.reserved().is_empty());
    assert_eq!(harness.attendees(), vec![UserId::new("ada")]);

    assert_eq!(
        harness.service.verify_rsvp(&ada).await.unwrap(),
        VerifyOutcome::Verified
    );
    assert_eq!(end_state(&harness, &["ada"]).await, end_state(&clean, &["ada"]).await);
    assert_eq!(
        harness.service.verify_rsvp(&ada).await.unwrap(),
        VerifyOutcome::AlreadyVerified
    );
    assert_eq!(
        harness.service.status(&UserId::new("ada")).await.unwrap(),
        AdmissionStatus::Verified
    );
}

#[tokio::test]
async fn withdraw_retried_after_a_failed_revocation_revokes_and_promotes() {
    init_test_tracing();
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    let bo = harness.user("bo");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.verify_rsvp(&ada).await.unwrap();
    harness.service.join_waitlist(&bo).await.unwrap();
    harness.claims.issue_token(&UserId::new("ada"), "ada-token").unwrap();
    harness.faults.fail_next(ClaimsCall::RevokeSessions, 1);

    let err = harness.service.withdraw_rsvp(&ada).await.unwrap_err();
    assert!(matches!(err, AdmissionError::StoreUnavailable { .. }));
    assert_eq!(harness.claims.session_count(&UserId::new("ada")).unwrap(), 1);
    assert_eq!(harness.attendees(), vec![UserId::new("ada")]);

    let outcome = harness.service.withdraw_rsvp(&ada).await.unwrap();

    assert_eq!(
        outcome,
        WithdrawOutcome {
            withdrawn: true,
            promoted: Some(UserId::new("bo")),
        }
    );
    assert_eq!(harness.claims.session_count(&UserId::new("ada")).unwrap(), 0);
    assert_eq!(harness.reserved(), vec![UserId::new("bo")]);
    assert!(harness.attendees().is_empty());
    assert_eq!(harness.counter(), 0);
}

#[tokio::test]
async fn withdraw_retried_after_any_claims_failure_matches_a_clean_withdraw() {
    async fn confirmed_with_waiter(harness: &TestHarness) {
        let ada = harness.user("ada");
        harness.service.join_waitlist(&ada).await.unwrap();
        harness.service.verify_rsvp(&ada).await.unwrap();
        harness.service.join_waitlist(&harness.user("bo")).await.unwrap();
    }

    let clean = TestHarness::with_spots(1).await;
    confirmed_with_waiter(&clean).await;
    let expected = clean.service.withdraw_rsvp(&clean.user("ada")).await.unwrap();
    let expected_state = end_state(&clean, &["ada", "bo"]).await;

    for call in [ClaimsCall::Set, ClaimsCall::RevokeSessions] {
        let harness = TestHarness::with_spots(1).await;
        confirmed_with_waiter(&harness).await;
        let ada = harness.user("ada");
        harness.faults.fail_next(call, 1);

        harness.service.withdraw_rsvp(&ada).await.unwrap_err();
        let retried = harness.service.withdraw_rsvp(&ada).await.unwrap();

        assert_eq!(retried, expected, "after a failed {call:?}");
        assert_eq!(end_state(&harness, &["ada", "bo"]).await, expected_state, "after a failed {call:?}");
    }
}

#[tokio::test]
async fn repeated_withdraw_releases_once_and_still_revokes() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.verify_rsvp(&ada).await.unwrap();
    harness.service.withdraw_rsvp(&ada).await.unwrap();
    assert_eq!(harness.counter(), 1);

    harness.claims.issue_token(&UserId::new("ada"), "late-token").unwrap();
    let again = harness.service.withdraw_rsvp(&ada).await.unwrap();

    assert_eq!(again, WithdrawOutcome::default());
    assert_eq!(harness.counter(), 1);
    assert_eq!(harness.claims.session_count(&UserId::new("ada")).unwrap(), 0);
}

#[tokio::test]
async fn concurrent_withdrawals_release_the_spot_once() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();
    harness.service.verify_rsvp(&ada).await.unwrap();

    let (first, second) = tokio::join!(
        harness.service.withdraw_rsvp(&ada),
        harness.service.withdraw_rsvp(&ada)
    );

    assert!(first.unwrap().withdrawn || second.unwrap().withdrawn);
    assert_eq!(harness.counter(), 1);
    assert!(harness.attendees().is_empty());
}

// ============================================================================
// Status, failures
// ============================================================================

/// Ledger that promotes the subject off the waitlist right before its first
/// position query, as a concurrent sweep would.
struct PromotingLedger {
    inner: InMemoryLedger,
    promoted: AtomicBool,
}

impl AdmissionLedger for PromotingLedger {
    fn snapshot(&self, subject: &UserId) -> BoxFuture<'_, Result<LedgerSnapshot, LedgerError>> {
        self.inner.snapshot(subject)
    }

    fn commit(
        &self,
        read_set: ReadSet,
        writes: Vec<LedgerWrite>,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        self.inner.commit(read_set, writes)
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<SpotReservation>, LedgerError>> {
        self.inner.expired_reservations(now, limit)
    }

    fn waitlist_position(
        &self,
        user_id: &UserId,
    ) -> BoxFuture<'_, Result<Option<u64>, LedgerError>> {
        let user_id = user_id.clone();
        Box::pin(async move {
            if !self.promoted.swap(true, Ordering::SeqCst) {
                let reservation =
                    SpotReservation::grant(user_id.clone(), test_time(), Duration::hours(24));
                self.inner
                    .commit(
                        ReadSet::new(),
                        vec![
                            LedgerWrite::RemoveWaitlistEntry {
                                user_id: user_id.clone(),
                            },
                            LedgerWrite::InsertReservation(reservation),
                        ],
                    )
                    .await?;
            }
            self.inner.waitlist_position(&user_id).await
        })
    }

    fn seed_counter(&self, count: u32) -> BoxFuture<'_, Result<bool, LedgerError>> {
        self.inner.seed_counter(count)
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), LedgerError>> {
        self.inner.ping()
    }
}

#[tokio::test]
async fn status_rereads_when_promoted_during_the_position_query() {
    let harness = TestHarness::with_spots(0).await;
    let ada = harness.user("ada");
    harness.service.join_waitlist(&ada).await.unwrap();

    let env = AdmissionEnvironment {
        ledger: Arc::new(PromotingLedger {
            inner: harness.ledger.clone(),
            promoted: AtomicBool::new(false),
        }),
        ..harness.service.environment().clone()
    };
    let service = AdmissionService::new(env);

    assert_eq!(
        service.status(&UserId::new("ada")).await.unwrap(),
        AdmissionStatus::Reserved {
            expires_at: test_time() + Duration::hours(24)
        }
    );
}

#[tokio::test]
async fn status_reports_queue_position() {
    let harness = TestHarness::with_spots(0).await;
    for id in ["w1", "w2", "w3"] {
        harness.service.join_waitlist(&harness.user(id)).await.unwrap();
        harness.clock.advance(Duration::seconds(1));
    }

    let status = harness.service.status(&UserId::new("w2")).await.unwrap();

    assert!(matches!(status, AdmissionStatus::Waitlisted { position: 2, .. }));
    let _ = harness.user("new");
    assert_eq!(
        harness.service.status(&UserId::new("new")).await.unwrap(),
        AdmissionStatus::None
    );
}

#[tokio::test]
async fn notification_failure_does_not_roll_back() {
    let harness = TestHarness::with_spots(1).await;
    harness.notifier.fail_deliveries(true);
    let ada = harness.user("ada");

    let outcome = harness.service.join_waitlist(&ada).await.unwrap();

    assert!(matches!(outcome, JoinOutcome::Reserved { .. }));
    assert_eq!(harness.reserved(), vec![UserId::new("ada")]);
    assert!(harness.notifier.sent().is_empty());
}

#[tokio::test]
async fn ledger_outage_surfaces_as_store_unavailable() {
    let harness = TestHarness::with_spots(1).await;
    let ada = harness.user("ada");
    harness.ledger.set_unavailable(true);

    let err = harness.service.join_waitlist(&ada).await.unwrap_err();

    assert!(matches!(err, AdmissionError::StoreUnavailable { .. }));
    assert!(harness.service.ready().await.is_err());

    harness.ledger.set_unavailable(false);
    assert!(harness.ledger.ping().await.is_ok());
    assert!(!harness.claims_of("ada").await.has_joined_waitlist);
}
