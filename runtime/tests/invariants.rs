//! Ledger invariants under arbitrary operation sequences.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use admission_core::claims::{CallerIdentity, ClaimsStore};
use admission_core::types::UserId;
use admission_testing::TestHarness;
use admission_testing::properties::{Step, arb_scenario};
use chrono::Duration;
use proptest::prelude::*;
use std::collections::HashSet;

const USERS: usize = 6;
const SPOTS: u32 = 2;

async fn verified_claims(harness: &TestHarness, users: &[CallerIdentity]) -> Vec<UserId> {
    let mut verified = Vec::new();
    for user in users {
        if harness.claims.get(user.user_id()).await.unwrap().rsvp_verified {
            verified.push(user.user_id().clone());
        }
    }
    verified.sort();
    verified
}

async fn run_scenario(steps: Vec<Step>) -> Result<(), TestCaseError> {
    let harness = TestHarness::with_spots(SPOTS).await;
    let users: Vec<CallerIdentity> = (0..USERS).map(|i| harness.user(&format!("u{i}"))).collect();

    for step in steps {
        // Business errors are expected along the way; only invariants matter.
        match step {
            Step::Join(i) => {
                let _ = harness.service.join_waitlist(&users[i]).await;
            },
            Step::Verify(i) => {
                let _ = harness.service.verify_rsvp(&users[i]).await;
            },
            Step::Withdraw(i) => {
                let _ = harness.service.withdraw_rsvp(&users[i]).await;
            },
            Step::Advance(hours) => harness.clock.advance(Duration::hours(hours)),
            Step::Sweep => {
                harness.service.reclaim_expired(100).await.unwrap();
            },
        }

        // Mutual exclusivity: nobody is both waiting and holding a spot.
        let reserved: Vec<UserId> = harness.reserved();
        let waiting: HashSet<UserId> = harness.waitlisted().into_iter().collect();
        prop_assert!(reserved.iter().all(|u| !waiting.contains(u)));

        // At most one reservation per user.
        let distinct: HashSet<&UserId> = reserved.iter().collect();
        prop_assert_eq!(distinct.len(), reserved.len());

        // Capacity is conserved: free + held + confirmed == seeded.
        let held = u32::try_from(reserved.len()).unwrap();
        let attendees = harness.attendees();
        let confirmed = u32::try_from(attendees.len()).unwrap();
        prop_assert_eq!(harness.counter() + held + confirmed, SPOTS);

        // Without failures the claims agree with the ledger.
        prop_assert_eq!(verified_claims(&harness, &users).await, attendees);

        // Capacity is never parked while someone waits.
        prop_assert!(harness.counter() == 0 || waiting.is_empty());
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn admission_invariants_hold(steps in arb_scenario(USERS, 40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(run_scenario(steps))?;
    }
}
