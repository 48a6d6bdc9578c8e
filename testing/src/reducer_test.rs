//! Given-When-Then harness for reducers.
//!
//! ```
//! use admission_core::admission::{AdmissionAction, AdmissionReducer, AdmissionState, Outcome};
//! use admission_core::ledger::LedgerSnapshot;
//! use admission_core::types::{AdmissionPolicy, UserId};
//! use admission_testing::{ReducerTest, mocks::test_time};
//!
//! ReducerTest::new(AdmissionReducer)
//!     .with_env(AdmissionPolicy::default())
//!     .given_state(AdmissionState::new(LedgerSnapshot::empty(UserId::new("ada"), test_time())))
//!     .when_action(AdmissionAction::VerifyRsvp)
//!     .then_state(|state| {
//!         assert_eq!(state.outcome, Some(Outcome::NoReservation));
//!     })
//!     .then_effects(|effects| {
//!         assert!(effects.is_empty());
//!     })
//!     .run();
//! ```

#![allow(clippy::module_name_repetitions)]

use admission_core::{effect::Effect, reducer::Reducer};

enum Check<S> {
    State(Box<dyn FnOnce(&S)>),
    Effects(Box<dyn FnOnce(&[Effect])>),
}

/// One reducer step described as Given (state, environment), When (action),
/// Then (checks on the resulting state and effects).
pub struct ReducerTest<R: Reducer> {
    reducer: R,
    env: Option<R::Environment>,
    given: Option<R::State>,
    when: Option<R::Action>,
    checks: Vec<Check<R::State>>,
}

impl<R: Reducer> ReducerTest<R> {
    /// Start a test for `reducer`.
    #[must_use]
    pub const fn new(reducer: R) -> Self {
        Self {
            reducer,
            env: None,
            given: None,
            when: None,
            checks: Vec::new(),
        }
    }

    /// Environment passed to the reducer.
    #[must_use]
    pub fn with_env(mut self, env: R::Environment) -> Self {
        self.env = Some(env);
        self
    }

    /// Initial state.
    #[must_use]
    pub fn given_state(mut self, state: R::State) -> Self {
        self.given = Some(state);
        self
    }

    /// Action under test.
    #[must_use]
    pub fn when_action(mut self, action: R::Action) -> Self {
        self.when = Some(action);
        self
    }

    /// Check the state after the action.
    #[must_use]
    pub fn then_state(mut self, check: impl FnOnce(&R::State) + 'static) -> Self {
        self.checks.push(Check::State(Box::new(check)));
        self
    }

    /// Check the effects the action produced.
    #[must_use]
    pub fn then_effects(mut self, check: impl FnOnce(&[Effect]) + 'static) -> Self {
        self.checks.push(Check::Effects(Box::new(check)));
        self
    }

    /// Reduce once and run the checks in the order they were added.
    ///
    /// # Panics
    ///
    /// If the state, action or environment was never given, or a check fails.
    #[allow(clippy::panic)]
    pub fn run(self) {
        let (Some(mut state), Some(action), Some(env)) = (self.given, self.when, self.env) else {
            panic!("ReducerTest needs given_state(), when_action() and with_env()");
        };

        let effects = self.reducer.reduce(&mut state, action, &env);

        for check in self.checks {
            match check {
                Check::State(check) => check(&state),
                Check::Effects(check) => check(&effects),
            }
        }
    }
}

/// Assertions over admission effects.
pub mod assertions {
    use admission_core::claims::ClaimsPatch;
    use admission_core::effect::Effect;
    use admission_core::ledger::LedgerWrite;
    use admission_core::notification::NotificationKind;
    use admission_core::types::UserId;

    /// Assert that nothing happens.
    ///
    /// # Panics
    ///
    /// If any effect other than [`Effect::None`] is present.
    pub fn assert_no_effects(effects: &[Effect]) {
        assert!(
            effects.iter().all(|e| matches!(e, Effect::None)),
            "Expected no effects, found {effects:?}"
        );
    }

    /// Assert that no ledger document is written.
    ///
    /// # Panics
    ///
    /// If any effect is a ledger write.
    pub fn assert_no_writes(effects: &[Effect]) {
        assert!(
            !effects.iter().any(Effect::is_ledger_write),
            "Expected no ledger writes, found {effects:?}"
        );
    }

    /// Ledger writes in effect order.
    #[must_use]
    pub fn writes(effects: &[Effect]) -> Vec<&LedgerWrite> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Ledger(write) => Some(write),
                _ => None,
            })
            .collect()
    }

    /// Assert the counter is written exactly once, with `count`.
    ///
    /// # Panics
    ///
    /// If the counter is not written, written twice, or with another value.
    pub fn assert_counter_written(effects: &[Effect], count: u32) {
        let puts: Vec<u32> = writes(effects)
            .into_iter()
            .filter_map(|w| match w {
                LedgerWrite::PutCounter(counter) => Some(counter.count()),
                _ => None,
            })
            .collect();
        assert_eq!(puts, vec![count], "Expected one counter write of {count}");
    }

    /// Assert a reservation is granted to `user_id`.
    ///
    /// # Panics
    ///
    /// If no such reservation insert is present.
    pub fn assert_grants(effects: &[Effect], user_id: &UserId) {
        assert!(
            writes(effects)
                .iter()
                .any(|w| matches!(w, LedgerWrite::InsertReservation(r) if &r.user_id == user_id)),
            "Expected a reservation for {user_id}, found {effects:?}"
        );
    }

    /// Assert a `kind` notification goes to `user_id`.
    ///
    /// # Panics
    ///
    /// If no such notification is present.
    pub fn assert_notifies(effects: &[Effect], user_id: &UserId, kind: NotificationKind) {
        assert!(
            effects.iter().any(|e| matches!(
                e,
                Effect::Notify { user_id: u, kind: k } if u == user_id && *k == kind
            )),
            "Expected {kind} notification for {user_id}, found {effects:?}"
        );
    }

    /// Assert `patch` is applied to the claims of `user_id`.
    ///
    /// # Panics
    ///
    /// If no such claims patch is present.
    pub fn assert_patches_claims(effects: &[Effect], user_id: &UserId, patch: ClaimsPatch) {
        assert!(
            effects.iter().any(|e| matches!(
                e,
                Effect::PatchClaims { user_id: u, patch: p } if u == user_id && *p == patch
            )),
            "Expected claims patch {patch:?} for {user_id}, found {effects:?}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::assertions::{assert_counter_written, assert_no_effects, assert_no_writes};
    use super::*;
    use crate::mocks::test_time;
    use admission_core::admission::{AdmissionAction, AdmissionReducer, AdmissionState, Outcome};
    use admission_core::ledger::LedgerSnapshot;
    use admission_core::types::{AdmissionPolicy, SpotCounter, UserId};
    use std::cell::Cell;
    use std::rc::Rc;

    fn snapshot(spots: u32) -> AdmissionState {
        let mut ledger = LedgerSnapshot::empty(UserId::new("ada"), test_time());
        ledger.counter = SpotCounter::new(spots);
        AdmissionState::new(ledger)
    }

    #[test]
    fn checks_see_the_reduced_state_and_effects() {
        ReducerTest::new(AdmissionReducer)
            .with_env(AdmissionPolicy::default())
            .given_state(snapshot(1))
            .when_action(AdmissionAction::JoinWaitlist)
            .then_state(|state| assert_eq!(state.ledger.counter.count(), 0))
            .then_effects(|effects| assert_counter_written(effects, 0))
            .run();
    }

    #[test]
    fn checks_run_in_order() {
        let seen = Rc::new(Cell::new(0));
        let (first, second) = (Rc::clone(&seen), Rc::clone(&seen));

        ReducerTest::new(AdmissionReducer)
            .with_env(AdmissionPolicy::default())
            .given_state(snapshot(0))
            .when_action(AdmissionAction::VerifyRsvp)
            .then_effects(move |_| first.set(first.get() * 10 + 1))
            .then_state(move |_| second.set(second.get() * 10 + 2))
            .run();

        assert_eq!(seen.get(), 12);
    }

    #[test]
    fn no_effect_assertions_accept_empty_plans() {
        ReducerTest::new(AdmissionReducer)
            .with_env(AdmissionPolicy::default())
            .given_state(snapshot(0))
            .when_action(AdmissionAction::VerifyRsvp)
            .then_state(|state| assert_eq!(state.outcome, Some(Outcome::NoReservation)))
            .then_effects(|effects| {
                assert_no_effects(effects);
                assert_no_writes(effects);
            })
            .run();
    }

    #[test]
    #[should_panic(expected = "ReducerTest needs")]
    fn missing_action_panics() {
        ReducerTest::new(AdmissionReducer)
            .with_env(AdmissionPolicy::default())
            .given_state(snapshot(0))
            .run();
    }
}
