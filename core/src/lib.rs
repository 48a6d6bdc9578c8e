//! # Admission Core
//!
//! Core traits and types for RSVP waitlist admission control.
//!
//! A fixed pool of spots is handed out first-come-first-served. Once the pool
//! is empty, newcomers join a FIFO waitlist; whenever a spot comes back (a
//! reservation expires, an attendee withdraws, an operator releases capacity)
//! the oldest waiting user receives a time-boxed reservation that must be
//! confirmed before it lapses.
//!
//! ## Building blocks
//!
//! - **State**: [`admission::AdmissionState`], a transactional ledger snapshot
//! - **Action**: [`admission::AdmissionAction`], the ledger-level transitions
//! - **Reducer**: [`admission::AdmissionReducer`], pure decision logic
//! - **Effect**: [`effect::Effect`], ledger writes, claims patches, notifications
//! - **Environment**: [`types::AdmissionPolicy`] for the reducer, and the
//!   [`ledger::AdmissionLedger`], [`claims::ClaimsStore`] and
//!   [`notification::NotificationDispatcher`] seams for the runtime
//!
//! Every state transition is one optimistic ledger transaction decided by the
//! pure reducer; the runtime crate owns all I/O. Notifications are sent after
//! commit and never roll a transition back.
//!
//! ## Example
//!
//! ```
//! use admission_core::admission::{AdmissionAction, AdmissionReducer, AdmissionState, Outcome};
//! use admission_core::ledger::LedgerSnapshot;
//! use admission_core::reducer::Reducer;
//! use admission_core::types::{AdmissionPolicy, SpotCounter, UserId};
//! use admission_core::Utc;
//!
//! let mut snapshot = LedgerSnapshot::empty(UserId::new("alice"), Utc::now());
//! snapshot.counter = SpotCounter::new(1);
//! let mut state = AdmissionState::new(snapshot);
//!
//! let effects = AdmissionReducer.reduce(
//!     &mut state,
//!     AdmissionAction::JoinWaitlist,
//!     &AdmissionPolicy::default(),
//! );
//!
//! assert!(matches!(state.outcome, Some(Outcome::Reserved { .. })));
//! assert_eq!(state.ledger.counter.count(), 0);
//! assert!(!effects.is_empty());
//! ```

pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// The pure decision step.
pub mod reducer {
    use super::effect::Effect;

    /// Decides how a state reacts to an action.
    ///
    /// `reduce` mutates `state` to mirror its decision and describes
    /// everything that must happen outside the process as [`Effect`]s. It
    /// performs no I/O, so the same inputs always yield the same outputs.
    pub trait Reducer {
        /// What the reducer decides over
        type State;
        /// What happened
        type Action;
        /// Read-only inputs such as policies
        type Environment;

        /// Apply `action` to `state`.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Vec<Effect>;
    }
}

/// Injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of "now", swapped for a manual clock in tests so expiry is
    /// deterministic.
    pub trait Clock: Send + Sync {
        /// Current instant.
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub mod admission;
pub mod claims;
pub mod effect;
pub mod error;
pub mod ledger;
pub mod notification;
pub mod types;

pub use admission::{AdmissionAction, AdmissionReducer, AdmissionState, Outcome};
pub use claims::{AdmissionClaims, CallerIdentity, ClaimsError, ClaimsPatch, ClaimsStore};
pub use effect::{Effect, EffectPlan};
pub use error::{AdmissionError, Result};
pub use ledger::{AdmissionLedger, LedgerError, LedgerSnapshot, LedgerWrite};
pub use notification::{Notification, NotificationDispatcher, NotificationKind};
pub use types::{AdmissionPolicy, AdmissionStatus, UserId};
