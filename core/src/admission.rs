//! The admission reducer.
//!
//! Pure decision logic for the `NONE -> WAITLISTED -> RESERVED -> VERIFIED`
//! state machine. The reducer runs against a [`LedgerSnapshot`] taken inside
//! a transaction, mutates the snapshot to mirror its decisions, and returns
//! the [`Effect`]s that make them durable.
//!
//! Two rules keep the waitlist fair:
//!
//! - capacity coming back (expiry, withdrawal, release) goes to the oldest
//!   waitlisted user before it is parked in the counter;
//! - a joiner only takes a spot from the counter while nobody is waiting.
//!
//! A snapshot knows one waitlist head, so a transaction promotes at most one
//! user. Extra capacity is parked in the counter and moved onward by
//! [`AdmissionAction::DrainCounter`].
//!
//! Claims patches run after the commit and may be lost. Every action that
//! emits one repeats it when a retry finds the ledger already transitioned,
//! so re-running a failed call converges on the same state.

use crate::claims::ClaimsPatch;
use crate::effect::Effect;
use crate::ledger::{LedgerSnapshot, LedgerWrite};
use crate::notification::NotificationKind;
use crate::reducer::Reducer;
use crate::types::{AdmissionPolicy, Attendee, SpotReservation, UserId, WaitlistEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// State, actions, outcomes
// ============================================================================

/// Reducer state: the transactional snapshot plus the decision taken.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionState {
    /// Ledger view, updated in place as decisions are made.
    pub ledger: LedgerSnapshot,
    /// Set by every action.
    pub outcome: Option<Outcome>,
}

impl AdmissionState {
    /// Fresh state over a snapshot.
    #[must_use]
    pub const fn new(ledger: LedgerSnapshot) -> Self {
        Self {
            ledger,
            outcome: None,
        }
    }
}

/// Ledger-level admission actions. The subject is `state.ledger.subject`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionAction {
    /// Take a free spot or queue up.
    JoinWaitlist,
    /// Confirm the subject's reservation.
    VerifyRsvp,
    /// Drop the subject's attendee record.
    WithdrawRsvp {
        /// Whether the vacated spot goes back to the pool
        release: bool,
    },
    /// Reclaim the subject's expired reservations.
    ReclaimExpired,
    /// Return `spots` units of capacity to the pool.
    ReleaseCapacity {
        /// Number of spots
        spots: u32,
    },
    /// Hand one parked spot to the waitlist head, if both exist.
    DrainCounter,
}

impl AdmissionAction {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinWaitlist => "join_waitlist",
            Self::VerifyRsvp => "verify_rsvp",
            Self::WithdrawRsvp { .. } => "withdraw_rsvp",
            Self::ReclaimExpired => "reclaim_expired",
            Self::ReleaseCapacity { .. } => "release_capacity",
            Self::DrainCounter => "drain_counter",
        }
    }
}

/// What the reducer decided.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A spot was granted to the subject.
    Reserved {
        /// Confirmation deadline
        expires_at: DateTime<Utc>,
    },
    /// The subject was queued.
    Waitlisted {
        /// Join time
        joined_at: DateTime<Utc>,
    },
    /// The subject already had a waitlist entry.
    AlreadyWaitlisted {
        /// Join time of the existing entry
        joined_at: DateTime<Utc>,
    },
    /// The subject already went through the waitlist and lost the spot.
    Forfeited,
    /// The subject's reservation was confirmed, now or by an earlier call.
    Verified,
    /// The subject's attendee record was removed.
    Withdrawn {
        /// Who received the vacated spot
        promoted: Option<UserId>,
    },
    /// The subject holds no attendee record.
    NotAttending,
    /// The subject holds no reservation.
    NoReservation,
    /// The subject's reservation had lapsed; it was removed and capacity returned.
    Expired {
        /// Spots returned
        released: u32,
        /// Who received the first returned spot
        promoted: Option<UserId>,
    },
    /// Expired reservations were reclaimed by the sweep.
    Reclaimed {
        /// Spots returned
        released: u32,
        /// Who received the first returned spot
        promoted: Option<UserId>,
    },
    /// Capacity was returned.
    Released {
        /// Who received the first returned spot
        promoted: Option<UserId>,
        /// Spots parked in the counter
        parked: u32,
    },
    /// A parked spot went to the waitlist head.
    Drained {
        /// Promoted user
        promoted: UserId,
    },
    /// Nothing to do.
    Unchanged,
}

impl Outcome {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Reserved { .. } => "reserved",
            Self::Waitlisted { .. } => "waitlisted",
            Self::AlreadyWaitlisted { .. } => "already_waitlisted",
            Self::Forfeited => "forfeited",
            Self::Verified => "verified",
            Self::Withdrawn { .. } => "withdrawn",
            Self::NotAttending => "not_attending",
            Self::NoReservation => "no_reservation",
            Self::Expired { .. } => "expired",
            Self::Reclaimed { .. } => "reclaimed",
            Self::Released { .. } => "released",
            Self::Drained { .. } => "drained",
            Self::Unchanged => "unchanged",
        }
    }

    /// User promoted off the waitlist by this transaction, if any.
    #[must_use]
    pub const fn promoted(&self) -> Option<&UserId> {
        match self {
            Self::Expired { promoted, .. }
            | Self::Reclaimed { promoted, .. }
            | Self::Released { promoted, .. }
            | Self::Withdrawn { promoted } => promoted.as_ref(),
            Self::Drained { promoted } => Some(promoted),
            _ => None,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the admission state machine.
#[derive(Clone, Copy, Debug, Default)]
pub struct AdmissionReducer;

impl AdmissionReducer {
    /// Create the reducer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn join_waitlist(state: &mut AdmissionState, policy: &AdmissionPolicy) -> Vec<Effect> {
        let ledger = &mut state.ledger;
        let user = ledger.subject.clone();
        let now = ledger.observed_at;
        let mark_joined = Effect::PatchClaims {
            user_id: user.clone(),
            patch: ClaimsPatch::joined_waitlist(),
        };

        // A duplicate submission whose first attempt already committed. The
        // claims patch is repeated so a lost post-commit write heals itself.
        if ledger.attendee.is_some() {
            state.outcome = Some(Outcome::Verified);
            return vec![
                mark_joined,
                Effect::PatchClaims {
                    user_id: user,
                    patch: ClaimsPatch::rsvp_verified(true),
                },
            ];
        }
        if let Some(existing) = ledger.latest_reservation() {
            state.outcome = Some(if existing.is_expired(now) {
                Outcome::Forfeited
            } else {
                Outcome::Reserved {
                    expires_at: existing.expires_at,
                }
            });
            return vec![mark_joined];
        }
        if let Some(existing) = &ledger.waitlist_entry {
            state.outcome = Some(Outcome::AlreadyWaitlisted {
                joined_at: existing.joined_at,
            });
            return vec![mark_joined];
        }

        if ledger.waitlist_head.is_none() && ledger.counter.decrement_if_positive() {
            let reservation = SpotReservation::grant(user.clone(), now, policy.reservation_ttl);
            state.outcome = Some(Outcome::Reserved {
                expires_at: reservation.expires_at,
            });
            ledger.reservations.push(reservation.clone());
            return vec![
                Effect::Ledger(LedgerWrite::PutCounter(ledger.counter)),
                Effect::Ledger(LedgerWrite::InsertReservation(reservation)),
                mark_joined,
                Effect::Notify {
                    user_id: user,
                    kind: NotificationKind::SpotAvailable,
                },
            ];
        }

        let entry = WaitlistEntry::new(user.clone(), now);
        state.outcome = Some(Outcome::Waitlisted { joined_at: now });
        if ledger.waitlist_head.is_none() {
            ledger.waitlist_head = Some(entry.clone());
        }
        ledger.waitlist_entry = Some(entry.clone());
        vec![
            Effect::Ledger(LedgerWrite::InsertWaitlistEntry(entry)),
            mark_joined,
            Effect::Notify {
                user_id: user,
                kind: NotificationKind::JoinedWaitlist,
            },
        ]
    }

    fn verify_rsvp(state: &mut AdmissionState, policy: &AdmissionPolicy) -> Vec<Effect> {
        let ledger = &mut state.ledger;
        let user = ledger.subject.clone();
        let now = ledger.observed_at;

        let confirm = Effect::PatchClaims {
            user_id: user.clone(),
            patch: ClaimsPatch::rsvp_verified(true),
        };

        let Some(latest) = ledger.latest_reservation().cloned() else {
            // Confirmed by an earlier call whose claims write was lost.
            if ledger.attendee.is_some() {
                state.outcome = Some(Outcome::Verified);
                return vec![confirm];
            }
            state.outcome = Some(Outcome::NoReservation);
            return Vec::new();
        };

        let mut effects = Vec::new();
        if ledger.waitlist_entry.take().is_some() {
            effects.push(Effect::Ledger(LedgerWrite::RemoveWaitlistEntry {
                user_id: user.clone(),
            }));
        }
        let held = Self::delete_reservations(ledger, &mut effects, |_| true);

        if latest.is_expired(now) {
            // `latest` has the furthest expiry, so every held spot lapsed.
            let promoted = Self::return_spots(ledger, held, policy, &mut effects).0;
            state.outcome = Some(Outcome::Expired {
                released: held,
                promoted,
            });
            return effects;
        }

        // One spot is consumed by the confirmation; stale duplicates go back.
        Self::return_spots(ledger, held.saturating_sub(1), policy, &mut effects);
        let attendee = Attendee::new(user.clone(), now);
        ledger.attendee = Some(attendee.clone());
        effects.push(Effect::Ledger(LedgerWrite::PutAttendee(attendee)));
        effects.push(confirm);
        effects.push(Effect::Notify {
            user_id: user,
            kind: NotificationKind::RsvpConfirmed,
        });
        state.outcome = Some(Outcome::Verified);
        effects
    }

    fn withdraw_rsvp(
        state: &mut AdmissionState,
        release: bool,
        policy: &AdmissionPolicy,
    ) -> Vec<Effect> {
        let ledger = &mut state.ledger;
        let Some(attendee) = ledger.attendee.take() else {
            state.outcome = Some(Outcome::NotAttending);
            return Vec::new();
        };

        let mut effects = vec![Effect::Ledger(LedgerWrite::RemoveAttendee {
            user_id: attendee.user_id,
        })];
        let promoted = if release {
            Self::return_spots(ledger, 1, policy, &mut effects).0
        } else {
            None
        };
        state.outcome = Some(Outcome::Withdrawn { promoted });
        effects
    }

    fn reclaim_expired(state: &mut AdmissionState, policy: &AdmissionPolicy) -> Vec<Effect> {
        let ledger = &mut state.ledger;
        let now = ledger.observed_at;
        let mut effects = Vec::new();

        let released = Self::delete_reservations(ledger, &mut effects, |r| r.is_expired(now));
        if released == 0 {
            state.outcome = Some(Outcome::Unchanged);
            return effects;
        }
        if ledger.waitlist_entry.take().is_some() {
            effects.push(Effect::Ledger(LedgerWrite::RemoveWaitlistEntry {
                user_id: ledger.subject.clone(),
            }));
        }

        let promoted = Self::return_spots(ledger, released, policy, &mut effects).0;
        state.outcome = Some(Outcome::Reclaimed { released, promoted });
        effects
    }

    fn release_capacity(
        state: &mut AdmissionState,
        spots: u32,
        policy: &AdmissionPolicy,
    ) -> Vec<Effect> {
        let mut effects = Vec::new();
        if spots == 0 {
            state.outcome = Some(Outcome::Unchanged);
            return effects;
        }
        let (promoted, parked) = Self::return_spots(&mut state.ledger, spots, policy, &mut effects);
        state.outcome = Some(Outcome::Released { promoted, parked });
        effects
    }

    fn drain_counter(state: &mut AdmissionState, policy: &AdmissionPolicy) -> Vec<Effect> {
        let ledger = &mut state.ledger;
        let Some(head) = ledger.promotable_head().cloned() else {
            state.outcome = Some(Outcome::Unchanged);
            return Vec::new();
        };
        if !ledger.counter.decrement_if_positive() {
            state.outcome = Some(Outcome::Unchanged);
            return Vec::new();
        }

        let mut effects = vec![Effect::Ledger(LedgerWrite::PutCounter(ledger.counter))];
        let promoted = Self::promote(ledger, head, policy, &mut effects);
        state.outcome = Some(Outcome::Drained { promoted });
        effects
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Delete the subject's reservations matching `predicate`; returns how many.
    fn delete_reservations(
        ledger: &mut LedgerSnapshot,
        effects: &mut Vec<Effect>,
        predicate: impl Fn(&SpotReservation) -> bool,
    ) -> u32 {
        let mut deleted = 0_u32;
        ledger.reservations.retain(|reservation| {
            if !predicate(reservation) {
                return true;
            }
            effects.push(Effect::Ledger(LedgerWrite::DeleteReservation {
                id: reservation.id,
                user_id: reservation.user_id.clone(),
            }));
            deleted = deleted.saturating_add(1);
            false
        });
        deleted
    }

    /// Return capacity: waitlist head first, remainder to the counter.
    fn return_spots(
        ledger: &mut LedgerSnapshot,
        spots: u32,
        policy: &AdmissionPolicy,
        effects: &mut Vec<Effect>,
    ) -> (Option<UserId>, u32) {
        if spots == 0 {
            return (None, 0);
        }

        let mut parked = spots;
        let promoted = ledger.promotable_head().cloned().map(|head| {
            parked -= 1;
            Self::promote(ledger, head, policy, effects)
        });

        if parked > 0 {
            ledger.counter.increment(parked);
            effects.push(Effect::Ledger(LedgerWrite::PutCounter(ledger.counter)));
        }
        (promoted, parked)
    }

    /// Move `head` from the waitlist into a fresh reservation.
    fn promote(
        ledger: &mut LedgerSnapshot,
        head: WaitlistEntry,
        policy: &AdmissionPolicy,
        effects: &mut Vec<Effect>,
    ) -> UserId {
        let reservation =
            SpotReservation::grant(head.user_id.clone(), ledger.observed_at, policy.reservation_ttl);
        // The next head is unknown until the next snapshot.
        ledger.waitlist_head = None;

        effects.push(Effect::Ledger(LedgerWrite::RemoveWaitlistEntry {
            user_id: head.user_id.clone(),
        }));
        effects.push(Effect::Ledger(LedgerWrite::InsertReservation(reservation)));
        effects.push(Effect::Notify {
            user_id: head.user_id.clone(),
            kind: NotificationKind::SpotAvailable,
        });
        head.user_id
    }
}

impl Reducer for AdmissionReducer {
    type State = AdmissionState;
    type Action = AdmissionAction;
    type Environment = AdmissionPolicy;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Vec<Effect> {
        match action {
            AdmissionAction::JoinWaitlist => Self::join_waitlist(state, env),
            AdmissionAction::VerifyRsvp => Self::verify_rsvp(state, env),
            AdmissionAction::WithdrawRsvp { release } => Self::withdraw_rsvp(state, release, env),
            AdmissionAction::ReclaimExpired => Self::reclaim_expired(state, env),
            AdmissionAction::ReleaseCapacity { spots } => Self::release_capacity(state, spots, env),
            AdmissionAction::DrainCounter => Self::drain_counter(state, env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SpotCounter;

    fn state_for(user: &str, count: u32) -> AdmissionState {
        let mut ledger = LedgerSnapshot::empty(UserId::new(user), Utc::now());
        ledger.counter = SpotCounter::new(count);
        AdmissionState::new(ledger)
    }

    #[test]
    fn join_never_jumps_an_existing_queue() {
        let mut state = state_for("late", 1);
        state.ledger.waitlist_head = Some(WaitlistEntry::new(UserId::new("early"), Utc::now()));

        let effects = AdmissionReducer.reduce(
            &mut state,
            AdmissionAction::JoinWaitlist,
            &AdmissionPolicy::default(),
        );

        assert!(matches!(state.outcome, Some(Outcome::Waitlisted { .. })));
        assert_eq!(state.ledger.counter.count(), 1);
        assert!(
            !effects
                .iter()
                .any(|e| matches!(e, Effect::Ledger(LedgerWrite::PutCounter(_))))
        );
    }

    #[test]
    fn withdraw_without_attendee_record_changes_nothing() {
        let mut state = state_for("ada", 0);
        let effects = AdmissionReducer.reduce(
            &mut state,
            AdmissionAction::WithdrawRsvp { release: true },
            &AdmissionPolicy::default(),
        );
        assert!(effects.is_empty());
        assert_eq!(state.outcome, Some(Outcome::NotAttending));
    }

    #[test]
    fn release_of_zero_spots_is_a_no_op() {
        let mut state = state_for("system", 0);
        let effects = AdmissionReducer.reduce(
            &mut state,
            AdmissionAction::ReleaseCapacity { spots: 0 },
            &AdmissionPolicy::default(),
        );
        assert!(effects.is_empty());
        assert_eq!(state.outcome, Some(Outcome::Unchanged));
    }

    #[test]
    fn outcome_labels_are_snake_case() {
        assert_eq!(
            Outcome::AlreadyWaitlisted { joined_at: Utc::now() }.label(),
            "already_waitlisted"
        );
        assert_eq!(AdmissionAction::VerifyRsvp.name(), "verify_rsvp");
    }
}
