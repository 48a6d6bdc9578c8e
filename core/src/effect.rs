//! Effect descriptions returned by the admission reducer.
//!
//! Effects are values, not execution. The runtime commits every
//! [`Effect::Ledger`] write in one atomic transaction and only then runs the
//! follow-ups: claims patches are awaited, notifications are spawned and
//! forgotten.

use crate::claims::ClaimsPatch;
use crate::ledger::LedgerWrite;
use crate::notification::NotificationKind;
use crate::types::UserId;

/// Side effect requested by a reducer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// No-op effect
    None,

    /// Document mutation, committed atomically with its siblings.
    Ledger(LedgerWrite),

    /// Claims update, applied after commit.
    PatchClaims {
        /// Whose claims
        user_id: UserId,
        /// What to change
        patch: ClaimsPatch,
    },

    /// Best-effort message, sent after commit.
    Notify {
        /// Recipient
        user_id: UserId,
        /// Message type
        kind: NotificationKind,
    },
}

impl Effect {
    /// Whether this effect must be part of the transaction.
    #[must_use]
    pub const fn is_ledger_write(&self) -> bool {
        matches!(self, Self::Ledger(_))
    }
}

/// Effects split by execution phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectPlan {
    /// Committed atomically.
    pub writes: Vec<LedgerWrite>,
    /// Run after a successful commit, in order.
    pub follow_ups: Vec<Effect>,
}

impl EffectPlan {
    /// Partition reducer output into the transactional and post-commit phases.
    #[must_use]
    pub fn from_effects(effects: Vec<Effect>) -> Self {
        let mut plan = Self::default();
        for effect in effects {
            match effect {
                Effect::None => {},
                Effect::Ledger(write) => plan.writes.push(write),
                other => plan.follow_ups.push(other),
            }
        }
        plan
    }

    /// Users who receive a notification under this plan.
    #[must_use]
    pub fn notified(&self) -> Vec<(&UserId, NotificationKind)> {
        self.follow_ups
            .iter()
            .filter_map(|effect| match effect {
                Effect::Notify { user_id, kind } => Some((user_id, *kind)),
                _ => None,
            })
            .collect()
    }
}
