//! The admission service: imperative shell around [`AdmissionReducer`].
//!
//! Every state transition follows the same cycle:
//!
//! 1. snapshot the ledger for the subject user,
//! 2. let the reducer decide,
//! 3. commit the ledger writes with an optimistic version check,
//! 4. on conflict, start over from a fresh snapshot (bounded, jittered),
//! 5. after commit, spawn notifications and apply claims patches.
//!
//! Claims preconditions are checked before any transaction is opened.
//!
//! A failure after step 3 surfaces as [`AdmissionError::StoreUnavailable`]
//! with the ledger already transitioned. The ledger records enough (the
//! reservation, the waitlist entry, the attendee record) for a retry of the
//! same call to recognise that and finish the remaining steps.

use crate::metrics::AdmissionMetrics;
use crate::retry::RetryPolicy;
use admission_core::admission::{AdmissionAction, AdmissionReducer, AdmissionState, Outcome};
use admission_core::claims::{CallerIdentity, ClaimsPatch, ClaimsStore};
use admission_core::effect::{Effect, EffectPlan};
use admission_core::environment::{Clock, SystemClock};
use admission_core::ledger::{AdmissionLedger, LedgerError};
use admission_core::notification::{Notification, NotificationDispatcher, NotificationKind};
use admission_core::reducer::Reducer;
use admission_core::types::{AdmissionPolicy, AdmissionStatus, UserId};
use admission_core::{AdmissionError, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// Environment
// ============================================================================

/// Collaborators and policy injected into the service.
#[derive(Clone)]
pub struct AdmissionEnvironment {
    /// Transactional document store
    pub ledger: Arc<dyn AdmissionLedger>,
    /// Identity-provider claims
    pub claims: Arc<dyn ClaimsStore>,
    /// Best-effort notification transport
    pub notifier: Arc<dyn NotificationDispatcher>,
    /// Time source for sweep queries
    pub clock: Arc<dyn Clock>,
    /// Reducer environment
    pub policy: AdmissionPolicy,
    /// Conflict retry policy
    pub retry: RetryPolicy,
    /// Whether a withdrawal hands its spot to the waitlist
    pub promote_on_withdraw: bool,
}

impl AdmissionEnvironment {
    /// Environment with default policy, retry and the system clock.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn AdmissionLedger>,
        claims: Arc<dyn ClaimsStore>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            ledger,
            claims,
            notifier,
            clock: Arc::new(SystemClock),
            policy: AdmissionPolicy::default(),
            retry: RetryPolicy::default(),
            promote_on_withdraw: true,
        }
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different admission policy.
    #[must_use]
    pub fn with_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a different retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enable or disable promotion on withdrawal.
    #[must_use]
    pub const fn with_promote_on_withdraw(mut self, enabled: bool) -> Self {
        self.promote_on_withdraw = enabled;
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// Which branch a successful join took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A free spot was granted.
    Reserved {
        /// Confirmation deadline
        expires_at: DateTime<Utc>,
    },
    /// The caller was queued.
    Waitlisted {
        /// Join time
        joined_at: DateTime<Utc>,
    },
}

/// Result of a successful verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The reservation was confirmed by this call.
    Verified,
    /// The caller had already confirmed; nothing changed.
    AlreadyVerified,
}

/// Result of a withdrawal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WithdrawOutcome {
    /// `false` if the caller held no RSVP.
    pub withdrawn: bool,
    /// Who received the vacated spot.
    pub promoted: Option<UserId>,
}

/// Result of a capacity release.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Spots returned
    pub released: u32,
    /// Users promoted as a result, in promotion order
    pub promoted: Vec<UserId>,
}

/// Result of one reclaim pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    /// Expired reservations listed
    pub examined: usize,
    /// Reservations reclaimed
    pub reclaimed: u32,
    /// Users whose holds were already gone when re-checked
    pub skipped: usize,
    /// Users whose reclaim transaction failed
    pub failed: usize,
    /// Users promoted as a result, in promotion order
    pub promoted: Vec<UserId>,
}

struct Transition {
    outcome: Outcome,
    plan: EffectPlan,
}

// ============================================================================
// Service
// ============================================================================

/// Admission orchestrator.
///
/// Cheap to clone; clones share the environment.
#[derive(Clone)]
pub struct AdmissionService {
    env: Arc<AdmissionEnvironment>,
    reducer: AdmissionReducer,
}

impl AdmissionService {
    /// Create a service over `env`.
    #[must_use]
    pub fn new(env: AdmissionEnvironment) -> Self {
        Self {
            env: Arc::new(env),
            reducer: AdmissionReducer::new(),
        }
    }

    /// The injected environment.
    #[must_use]
    pub fn environment(&self) -> &AdmissionEnvironment {
        &self.env
    }

    /// Take a free spot, or join the waitlist if none is free or anyone is waiting.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::AlreadyVerified`] (callers treat as success)
    /// - [`AdmissionError::WaitlistForfeited`], [`AdmissionError::AlreadyWaitlisted`]
    /// - [`AdmissionError::MissingClaims`], [`AdmissionError::StoreUnavailable`]
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id()))]
    pub async fn join_waitlist(&self, caller: &CallerIdentity) -> Result<JoinOutcome> {
        let user_id = caller.user_id();
        self.env.claims.get(user_id).await?.ensure_can_join()?;

        match self.transact(user_id, AdmissionAction::JoinWaitlist).await? {
            Outcome::Reserved { expires_at } => Ok(JoinOutcome::Reserved { expires_at }),
            Outcome::Waitlisted { joined_at } => {
                // Capacity parked while others were waiting belongs to them.
                self.drain_counter().await?;
                Ok(JoinOutcome::Waitlisted { joined_at })
            },
            // Enqueued by an earlier attempt whose claims write was lost.
            Outcome::AlreadyWaitlisted { joined_at } => Ok(JoinOutcome::Waitlisted { joined_at }),
            Outcome::Forfeited => Err(AdmissionError::WaitlistForfeited),
            Outcome::Verified => Err(AdmissionError::AlreadyVerified),
            other => Err(unexpected(AdmissionAction::JoinWaitlist.name(), &other)),
        }
    }

    /// Confirm the caller's reservation.
    ///
    /// An expired reservation is removed and its spot handed on before
    /// [`AdmissionError::SpotExpired`] is returned.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::LimitReached`] if the caller holds no reservation
    /// - [`AdmissionError::SpotExpired`] if it lapsed
    /// - [`AdmissionError::MissingClaims`], [`AdmissionError::StoreUnavailable`]
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id()))]
    pub async fn verify_rsvp(&self, caller: &CallerIdentity) -> Result<VerifyOutcome> {
        let user_id = caller.user_id();
        if self.env.claims.get(user_id).await?.rsvp_verified {
            return Ok(VerifyOutcome::AlreadyVerified);
        }

        match self.transact(user_id, AdmissionAction::VerifyRsvp).await? {
            Outcome::Verified => Ok(VerifyOutcome::Verified),
            Outcome::Expired { released, .. } => {
                info!(released, "Reservation expired before confirmation");
                self.drain_counter().await?;
                Err(AdmissionError::SpotExpired)
            },
            Outcome::NoReservation => Err(AdmissionError::LimitReached),
            other => Err(unexpected(AdmissionAction::VerifyRsvp.name(), &other)),
        }
    }

    /// Give up a confirmed RSVP.
    ///
    /// Clears the claim, revokes the caller's sessions and then removes the
    /// attendee record, which (when enabled) promotes the next waitlisted
    /// user into the vacated spot. The claim and the sessions are handled on
    /// every call, so a retry after a failure finishes the job; the spot is
    /// handed on exactly once because only the transaction that removes the
    /// attendee record releases it. Withdrawing without an RSVP succeeds
    /// without changes.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::MissingClaims`] or [`AdmissionError::StoreUnavailable`].
    #[tracing::instrument(skip(self, caller), fields(user_id = %caller.user_id()))]
    pub async fn withdraw_rsvp(&self, caller: &CallerIdentity) -> Result<WithdrawOutcome> {
        let user_id = caller.user_id();
        let previous = self
            .env
            .claims
            .set(user_id, ClaimsPatch::rsvp_verified(false))
            .await?;
        self.env.claims.revoke_sessions(user_id).await?;

        let action = AdmissionAction::WithdrawRsvp {
            release: self.env.promote_on_withdraw,
        };
        let operation = action.name();
        let promoted = match self.transact(user_id, action).await? {
            Outcome::Withdrawn { promoted } => {
                let drained = self.drain_counter().await?;
                promoted.or_else(|| drained.into_iter().next())
            },
            Outcome::NotAttending if previous.rsvp_verified => {
                // Verified outside this ledger, or a concurrent withdrawal
                // removed the record first.
                debug!("Verified claim without an attendee record");
                None
            },
            Outcome::NotAttending => {
                debug!("Withdrawal without a confirmed RSVP");
                return Ok(WithdrawOutcome::default());
            },
            other => return Err(unexpected(operation, &other)),
        };

        info!(promoted = ?promoted, "RSVP withdrawn");
        Ok(WithdrawOutcome {
            withdrawn: true,
            promoted,
        })
    }

    /// Return `spots` units of capacity: waitlist first, then the counter.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::StoreUnavailable`].
    #[tracing::instrument(skip(self))]
    pub async fn release_capacity(&self, spots: u32) -> Result<ReleaseReport> {
        let outcome = self
            .transact(&UserId::system(), AdmissionAction::ReleaseCapacity { spots })
            .await?;

        let mut promoted: Vec<UserId> = outcome.promoted().cloned().into_iter().collect();
        promoted.extend(self.drain_counter().await?);
        Ok(ReleaseReport {
            released: spots,
            promoted,
        })
    }

    /// Reclaim up to `batch_size` expired reservations, then drain the counter.
    ///
    /// Each user's expired holds are reclaimed in their own transaction and
    /// re-checked inside it, so a hold already reclaimed by another sweeper is
    /// skipped. A failing user is logged and counted; the pass continues.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::StoreUnavailable`] if listing or draining fails.
    #[tracing::instrument(skip(self))]
    pub async fn reclaim_expired(&self, batch_size: usize) -> Result<ReclaimReport> {
        let now = self.env.clock.now();
        let expired = self.env.ledger.expired_reservations(now, batch_size).await?;
        let mut report = ReclaimReport {
            examined: expired.len(),
            ..ReclaimReport::default()
        };

        let mut seen = BTreeSet::new();
        for reservation in expired {
            if !seen.insert(reservation.user_id.clone()) {
                continue;
            }
            match self
                .transact(&reservation.user_id, AdmissionAction::ReclaimExpired)
                .await
            {
                Ok(Outcome::Reclaimed { released, promoted }) => {
                    AdmissionMetrics::record_reclaimed(released);
                    report.reclaimed += released;
                    report.promoted.extend(promoted);
                },
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    warn!(user_id = %reservation.user_id, error = %err, "Reclaim failed");
                    report.failed += 1;
                },
            }
        }

        report.promoted.extend(self.drain_counter().await?);
        if report.examined > 0 {
            info!(
                examined = report.examined,
                reclaimed = report.reclaimed,
                promoted = report.promoted.len(),
                "Reclaim pass finished"
            );
        }
        Ok(report)
    }

    /// Move parked counter capacity to waitlisted users, oldest first.
    ///
    /// Returns the promoted users.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::StoreUnavailable`].
    pub async fn drain_counter(&self) -> Result<Vec<UserId>> {
        let system = UserId::system();
        let mut promoted = Vec::new();
        while let Outcome::Drained { promoted: user } =
            self.transact(&system, AdmissionAction::DrainCounter).await?
        {
            promoted.push(user);
        }
        Ok(promoted)
    }

    /// Create the spot counter with `spots` capacity if it does not exist yet.
    ///
    /// Returns `true` if this call created it.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::StoreUnavailable`].
    pub async fn seed_capacity(&self, spots: u32) -> Result<bool> {
        let created = self.env.ledger.seed_counter(spots).await?;
        if created {
            info!(spots, "Spot counter created");
        } else {
            debug!("Spot counter already exists; seed ignored");
        }
        Ok(created)
    }

    /// Where `user_id` currently sits in the admission state machine.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::MissingClaims`] or [`AdmissionError::StoreUnavailable`].
    pub async fn status(&self, user_id: &UserId) -> Result<AdmissionStatus> {
        let claims = self.env.claims.get(user_id).await?;
        if claims.rsvp_verified {
            return Ok(AdmissionStatus::Verified);
        }

        // The position is a separate query. If the entry is gone by then the
        // user was promoted or reclaimed in between, so read again; an entry
        // never comes back once removed.
        loop {
            let snapshot = self.env.ledger.snapshot(user_id).await?;
            if snapshot.attendee.is_some() {
                return Ok(AdmissionStatus::Verified);
            }
            if let Some(live) = snapshot
                .latest_reservation()
                .filter(|r| !r.is_expired(snapshot.observed_at))
            {
                return Ok(AdmissionStatus::Reserved {
                    expires_at: live.expires_at,
                });
            }
            if let Some(entry) = &snapshot.waitlist_entry {
                if let Some(position) = self.env.ledger.waitlist_position(user_id).await? {
                    return Ok(AdmissionStatus::Waitlisted {
                        joined_at: entry.joined_at,
                        position,
                    });
                }
                debug!("Waitlist entry left between snapshot and position query");
                continue;
            }
            if claims.has_joined_waitlist {
                return Ok(AdmissionStatus::Lapsed);
            }
            return Ok(AdmissionStatus::None);
        }
    }

    /// Whether the ledger is reachable.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::StoreUnavailable`].
    pub async fn ready(&self) -> Result<()> {
        Ok(self.env.ledger.ping().await?)
    }

    // ------------------------------------------------------------------------
    // Transaction cycle
    // ------------------------------------------------------------------------

    async fn transact(&self, subject: &UserId, action: AdmissionAction) -> Result<Outcome> {
        let operation = action.name();
        let started = Instant::now();

        let result = self
            .env
            .retry
            .run(
                || self.attempt(subject, action.clone()),
                |err: &LedgerError| {
                    let conflict = err.is_conflict();
                    if conflict {
                        AdmissionMetrics::record_conflict(operation);
                    }
                    conflict
                },
            )
            .await;
        AdmissionMetrics::record_duration(operation, started.elapsed());

        let Transition { outcome, plan } = result?;
        AdmissionMetrics::record_transition(operation, outcome.label());
        if let Some(promoted) = outcome.promoted() {
            AdmissionMetrics::record_promotion();
            info!(operation, promoted = %promoted, "Promoted from waitlist");
        }
        if !plan.writes.is_empty() {
            info!(operation, subject = %subject, outcome = outcome.label(), "Admission transition committed");
        }

        self.run_follow_ups(plan).await?;
        Ok(outcome)
    }

    async fn attempt(
        &self,
        subject: &UserId,
        action: AdmissionAction,
    ) -> std::result::Result<Transition, LedgerError> {
        let snapshot = self.env.ledger.snapshot(subject).await?;
        let read_set = snapshot.read_set.clone();
        let mut state = AdmissionState::new(snapshot);

        let effects = self.reducer.reduce(&mut state, action, &self.env.policy);
        let plan = EffectPlan::from_effects(effects);
        if !plan.writes.is_empty() {
            self.env.ledger.commit(read_set, plan.writes.clone()).await?;
        }

        Ok(Transition {
            outcome: state.outcome.unwrap_or(Outcome::Unchanged),
            plan,
        })
    }

    /// Spawn notifications, then apply claims patches in order.
    async fn run_follow_ups(&self, plan: EffectPlan) -> Result<()> {
        for (user_id, kind) in plan.notified() {
            self.dispatch(user_id.clone(), kind);
        }
        for effect in plan.follow_ups {
            if let Effect::PatchClaims { user_id, patch } = effect {
                self.env.claims.set(&user_id, patch).await?;
            }
        }
        Ok(())
    }

    fn dispatch(&self, user_id: UserId, kind: NotificationKind) {
        let claims = Arc::clone(&self.env.claims);
        let notifier = Arc::clone(&self.env.notifier);

        tokio::spawn(async move {
            if let Err(reason) = deliver(claims.as_ref(), notifier.as_ref(), &user_id, kind).await {
                warn!(user_id = %user_id, kind = %kind, error = %reason, "Notification failed");
                AdmissionMetrics::record_notification_failure(kind.as_str());
            }
        });
    }
}

impl std::fmt::Debug for AdmissionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionService")
            .field("policy", &self.env.policy)
            .field("promote_on_withdraw", &self.env.promote_on_withdraw)
            .finish_non_exhaustive()
    }
}

async fn deliver(
    claims: &dyn ClaimsStore,
    notifier: &dyn NotificationDispatcher,
    user_id: &UserId,
    kind: NotificationKind,
) -> std::result::Result<(), String> {
    let profile = claims.profile(user_id).await.map_err(|e| e.to_string())?;
    notifier
        .send(Notification::to_profile(kind, &profile))
        .await
        .map_err(|e| e.to_string())
}

fn unexpected(operation: &str, outcome: &Outcome) -> AdmissionError {
    AdmissionError::store(format!(
        "{operation} produced unexpected outcome {}",
        outcome.label()
    ))
}
