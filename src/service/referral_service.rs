use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{
        Actor, AttemptOutcome, CreateReferralRequest, Eligibility, NewReferral, NotificationKind,
        Referral, StrikePolicy, StrikeSnapshot, User, Verdict,
    },
    error::{AppError, Result},
    repository::{ReferralRepository, StrikeUpdate, UserRepository},
    service::{bounded, clock::Clock, notification_service::NotificationService},
};

/// Optimistic retries when two attempts race on the same strike state.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Referral creation, rate-limited by a rolling cooldown and an escalating
/// strike counter.
pub struct ReferralService {
    referrals: Arc<dyn ReferralRepository>,
    users: Arc<dyn UserRepository>,
    notifications: Arc<NotificationService>,
    clock: Arc<dyn Clock>,
    policy: StrikePolicy,
    credit_reward: i64,
    pending_expiry: chrono::Duration,
    timeout: Duration,
}

impl ReferralService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        referrals: Arc<dyn ReferralRepository>,
        users: Arc<dyn UserRepository>,
        notifications: Arc<NotificationService>,
        clock: Arc<dyn Clock>,
        policy: StrikePolicy,
        credit_reward: i64,
        pending_expiry: chrono::Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            referrals,
            users,
            notifications,
            clock,
            policy,
            credit_reward,
            pending_expiry,
            timeout,
        }
    }

    pub fn policy(&self) -> StrikePolicy {
        self.policy
    }

    async fn snapshot(&self, user_id: Uuid) -> Result<(User, StrikeSnapshot)> {
        let user = bounded(self.timeout, self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let latest_referral_at =
            bounded(self.timeout, self.referrals.latest_active_created_at(user_id)).await?;

        let snapshot = StrikeSnapshot {
            strike_count: user.strike_count,
            last_strike_reset: user.last_strike_reset,
            latest_referral_at,
        };

        Ok((user, snapshot))
    }

    /// Whether `user_id` may submit a referral right now. An elapsed
    /// punishment is cleared as a side effect.
    pub async fn can_submit_referral(&self, user_id: Uuid) -> Result<Eligibility> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (user, snapshot) = self.snapshot(user_id).await?;
            let now = self.clock.now();
            let evaluation = self.policy.evaluate(&snapshot, now);

            let (strike_count, last_strike_reset) = if evaluation.punishment_expired {
                match bounded(self.timeout, self.users.reset_strikes(user.id, user.referral_version, now)).await {
                    Ok(()) => {
                        tracing::info!("Referral punishment of {} expired; strikes cleared", user.id);
                        (0, None)
                    }
                    Err(AppError::Conflict(_)) if attempt < MAX_CAS_ATTEMPTS => continue,
                    Err(e) => return Err(e),
                }
            } else {
                (user.strike_count, user.last_strike_reset)
            };

            let state = self.policy.state(strike_count, last_strike_reset, now);
            let (allowed, reason, remaining) = match evaluation.verdict {
                Verdict::Allowed => (true, None, None),
                Verdict::Cooldown { remaining } => (
                    false,
                    Some("A referral was submitted recently; wait for the cooldown to end".to_string()),
                    Some(remaining.num_seconds()),
                ),
                Verdict::Punished { remaining } => (
                    false,
                    Some("Too many attempts during the cooldown; referrals are suspended".to_string()),
                    Some(remaining.num_seconds()),
                ),
            };

            return Ok(Eligibility {
                allowed,
                reason,
                time_remaining_secs: remaining,
                strike_count,
                state,
            });
        }
    }

    /// Records a referral, or penalises an attempt made during the cooldown.
    pub async fn submit_referral(&self, user_id: Uuid, request: CreateReferralRequest) -> Result<Referral> {
        request.validate()?;
        let referred_email = request.referred_email.trim().to_lowercase();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let (user, snapshot) = self.snapshot(user_id).await?;

            if user.email.eq_ignore_ascii_case(&referred_email) {
                return Err(AppError::Validation("You cannot refer yourself".to_string()));
            }

            let now = self.clock.now();
            let plan = self.policy.plan_attempt(&snapshot, now);

            if !plan.needs_write {
                tracing::warn!("Referral attempt by {} rejected: still punished", user_id);
                return Err(outcome_error(plan.outcome));
            }

            let referral = plan.create_referral.then(|| NewReferral {
                referrer_id: user_id,
                referred_email: referred_email.clone(),
                referred_name: request.referred_name.trim().to_string(),
                relationship: request.relationship.trim().to_string(),
                notes: request.notes.clone(),
                credit_reward: self.credit_reward,
                created_at: now,
            });

            let update = StrikeUpdate {
                strike_count: plan.strike_count,
                last_strike_reset: plan.last_strike_reset,
            };

            let committed = bounded(
                self.timeout,
                self.referrals.commit_attempt(user_id, user.referral_version, update, referral, now),
            )
            .await;

            match committed {
                Ok(Some(referral)) => {
                    tracing::info!("Referral {} created by {}", referral.id, user_id);
                    return Ok(referral);
                }
                Ok(None) => {
                    tracing::warn!(
                        "Referral attempt by {} during cooldown: strike {}",
                        user_id,
                        plan.strike_count
                    );
                    return Err(outcome_error(plan.outcome));
                }
                Err(AppError::Conflict(_)) if attempt < MAX_CAS_ATTEMPTS => {
                    tracing::debug!("Strike state of {} changed concurrently, retrying", user_id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Confirms a pending referral and credits the referrer's reward.
    pub async fn mark_successful(&self, actor: Actor, referral_id: Uuid) -> Result<Referral> {
        if !actor.is_admin() {
            return Err(AppError::Unauthorized);
        }

        let referral = bounded(
            self.timeout,
            self.referrals.mark_successful(referral_id, self.clock.now()),
        )
        .await?;

        tracing::info!(
            "Referral {} successful: +{} min to {}",
            referral.id,
            referral.credit_reward,
            referral.referrer_id
        );

        self.notifications
            .notify(
                referral.referrer_id,
                Some(actor.user_id),
                NotificationKind::ReferralSuccessful,
                json!({
                    "referral_id": referral.id,
                    "referred_name": referral.referred_name,
                    "minutes": referral.credit_reward,
                }),
            )
            .await;

        Ok(referral)
    }

    /// Marks pending referrals older than the configured age as expired.
    pub async fn expire_stale(&self) -> Result<u64> {
        let now = self.clock.now();
        let cutoff = now - self.pending_expiry;
        let expired = bounded(self.timeout, self.referrals.expire_pending_before(cutoff, now)).await?;

        if expired > 0 {
            tracing::info!("Expired {} stale referrals", expired);
        }

        Ok(expired)
    }

    pub async fn list_for_referrer(&self, user_id: Uuid) -> Result<Vec<Referral>> {
        bounded(self.timeout, self.referrals.find_by_referrer(user_id)).await
    }
}

fn outcome_error(outcome: AttemptOutcome) -> AppError {
    match outcome {
        AttemptOutcome::CooldownStrike { remaining, strike_count } => AppError::CooldownActive {
            remaining_secs: remaining.num_seconds(),
            strike_count,
        },
        AttemptOutcome::PunishmentStarted { remaining }
        | AttemptOutcome::StillPunished { remaining } => AppError::Punished {
            remaining_secs: remaining.num_seconds(),
        },
        AttemptOutcome::Accepted => AppError::Internal("Accepted attempt reported as rejection".to_string()),
    }
}
