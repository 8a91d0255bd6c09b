use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    domain::{Actor, NotificationKind},
    error::{AppError, Result},
    repository::UserRepository,
    service::{bounded, clock::Clock, notification_service::NotificationService},
};

#[derive(Debug, Clone, Serialize)]
pub struct PenaltyOutcome {
    pub user_id: Uuid,
    pub deducted: i64,
    pub balance: i64,
}

/// Credit-minute balance of each user. All mutations are single atomic
/// store updates; the service never writes a balance it read.
pub struct LedgerService {
    users: Arc<dyn UserRepository>,
    notifications: Arc<NotificationService>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl LedgerService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        notifications: Arc<NotificationService>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self { users, notifications, clock, timeout }
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<i64> {
        let user = bounded(self.timeout, self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        Ok(user.credits_minutes)
    }

    /// Grants (positive) or spends (negative) minutes. Returns the new balance.
    pub async fn increment(&self, user_id: Uuid, delta_minutes: i64) -> Result<i64> {
        if delta_minutes == 0 {
            return Err(AppError::InvalidAmount("Delta must be non-zero".to_string()));
        }

        let balance = bounded(
            self.timeout,
            self.users.increment_credits(user_id, delta_minutes, self.clock.now()),
        )
        .await?;
        tracing::info!("Ledger {} {:+} min -> {}", user_id, delta_minutes, balance);
        Ok(balance)
    }

    /// Advisory check for UI flows. Spending paths re-check inside their own
    /// conditional update.
    pub async fn require_sufficient_balance(&self, user_id: Uuid, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(AppError::InvalidAmount("Amount must be positive".to_string()));
        }

        let available = self.balance(user_id).await?;
        if amount > available {
            return Err(AppError::InsufficientCredits { requested: amount, available });
        }

        Ok(available)
    }

    /// Moderation penalty (e.g. a censored word on the bulletin board).
    /// Deducts up to `minutes`, never below zero.
    pub async fn penalize(&self, actor: Actor, user_id: Uuid, minutes: i64, reason: &str) -> Result<PenaltyOutcome> {
        if !actor.can_moderate() {
            return Err(AppError::Unauthorized);
        }

        if minutes <= 0 {
            return Err(AppError::InvalidAmount("Penalty must be positive".to_string()));
        }

        let (deducted, balance) =
            bounded(self.timeout, self.users.deduct_credits_saturating(user_id, minutes, self.clock.now()))
                .await?;

        tracing::warn!(
            "User {} penalised {} min by {} ({}); balance {}",
            user_id,
            deducted,
            actor.user_id,
            reason,
            balance
        );

        self.notifications
            .notify(
                user_id,
                Some(actor.user_id),
                NotificationKind::Penalty,
                json!({ "minutes": deducted, "reason": reason, "balance": balance }),
            )
            .await;

        Ok(PenaltyOutcome { user_id, deducted, balance })
    }
}
