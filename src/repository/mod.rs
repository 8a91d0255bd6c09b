use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;
use crate::domain::*;
use crate::error::{AppError, Result};

pub mod user_repository;
pub mod payment_repository;
pub mod token_repository;
pub mod referral_repository;
pub mod notification_repository;

pub use user_repository::SqliteUserRepository;
pub use payment_repository::SqlitePaymentRepository;
pub use token_repository::{is_token_collision, SqliteTokenRepository};
pub use referral_repository::SqliteReferralRepository;
pub use notification_repository::SqliteNotificationRepository;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: CreateUserRequest, now: DateTime<Utc>) -> Result<User>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>>;
    async fn set_role(&self, id: Uuid, role: Role, now: DateTime<Utc>) -> Result<User>;
    /// Atomic `credits_minutes += delta`. A negative delta only applies when
    /// the balance stays non-negative. Returns the new balance.
    async fn increment_credits(&self, id: Uuid, delta: i64, now: DateTime<Utc>) -> Result<i64>;
    /// Atomic deduction clamped at zero. Returns `(deducted, new_balance)`.
    async fn deduct_credits_saturating(&self, id: Uuid, minutes: i64, now: DateTime<Utc>) -> Result<(i64, i64)>;
    /// Clears an expired punishment if the strike state is still at `expected_version`.
    async fn reset_strikes(&self, id: Uuid, expected_version: i64, now: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn create(&self, payment: NewPayment) -> Result<Payment>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>>;
    /// A pending or approved payment that already used this receipt.
    async fn find_active_by_receipt(&self, receipt_sha256: &str) -> Result<Option<Payment>>;
    async fn list_by_status(&self, status: PaymentStatus, limit: i64) -> Result<Vec<Payment>>;
    /// `Pending -> Approved` plus the ledger credit, in one transaction.
    async fn approve(&self, id: Uuid, token: &str, processed_by: Uuid, now: DateTime<Utc>) -> Result<Payment>;
    /// `Pending -> Rejected`; never touches the ledger.
    async fn reject(&self, id: Uuid, processed_by: Uuid, reason: Option<String>, now: DateTime<Utc>) -> Result<Payment>;
}

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Debit `duration_minutes` from the owner and insert the token, in one transaction.
    async fn issue(&self, token: NewToken) -> Result<IssuedToken>;
    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Token>>;
    async fn find_by_token_string(&self, token_string: &str) -> Result<Option<Token>>;
}

/// Strike state to write back for a referral attempt.
#[derive(Debug, Clone, Copy)]
pub struct StrikeUpdate {
    pub strike_count: i32,
    pub last_strike_reset: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ReferralRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Referral>>;
    async fn find_by_referrer(&self, referrer_id: Uuid) -> Result<Vec<Referral>>;
    async fn latest_active_created_at(&self, referrer_id: Uuid) -> Result<Option<DateTime<Utc>>>;
    /// Compare-and-swap the strike state on `expected_version` and optionally
    /// insert the referral, in one transaction. Version mismatch is `Conflict`.
    async fn commit_attempt(
        &self,
        referrer_id: Uuid,
        expected_version: i64,
        update: StrikeUpdate,
        referral: Option<NewReferral>,
        now: DateTime<Utc>,
    ) -> Result<Option<Referral>>;
    /// `Pending -> Successful` plus the referrer's credit reward, in one transaction.
    async fn mark_successful(&self, id: Uuid, now: DateTime<Utc>) -> Result<Referral>;
    async fn expire_pending_before(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: NewNotification) -> Result<Notification>;
    async fn find_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>>;
    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<()>;
}

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| AppError::Database(e.to_string()))
}

pub(crate) fn to_utc(dt: NaiveDateTime) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(dt, Utc)
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
