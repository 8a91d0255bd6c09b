pub mod clock;
pub mod feed;
pub mod ledger_service;
pub mod notification_service;
pub mod payment_service;
pub mod referral_service;
pub mod token_service;
pub mod user_service;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::config::Settings;
use crate::domain::{PackageCatalog, StrikePolicy};
use crate::error::{AppError, Result};
use crate::repository::*;
use crate::storage::BlobStore;
use clock::Clock;
use feed::PaymentFeed;
use ledger_service::LedgerService;
use notification_service::NotificationService;
use payment_service::PaymentService;
use referral_service::ReferralService;
use token_service::TokenService;
use user_service::UserService;

pub use ledger_service::PenaltyOutcome;

/// Runs a store operation under a deadline. An elapsed deadline drops the
/// future, which rolls back any transaction it had open.
pub(crate) async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::TransientStore(format!(
            "Store operation timed out after {}ms",
            limit.as_millis()
        ))),
    }
}

pub struct ServiceContext {
    pub user_repo: Arc<dyn UserRepository>,
    pub payment_repo: Arc<dyn PaymentRepository>,
    pub token_repo: Arc<dyn TokenRepository>,
    pub referral_repo: Arc<dyn ReferralRepository>,
    pub notification_repo: Arc<dyn NotificationRepository>,
    pub user_service: Arc<UserService>,
    pub ledger_service: Arc<LedgerService>,
    pub payment_service: Arc<PaymentService>,
    pub token_service: Arc<TokenService>,
    pub referral_service: Arc<ReferralService>,
    pub notification_service: Arc<NotificationService>,
    pub payment_feed: Arc<PaymentFeed>,
    pub clock: Arc<dyn Clock>,
    pub db_pool: SqlitePool,
}

impl ServiceContext {
    pub fn new(
        db_pool: SqlitePool,
        blob_store: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        settings: &Settings,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(settings.database.operation_timeout_secs.max(1));
        let catalog = Arc::new(PackageCatalog::from_config(&settings.packages)?);

        let user_repo: Arc<dyn UserRepository> = Arc::new(SqliteUserRepository::new(db_pool.clone()));
        let payment_repo: Arc<dyn PaymentRepository> = Arc::new(SqlitePaymentRepository::new(db_pool.clone()));
        let token_repo: Arc<dyn TokenRepository> = Arc::new(SqliteTokenRepository::new(db_pool.clone()));
        let referral_repo: Arc<dyn ReferralRepository> = Arc::new(SqliteReferralRepository::new(db_pool.clone()));
        let notification_repo: Arc<dyn NotificationRepository> =
            Arc::new(SqliteNotificationRepository::new(db_pool.clone()));

        let payment_feed = Arc::new(PaymentFeed::default());

        let notification_service = Arc::new(NotificationService::new(
            notification_repo.clone(),
            clock.clone(),
            timeout,
        ));

        let user_service = Arc::new(UserService::new(
            user_repo.clone(),
            clock.clone(),
            settings.auth.bootstrap_admin_email.clone(),
            timeout,
        ));

        let ledger_service = Arc::new(LedgerService::new(
            user_repo.clone(),
            notification_service.clone(),
            clock.clone(),
            timeout,
        ));

        let payment_service = Arc::new(PaymentService::new(
            payment_repo.clone(),
            user_repo.clone(),
            blob_store,
            catalog,
            notification_service.clone(),
            payment_feed.clone(),
            clock.clone(),
            timeout,
        ));

        let token_service = Arc::new(TokenService::new(token_repo.clone(), clock.clone(), timeout));

        let referrals = &settings.referrals;
        let policy = StrikePolicy::new(
            chrono::Duration::hours(referrals.cooldown_hours),
            chrono::Duration::hours(referrals.punishment_hours),
            referrals.max_strikes,
        );
        let referral_service = Arc::new(ReferralService::new(
            referral_repo.clone(),
            user_repo.clone(),
            notification_service.clone(),
            clock.clone(),
            policy,
            referrals.credit_reward_minutes,
            chrono::Duration::days(referrals.pending_expiry_days),
            timeout,
        ));

        Ok(Self {
            user_repo,
            payment_repo,
            token_repo,
            referral_repo,
            notification_repo,
            user_service,
            ledger_service,
            payment_service,
            token_service,
            referral_service,
            notification_service,
            payment_feed,
            clock,
            db_pool,
        })
    }
}
