use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    domain::{
        codes::generate_access_token, Actor, NewPayment, NotificationKind, Package,
        PackageCatalog, Payment, PaymentStatus, ReceiptUpload,
    },
    error::{AppError, Result},
    repository::{PaymentRepository, UserRepository},
    service::{
        bounded, clock::Clock, feed::{PaymentFeed, Subscription},
        notification_service::NotificationService,
    },
    storage::BlobStore,
};

const MAX_SINPE_ID_LEN: usize = 64;
const PENDING_QUEUE_LIMIT: i64 = 500;

/// Lifecycle of a payment record: `Pending -> Approved | Rejected`.
pub struct PaymentService {
    payments: Arc<dyn PaymentRepository>,
    users: Arc<dyn UserRepository>,
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<PackageCatalog>,
    notifications: Arc<NotificationService>,
    feed: Arc<PaymentFeed>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl PaymentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        users: Arc<dyn UserRepository>,
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<PackageCatalog>,
        notifications: Arc<NotificationService>,
        feed: Arc<PaymentFeed>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            payments,
            users,
            blobs,
            catalog,
            notifications,
            feed,
            clock,
            timeout,
        }
    }

    pub fn packages(&self) -> Vec<Package> {
        self.catalog.list()
    }

    /// Uploads the receipt, then records a pending payment. Nothing is
    /// recorded if the upload fails.
    pub async fn submit_payment(
        &self,
        user_id: Uuid,
        package_id: &str,
        sinpe_id: &str,
        receipt: ReceiptUpload,
    ) -> Result<Payment> {
        bounded(self.timeout, self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let package = self
            .catalog
            .get(package_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Package '{}' not found", package_id)))?;

        let sinpe_id = sinpe_id.trim();
        if sinpe_id.is_empty() || sinpe_id.len() > MAX_SINPE_ID_LEN {
            return Err(AppError::Validation(
                "SINPE reference is required (max 64 characters)".to_string(),
            ));
        }

        // Fast path that skips the upload; the store's unique index decides races.
        let receipt_sha256 = hex::encode(Sha256::digest(&receipt.bytes));
        if let Some(existing) =
            bounded(self.timeout, self.payments.find_active_by_receipt(&receipt_sha256)).await?
        {
            tracing::warn!(
                "User {} resubmitted receipt already used by payment {}",
                user_id,
                existing.id
            );
            return Err(AppError::Conflict("This receipt was already submitted".to_string()));
        }

        let folder = format!("receipts/{}", user_id);
        let receipt_image_url = bounded(
            self.timeout,
            self.blobs.upload(&folder, &receipt.filename, &receipt.bytes),
        )
        .await
        .map_err(|e| match e {
            AppError::Validation(msg) => AppError::Validation(msg),
            AppError::UploadFailed(msg) => AppError::UploadFailed(msg),
            other => AppError::UploadFailed(other.to_string()),
        })?;

        let new_payment = NewPayment {
            user_id,
            package_id: package.id.clone(),
            package_name: package.name.clone(),
            price: package.price,
            duration_minutes: package.duration_minutes,
            sinpe_id: sinpe_id.to_string(),
            receipt_image_url: receipt_image_url.clone(),
            receipt_sha256,
            created_at: self.clock.now(),
        };

        let payment = match bounded(self.timeout, self.payments.create(new_payment)).await {
            Ok(payment) => payment,
            Err(e) => {
                // The ledger was never touched; only the upload is left behind.
                if let Err(cleanup) = self.blobs.delete(&receipt_image_url).await {
                    tracing::warn!("Orphaned receipt {}: {:?}", receipt_image_url, cleanup);
                }
                return Err(e);
            }
        };

        tracing::info!(
            "Payment {} submitted by {} for package {} ({} min)",
            payment.id,
            user_id,
            package.id,
            package.duration_minutes
        );
        self.feed.publish(&payment);

        Ok(payment)
    }

    /// Approves a pending payment: stores a fresh access token on the record
    /// and credits the owner, atomically. A second approval is
    /// `AlreadyProcessed` and credits nothing.
    pub async fn approve_payment(&self, actor: Actor, payment_id: Uuid) -> Result<Payment> {
        if !actor.is_admin() {
            return Err(AppError::Unauthorized);
        }

        let now = self.clock.now();
        let token = generate_access_token(now.timestamp_millis());

        let payment = bounded(
            self.timeout,
            self.payments.approve(payment_id, &token, actor.user_id, now),
        )
        .await?;

        tracing::info!(
            "Payment {} approved by {}: +{} min to {}",
            payment.id,
            actor.user_id,
            payment.duration_minutes,
            payment.user_id
        );

        self.feed.publish(&payment);
        self.notifications
            .notify(
                payment.user_id,
                Some(actor.user_id),
                NotificationKind::PaymentApproved,
                json!({
                    "payment_id": payment.id,
                    "token": payment.token,
                    "minutes": payment.duration_minutes,
                    "package": payment.package_name,
                }),
            )
            .await;

        Ok(payment)
    }

    pub async fn reject_payment(&self, actor: Actor, payment_id: Uuid, reason: Option<String>) -> Result<Payment> {
        if !actor.is_admin() {
            return Err(AppError::Unauthorized);
        }

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let payment = bounded(
            self.timeout,
            self.payments.reject(payment_id, actor.user_id, reason.clone(), self.clock.now()),
        )
        .await?;

        tracing::info!("Payment {} rejected by {}", payment.id, actor.user_id);

        self.feed.publish(&payment);
        self.notifications
            .notify(
                payment.user_id,
                Some(actor.user_id),
                NotificationKind::PaymentRejected,
                json!({ "payment_id": payment.id, "reason": reason }),
            )
            .await;

        Ok(payment)
    }

    /// Owners see their own payments; admins see all.
    pub async fn get_payment(&self, actor: Actor, payment_id: Uuid) -> Result<Payment> {
        let payment = bounded(self.timeout, self.payments.find_by_id(payment_id))
            .await?
            .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

        if payment.user_id != actor.user_id && !actor.is_admin() {
            return Err(AppError::Forbidden);
        }

        Ok(payment)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        bounded(self.timeout, self.payments.find_by_user(user_id)).await
    }

    /// Review queue, oldest first.
    pub async fn list_pending(&self, actor: Actor) -> Result<Vec<Payment>> {
        if !actor.is_admin() {
            return Err(AppError::Unauthorized);
        }

        bounded(
            self.timeout,
            self.payments.list_by_status(PaymentStatus::Pending, PENDING_QUEUE_LIMIT),
        )
        .await
    }

    /// Current snapshot of one payment plus a live subscription to its changes.
    /// The subscription is taken first so no transition is missed.
    pub async fn watch_payment(&self, actor: Actor, payment_id: Uuid) -> Result<(Payment, Subscription)> {
        let subscription = self.feed.subscribe_payment(payment_id);
        let payment = self.get_payment(actor, payment_id).await?;
        Ok((payment, subscription))
    }

    /// Pending queue snapshot plus a live subscription to every payment change.
    pub async fn watch_pending(&self, actor: Actor) -> Result<(Vec<Payment>, Subscription)> {
        let subscription = self.feed.subscribe_all();
        let pending = self.list_pending(actor).await?;
        Ok((pending, subscription))
    }
}
