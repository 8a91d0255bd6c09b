use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::{
    domain::{NewNotification, Notification, NotificationKind},
    error::Result,
    repository::NotificationRepository,
    service::{bounded, clock::Clock},
};

/// Best-effort, at-most-once notification writes.
pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self { repo, clock, timeout }
    }

    /// Never fails the caller: store errors are logged and dropped.
    pub async fn notify(
        &self,
        to_user_id: Uuid,
        from_user_id: Option<Uuid>,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) {
        let notification = NewNotification {
            to_user_id,
            from_user_id,
            kind,
            payload,
            created_at: self.clock.now(),
        };

        match bounded(self.timeout, self.repo.create(notification)).await {
            Ok(n) => tracing::debug!("Notification {} ({}) sent to {}", n.id, kind.as_str(), to_user_id),
            Err(e) => tracing::error!(
                "Failed to notify {} of {}: {:?}",
                to_user_id,
                kind.as_str(),
                e
            ),
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        bounded(self.timeout, self.repo.find_by_user(user_id, limit.clamp(1, 200))).await
    }

    pub async fn mark_read(&self, user_id: Uuid, notification_id: Uuid) -> Result<()> {
        bounded(self.timeout, self.repo.mark_read(notification_id, user_id)).await
    }
}
