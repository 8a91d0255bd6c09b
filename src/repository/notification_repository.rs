use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::{NewNotification, Notification, NotificationKind},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, NotificationRepository},
};

#[derive(FromRow)]
struct NotificationRow {
    id: String,
    to_user_id: String,
    from_user_id: Option<String>,
    kind: String,
    payload: String,
    is_read: i32,
    created_at: NaiveDateTime,
}

pub struct SqliteNotificationRepository {
    pool: SqlitePool,
}

impl SqliteNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_notification(row: NotificationRow) -> Result<Notification> {
        Ok(Notification {
            id: parse_uuid(&row.id)?,
            to_user_id: parse_uuid(&row.to_user_id)?,
            from_user_id: row.from_user_id.as_deref().map(parse_uuid).transpose()?,
            kind: NotificationKind::from_str(&row.kind).ok_or_else(|| {
                AppError::Database(format!("Invalid notification kind: {}", row.kind))
            })?,
            payload: serde_json::from_str(&row.payload)
                .map_err(|e| AppError::Database(e.to_string()))?,
            read: row.is_read != 0,
            created_at: to_utc(row.created_at),
        })
    }
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn create(&self, notification: NewNotification) -> Result<Notification> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO notifications (
                id, to_user_id, from_user_id, kind, payload, is_read, created_at
            ) VALUES (?, ?, ?, ?, ?, 0, ?)
            "#
        )
        .bind(id.to_string())
        .bind(notification.to_user_id.to_string())
        .bind(notification.from_user_id.map(|u| u.to_string()))
        .bind(notification.kind.as_str())
        .bind(notification.payload.to_string())
        .bind(notification.created_at.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(Notification {
            id,
            to_user_id: notification.to_user_id,
            from_user_id: notification.from_user_id,
            kind: notification.kind,
            payload: notification.payload,
            read: false,
            created_at: notification.created_at,
        })
    }

    async fn find_by_user(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, to_user_id, from_user_id, kind, payload, is_read, created_at
            FROM notifications
            WHERE to_user_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#
        )
        .bind(user_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(Self::row_to_notification)
            .collect()
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<()> {
        let result = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ? AND to_user_id = ?")
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Notification not found".to_string()));
        }

        Ok(())
    }
}
