use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{SqlitePool, FromRow, Sqlite, Transaction};
use uuid::Uuid;

use crate::{
    domain::{NewPayment, Payment, PaymentStatus},
    error::{AppError, Result},
    repository::{is_unique_violation, parse_uuid, to_utc, PaymentRepository},
};

const PAYMENT_COLUMNS: &str = r#"
    id, user_id, status, package_id, package_name, price, duration_minutes,
    sinpe_id, receipt_image_url, receipt_sha256, token, processed_by,
    rejection_reason, created_at, approved_at, rejected_at, updated_at
"#;

#[derive(FromRow)]
struct PaymentRow {
    id: String,
    user_id: String,
    status: String,
    package_id: String,
    package_name: String,
    price: i64,
    duration_minutes: i64,
    sinpe_id: String,
    receipt_image_url: String,
    receipt_sha256: String,
    token: Option<String>,
    processed_by: Option<String>,
    rejection_reason: Option<String>,
    created_at: NaiveDateTime,
    approved_at: Option<NaiveDateTime>,
    rejected_at: Option<NaiveDateTime>,
    updated_at: NaiveDateTime,
}

pub struct SqlitePaymentRepository {
    pool: SqlitePool,
}

impl SqlitePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PaymentRow) -> Result<Payment> {
        Ok(Payment {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            status: PaymentStatus::from_str(&row.status).ok_or_else(|| {
                AppError::Database(format!("Invalid payment status: {}", row.status))
            })?,
            package_id: row.package_id,
            package_name: row.package_name,
            price: row.price,
            duration_minutes: row.duration_minutes,
            sinpe_id: row.sinpe_id,
            receipt_image_url: row.receipt_image_url,
            receipt_sha256: row.receipt_sha256,
            token: row.token,
            processed_by: row.processed_by.as_deref().map(parse_uuid).transpose()?,
            rejection_reason: row.rejection_reason,
            created_at: to_utc(row.created_at),
            approved_at: row.approved_at.map(to_utc),
            rejected_at: row.rejected_at.map(to_utc),
            updated_at: to_utc(row.updated_at),
        })
    }

    /// Explains why a conditional `WHERE status = 'Pending'` update matched nothing.
    async fn not_pending_error(tx: &mut Transaction<'_, Sqlite>, id: &str) -> AppError {
        let status = sqlx::query_scalar::<_, String>("SELECT status FROM payments WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await;

        match status {
            Ok(Some(status)) => AppError::AlreadyProcessed(format!("Payment is already {}", status)),
            Ok(None) => AppError::NotFound("Payment not found".to_string()),
            Err(e) => e.into(),
        }
    }

    async fn fetch(&self, id: Uuid) -> Result<Payment> {
        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated payment".to_string())
        })
    }
}

#[async_trait]
impl PaymentRepository for SqlitePaymentRepository {
    async fn create(&self, payment: NewPayment) -> Result<Payment> {
        let id = Uuid::new_v4();
        let created = payment.created_at.naive_utc();

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, user_id, status, package_id, package_name, price,
                duration_minutes, sinpe_id, receipt_image_url, receipt_sha256,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(payment.user_id.to_string())
        .bind(PaymentStatus::Pending.as_str())
        .bind(&payment.package_id)
        .bind(&payment.package_name)
        .bind(payment.price)
        .bind(payment.duration_minutes)
        .bind(&payment.sinpe_id)
        .bind(&payment.receipt_image_url)
        .bind(&payment.receipt_sha256)
        .bind(created)
        .bind(created)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("This receipt was already submitted".to_string())
            } else {
                e.into()
            }
        })?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created payment".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE id = ?", PAYMENT_COLUMNS);
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = ? ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_payment)
            .collect()
    }

    async fn find_active_by_receipt(&self, receipt_sha256: &str) -> Result<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE receipt_sha256 = ? AND status != ? LIMIT 1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(receipt_sha256)
            .bind(PaymentStatus::Rejected.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn list_by_status(&self, status: PaymentStatus, limit: i64) -> Result<Vec<Payment>> {
        let sql = format!(
            "SELECT {} FROM payments WHERE status = ? ORDER BY created_at ASC LIMIT ?",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_payment)
            .collect()
    }

    async fn approve(&self, id: Uuid, token: &str, processed_by: Uuid, now: DateTime<Utc>) -> Result<Payment> {
        let id_str = id.to_string();
        let now_naive = now.naive_utc();
        let mut tx = self.pool.begin().await?;

        // Conditional transition: only a pending payment can be approved.
        let transitioned = sqlx::query_as::<_, (String, i64)>(
            r#"
            UPDATE payments
            SET status = ?,
                token = ?,
                processed_by = ?,
                approved_at = ?,
                updated_at = ?
            WHERE id = ? AND status = ?
            RETURNING user_id, duration_minutes
            "#
        )
        .bind(PaymentStatus::Approved.as_str())
        .bind(token)
        .bind(processed_by.to_string())
        .bind(now_naive)
        .bind(now_naive)
        .bind(&id_str)
        .bind(PaymentStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id, duration_minutes)) = transitioned else {
            return Err(Self::not_pending_error(&mut tx, &id_str).await);
        };

        let credited = sqlx::query(
            r#"
            UPDATE users
            SET credits_minutes = credits_minutes + ?,
                updated_at = ?
            WHERE id = ?
            "#
        )
        .bind(duration_minutes)
        .bind(now_naive)
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

        if credited.rows_affected() == 0 {
            // Dropping the transaction rolls the status change back.
            return Err(AppError::NotFound("Payment owner not found".to_string()));
        }

        tx.commit().await?;

        self.fetch(id).await
    }

    async fn reject(&self, id: Uuid, processed_by: Uuid, reason: Option<String>, now: DateTime<Utc>) -> Result<Payment> {
        let id_str = id.to_string();
        let now_naive = now.naive_utc();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = ?,
                processed_by = ?,
                rejection_reason = ?,
                rejected_at = ?,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#
        )
        .bind(PaymentStatus::Rejected.as_str())
        .bind(processed_by.to_string())
        .bind(&reason)
        .bind(now_naive)
        .bind(now_naive)
        .bind(&id_str)
        .bind(PaymentStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::not_pending_error(&mut tx, &id_str).await);
        }

        tx.commit().await?;

        self.fetch(id).await
    }
}
