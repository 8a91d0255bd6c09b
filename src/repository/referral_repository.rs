use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::{NewReferral, Referral, ReferralStatus},
    error::{AppError, Result},
    repository::{parse_uuid, to_utc, ReferralRepository, StrikeUpdate},
};

const REFERRAL_COLUMNS: &str = r#"
    id, referrer_id, referred_email, referred_name, relationship, notes,
    status, credit_reward, created_at, resolved_at
"#;

#[derive(FromRow)]
struct ReferralRow {
    id: String,
    referrer_id: String,
    referred_email: String,
    referred_name: String,
    relationship: String,
    notes: Option<String>,
    status: String,
    credit_reward: i64,
    created_at: NaiveDateTime,
    resolved_at: Option<NaiveDateTime>,
}

pub struct SqliteReferralRepository {
    pool: SqlitePool,
}

impl SqliteReferralRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_referral(row: ReferralRow) -> Result<Referral> {
        Ok(Referral {
            id: parse_uuid(&row.id)?,
            referrer_id: parse_uuid(&row.referrer_id)?,
            referred_email: row.referred_email,
            referred_name: row.referred_name,
            relationship: row.relationship,
            notes: row.notes,
            status: ReferralStatus::from_str(&row.status).ok_or_else(|| {
                AppError::Database(format!("Invalid referral status: {}", row.status))
            })?,
            credit_reward: row.credit_reward,
            created_at: to_utc(row.created_at),
            resolved_at: row.resolved_at.map(to_utc),
        })
    }
}

#[async_trait]
impl ReferralRepository for SqliteReferralRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Referral>> {
        let sql = format!("SELECT {} FROM referrals WHERE id = ?", REFERRAL_COLUMNS);
        let row = sqlx::query_as::<_, ReferralRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_referral).transpose()
    }

    async fn find_by_referrer(&self, referrer_id: Uuid) -> Result<Vec<Referral>> {
        let sql = format!(
            "SELECT {} FROM referrals WHERE referrer_id = ? ORDER BY created_at DESC",
            REFERRAL_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReferralRow>(&sql)
            .bind(referrer_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_referral)
            .collect()
    }

    async fn latest_active_created_at(&self, referrer_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let latest = sqlx::query_scalar::<_, NaiveDateTime>(
            r#"
            SELECT created_at
            FROM referrals
            WHERE referrer_id = ? AND status IN (?, ?)
            ORDER BY created_at DESC
            LIMIT 1
            "#
        )
        .bind(referrer_id.to_string())
        .bind(ReferralStatus::Pending.as_str())
        .bind(ReferralStatus::Successful.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(latest.map(to_utc))
    }

    async fn commit_attempt(
        &self,
        referrer_id: Uuid,
        expected_version: i64,
        update: StrikeUpdate,
        referral: Option<NewReferral>,
        now: DateTime<Utc>,
    ) -> Result<Option<Referral>> {
        let referrer_str = referrer_id.to_string();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE users
            SET strike_count = ?,
                last_strike_reset = ?,
                referral_version = referral_version + 1,
                updated_at = ?
            WHERE id = ? AND referral_version = ?
            "#
        )
        .bind(update.strike_count)
        .bind(update.last_strike_reset.map(|dt| dt.naive_utc()))
        .bind(now.naive_utc())
        .bind(&referrer_str)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE id = ?")
                .bind(&referrer_str)
                .fetch_one(&mut *tx)
                .await?;

            return Err(if exists == 0 {
                AppError::NotFound("User not found".to_string())
            } else {
                AppError::Conflict("Strike state changed concurrently".to_string())
            });
        }

        let created = match referral {
            Some(new) => {
                let id = Uuid::new_v4();
                sqlx::query(
                    r#"
                    INSERT INTO referrals (
                        id, referrer_id, referred_email, referred_name,
                        relationship, notes, status, credit_reward, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#
                )
                .bind(id.to_string())
                .bind(&referrer_str)
                .bind(&new.referred_email)
                .bind(&new.referred_name)
                .bind(&new.relationship)
                .bind(&new.notes)
                .bind(ReferralStatus::Pending.as_str())
                .bind(new.credit_reward)
                .bind(new.created_at.naive_utc())
                .execute(&mut *tx)
                .await?;

                Some(Referral {
                    id,
                    referrer_id,
                    referred_email: new.referred_email,
                    referred_name: new.referred_name,
                    relationship: new.relationship,
                    notes: new.notes,
                    status: ReferralStatus::Pending,
                    credit_reward: new.credit_reward,
                    created_at: new.created_at,
                    resolved_at: None,
                })
            }
            None => None,
        };

        tx.commit().await?;

        Ok(created)
    }

    async fn mark_successful(&self, id: Uuid, now: DateTime<Utc>) -> Result<Referral> {
        let id_str = id.to_string();
        let now_naive = now.naive_utc();
        let mut tx = self.pool.begin().await?;

        let resolved = sqlx::query_as::<_, (String, i64)>(
            r#"
            UPDATE referrals
            SET status = ?, resolved_at = ?
            WHERE id = ? AND status = ?
            RETURNING referrer_id, credit_reward
            "#
        )
        .bind(ReferralStatus::Successful.as_str())
        .bind(now_naive)
        .bind(&id_str)
        .bind(ReferralStatus::Pending.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some((referrer_id, reward)) = resolved else {
            let status = sqlx::query_scalar::<_, String>("SELECT status FROM referrals WHERE id = ?")
                .bind(&id_str)
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match status {
                Some(status) => AppError::AlreadyProcessed(format!("Referral is already {}", status)),
                None => AppError::NotFound("Referral not found".to_string()),
            });
        };

        if reward > 0 {
            let credited = sqlx::query(
                "UPDATE users SET credits_minutes = credits_minutes + ?, updated_at = ? WHERE id = ?",
            )
            .bind(reward)
            .bind(now_naive)
            .bind(&referrer_id)
            .execute(&mut *tx)
            .await?;

            if credited.rows_affected() == 0 {
                return Err(AppError::NotFound("Referrer not found".to_string()));
            }
        }

        tx.commit().await?;

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated referral".to_string())
        })
    }

    async fn expire_pending_before(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE referrals
            SET status = ?, resolved_at = ?
            WHERE status = ? AND created_at < ?
            "#
        )
        .bind(ReferralStatus::Expired.as_str())
        .bind(now.naive_utc())
        .bind(ReferralStatus::Pending.as_str())
        .bind(cutoff.naive_utc())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
