use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::{CreateUserRequest, Role, User},
    error::{AppError, Result},
    repository::{is_unique_violation, parse_uuid, to_utc, UserRepository},
};

const USER_COLUMNS: &str = r#"
    id, email, username, credits_minutes, role, referral_code,
    strike_count, last_strike_reset, referral_version, created_at, updated_at
"#;

// Database row struct that matches SQLite schema
#[derive(FromRow)]
struct UserRow {
    id: String,
    email: String,
    username: String,
    credits_minutes: i64,
    role: String,
    referral_code: String,
    strike_count: i32,
    last_strike_reset: Option<NaiveDateTime>,
    referral_version: i64,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: UserRow) -> Result<User> {
        Ok(User {
            id: parse_uuid(&row.id)?,
            email: row.email,
            username: row.username,
            credits_minutes: row.credits_minutes,
            role: Role::from_str(&row.role)
                .ok_or_else(|| AppError::Database(format!("Invalid role: {}", row.role)))?,
            referral_code: row.referral_code,
            strike_count: row.strike_count,
            last_strike_reset: row.last_strike_reset.map(to_utc),
            referral_version: row.referral_version,
            created_at: to_utc(row.created_at),
            updated_at: to_utc(row.updated_at),
        })
    }

    async fn find_one(&self, column: &str, value: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {} = ?", USER_COLUMNS, column);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_user).transpose()
    }

    async fn balance_of(&self, id: Uuid) -> Result<Option<i64>> {
        let balance = sqlx::query_scalar::<_, i64>("SELECT credits_minutes FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(balance)
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, request: CreateUserRequest, now: DateTime<Utc>) -> Result<User> {
        let now_naive = now.naive_utc();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, email, username, credits_minutes, role, referral_code,
                strike_count, referral_version, created_at, updated_at
            ) VALUES (?, ?, ?, 0, ?, ?, 0, 0, ?, ?)
            "#
        )
        .bind(request.id.to_string())
        .bind(&request.email)
        .bind(&request.username)
        .bind(request.role.as_str())
        .bind(&request.referral_code)
        .bind(now_naive)
        .bind(now_naive)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict("User, username or referral code already exists".to_string())
            } else {
                e.into()
            }
        })?;

        self.find_by_id(request.id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve created user".to_string())
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        self.find_one("id", &id.to_string()).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_one("email", email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_one("username", username).await
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>> {
        self.find_one("referral_code", code).await
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<User>> {
        let sql = format!(
            "SELECT {} FROM users ORDER BY created_at DESC LIMIT ? OFFSET ?",
            USER_COLUMNS
        );
        let rows = sqlx::query_as::<_, UserRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_user)
            .collect()
    }

    async fn set_role(&self, id: Uuid, role: Role, now: DateTime<Utc>) -> Result<User> {
        let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(now.naive_utc())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        self.find_by_id(id).await?.ok_or_else(|| {
            AppError::Database("Failed to retrieve updated user".to_string())
        })
    }

    async fn increment_credits(&self, id: Uuid, delta: i64, now: DateTime<Utc>) -> Result<i64> {

        // Single statement: the store applies the delta, never the caller.
        let new_balance = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE users
            SET credits_minutes = credits_minutes + ?,
                updated_at = ?
            WHERE id = ? AND credits_minutes + ? >= 0
            RETURNING credits_minutes
            "#
        )
        .bind(delta)
        .bind(now.naive_utc())
        .bind(id.to_string())
        .bind(delta)
        .fetch_optional(&self.pool)
        .await?;

        match new_balance {
            Some(balance) => Ok(balance),
            None => match self.balance_of(id).await? {
                Some(available) => Err(AppError::InsufficientCredits {
                    requested: -delta,
                    available,
                }),
                None => Err(AppError::NotFound("User not found".to_string())),
            },
        }
    }

    async fn deduct_credits_saturating(&self, id: Uuid, minutes: i64, now: DateTime<Utc>) -> Result<(i64, i64)> {
        let mut tx = self.pool.begin().await?;
        let id_str = id.to_string();

        let before = sqlx::query_scalar::<_, i64>("SELECT credits_minutes FROM users WHERE id = ?")
            .bind(&id_str)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let after = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE users
            SET credits_minutes = MAX(credits_minutes - ?, 0),
                updated_at = ?
            WHERE id = ?
            RETURNING credits_minutes
            "#
        )
        .bind(minutes)
        .bind(now.naive_utc())
        .bind(&id_str)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((before - after, after))
    }

    async fn reset_strikes(&self, id: Uuid, expected_version: i64, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET strike_count = 0,
                last_strike_reset = NULL,
                referral_version = referral_version + 1,
                updated_at = ?
            WHERE id = ? AND referral_version = ?
            "#
        )
        .bind(now.naive_utc())
        .bind(id.to_string())
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Strike state changed concurrently".to_string()));
        }

        Ok(())
    }
}
