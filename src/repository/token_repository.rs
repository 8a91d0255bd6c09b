use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::{SqlitePool, FromRow};
use uuid::Uuid;

use crate::{
    domain::{IssuedToken, NewToken, Token, TokenStatus},
    error::{AppError, Result},
    repository::{is_unique_violation, parse_uuid, to_utc, TokenRepository},
};

const TOKEN_COLLISION: &str = "Token string collision";

/// True when an issuance failed only because the generated string was taken.
pub fn is_token_collision(err: &AppError) -> bool {
    matches!(err, AppError::TransientStore(msg) if msg == TOKEN_COLLISION)
}

const TOKEN_COLUMNS: &str =
    "id, user_id, token_string, duration_minutes, status, idempotency_key, created_at";

#[derive(FromRow)]
struct TokenRow {
    id: String,
    user_id: String,
    token_string: String,
    duration_minutes: i64,
    status: String,
    idempotency_key: Option<String>,
    created_at: NaiveDateTime,
}

pub struct SqliteTokenRepository {
    pool: SqlitePool,
}

impl SqliteTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_token(row: TokenRow) -> Result<Token> {
        Ok(Token {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            token_string: row.token_string,
            duration_minutes: row.duration_minutes,
            status: TokenStatus::from_str(&row.status).ok_or_else(|| {
                AppError::Database(format!("Invalid token status: {}", row.status))
            })?,
            idempotency_key: row.idempotency_key,
            created_at: to_utc(row.created_at),
        })
    }
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn issue(&self, token: NewToken) -> Result<IssuedToken> {
        let user_id = token.user_id.to_string();
        let created = token.created_at.naive_utc();
        let mut tx = self.pool.begin().await?;

        if let Some(key) = &token.idempotency_key {
            let sql = format!(
                "SELECT {} FROM tokens WHERE user_id = ? AND idempotency_key = ?",
                TOKEN_COLUMNS
            );
            let existing = sqlx::query_as::<_, TokenRow>(&sql)
                .bind(&user_id)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(row) = existing {
                let balance = sqlx::query_scalar::<_, i64>(
                    "SELECT credits_minutes FROM users WHERE id = ?",
                )
                .bind(&user_id)
                .fetch_one(&mut *tx)
                .await?;

                return Ok(IssuedToken {
                    token: Self::row_to_token(row)?,
                    balance_after: balance,
                    replayed: true,
                });
            }
        }

        // Balance check and debit are one statement.
        let balance_after = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE users
            SET credits_minutes = credits_minutes - ?,
                updated_at = ?
            WHERE id = ? AND credits_minutes >= ?
            RETURNING credits_minutes
            "#
        )
        .bind(token.duration_minutes)
        .bind(created)
        .bind(&user_id)
        .bind(token.duration_minutes)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance_after) = balance_after else {
            let available = sqlx::query_scalar::<_, i64>("SELECT credits_minutes FROM users WHERE id = ?")
                .bind(&user_id)
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match available {
                Some(available) => AppError::InsufficientCredits {
                    requested: token.duration_minutes,
                    available,
                },
                None => AppError::NotFound("User not found".to_string()),
            });
        };

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO tokens (
                id, user_id, token_string, duration_minutes, status,
                idempotency_key, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#
        )
        .bind(id.to_string())
        .bind(&user_id)
        .bind(&token.token_string)
        .bind(token.duration_minutes)
        .bind(TokenStatus::Active.as_str())
        .bind(&token.idempotency_key)
        .bind(created)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if !is_unique_violation(&e) {
                return e.into();
            }
            if e.to_string().contains("token_string") {
                // Retryable: the caller mints a fresh string.
                AppError::TransientStore(TOKEN_COLLISION.to_string())
            } else {
                AppError::Conflict("Token issuance with this idempotency key is in progress".to_string())
            }
        })?;

        tx.commit().await?;

        Ok(IssuedToken {
            token: Token {
                id,
                user_id: token.user_id,
                token_string: token.token_string,
                duration_minutes: token.duration_minutes,
                status: TokenStatus::Active,
                idempotency_key: token.idempotency_key,
                created_at: token.created_at,
            },
            balance_after,
            replayed: false,
        })
    }

    async fn find_by_user(&self, user_id: Uuid) -> Result<Vec<Token>> {
        let sql = format!(
            "SELECT {} FROM tokens WHERE user_id = ? ORDER BY created_at DESC",
            TOKEN_COLUMNS
        );
        let rows = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(Self::row_to_token)
            .collect()
    }

    async fn find_by_token_string(&self, token_string: &str) -> Result<Option<Token>> {
        let sql = format!("SELECT {} FROM tokens WHERE token_string = ?", TOKEN_COLUMNS);
        let row = sqlx::query_as::<_, TokenRow>(&sql)
            .bind(token_string)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_token).transpose()
    }
}
