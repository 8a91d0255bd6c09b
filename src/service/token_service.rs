use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::{
    domain::{codes::generate_access_token, IssuedToken, NewToken, Token},
    error::{AppError, Result},
    repository::{is_token_collision, TokenRepository},
    service::{bounded, clock::Clock},
};

const MAX_MINT_ATTEMPTS: usize = 3;
const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;

/// Mints access tokens by spending credit minutes.
pub struct TokenService {
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl TokenService {
    pub fn new(repo: Arc<dyn TokenRepository>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        Self { repo, clock, timeout }
    }

    /// Debits `minutes` and creates the token as one unit. Reusing an
    /// idempotency key returns the original token without a second debit.
    pub async fn issue_token(
        &self,
        user_id: Uuid,
        minutes: i64,
        idempotency_key: Option<String>,
    ) -> Result<IssuedToken> {
        if minutes <= 0 {
            return Err(AppError::InvalidAmount("Minutes must be positive".to_string()));
        }

        let idempotency_key = match idempotency_key.map(|k| k.trim().to_string()) {
            Some(k) if k.is_empty() || k.len() > MAX_IDEMPOTENCY_KEY_LEN => {
                return Err(AppError::Validation(
                    "Idempotency key must be 1-64 characters".to_string(),
                ));
            }
            other => other,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let now = self.clock.now();
            let new_token = NewToken {
                user_id,
                token_string: generate_access_token(now.timestamp_millis()),
                duration_minutes: minutes,
                idempotency_key: idempotency_key.clone(),
                created_at: now,
            };

            match bounded(self.timeout, self.repo.issue(new_token)).await {
                Ok(issued) => {
                    if issued.replayed {
                        tracing::info!("Replayed token {} for {}", issued.token.id, user_id);
                    } else {
                        tracing::info!(
                            "Issued token {} to {}: -{} min, balance {}",
                            issued.token.id,
                            user_id,
                            minutes,
                            issued.balance_after
                        );
                    }
                    return Ok(issued);
                }
                Err(e) if is_token_collision(&e) && attempt < MAX_MINT_ATTEMPTS => {
                    tracing::warn!("Token string collision for {}, minting again", user_id);
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn list_tokens(&self, user_id: Uuid) -> Result<Vec<Token>> {
        bounded(self.timeout, self.repo.find_by_user(user_id)).await
    }
}
