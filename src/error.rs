use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i64, available: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Referral cooldown active for {remaining_secs}s (strike {strike_count})")]
    CooldownActive { remaining_secs: i64, strike_count: i32 },

    #[error("Referrals suspended for {remaining_secs}s")]
    Punished { remaining_secs: i64 },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Store temporarily unavailable: {0}")]
    TransientStore(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Only store availability failures may be retried; everything else is
    /// terminal for the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientStore(_))
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyProcessed(_) => "already_processed",
            AppError::InsufficientCredits { .. } => "insufficient_credits",
            AppError::InvalidAmount(_) => "invalid_amount",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden => "forbidden",
            AppError::CooldownActive { .. } => "cooldown_active",
            AppError::Punished { .. } => "punished",
            AppError::UploadFailed(_) => "upload_failed",
            AppError::TransientStore(_) => "transient_store_error",
            AppError::Conflict(_) => "conflict",
            AppError::Validation(_) => "validation",
            AppError::BadRequest(_) => "bad_request",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, error_message) = match self {
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred".to_string())
            }
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::TransientStore(ref msg) => {
                tracing::warn!("Transient store error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Store temporarily unavailable".to_string())
            }
            AppError::UploadFailed(ref msg) => {
                tracing::error!("Upload failed: {}", msg);
                (StatusCode::BAD_GATEWAY, "Receipt upload failed".to_string())
            }
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::AlreadyProcessed(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InsufficientCredits { .. } => (StatusCode::PAYMENT_REQUIRED, self.to_string()),
            AppError::InvalidAmount(ref msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            AppError::CooldownActive { .. } | AppError::Punished { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, self.to_string())
            }
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Validation(ref msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

// SQLITE_BUSY and SQLITE_LOCKED, including their extended codes.
fn is_busy_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::TransientStore(err.to_string())
            }
            sqlx::Error::Database(db) if db.code().map(|c| is_busy_code(&c)).unwrap_or(false) => {
                AppError::TransientStore(err.to_string())
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
