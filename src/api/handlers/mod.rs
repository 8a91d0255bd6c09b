pub mod admin;
pub mod notifications;
pub mod payments;
pub mod referrals;
pub mod root;
pub mod tokens;
pub mod users;

use std::future::Future;

use crate::error::{AppError, Result};

/// Runs a mutating operation on its own task so that a dropped connection
/// cannot cancel it halfway.
pub(crate) async fn detached<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| AppError::Internal(format!("Request task failed: {}", e)))?
}
