use axum::{
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

use crate::{
    api::{handlers::detached, middleware::auth::CurrentUser, state::AppState},
    domain::{IssuedToken, Token},
    error::Result,
};

pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

#[derive(Debug, Deserialize)]
pub struct IssueTokenDto {
    minutes: i64,
    /// Alternative to the `Idempotency-Key` header.
    idempotency_key: Option<String>,
}

pub async fn issue(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    headers: HeaderMap,
    Json(dto): Json<IssueTokenDto>,
) -> Result<(StatusCode, Json<IssuedToken>)> {
    let minutes = dto.minutes;
    let key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(dto.idempotency_key);

    let tokens = state.service_context.token_service.clone();
    let user_id = current.user.id;

    let issued = detached(async move { tokens.issue_token(user_id, minutes, key).await }).await?;

    let status = if issued.replayed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(issued)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<Token>>> {
    let tokens = state.service_context.token_service
        .list_tokens(current.user.id)
        .await?;

    Ok(Json(tokens))
}
