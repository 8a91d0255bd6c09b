use axum::{
    extract::{Path, State, Extension},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    api::{
        handlers::detached,
        middleware::auth::{CurrentUser, Identity},
        state::AppState,
    },
    domain::User,
    error::{AppError, Result},
};

#[derive(Debug, Deserialize)]
pub struct RegisterDto {
    username: String,
}

pub async fn register(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(dto): Json<RegisterDto>,
) -> Result<(StatusCode, Json<User>)> {
    let users = state.service_context.user_service.clone();
    let claims = identity.claims;

    let user = detached(async move {
        users.register(claims.sub, &claims.email, &dto.username).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn me(Extension(current): Extension<CurrentUser>) -> Json<User> {
    Json(current.user)
}

#[derive(Debug, Serialize)]
pub struct ReferrerDto {
    username: String,
    referral_code: String,
}

pub async fn by_referral_code(
    State(state): State<AppState>,
    Extension(_current): Extension<CurrentUser>,
    Path(code): Path<String>,
) -> Result<Json<ReferrerDto>> {
    let user = state.service_context.user_service
        .find_by_referral_code(&code)
        .await?
        .ok_or_else(|| AppError::NotFound("Referral code not found".to_string()))?;

    Ok(Json(ReferrerDto {
        username: user.username,
        referral_code: user.referral_code,
    }))
}
