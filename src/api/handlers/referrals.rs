use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};

use crate::{
    api::{handlers::detached, middleware::auth::CurrentUser, state::AppState},
    domain::{CreateReferralRequest, Eligibility, Referral},
    error::Result,
};

pub async fn eligibility(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Eligibility>> {
    let referrals = state.service_context.referral_service.clone();
    let user_id = current.user.id;

    // May clear an expired punishment, so it runs detached like other writes.
    let eligibility = detached(async move { referrals.can_submit_referral(user_id).await }).await?;
    Ok(Json(eligibility))
}

pub async fn submit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreateReferralRequest>,
) -> Result<(StatusCode, Json<Referral>)> {
    let referrals = state.service_context.referral_service.clone();
    let user_id = current.user.id;

    let referral = detached(async move { referrals.submit_referral(user_id, request).await }).await?;
    Ok((StatusCode::CREATED, Json(referral)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<Referral>>> {
    let referrals = state.service_context.referral_service
        .list_for_referrer(current.user.id)
        .await?;

    Ok(Json(referrals))
}
