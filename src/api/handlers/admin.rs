use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Extension, Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::{
        handlers::{detached, payments::payment_event},
        middleware::auth::CurrentUser,
        state::AppState,
    },
    domain::{Payment, Referral, Role, User},
    error::{AppError, Result},
    service::PenaltyOutcome,
};

pub async fn pending_payments(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<Payment>>> {
    let payments = state.service_context.payment_service
        .list_pending(current.actor)
        .await?;

    Ok(Json(payments))
}

/// The pending queue, followed by every payment change as it happens.
pub async fn payment_queue(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let (pending, subscription) = state.service_context.payment_service
        .watch_pending(current.actor)
        .await?;

    let stream = stream::iter(pending)
        .chain(subscription.into_stream())
        .map(payment_event);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub async fn approve_payment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>> {
    let payments = state.service_context.payment_service.clone();
    let actor = current.actor;

    let payment = detached(async move { payments.approve_payment(actor, id).await }).await?;
    Ok(Json(payment))
}

#[derive(Debug, Deserialize)]
pub struct RejectDto {
    reason: Option<String>,
}

pub async fn reject_payment(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    dto: Option<Json<RejectDto>>,
) -> Result<Json<Payment>> {
    let reason = dto.and_then(|Json(dto)| dto.reason);
    let payments = state.service_context.payment_service.clone();
    let actor = current.actor;

    let payment = detached(async move {
        payments.reject_payment(actor, id, reason).await
    })
    .await?;

    Ok(Json(payment))
}

pub async fn referral_successful(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Referral>> {
    let referrals = state.service_context.referral_service.clone();
    let actor = current.actor;

    let referral = detached(async move { referrals.mark_successful(actor, id).await }).await?;
    Ok(Json(referral))
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    expired: u64,
}

pub async fn expire_referrals(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<ExpireResponse>> {
    if !current.actor.is_admin() {
        return Err(AppError::Unauthorized);
    }

    let expired = state.service_context.referral_service.expire_stale().await?;
    Ok(Json(ExpireResponse { expired }))
}

#[derive(Debug, Deserialize)]
pub struct PenaltyDto {
    minutes: i64,
    reason: String,
}

pub async fn penalize_user(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(dto): Json<PenaltyDto>,
) -> Result<Json<PenaltyOutcome>> {
    let ledger = state.service_context.ledger_service.clone();
    let actor = current.actor;

    let outcome = detached(async move {
        ledger.penalize(actor, id, dto.minutes, &dto.reason).await
    })
    .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RoleDto {
    role: String,
}

pub async fn set_role(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
    Json(dto): Json<RoleDto>,
) -> Result<Json<User>> {
    let role = Role::from_str(&dto.role)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown role: {}", dto.role)))?;

    let user = state.service_context.user_service
        .set_role(current.actor, id, role)
        .await?;

    Ok(Json(user))
}
