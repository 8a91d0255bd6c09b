use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use uuid::Uuid;

use crate::{
    api::{handlers::detached, middleware::auth::CurrentUser, state::AppState},
    domain::{Package, Payment, ReceiptUpload},
    error::{AppError, Result},
};

pub async fn list_packages(State(state): State<AppState>) -> Json<Vec<Package>> {
    Json(state.service_context.payment_service.packages())
}

/// `multipart/form-data` with `package_id`, `sinpe_id` and a `receipt` file.
pub async fn submit(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Payment>)> {
    let mut package_id = String::new();
    let mut sinpe_id = String::new();
    let mut receipt: Option<ReceiptUpload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "package_id" => package_id = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read package_id: {}", e)))?,
            "sinpe_id" => sinpe_id = field
                .text()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read sinpe_id: {}", e)))?,
            "receipt" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read receipt: {}", e)))?;
                receipt = Some(ReceiptUpload { filename, bytes: bytes.to_vec() });
            }
            _ => {
                field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?;
            }
        }
    }

    let receipt = receipt.ok_or_else(|| AppError::Validation("Receipt image is required".to_string()))?;
    let payments = state.service_context.payment_service.clone();
    let user_id = current.user.id;

    let payment = detached(async move {
        payments.submit_payment(user_id, &package_id, &sinpe_id, receipt).await
    })
    .await?;

    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_mine(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<Json<Vec<Payment>>> {
    let payments = state.service_context.payment_service
        .list_for_user(current.user.id)
        .await?;

    Ok(Json(payments))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>> {
    let payment = state.service_context.payment_service
        .get_payment(current.actor, id)
        .await?;

    Ok(Json(payment))
}

/// Current snapshot of one payment, then every later change.
pub async fn watch(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let (initial, subscription) = state.service_context.payment_service
        .watch_payment(current.actor, id)
        .await?;

    let stream = stream::once(async move { initial })
        .chain(subscription.into_stream())
        .map(payment_event);

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

pub(crate) fn payment_event(payment: Payment) -> std::result::Result<Event, Infallible> {
    let json = serde_json::to_string(&payment).unwrap_or_default();
    Ok(Event::default().event("payment").data(json))
}
