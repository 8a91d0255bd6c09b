pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    Router,
    routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

/// Room for the multipart framing around a receipt.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let body_limit = settings.storage.max_upload_bytes + MULTIPART_OVERHEAD;
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        .nest("/api", api_routes(app_state.clone()))

        .with_state(app_state)

        // Middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/packages", get(handlers::payments::list_packages))
        .nest("/users", user_routes(state.clone()))
        .nest("/payments", payment_routes(state.clone()))
        .nest("/tokens", token_routes(state.clone()))
        .nest("/referrals", referral_routes(state.clone()))
        .nest("/notifications", notification_routes(state.clone()))
        .nest("/admin", admin_routes(state))
}

fn user_routes(state: AppState) -> Router<AppState> {
    let registration = Router::new()
        .route("/register", post(handlers::users::register))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_identity,
        ));

    Router::new()
        .route("/me", get(handlers::users::me))
        .route("/referral-code/:code", get(handlers::users::by_referral_code))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
        .merge(registration)
}

fn payment_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::payments::submit).get(handlers::payments::list_mine))
        .route("/:id", get(handlers::payments::get))
        .route("/:id/watch", get(handlers::payments::watch))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn token_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::tokens::issue).get(handlers::tokens::list))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn referral_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::referrals::submit).get(handlers::referrals::list))
        .route("/eligibility", get(handlers::referrals::eligibility))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn notification_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::notifications::list))
        .route("/:id/read", post(handlers::notifications::mark_read))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

/// Role checks happen in the services; reporters may reach the penalty route.
fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/payments/pending", get(handlers::admin::pending_payments))
        .route("/payments/stream", get(handlers::admin::payment_queue))
        .route("/payments/:id/approve", post(handlers::admin::approve_payment))
        .route("/payments/:id/reject", post(handlers::admin::reject_payment))
        .route("/referrals/expire", post(handlers::admin::expire_referrals))
        .route("/referrals/:id/success", post(handlers::admin::referral_successful))
        .route("/users/:id/penalty", post(handlers::admin::penalize_user))
        .route("/users/:id/role", put(handlers::admin::set_role))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}
