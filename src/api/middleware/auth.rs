use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{
    api::state::AppState,
    auth::{bearer_token, Claims},
    domain::{Actor, User},
    error::AppError,
};

/// A verified identity that may not have registered yet.
#[derive(Clone)]
pub struct Identity {
    pub claims: Claims,
}

#[derive(Clone)]
pub struct CurrentUser {
    pub user: User,
    pub actor: Actor,
}

fn verify_request(state: &AppState, request: &Request) -> Result<Claims, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = bearer_token(header).ok_or(AppError::Unauthorized)?;
    state.verifier.verify(token)
}

/// Only checks the bearer token. Used by registration.
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = verify_request(&state, &request)?;
    request.extensions_mut().insert(Identity { claims });

    Ok(next.run(request).await)
}

/// Checks the bearer token and resolves the registered user and role.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = verify_request(&state, &request)?;

    let user = state.service_context.user_service
        .find(claims.sub)
        .await?
        .ok_or(AppError::Forbidden)?;

    let actor = Actor::from(&user);
    request.extensions_mut().insert(CurrentUser { user, actor });

    Ok(next.run(request).await)
}
