use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::{
    domain::{codes::generate_referral_code, validate_username, Actor, CreateUserRequest, Role, User},
    error::{AppError, Result},
    repository::UserRepository,
    service::{bounded, clock::Clock},
};

pub struct UserService {
    repo: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
    bootstrap_admin_email: Option<String>,
    timeout: Duration,
}

impl UserService {
    pub fn new(
        repo: Arc<dyn UserRepository>,
        clock: Arc<dyn Clock>,
        bootstrap_admin_email: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self { repo, clock, bootstrap_admin_email, timeout }
    }

    /// Completes sign-up once the identity provider has authenticated
    /// `subject` and the user has picked a username.
    pub async fn register(&self, subject: Uuid, email: &str, username: &str) -> Result<User> {
        let username = username.trim();
        if !validate_username(username) {
            return Err(AppError::Validation(
                "Username must be 3-20 letters, digits or underscores".to_string(),
            ));
        }

        if bounded(self.timeout, self.repo.find_by_id(subject)).await?.is_some() {
            return Err(AppError::Conflict("User already registered".to_string()));
        }

        if bounded(self.timeout, self.repo.find_by_username(username)).await?.is_some() {
            return Err(AppError::Conflict("Username already taken".to_string()));
        }

        let role = match &self.bootstrap_admin_email {
            Some(admin) if admin.eq_ignore_ascii_case(email) => Role::Admin,
            _ => Role::User,
        };

        let request = CreateUserRequest {
            id: subject,
            email: email.to_string(),
            username: username.to_string(),
            role,
            referral_code: generate_referral_code(subject),
        };

        let user = bounded(self.timeout, self.repo.create(request, self.clock.now())).await?;
        tracing::info!("Registered user {} ({}) as {}", user.username, user.id, role.as_str());

        Ok(user)
    }

    pub async fn get(&self, id: Uuid) -> Result<User> {
        bounded(self.timeout, self.repo.find_by_id(id))
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<User>> {
        bounded(self.timeout, self.repo.find_by_id(id)).await
    }

    pub async fn find_by_referral_code(&self, code: &str) -> Result<Option<User>> {
        bounded(self.timeout, self.repo.find_by_referral_code(code)).await
    }

    pub async fn set_role(&self, actor: Actor, user_id: Uuid, role: Role) -> Result<User> {
        if !actor.is_admin() {
            return Err(AppError::Unauthorized);
        }

        let user = bounded(self.timeout, self.repo.set_role(user_id, role, self.clock.now())).await?;
        tracing::info!("User {} is now {} (by {})", user_id, role.as_str(), actor.user_id);
        Ok(user)
    }
}
