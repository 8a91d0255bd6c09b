use std::sync::Arc;
use crate::{
    auth::JwtVerifier,
    config::Settings,
    service::ServiceContext,
};

#[derive(Clone)]
pub struct AppState {
    pub service_context: Arc<ServiceContext>,
    pub verifier: Arc<JwtVerifier>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Self {
        let verifier = Arc::new(JwtVerifier::new(
            &settings.auth.jwt_secret,
            settings.auth.jwt_issuer.clone(),
        ));

        Self {
            service_context,
            verifier,
            settings,
        }
    }
}
