//! Shared application state
//!
//! Cloned into every handler by axum; everything inside is cheap to clone.

use std::sync::Arc;

use crate::config::Settings;
use crate::middleware::LoginRateLimiter;
use crate::services::ServiceFactory;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub services: Arc<ServiceFactory>,
    pub login_limiter: LoginRateLimiter,
}

impl AppState {
    pub fn new(settings: Settings, services: ServiceFactory) -> Self {
        let login_limiter = LoginRateLimiter::new(settings.auth.login_attempts_per_minute);
        Self {
            settings: Arc::new(settings),
            services: Arc::new(services),
            login_limiter,
        }
    }
}
