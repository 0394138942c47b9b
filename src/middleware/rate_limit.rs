//! Rate limiting middleware
//!
//! Login attempts are limited per client IP with a keyed `governor` limiter.

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::warn;

use crate::middleware::auth::request_client;
use crate::state::AppState;
use crate::utils::errors::{EventBuddyError, Result};

/// Per-IP limiter for login attempts
#[derive(Clone)]
pub struct LoginRateLimiter {
    limiter: Arc<DefaultKeyedRateLimiter<String>>,
}

impl LoginRateLimiter {
    /// Allow `attempts_per_minute` attempts per key, refilled evenly over the minute
    pub fn new(attempts_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(attempts_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
        }
    }

    pub fn check(&self, key: &str) -> Result<()> {
        match self.limiter.check_key(&key.to_string()) {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(key, "Login rate limit exceeded");
                Err(EventBuddyError::RateLimitExceeded)
            }
        }
    }

    /// Drop keys whose quota has fully recovered
    pub fn cleanup(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }
}

/// Reject login attempts over the per-IP quota
pub async fn login_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = request_client(&request);
    let key = client.ip_address.unwrap_or_else(|| "unknown".to_string());

    match state.login_limiter.check(&key) {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_enforced_per_key() {
        let limiter = LoginRateLimiter::new(2);
        assert!(limiter.check("203.0.113.7").is_ok());
        assert!(limiter.check("203.0.113.7").is_ok());
        assert!(matches!(limiter.check("203.0.113.7"), Err(EventBuddyError::RateLimitExceeded)));
        assert!(limiter.check("198.51.100.1").is_ok());
    }

    #[test]
    fn test_zero_quota_still_allows_one_attempt() {
        let limiter = LoginRateLimiter::new(0);
        assert!(limiter.check("203.0.113.7").is_ok());
        assert!(limiter.check("203.0.113.7").is_err());
        limiter.cleanup();
    }
}
