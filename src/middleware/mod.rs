//! Middleware module
//!
//! Session authentication with the route guard table, login rate limiting
//! and request tracing.

pub mod auth;
pub mod logging;
pub mod rate_limit;

pub use auth::{client_info, request_client, required_role, session_middleware};
pub use logging::trace_layer;
pub use rate_limit::{login_rate_limit, LoginRateLimiter};
