//! Security middleware — CORS, security headers, rate limiting, and the
//! auth guard.
//!
//! Each middleware takes a config struct with builder-style setters and
//! returns a [`NormalFn`](crate::pipeline::NormalFn) usable both in the
//! global pipeline and as route-scoped middleware.

pub mod auth;
pub mod cors;
pub mod headers;
pub mod rate_limit;

pub use auth::{AuthConfig, TokenVerifier, auth_guard};
pub use cors::{CorsConfig, cors};
pub use headers::{SecurityHeadersConfig, security_headers};
pub use rate_limit::{RateLimitConfig, rate_limit};
