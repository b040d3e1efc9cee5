//! Cross-cutting HTTP middleware

pub mod rate_limit;
pub mod security_headers;

pub use rate_limit::{rate_limit_middleware, RateLimiter};
pub use security_headers::security_headers_middleware;
