//! Request middleware: security headers, validation, rate limiting, bearer auth
//! and client IP extraction.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod security_headers;
pub mod validation;

pub use rate_limit::EndpointRateLimiter;
