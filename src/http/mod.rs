//! HTTP admission surface.
//!
//! [`rate_limit_middleware`] puts a [`WindowLimiter`](crate::ratelimit::WindowLimiter)
//! in front of any axum router. The decision service in [`router`] exposes
//! the same contract to out-of-process callers.

mod error;
mod middleware;
mod server;
mod service;

pub use error::{ApiError, ErrorBody, ErrorDetail};
pub use middleware::{rate_limit_middleware, AdmissionState, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING};
pub use server::HttpServer;
pub use service::{router, AdmitRequest, AdmitResponse};
