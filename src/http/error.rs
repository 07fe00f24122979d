//! Mapping of admission outcomes to HTTP responses.

use std::time::Duration;

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::ratelimit::LimiterError;

/// Failure paths of an admission check.
///
/// Only `QuotaExceeded` is rate-limit specific; the other variants carry a
/// generic message so a broken limiter is never mistaken for a quota
/// rejection.
#[derive(Debug)]
pub enum ApiError {
    QuotaExceeded {
        limit: u64,
        window: Duration,
        retry_after: Duration,
    },
    InvalidInput(String),
    Internal(String),
}

/// JSON error envelope: `{"error": {"code": 429, "message": "..."}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
}

impl ErrorBody {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: status.as_u16(),
                message: message.into(),
            },
        }
    }
}

/// Render a window as hours, keeping fractions for sub-hour windows.
fn format_hours(window: Duration) -> String {
    let secs = window.as_secs();
    if secs % 3600 == 0 {
        (secs / 3600).to_string()
    } else {
        format!("{:.2}", secs as f64 / 3600.0)
    }
}

impl ApiError {
    /// The user-facing rejection message for an exhausted quota.
    pub fn quota_message(limit: u64, window: Duration) -> String {
        format!(
            "You have exceeded the {} requests in {} hrs limit!",
            limit,
            format_hours(window)
        )
    }
}

impl From<LimiterError> for ApiError {
    fn from(err: LimiterError) -> Self {
        match err {
            LimiterError::InvalidInput(reason) => ApiError::InvalidInput(reason),
            LimiterError::Store(store_err) => {
                error!(error = %store_err, "Window limiter store failure");
                ApiError::Internal(store_err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::QuotaExceeded {
                limit,
                window,
                retry_after,
            } => {
                let status = StatusCode::TOO_MANY_REQUESTS;
                let body = ErrorBody::new(status, Self::quota_message(limit, window));
                let mut response = (status, Json(body)).into_response();
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
                response
            }
            ApiError::InvalidInput(reason) => {
                let status = StatusCode::BAD_REQUEST;
                (status, Json(ErrorBody::new(status, reason))).into_response()
            }
            ApiError::Internal(_) => {
                // Details are logged, not returned.
                let status = StatusCode::INTERNAL_SERVER_ERROR;
                (status, Json(ErrorBody::new(status, "Internal server error"))).into_response()
            }
        }
    }
}
