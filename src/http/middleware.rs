//! Axum middleware enforcing the window quota.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, instrument};

use super::error::ApiError;
use crate::clock::{Clock, SystemClock};
use crate::ratelimit::{Decision, WindowLimiter};

/// Response header with the configured limit.
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
/// Response header with the quota left after the current request.
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Shared state for [`rate_limit_middleware`] and the decision service.
#[derive(Clone)]
pub struct AdmissionState {
    limiter: Arc<WindowLimiter>,
    clock: Arc<dyn Clock>,
    client_key_header: Option<HeaderName>,
}

impl AdmissionState {
    /// Create admission state using the wall clock and the peer address as client key.
    pub fn new(limiter: Arc<WindowLimiter>) -> Self {
        Self {
            limiter,
            clock: Arc::new(SystemClock),
            client_key_header: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Take the client key from the first value of `header`, falling back
    /// to the peer address when the header is missing.
    pub fn with_client_key_header(mut self, header: Option<HeaderName>) -> Self {
        self.client_key_header = header;
        self
    }

    pub fn limiter(&self) -> &Arc<WindowLimiter> {
        &self.limiter
    }

    pub fn now(&self) -> i64 {
        self.clock.now_secs()
    }

    fn client_key(&self, request: &Request) -> Option<String> {
        let from_header = self.client_key_header.as_ref().and_then(|header| {
            request
                .headers()
                .get(header)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.split(',').next())
                .map(|value| value.trim().to_string())
        });

        from_header.or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
    }
}

/// Admit or reject a request before it reaches the wrapped handler.
///
/// Allowed responses carry `x-ratelimit-limit` / `x-ratelimit-remaining`.
/// Rejections are 429 with a JSON body; limiter failures are 500.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn rate_limit_middleware(
    State(state): State<AdmissionState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let client_key = state
        .client_key(&request)
        .ok_or_else(|| ApiError::InvalidInput("unable to determine client key".to_string()))?;

    let decision = state.limiter.evaluate(&client_key, state.now()).await?;

    match decision {
        Decision::Allow { remaining } => {
            let limit = state.limiter.settings().max_requests;
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
            Ok(response)
        }
        Decision::Deny {
            limit,
            window,
            retry_after,
        } => {
            debug!(client_key = %client_key, limit = limit, "Rejecting request over quota");
            Err(ApiError::QuotaExceeded {
                limit,
                window,
                retry_after,
            })
        }
    }
}
