//! Decision service routes.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::error::ApiError;
use super::middleware::AdmissionState;
use crate::ratelimit::{Decision, QuotaSnapshot};

/// Body of `POST /v1/admit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmitRequest {
    pub client_key: String,
}

/// Successful admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitResponse {
    pub allowed: bool,
    pub remaining: u64,
}

/// Build the decision service router.
///
/// - `POST /v1/admit` consumes one request of quota for `client_key`
/// - `GET /v1/quota/{client_key}` reports usage without consuming quota
/// - `GET /healthz` liveness
pub fn router(state: AdmissionState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/admit", post(admit))
        .route("/v1/quota/{client_key}", get(quota))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn admit(
    State(state): State<AdmissionState>,
    Json(request): Json<AdmitRequest>,
) -> Result<Json<AdmitResponse>, ApiError> {
    let decision = state
        .limiter()
        .evaluate(&request.client_key, state.now())
        .await?;

    info!(
        client_key = %request.client_key,
        allowed = decision.is_allowed(),
        "Admission decision made"
    );

    match decision {
        Decision::Allow { remaining } => Ok(Json(AdmitResponse {
            allowed: true,
            remaining,
        })),
        Decision::Deny {
            limit,
            window,
            retry_after,
        } => Err(ApiError::QuotaExceeded {
            limit,
            window,
            retry_after,
        }),
    }
}

async fn quota(
    State(state): State<AdmissionState>,
    Path(client_key): Path<String>,
) -> Result<Json<QuotaSnapshot>, ApiError> {
    let snapshot = state.limiter().inspect(&client_key, state.now()).await?;
    Ok(Json(snapshot))
}
