//! Host and job registry handlers.
//!
//! Hosts and jobs are plain records in the state store; the rollout
//! machinery only reads them. Responses use the `ApiResponse` envelope.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::{error, info};

use convoy_state::{HostInfo, JobSpec, Labels, StateError, epoch_secs};

use crate::ApiState;
use crate::handlers::{ApiResponse, error_response};

fn store_error(e: StateError) -> Response {
    error!(error = %e, "state store failure");
    error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

/// Body of `PUT /hosts/{id}`.
#[derive(Debug, Deserialize)]
pub struct RegisterHostRequest {
    pub address: String,
    #[serde(default)]
    pub labels: Labels,
}

/// Body of `PUT /jobs/{id}`.
#[derive(Debug, Deserialize)]
pub struct RegisterJobRequest {
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

// ── Hosts ──────────────────────────────────────────────────────

/// GET /hosts
pub async fn list_hosts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.coordinator.store().list_hosts() {
        Ok(hosts) => ApiResponse::ok(hosts).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /hosts/{id}
pub async fn get_host(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.store().get_host(&id) {
        Ok(Some(host)) => ApiResponse::ok(host).into_response(),
        Ok(None) => error_response("host not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// PUT /hosts/{id}
///
/// Registers or replaces a host. Re-registering keeps the original
/// registration time.
pub async fn put_host(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<RegisterHostRequest>,
) -> impl IntoResponse {
    if req.address.trim().is_empty() {
        return error_response("host address is required", StatusCode::BAD_REQUEST);
    }

    let store = state.coordinator.store();
    let registered_at = match store.get_host(&id) {
        Ok(Some(existing)) => existing.registered_at,
        Ok(None) => epoch_secs(),
        Err(e) => return store_error(e),
    };
    let host = HostInfo {
        id,
        address: req.address,
        labels: req.labels,
        registered_at,
    };

    match store.put_host(&host) {
        Ok(()) => {
            info!(host_id = %host.id, address = %host.address, "host registered");
            ApiResponse::ok(host).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// DELETE /hosts/{id}
pub async fn delete_host(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.store().delete_host(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response("host not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

// ── Jobs ───────────────────────────────────────────────────────

/// GET /jobs
pub async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    match state.coordinator.store().list_jobs() {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /jobs/{id}
pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.store().get_job(&id) {
        Ok(Some(job)) => ApiResponse::ok(job).into_response(),
        Ok(None) => error_response("job not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}

/// PUT /jobs/{id}
pub async fn put_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<RegisterJobRequest>,
) -> impl IntoResponse {
    if req.image.trim().is_empty() {
        return error_response("job image is required", StatusCode::BAD_REQUEST);
    }

    let job = JobSpec {
        id,
        image: req.image,
        env: req.env,
        created_at: epoch_secs(),
    };

    match state.coordinator.store().put_job(&job) {
        Ok(()) => {
            info!(job_id = %job.id, image = %job.image, "job registered");
            ApiResponse::ok(job).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// DELETE /jobs/{id}
pub async fn delete_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.store().delete_job(&id) {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => error_response("job not found", StatusCode::NOT_FOUND),
        Err(e) => store_error(e),
    }
}
