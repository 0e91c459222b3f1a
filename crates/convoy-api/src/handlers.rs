//! Deployment group handlers.
//!
//! Each handler delegates to the [`Coordinator`](convoy_rollout::Coordinator)
//! and maps its outcomes onto status codes. Rolling update failures are
//! never reported here; clients poll the status endpoint.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use convoy_rollout::{CoordinatorError, CreateOutcome};
use convoy_state::DeploymentGroup;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
pub(crate) struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub(crate) fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// Map coordinator errors to HTTP responses.
pub(crate) fn coordinator_error(e: CoordinatorError) -> Response {
    match e {
        CoordinatorError::DeploymentGroupNotFound(_) => {
            error_response("deployment group not found", StatusCode::NOT_FOUND)
        }
        CoordinatorError::JobNotFound(_) => error_response("job not found", StatusCode::NOT_FOUND),
        CoordinatorError::CoordinationRace(name) => {
            warn!(deployment_group = %name, "create raced with removal");
            error_response(
                "deployment group was removed concurrently, retry",
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
        CoordinatorError::State(e) => {
            error!(error = %e, "state store failure");
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ── Protocol types ─────────────────────────────────────────────

/// Result of a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateStatus {
    Created,
    NotModified,
    Conflict,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDeploymentGroupResponse {
    pub status: CreateStatus,
    /// The stored group, on conflict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing: Option<DeploymentGroup>,
}

/// Request body to start a rolling update.
#[derive(Debug, Serialize, Deserialize)]
pub struct RollingUpdateRequest {
    pub job: String,
}

/// Result of a rolling update request. Says nothing about rollout success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollingUpdateResult {
    Ok,
    DeploymentGroupNotFound,
    JobNotFound,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RollingUpdateResponse {
    pub status: RollingUpdateResult,
}

// ── Deployment groups ──────────────────────────────────────────

/// GET /deployment-group
pub async fn list_deployment_groups(State(state): State<ApiState>) -> impl IntoResponse {
    match state.coordinator.list_deployment_groups() {
        Ok(groups) => Json(groups).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// POST /deployment-group
pub async fn create_deployment_group(
    State(state): State<ApiState>,
    Json(group): Json<DeploymentGroup>,
) -> impl IntoResponse {
    if group.name.trim().is_empty() {
        return error_response("deployment group name is required", StatusCode::BAD_REQUEST);
    }

    match state.coordinator.create_deployment_group(&group) {
        Ok(CreateOutcome::Created) => Json(CreateDeploymentGroupResponse {
            status: CreateStatus::Created,
            existing: None,
        })
        .into_response(),
        Ok(CreateOutcome::NotModified) => Json(CreateDeploymentGroupResponse {
            status: CreateStatus::NotModified,
            existing: None,
        })
        .into_response(),
        Ok(CreateOutcome::Conflict(existing)) => (
            StatusCode::CONFLICT,
            Json(CreateDeploymentGroupResponse {
                status: CreateStatus::Conflict,
                existing: Some(existing),
            }),
        )
            .into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// GET /deployment-group/{name}
pub async fn get_deployment_group(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.get_deployment_group(&name) {
        Ok(group) => Json(group).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// DELETE /deployment-group/{name}
pub async fn remove_deployment_group(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.remove_deployment_group(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => coordinator_error(e),
    }
}

// ── Rolling updates ────────────────────────────────────────────

/// POST /deployment-group/{name}/rolling-update
pub async fn rolling_update(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<RollingUpdateRequest>,
) -> impl IntoResponse {
    let status = match state.coordinator.start_rolling_update(&name, &req.job).await {
        Ok(()) => RollingUpdateResult::Ok,
        Err(CoordinatorError::DeploymentGroupNotFound(_)) => {
            RollingUpdateResult::DeploymentGroupNotFound
        }
        Err(CoordinatorError::JobNotFound(_)) => RollingUpdateResult::JobNotFound,
        Err(e) => return coordinator_error(e),
    };
    Json(RollingUpdateResponse { status }).into_response()
}

/// GET /deployment-group/{name}/status
pub async fn rolling_update_status(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.rolling_update_status(&name) {
        Ok(status) => Json(status).into_response(),
        Err(e) => coordinator_error(e),
    }
}

/// POST /deployment-group/{name}/stop
pub async fn stop_rolling_update(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.coordinator.stop_rolling_update(&name).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => coordinator_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use convoy_rollout::{Coordinator, DeployFuture, DeployOutcome, HostDeployer};
    use convoy_state::{JobSpec, RolloutState, StateStore};

    struct OkDeployer;

    impl HostDeployer for OkDeployer {
        fn deploy<'a>(&'a self, _host: &'a str, _job: &'a str) -> DeployFuture<'a> {
            Box::pin(async { DeployOutcome::Success })
        }
    }

    fn test_state() -> ApiState {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_job(&JobSpec {
                id: "api:1".to_string(),
                image: "registry/api:1".to_string(),
                env: BTreeMap::new(),
                created_at: 0,
            })
            .unwrap();
        ApiState {
            coordinator: Coordinator::new(store, Arc::new(OkDeployer)),
        }
    }

    fn group(role: &str) -> DeploymentGroup {
        DeploymentGroup::new(
            "web",
            BTreeMap::from([("role".to_string(), role.to_string())]),
        )
    }

    #[tokio::test]
    async fn create_then_retry_then_conflict() {
        let state = test_state();

        let resp = create_deployment_group(State(state.clone()), Json(group("web")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = create_deployment_group(State(state.clone()), Json(group("web")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = create_deployment_group(State(state), Json(group("db")))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn create_requires_name() {
        let resp = create_deployment_group(
            State(test_state()),
            Json(DeploymentGroup::new(" ", BTreeMap::new())),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_and_remove_missing_group() {
        let state = test_state();
        let resp = get_deployment_group(State(state.clone()), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = remove_deployment_group(State(state), Path("nope".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn remove_existing_group_is_no_content() {
        let state = test_state();
        state.coordinator.create_deployment_group(&group("web")).unwrap();

        let resp = remove_deployment_group(State(state), Path("web".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn rolling_update_reports_missing_group_and_job_in_body() {
        let state = test_state();

        let resp = rolling_update(
            State(state.clone()),
            Path("web".to_string()),
            Json(RollingUpdateRequest {
                job: "api:1".to_string(),
            }),
        )
        .await
        .into_response();
        // Outcome lives in the body, the request itself succeeded.
        assert_eq!(resp.status(), StatusCode::OK);

        state.coordinator.create_deployment_group(&group("web")).unwrap();
        let resp = rolling_update(
            State(state.clone()),
            Path("web".to_string()),
            Json(RollingUpdateRequest {
                job: "api:1".to_string(),
            }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        // No hosts are registered, so the rollout is already done.
        let status = state.coordinator.rolling_update_status("web").unwrap();
        assert_eq!(status.state, RolloutState::Done);
    }

    #[test]
    fn protocol_status_names() {
        assert_eq!(
            serde_json::to_string(&RollingUpdateResult::DeploymentGroupNotFound).unwrap(),
            "\"DEPLOYMENT_GROUP_NOT_FOUND\""
        );
        assert_eq!(
            serde_json::to_string(&CreateStatus::NotModified).unwrap(),
            "\"NOT_MODIFIED\""
        );
    }
}
