//! convoy-api — REST API for Convoy.
//!
//! Provides axum route handlers for managing deployment groups, their
//! rolling updates, and the host and job registries.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/deployment-group` | List deployment groups |
//! | POST | `/deployment-group` | Create a deployment group (idempotent) |
//! | GET | `/deployment-group/{name}` | Get a deployment group |
//! | DELETE | `/deployment-group/{name}` | Remove a group, stopping its rollout |
//! | POST | `/deployment-group/{name}/rolling-update` | Start a rolling update |
//! | GET | `/deployment-group/{name}/status` | Rolling update status |
//! | POST | `/deployment-group/{name}/stop` | Cancel the running rolling update |
//! | GET | `/hosts` | List hosts |
//! | PUT/GET/DELETE | `/hosts/{id}` | Register, get, deregister a host |
//! | GET | `/jobs` | List jobs |
//! | PUT/GET/DELETE | `/jobs/{id}` | Register, get, delete a job |

pub mod handlers;
pub mod registry_handlers;

use axum::Router;
use axum::routing::{get, post};
use convoy_rollout::Coordinator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Coordinator,
}

/// Build the complete API router.
pub fn build_router(coordinator: Coordinator) -> Router {
    let state = ApiState { coordinator };

    Router::new()
        .route(
            "/deployment-group",
            get(handlers::list_deployment_groups).post(handlers::create_deployment_group),
        )
        .route(
            "/deployment-group/{name}",
            get(handlers::get_deployment_group).delete(handlers::remove_deployment_group),
        )
        .route(
            "/deployment-group/{name}/rolling-update",
            post(handlers::rolling_update),
        )
        .route(
            "/deployment-group/{name}/status",
            get(handlers::rolling_update_status),
        )
        .route("/deployment-group/{name}/stop", post(handlers::stop_rolling_update))
        .route("/hosts", get(registry_handlers::list_hosts))
        .route(
            "/hosts/{id}",
            get(registry_handlers::get_host)
                .put(registry_handlers::put_host)
                .delete(registry_handlers::delete_host),
        )
        .route("/jobs", get(registry_handlers::list_jobs))
        .route(
            "/jobs/{id}",
            get(registry_handlers::get_job)
                .put(registry_handlers::put_job)
                .delete(registry_handlers::delete_job),
        )
        .with_state(state)
}
