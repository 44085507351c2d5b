//! cfgrid-api: REST API for cfgrid.
//!
//! Provides axum route handlers for starting rollouts, following their
//! jobs, reading the active configuration and the cluster status.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/config/update` | Start a rollout (202 with `jobId`) |
//! | GET | `/api/v1/config/files` | List every file of the active snapshot |
//! | GET | `/api/v1/config/files/{*name}` | Serve one file raw |
//! | GET | `/api/v1/jobs/{id}` | Job record and log count |
//! | GET | `/api/v1/jobs/{id}/logs` | Job log lines |
//! | GET | `/api/v1/jobs/{id}/items` | Job item ids |
//! | GET | `/api/v1/status` | Cluster health report |

pub mod handlers;
pub mod rollout_handlers;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use cfgrid_rollout::RolloutCoordinator;

/// Largest accepted update request. Canned bundles travel base64-encoded
/// inside the JSON body.
pub const MAX_UPDATE_BODY: usize = 64 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub coordinator: RolloutCoordinator,
}

/// Build the complete API router.
pub fn build_router(coordinator: RolloutCoordinator) -> Router {
    let state = ApiState { coordinator };

    let api_routes = Router::new()
        .route(
            "/config/update",
            post(rollout_handlers::update_config).layer(DefaultBodyLimit::max(MAX_UPDATE_BODY)),
        )
        .route("/config/files", get(handlers::list_config))
        .route("/config/files/{*name}", get(handlers::get_file))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/logs", get(handlers::get_job_logs))
        .route("/jobs/{id}/items", get(handlers::get_job_items))
        .route("/status", get(handlers::get_status))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use cfgrid_core::CfgridConfig;
    use cfgrid_health::{LocalStatus, StatusAggregator, StatusPublisher};
    use cfgrid_snapshot::{ConfigStore, NoRepository};
    use cfgrid_state::{Color, StateStore};

    use super::*;

    /// API state over an in-memory store with no repository configured.
    pub fn test_state() -> ApiState {
        let config = CfgridConfig::default();
        let store = StateStore::open_in_memory().unwrap();
        let aggregator =
            StatusAggregator::new(store.clone(), &config.status.table, config.status.table_ttl);
        let publisher = StatusPublisher::new(
            aggregator,
            &config.node.service,
            "test",
            LocalStatus::new(Color::Green, ""),
        );
        let coordinator = RolloutCoordinator::from_config(
            store,
            &config,
            ConfigStore::new(""),
            Arc::new(NoRepository),
            publisher,
        );
        ApiState { coordinator }
    }
}
