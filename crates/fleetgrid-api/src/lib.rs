//! fleetgrid-api: REST API for FleetGrid.
//!
//! Provides axum route handlers for staging artifacts, triggering
//! deployments and reading run history and backups.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/groups/:group/artifacts` | Stage the request body as a new version |
//! | GET | `/api/v1/groups/:group/artifacts/current` | Current artifact bytes |
//! | POST | `/api/v1/groups/:group/deployments` | Trigger a deployment (202) |
//! | GET | `/api/v1/groups/:group/deployments` | Run history, newest first |
//! | GET | `/api/v1/groups/:group/deployments/:run_id` | One run |
//! | GET | `/api/v1/groups/:group/active` | Whether a run is in flight |
//! | GET | `/api/v1/targets/:target/backups` | Backups of a target, newest first |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};

use fleetgrid_rollout::Orchestrator;
use fleetgrid_state::StateStore;

/// Artifacts are uploaded in one request body.
const MAX_ARTIFACT_BYTES: usize = 512 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: StateStore,
}

/// Build the complete API router.
pub fn build_router(orchestrator: Arc<Orchestrator>, store: StateStore) -> Router {
    let state = ApiState {
        orchestrator,
        store,
    };

    let api_routes = Router::new()
        .route(
            "/groups/{group}/artifacts",
            post(handlers::stage_artifact).layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES)),
        )
        .route("/groups/{group}/artifacts/current", get(handlers::current_artifact))
        .route(
            "/groups/{group}/deployments",
            get(handlers::list_deployments).post(handlers::trigger_deployment),
        )
        .route("/groups/{group}/deployments/{run_id}", get(handlers::get_deployment))
        .route("/groups/{group}/active", get(handlers::group_active))
        .route("/targets/{target}/backups", get(handlers::list_backups))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use fleetgrid_core::{FleetConfig, Target};
    use fleetgrid_rollout::{FleetRegistry, LogNotifier, Orchestrator, RemoteCommandApi};
    use fleetgrid_state::{CommandStatus, StateStore, TargetId};

    use crate::ApiState;

    /// A registry with no members anywhere.
    struct EmptyRegistry;

    #[async_trait]
    impl FleetRegistry for EmptyRegistry {
        async fn list_healthy(&self, _group: &str) -> anyhow::Result<Vec<Target>> {
            Ok(Vec::new())
        }
    }

    struct NoCommands;

    #[async_trait]
    impl RemoteCommandApi for NoCommands {
        async fn send(&self, _: &[TargetId], _: &[String], _: Duration) -> anyhow::Result<String> {
            anyhow::bail!("no command service in tests")
        }

        async fn get_status(&self, _: &str) -> anyhow::Result<HashMap<TargetId, CommandStatus>> {
            Ok(HashMap::new())
        }
    }

    pub fn test_state(on_conflict: &str) -> ApiState {
        let toml = format!(
            r#"
[orchestrator]
on_conflict = "{on_conflict}"

[groups.web]
deploy = ["deploy {{version}}"]
backup = ["backup"]
restore = ["restore"]

[groups.web.probe]
type = "http"
path = "/healthz"
"#
        );
        let config = FleetConfig::from_toml_str(&toml).unwrap();
        let store = StateStore::open_in_memory().unwrap();
        let orchestrator = Orchestrator::new(
            config,
            store.clone(),
            Arc::new(store.clone()),
            Arc::new(EmptyRegistry),
            Arc::new(NoCommands),
            Arc::new(LogNotifier),
        );
        ApiState {
            orchestrator: Arc::new(orchestrator),
            store,
        }
    }
}
