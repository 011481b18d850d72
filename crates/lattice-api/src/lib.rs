//! lattice-api — read-only status API for a mesh runtime.
//!
//! Everything the control plane knows, over JSON. Mutations stay with
//! the embedding process; the API only observes.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/services` | Registered services |
//! | GET | `/api/v1/services/{name}` | One service descriptor |
//! | GET | `/api/v1/health` | Health report for every service |
//! | GET | `/api/v1/health/{name}` | Health of one service |
//! | GET | `/api/v1/edges` | Breaker + traffic stats per edge |
//! | GET | `/api/v1/issues` | Edges violating the default thresholds |
//! | GET | `/healthz` | Liveness of the API itself |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use lattice_runtime::MeshRuntime;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub runtime: Arc<MeshRuntime>,
}

/// Build the status router over a runtime.
pub fn build_router(runtime: Arc<MeshRuntime>) -> Router {
    let state = ApiState { runtime };

    let api_routes = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/{name}", get(handlers::get_service))
        .route("/health", get(handlers::health_report))
        .route("/health/{name}", get(handlers::service_health))
        .route("/edges", get(handlers::list_edges))
        .route("/issues", get(handlers::list_issues))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
