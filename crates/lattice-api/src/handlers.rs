//! Status handlers.
//!
//! Each handler reads from the shared `MeshRuntime` and returns JSON.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use lattice_health::HealthSummary;
use lattice_registry::HealthVerdict;
use lattice_telemetry::IssueThresholds;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Services ───────────────────────────────────────────────────

/// GET /api/v1/services
pub async fn list_services(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.runtime.registry().current();
    ApiResponse::ok(snapshot.services().to_vec())
}

/// GET /api/v1/services/{name}
pub async fn get_service(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.runtime.registry().current().get(&name) {
        Some(descriptor) => ApiResponse::ok(descriptor.clone()).into_response(),
        None => error_response("service not found", StatusCode::NOT_FOUND).into_response(),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/v1/health
pub async fn health_report(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.runtime.service_health_report())
}

/// GET /api/v1/health/{name}
pub async fn service_health(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    if !state.runtime.registry().current().contains(&name) {
        return error_response("service not found", StatusCode::NOT_FOUND).into_response();
    }
    // Registered but never probed reads as unknown.
    let summary = state
        .runtime
        .service_health_report()
        .into_iter()
        .find(|s| s.service == name)
        .unwrap_or_else(|| HealthSummary {
            service: name,
            verdict: HealthVerdict::Unknown,
            consecutive_failures: 0,
            probe_age_ms: None,
        });
    ApiResponse::ok(summary).into_response()
}

// ── Edges ──────────────────────────────────────────────────────

/// GET /api/v1/edges
pub async fn list_edges(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.runtime.edge_statistics())
}

/// GET /api/v1/issues
pub async fn list_issues(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.runtime.detect_issues(&IssueThresholds::default()))
}

// ── Liveness ───────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
