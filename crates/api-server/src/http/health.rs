use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use shared::models::{OkResponse, ReadinessResponse};
use tracing::warn;

use super::AppState;

pub(super) async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(OkResponse { ok: true }))
}

/// Ready while Postgres answers. A degraded cache or a missing remote model
/// is reported but does not fail readiness.
pub(super) async fn readyz(State(state): State<AppState>) -> Response {
    let report = state.service.readiness().await;
    let status = if report.database_ok {
        StatusCode::OK
    } else {
        warn!(cache = %report.cache.label(), "readiness check failed: database unavailable");
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = ReadinessResponse {
        status: if report.database_ok { "ok" } else { "unavailable" }.to_string(),
        database: if report.database_ok {
            "connected"
        } else {
            "unavailable"
        }
        .to_string(),
        cache: report.cache.label(),
        ai: report.ai_mode,
        timestamp: Utc::now(),
    };

    (status, Json(body)).into_response()
}
