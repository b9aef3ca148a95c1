use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use shared::models::StatsResponse;

use super::AppState;
use super::errors::service_error_response;
use super::observability::ServedTenant;

#[derive(Debug, Deserialize)]
pub(super) struct StatsQuery {
    days: Option<u32>,
}

pub(super) async fn get_stats(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Response {
    match state.service.restaurant_stats(&slug, query.days).await {
        Ok(stats) => {
            let mut response = (StatusCode::OK, Json(StatsResponse { stats })).into_response();
            response.extensions_mut().insert(ServedTenant(slug));
            response
        }
        Err(err) => service_error_response(err),
    }
}
