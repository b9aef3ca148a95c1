use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use shared::models::MenuResponse;

use super::AppState;
use super::errors::service_error_response;
use super::observability::ServedTenant;
use super::restaurant::TenantHintQuery;
use super::tenant::resolve_slug;

pub(super) async fn get_menu(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Query(query): Query<TenantHintQuery>,
) -> Response {
    let slug = match resolve_slug(&state, &headers, &uri, query.restaurant.as_deref()) {
        Ok(slug) => slug,
        Err(response) => return response,
    };

    let restaurant = match state.service.get_restaurant(&slug).await {
        Ok(restaurant) => restaurant,
        Err(err) => return service_error_response(err),
    };
    let items = match state.service.menu_for(&restaurant).await {
        Ok(items) => items,
        Err(err) => return service_error_response(err),
    };

    let mut response = (
        StatusCode::OK,
        Json(MenuResponse {
            restaurant: restaurant.summary(),
            count: items.len(),
            items,
        }),
    )
        .into_response();
    response.extensions_mut().insert(ServedTenant(slug));
    response
}
