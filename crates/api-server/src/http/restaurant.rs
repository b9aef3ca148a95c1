use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use shared::models::{RestaurantInfoResponse, default_welcome_message};

use super::AppState;
use super::errors::service_error_response;
use super::observability::ServedTenant;
use super::tenant::resolve_slug;

#[derive(Debug, Default, Deserialize)]
pub(super) struct TenantHintQuery {
    pub(super) restaurant: Option<String>,
}

pub(super) async fn get_restaurant(
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

    let welcome_message = if restaurant.welcome_message.trim().is_empty() {
        default_welcome_message(&restaurant.ai_name, &restaurant.name)
    } else {
        restaurant.welcome_message.clone()
    };

    let mut response = (
        StatusCode::OK,
        Json(RestaurantInfoResponse {
            restaurant: restaurant.summary(),
            welcome_message,
        }),
    )
        .into_response();
    response.extensions_mut().insert(ServedTenant(slug));
    response
}
