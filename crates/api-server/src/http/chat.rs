use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use shared::models::{ChatRequest, ChatResponse};

use super::AppState;
use super::errors::service_error_response;
use super::observability::ServedTenant;
use super::tenant::resolve_slug;

pub(super) async fn post_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    Json(req): Json<ChatRequest>,
) -> Response {
    let slug = match resolve_slug(&state, &headers, &uri, req.restaurant.as_deref()) {
        Ok(slug) => slug,
        Err(response) => return response,
    };

    let reply = match state
        .service
        .handle_chat_message(&slug, req.session_id.as_deref(), &req.message)
        .await
    {
        Ok(reply) => reply,
        Err(err) => return service_error_response(err),
    };

    let mut response = (
        StatusCode::OK,
        Json(ChatResponse {
            response: reply.response_text,
            recommendations: reply.recommendations,
            response_path: reply.response_path,
            restaurant: reply.restaurant,
        }),
    )
        .into_response();
    response.extensions_mut().insert(ServedTenant(slug));
    response
}
