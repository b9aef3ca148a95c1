use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Router, middleware};
use shared::service::ConciergeService;

mod chat;
mod errors;
mod health;
mod menu;
mod observability;
mod restaurant;
mod stats;
mod tenant;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConciergeService>,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/api/restaurant", get(restaurant::get_restaurant))
        .route("/r/{slug}/api/restaurant", get(restaurant::get_restaurant))
        .route("/api/menu", get(menu::get_menu))
        .route("/r/{slug}/api/menu", get(menu::get_menu))
        .route("/api/chat", post(chat::post_chat))
        .route("/r/{slug}/api/chat", post(chat::post_chat))
        .route("/api/stats/{slug}", get(stats::get_stats))
        .layer(middleware::from_fn(
            observability::request_observability_middleware,
        ))
        .with_state(app_state)
}
