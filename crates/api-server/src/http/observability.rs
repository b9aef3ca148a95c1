use axum::extract::{MatchedPath, Request};
use axum::http::{HeaderValue, header};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_REQUEST_ID_LEN: usize = 128;

/// Attached to a response by tenant-scoped handlers so the request log line
/// can name the restaurant that was served.
#[derive(Clone, Debug)]
pub(super) struct ServedTenant(pub(super) String);

pub(super) async fn request_observability_middleware(req: Request, next: Next) -> Response {
    let request_id = resolve_request_id(&req);
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let started_at = Instant::now();

    let mut response = next.run(req).await;
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static(REQUEST_ID_HEADER),
            header_value,
        );
    }

    let slug = response
        .extensions()
        .get::<ServedTenant>()
        .map(|served| served.0.clone())
        .unwrap_or_else(|| "-".to_string());
    let status = response.status().as_u16();
    let latency_ms = started_at.elapsed().as_millis() as u64;
    if status >= 500 {
        warn!(
            request_id = %request_id,
            method = %method,
            route = %route,
            slug = %slug,
            status,
            latency_ms,
            "request completed with server error"
        );
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            route = %route,
            slug = %slug,
            status,
            latency_ms,
            "request completed"
        );
    }

    response
}

fn resolve_request_id(req: &Request) -> String {
    req.headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(normalize_request_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn normalize_request_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_REQUEST_ID_LEN {
        return None;
    }

    let valid = trimmed
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.'));
    valid.then(|| trimmed.to_string())
}
