use axum::http::{HeaderMap, Uri, header};
use axum::response::Response;
use tracing::debug;

use super::AppState;
use super::errors::service_error_response;

/// Resolves the tenant for a request from its `Host` header and path, with an
/// optional explicit hint from the query string or body.
pub(super) fn resolve_slug(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    hint: Option<&str>,
) -> Result<String, Response> {
    let host = request_host(headers, uri);
    match state
        .service
        .resolve_tenant_with_hint(&host, uri.path(), hint)
    {
        Ok(resolved) => {
            debug!(
                slug = %resolved.slug,
                matched_by = resolved.matched_by.as_str(),
                "tenant resolved"
            );
            Ok(resolved.slug)
        }
        Err(err) => Err(service_error_response(err)),
    }
}

fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| uri.authority().map(|authority| authority.as_str().to_string()))
        .unwrap_or_default()
}
