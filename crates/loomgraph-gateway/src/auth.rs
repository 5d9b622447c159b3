use axum::http::HeaderMap;

use crate::app::AppState;

/// `true` when no token is configured, or the request carries a matching
/// `Authorization: Bearer <token>` header.
pub fn check(state: &AppState, headers: &HeaderMap) -> bool {
    match state.config.gateway.auth_token.as_deref() {
        None => true,
        Some(expected) => extract_bearer(headers).map(|t| t == expected).unwrap_or(false),
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
