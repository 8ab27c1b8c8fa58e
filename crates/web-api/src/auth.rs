use crate::error::ApiError;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects requests without the configured `X-API-Key`.
///
/// A server started without a key refuses every guarded request rather than
/// serving them unauthenticated.
///
/// # Errors
/// 500 when no key is configured, 401 when the header is missing or wrong.
pub async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.api_key.as_deref().filter(|k| !k.is_empty()) else {
        tracing::error!("Rejecting request: server.api_key is not configured");
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server Authorization Misconfigured",
        ));
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        None => Err(ApiError::unauthorized("Missing API Key")),
        Some(key) if key != expected => Err(ApiError::unauthorized("Invalid API Key")),
        Some(_) => Ok(next.run(request).await),
    }
}
