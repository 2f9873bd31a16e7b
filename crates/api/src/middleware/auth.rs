//! Authentication middleware.
//!
//! Rejects requests without a valid API key and stores the authenticated
//! key in request extensions. Permission checks happen in the handlers.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::api_key::ApiKeyAuth;

/// Middleware that requires API key authentication.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();

    let api_key = match ApiKeyAuth::raw_key(&mut parts).await {
        Some(key) => key,
        None => {
            return ApiError::Unauthorized("Invalid or missing API key".to_string())
                .into_response();
        }
    };

    match ApiKeyAuth::validate(&state.config.security.api_keys, &api_key) {
        Ok(auth) => {
            tracing::debug!(key = %auth.name, key_prefix = %auth.key_prefix, "Authenticated");
            parts.extensions.insert(auth);
            next.run(Request::from_parts(parts, body)).await
        }
        Err(err) => err.into_response(),
    }
}
