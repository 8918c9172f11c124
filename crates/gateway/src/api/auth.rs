//! API authentication middleware.
//!
//! Reads the env vars named by `config.server.api_token_env` (default
//! `REEF_API_TOKEN`) and `config.server.service_token_env` (default
//! `SERVICE_TOKEN`) **once at startup** and caches their SHA-256 digests
//! in `AppState`.
//! - A request is accepted when its `Authorization: Bearer <token>`
//!   matches either digest — the service token is how the workers and
//!   sibling services call in.
//! - With neither env var set, the server logs a warning once and allows
//!   unauthenticated access (dev mode).

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Hash a configured token for later constant-time comparison. Empty or
/// unset env vars yield `None`.
pub fn token_hash_from_env(env_var: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => None,
    }
}

/// Axum middleware enforcing bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // Dev mode: no tokens configured at all.
    if state.api_token_hash.is_none() && state.service_token_hash.is_none() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash the provided token to a fixed-length digest, then compare in
    // constant time. This avoids leaking the token length.
    let provided_hash = Sha256::digest(provided.as_bytes());

    let matches = |expected: &Option<Vec<u8>>| {
        expected
            .as_ref()
            .is_some_and(|h| bool::from(provided_hash.ct_eq(h.as_slice())))
    };

    if matches(&state.api_token_hash) || matches(&state.service_token_hash) {
        return next.run(req).await;
    }

    (
        axum::http::StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "detail": "invalid or missing bearer token" })),
    )
        .into_response()
}
