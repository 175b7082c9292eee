//! The request pipeline shared by both services.
//!
//! spec.md §9 describes the source's per-service middleware chain as
//! "three composable handler stages that a request passes through in
//! order, each able to short-circuit with a terminal response" and asks
//! for a language-neutral equivalent with "no runtime metaprogramming".
//! Axum's `tower::Layer` stack is exactly that: each stage below is a
//! plain async function, composed with `.layer(...)` in the order they
//! run, and any stage can return early with a `Response` instead of
//! calling `next.run(...)`.
//!
//! Stage 1 (tracing) never short-circuits. Stage 2 (bearer-token
//! verification) short-circuits with 401 on a bad/missing token. Stage 3
//! is the route handler itself, reached only if stage 2 passed.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth;
use crate::error::LedgerError;

#[derive(Clone)]
pub struct AuthState {
    pub token_secret: String,
}

/// Stage 2: reject requests without a valid `Authorization: Bearer <token>`
/// header signed with this service's `token_secret`.
pub async fn require_bearer_token(
    State(state): State<AuthState>,
    request: Request,
    next: Next,
) -> Result<Response, LedgerError> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| LedgerError::Unauthorized("missing bearer token".to_string()))?;

    match auth::verify(&state.token_secret, token) {
        Ok(_claims) => Ok(next.run(request).await),
        Err(e) => Err(LedgerError::Unauthorized(e.to_string())),
    }
}
