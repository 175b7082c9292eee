//! The participant's HTTP surface (spec.md §6.1): `/2pc/prepare`,
//! `/2pc/commit`, `/2pc/abort`, plus the internal `/2pc/lock/{tx_id}`
//! query the sweeper uses (SPEC_FULL.md §2) and the ambient `/healthz`
//! and `/metrics` endpoints.
//!
//! Grounded in the teacher's `examples/rest_api_server.rs`: a `Router`
//! built from plain async handlers taking `State`/`Json` extractors,
//! `.layer(...)` for cross-cutting concerns, `axum::serve` in the binary.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::middleware::{require_bearer_token, AuthState};
use crate::participant::service::Participant;
use crate::telemetry::{self, ParticipantMetrics};
use crate::types::{AccountId, Money, Operation, TransactionId};

#[derive(Clone)]
pub struct ParticipantAppState {
    pub participant: Arc<Participant>,
    pub metrics: ParticipantMetrics,
    pub token_secret: String,
}

pub fn router(state: ParticipantAppState) -> Router {
    let auth_state = AuthState { token_secret: state.token_secret.clone() };

    let protected = Router::new()
        .route("/2pc/prepare", post(prepare))
        .route("/2pc/commit", post(commit))
        .route("/2pc/abort", post(abort))
        .route("/2pc/lock/:transaction_id", get(lock_status))
        .layer(middleware::from_fn_with_state(auth_state, require_bearer_token));

    let public = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint));

    protected
        .merge(public)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct PrepareRequest {
    transaction_id: TransactionId,
    account_id: AccountId,
    amount: Decimal,
    operation: Operation,
}

#[derive(Debug, Serialize)]
struct PrepareDetails {
    account_id: AccountId,
    current_balance: Decimal,
    pending_change: Option<Decimal>,
    operation: Operation,
}

#[derive(Debug, Serialize)]
struct PrepareResponse {
    success: bool,
    vote: &'static str,
    details: PrepareDetails,
}

async fn prepare(
    State(state): State<ParticipantAppState>,
    Json(req): Json<PrepareRequest>,
) -> impl IntoResponse {
    let signed_amount = Money::new(req.amount);
    match state
        .participant
        .prepare(req.transaction_id, req.account_id, signed_amount, req.operation)
        .await
    {
        Ok(outcome) => {
            let body = PrepareResponse {
                success: true,
                vote: "commit",
                details: PrepareDetails {
                    account_id: req.account_id,
                    current_balance: outcome.current_balance.as_decimal(),
                    pending_change: outcome.pending_change.map(|m| m.as_decimal()),
                    operation: req.operation,
                },
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => abort_vote_response(err),
    }
}

#[derive(Debug, Serialize)]
struct AbortVoteBody {
    success: bool,
    vote: &'static str,
    error: crate::error::ErrorBody,
}

fn abort_vote_response(err: LedgerError) -> axum::response::Response {
    let status = err.status();
    let body = AbortVoteBody {
        success: false,
        vote: "abort",
        error: crate::error::ErrorBody { code: err.code().to_string(), message: err.to_string() },
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct LockVerbRequest {
    transaction_id: TransactionId,
    account_id: AccountId,
}

#[derive(Debug, Serialize)]
struct CommitDetails {
    account_id: AccountId,
    new_balance: Decimal,
}

#[derive(Debug, Serialize)]
struct CommitResponse {
    success: bool,
    details: CommitDetails,
}

async fn commit(
    State(state): State<ParticipantAppState>,
    Json(req): Json<LockVerbRequest>,
) -> impl IntoResponse {
    match state.participant.commit(req.transaction_id, req.account_id).await {
        Ok(outcome) => {
            let body = CommitResponse {
                success: true,
                details: CommitDetails { account_id: req.account_id, new_balance: outcome.new_balance.as_decimal() },
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct SimpleSuccess {
    success: bool,
}

async fn abort(
    State(state): State<ParticipantAppState>,
    Json(req): Json<LockVerbRequest>,
) -> impl IntoResponse {
    match state.participant.abort(req.transaction_id, req.account_id).await {
        Ok(()) => (StatusCode::OK, Json(SimpleSuccess { success: true })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct LockStatusResponse {
    success: bool,
    locked_account_id: Option<AccountId>,
}

async fn lock_status(
    State(state): State<ParticipantAppState>,
    Path(transaction_id): Path<Uuid>,
) -> impl IntoResponse {
    match state.participant.lock_holder_account(transaction_id) {
        Ok(locked_account_id) => {
            (StatusCode::OK, Json(LockStatusResponse { success: true, locked_account_id })).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(SimpleSuccess { success: true }))
}

async fn metrics_endpoint(State(state): State<ParticipantAppState>) -> impl IntoResponse {
    (StatusCode::OK, telemetry::render(&state.metrics.registry))
}
