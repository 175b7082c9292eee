//! The coordinator's client-facing HTTP surface (spec.md §6.2), plus the
//! ambient `/healthz` and `/metrics` endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::coordinator::orchestrator::{Coordinator, TransferResult};
use crate::middleware::{require_bearer_token, AuthState};
use crate::telemetry::{self, CoordinatorMetrics};
use crate::types::{AccountId, Money, TransactionId, TransactionStatus};

#[derive(Clone)]
pub struct CoordinatorAppState {
    pub coordinator: Arc<Coordinator>,
    pub metrics: CoordinatorMetrics,
    pub token_secret: String,
}

pub fn router(state: CoordinatorAppState) -> Router {
    let auth_state = AuthState { token_secret: state.token_secret.clone() };

    let protected = Router::new()
        .route("/transfers", post(create_transfer))
        .route("/transfers/status/:transaction_id", get(transfer_status))
        .route("/transfers/history/:account_id", get(transfer_history))
        .layer(middleware::from_fn_with_state(auth_state, require_bearer_token));

    let public = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_endpoint));

    protected
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct TransferRequest {
    source_account_id: AccountId,
    destination_account_id: AccountId,
    amount: Decimal,
    transaction_id: Option<TransactionId>,
}

#[derive(Debug, Serialize)]
struct TransferData {
    transaction_id: TransactionId,
    status: TransactionStatus,
    source_account_id: AccountId,
    destination_account_id: AccountId,
    amount: Decimal,
    retry_attempt: u32,
    total_attempts: u32,
}

#[derive(Debug, Serialize)]
struct TransferResponse {
    success: bool,
    data: TransferData,
    message: String,
    details: Option<AbortDetails>,
}

#[derive(Debug, Serialize)]
struct AbortDetails {
    code: Option<String>,
    message: Option<String>,
}

fn transfer_response(result: TransferResult) -> axum::response::Response {
    let committed = result.status == TransactionStatus::Committed;
    let status_code = if committed { StatusCode::OK } else { StatusCode::CONFLICT };
    let message = if committed {
        "transfer committed".to_string()
    } else {
        "transfer aborted".to_string()
    };
    let details = if committed {
        None
    } else {
        Some(AbortDetails { code: result.abort_code.clone(), message: result.abort_message.clone() })
    };

    let body = TransferResponse {
        success: committed,
        data: TransferData {
            transaction_id: result.transaction_id,
            status: result.status,
            source_account_id: result.source_account_id,
            destination_account_id: result.destination_account_id,
            amount: result.amount.as_decimal(),
            retry_attempt: result.retry_attempt,
            total_attempts: result.total_attempts,
        },
        message,
        details,
    };

    (status_code, Json(body)).into_response()
}

async fn create_transfer(
    State(state): State<CoordinatorAppState>,
    Json(req): Json<TransferRequest>,
) -> impl IntoResponse {
    let amount = Money::new(req.amount);
    match state
        .coordinator
        .transfer_with_retry(req.source_account_id, req.destination_account_id, amount, req.transaction_id)
        .await
    {
        Ok(result) => transfer_response(result),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Serialize)]
struct TransactionView {
    transaction_id: TransactionId,
    source_account_id: AccountId,
    destination_account_id: AccountId,
    amount: Decimal,
    status: TransactionStatus,
}

async fn transfer_status(
    State(state): State<CoordinatorAppState>,
    Path(transaction_id): Path<TransactionId>,
) -> impl IntoResponse {
    match state.coordinator.transactions().get(transaction_id) {
        Ok(Some(tx)) => {
            let view = TransactionView {
                transaction_id: tx.transaction_id,
                source_account_id: tx.source_account_id,
                destination_account_id: tx.destination_account_id,
                amount: tx.amount.as_decimal(),
                status: tx.status,
            };
            (StatusCode::OK, Json(serde_json::json!({ "success": true, "data": view }))).into_response()
        }
        Ok(None) => crate::error::LedgerError::NotFound(format!("transaction {transaction_id} not found")).into_response(),
        Err(err) => err.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn transfer_history(
    State(state): State<CoordinatorAppState>,
    Path(account_id): Path<AccountId>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);

    match state.coordinator.transactions().history(account_id, limit, offset) {
        Ok(rows) => {
            let views: Vec<TransactionView> = rows
                .into_iter()
                .map(|tx| TransactionView {
                    transaction_id: tx.transaction_id,
                    source_account_id: tx.source_account_id,
                    destination_account_id: tx.destination_account_id,
                    amount: tx.amount.as_decimal(),
                    status: tx.status,
                })
                .collect();
            (StatusCode::OK, Json(serde_json::json!({ "success": true, "data": views }))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "success": true })))
}

async fn metrics_endpoint(State(state): State<CoordinatorAppState>) -> impl IntoResponse {
    (StatusCode::OK, telemetry::render(&state.metrics.registry))
}
