//! The error taxonomy shared by the coordinator and the participant.
//!
//! spec.md §7 names codes, not types: `InvalidArgument`, `NotFound`,
//! `InsufficientFunds`, `Conflict`, `Transport`, `Critical`. This module
//! gives each one a variant, a stable `code()` string for the wire
//! protocol's `error.code` field, and an `IntoResponse` impl so handlers
//! can simply `?` their way out and let axum render the right status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient funds: balance {current_balance} is less than {requested}")]
    InsufficientFunds {
        current_balance: String,
        requested: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    /// A missing or invalid bearer token (SPEC_FULL.md §9's auth stage).
    /// Not part of spec.md §7's taxonomy — that section is silent on
    /// authentication, since token issuance is out of scope (spec.md §1)
    /// — but the middleware still needs a status distinct from `Conflict`
    /// so a rejected-at-the-door request can't be misread as an aborted
    /// transfer (spec.md §6.2 reserves 409 for that).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// A post-decision inconsistency: the coordinator decided to commit
    /// but could not confirm both participants applied it. Never
    /// returned to a client directly — surfaced only via logs/metrics
    /// (spec.md §7); kept in the taxonomy because `details.code` in a
    /// transfer response can still carry it for operator visibility.
    #[error("critical: {0}")]
    Critical(String),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidArgument(_) => "InvalidArgument",
            LedgerError::NotFound(_) => "NotFound",
            LedgerError::InsufficientFunds { .. } => "InsufficientFunds",
            LedgerError::Conflict(_) => "Conflict",
            LedgerError::Unauthorized(_) => "Unauthorized",
            LedgerError::Transport(_) => "Transport",
            LedgerError::Critical(_) => "Critical",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LedgerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
            LedgerError::InsufficientFunds { .. } => StatusCode::CONFLICT,
            LedgerError::Conflict(_) => StatusCode::CONFLICT,
            LedgerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            LedgerError::Transport(_) => StatusCode::BAD_GATEWAY,
            LedgerError::Critical(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    success: bool,
    error: ErrorBody,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
