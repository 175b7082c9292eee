//! The coordinator's outbound leg: calling a participant's `/2pc/*`
//! endpoints over HTTP with a per-call timeout (spec.md §4.1, §5).
//!
//! Grounded in the teacher's approach of one thin client wrapper per
//! remote collaborator; uses `reqwest` the way the pack's service
//! examples do (one shared `Client`, JSON bodies, explicit timeouts).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::auth;
use crate::error::LedgerError;
use crate::types::{AccountId, Operation, TransactionId, Vote};

#[derive(Debug, Clone)]
pub struct PrepareVote {
    pub vote: Vote,
    pub current_balance: Option<Decimal>,
    pub reason_code: Option<String>,
    pub reason_message: Option<String>,
}

pub struct ParticipantClient {
    http: reqwest::Client,
    base_url: String,
    token_secret: String,
}

#[derive(Serialize)]
struct PrepareRequest {
    transaction_id: TransactionId,
    account_id: AccountId,
    amount: Decimal,
    operation: Operation,
}

#[derive(Serialize)]
struct LockVerbRequest {
    transaction_id: TransactionId,
    account_id: AccountId,
}

#[derive(Deserialize)]
struct PrepareDetails {
    current_balance: Option<Decimal>,
}

#[derive(Deserialize)]
struct PrepareErrorBody {
    code: String,
    message: String,
}

#[derive(Deserialize)]
struct PrepareResponse {
    #[allow(dead_code)]
    success: bool,
    vote: String,
    details: Option<PrepareDetails>,
    error: Option<PrepareErrorBody>,
}

#[derive(Deserialize)]
struct LockStatusResponse {
    locked_account_id: Option<AccountId>,
}

impl ParticipantClient {
    pub fn new(base_url: impl Into<String>, token_secret: impl Into<String>) -> Self {
        ParticipantClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token_secret: token_secret.into(),
        }
    }

    fn bearer(&self) -> String {
        auth::mint_service_token(&self.token_secret)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `Prepare(tx_id, account_id, signed_amount, op)` (spec.md §4.1 step 2).
    /// A timeout, transport failure, or non-2xx response is folded into
    /// an abort vote rather than propagated, matching spec.md §4.1 step 3
    /// ("Any of these count as an abort vote").
    pub async fn prepare(
        &self,
        transaction_id: TransactionId,
        account_id: AccountId,
        signed_amount: Decimal,
        operation: Operation,
        timeout: Duration,
    ) -> PrepareVote {
        let body = PrepareRequest { transaction_id, account_id, amount: signed_amount, operation };

        let response = self
            .http
            .post(self.url("/2pc/prepare"))
            .bearer_auth(self.bearer())
            .timeout(timeout)
            .json(&body)
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(_) => {
                return PrepareVote {
                    vote: Vote::Abort,
                    current_balance: None,
                    reason_code: Some("Transport".to_string()),
                    reason_message: Some("prepare request failed".to_string()),
                }
            }
        };

        match response.json::<PrepareResponse>().await {
            Ok(parsed) if parsed.vote == "commit" => PrepareVote {
                vote: Vote::Commit,
                current_balance: parsed.details.and_then(|d| d.current_balance),
                reason_code: None,
                reason_message: None,
            },
            Ok(parsed) => PrepareVote {
                vote: Vote::Abort,
                current_balance: None,
                reason_code: parsed.error.as_ref().map(|e| e.code.clone()),
                reason_message: parsed.error.map(|e| e.message),
            },
            Err(_) => PrepareVote {
                vote: Vote::Abort,
                current_balance: None,
                reason_code: Some("Transport".to_string()),
                reason_message: Some("prepare response malformed".to_string()),
            },
        }
    }

    /// `Commit(tx_id, account_id)` (spec.md §4.1 step 4). Transport
    /// failure here is the coordinator's *Critical* path, so it is
    /// surfaced rather than folded into any vote.
    pub async fn commit(&self, transaction_id: TransactionId, account_id: AccountId, timeout: Duration) -> Result<(), LedgerError> {
        let body = LockVerbRequest { transaction_id, account_id };
        let response = self
            .http
            .post(self.url("/2pc/commit"))
            .bearer_auth(self.bearer())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("commit call to {account_id} failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LedgerError::Transport(format!("commit call to {account_id} returned {}", response.status())))
        }
    }

    /// `Abort(tx_id, account_id)` (spec.md §4.1 step 5). Failures here
    /// are logged by the caller but never change the transfer outcome.
    pub async fn abort(&self, transaction_id: TransactionId, account_id: AccountId, timeout: Duration) -> Result<(), LedgerError> {
        let body = LockVerbRequest { transaction_id, account_id };
        let response = self
            .http
            .post(self.url("/2pc/abort"))
            .bearer_auth(self.bearer())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("abort call to {account_id} failed: {e}")))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(LedgerError::Transport(format!("abort call to {account_id} returned {}", response.status())))
        }
    }

    /// `GET /2pc/lock/{transaction_id}`, used only by the sweeper
    /// (SPEC_FULL.md §2).
    pub async fn lock_holder(&self, transaction_id: TransactionId, timeout: Duration) -> Result<Option<AccountId>, LedgerError> {
        let response = self
            .http
            .get(self.url(&format!("/2pc/lock/{transaction_id}")))
            .bearer_auth(self.bearer())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("lock query failed: {e}")))?;

        let parsed: LockStatusResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Transport(format!("lock query response malformed: {e}")))?;
        Ok(parsed.locked_account_id)
    }
}
