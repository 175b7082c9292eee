//! Participant business logic: the three 2PC verbs and the per-account
//! state machine of spec.md §4.2.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::participant::account::Account;
use crate::participant::store::{AccountStore, CommitRecord, RecentCommits};
use crate::telemetry::ParticipantMetrics;
use crate::types::{AccountId, Money, Operation, TransactionId, Vote};

#[derive(Debug, Clone, Copy)]
pub struct PrepareOutcome {
    pub vote: Vote,
    pub current_balance: Money,
    pub pending_change: Option<Money>,
}

#[derive(Debug, Clone, Copy)]
pub struct CommitOutcome {
    pub new_balance: Money,
}

pub struct Participant {
    store: Arc<AccountStore>,
    recent_commits: Arc<RecentCommits>,
    metrics: ParticipantMetrics,
}

impl Participant {
    pub fn new(store: Arc<AccountStore>, recent_commits: Arc<RecentCommits>, metrics: ParticipantMetrics) -> Self {
        Participant { store, recent_commits, metrics }
    }

    /// `Prepare(tx_id, account_id, signed_amount, op) → vote` (spec.md §4.2).
    pub async fn prepare(
        &self,
        transaction_id: TransactionId,
        account_id: AccountId,
        signed_amount: Money,
        operation: Operation,
    ) -> LedgerResult<PrepareOutcome> {
        let outcome = self
            .store
            .with_account(account_id, |current| {
                let mut account = current.ok_or_else(|| {
                    LedgerError::NotFound(format!("account {account_id} not found"))
                })?;

                match account.lock_holder {
                    Some(holder) if holder == transaction_id => {
                        // Idempotent retry: the stored delta must match.
                        if account.pending_delta != Some(signed_amount) {
                            return Err(LedgerError::Conflict(format!(
                                "transaction {transaction_id} already holds a different pending delta on {account_id}"
                            )));
                        }
                        let outcome = PrepareOutcome {
                            vote: Vote::Commit,
                            current_balance: account.balance,
                            pending_change: account.pending_delta,
                        };
                        Ok((Some(account.clone()), outcome))
                    }
                    Some(_other) => Err(LedgerError::Conflict(format!(
                        "account {account_id} is locked by a different transaction"
                    ))),
                    None => {
                        if operation == Operation::Debit && account.balance.as_decimal() < signed_amount.abs().as_decimal() {
                            return Err(LedgerError::InsufficientFunds {
                                current_balance: account.balance.to_string(),
                                requested: signed_amount.abs().to_string(),
                            });
                        }

                        account.lock_holder = Some(transaction_id);
                        account.pending_delta = Some(signed_amount);
                        account.updated_at = chrono::Utc::now();

                        let outcome = PrepareOutcome {
                            vote: Vote::Commit,
                            current_balance: account.balance,
                            pending_change: account.pending_delta,
                        };
                        Ok((Some(account), outcome))
                    }
                }
            })
            .await;

        match &outcome {
            Ok(o) => {
                self.metrics.prepare_total.with_label_values(&["commit"]).inc();
                info!(%transaction_id, %account_id, %operation, "prepare voted commit: {:?}", o);
            }
            Err(LedgerError::Conflict(_)) => {
                self.metrics.prepare_total.with_label_values(&["abort"]).inc();
                self.metrics.lock_conflicts_total.inc();
                warn!(%transaction_id, %account_id, "prepare voted abort: lock conflict");
            }
            Err(_) => {
                self.metrics.prepare_total.with_label_values(&["abort"]).inc();
                warn!(%transaction_id, %account_id, "prepare voted abort");
            }
        }

        outcome
    }

    /// `Commit(tx_id, account_id) → ack` (spec.md §4.2).
    pub async fn commit(&self, transaction_id: TransactionId, account_id: AccountId) -> LedgerResult<CommitOutcome> {
        if let Some(replay) = self.recent_commits.get(&transaction_id) {
            if replay.account_id == account_id {
                self.metrics.idempotent_replays_total.inc();
                return Ok(CommitOutcome { new_balance: replay.new_balance });
            }
        }

        let result = self
            .store
            .with_account(account_id, |current| {
                let mut account: Account = current.ok_or_else(|| {
                    LedgerError::NotFound(format!("account {account_id} not found"))
                })?;

                if account.lock_holder != Some(transaction_id) {
                    return Err(LedgerError::Conflict(format!(
                        "account {account_id} is not locked by transaction {transaction_id}"
                    )));
                }

                let delta = account.pending_delta.expect("lock_holder implies pending_delta");
                let new_balance = account.balance.checked_add(delta).ok_or_else(|| {
                    LedgerError::Critical(format!("balance overflow committing {transaction_id}"))
                })?;

                account.balance = new_balance;
                account.lock_holder = None;
                account.pending_delta = None;
                account.updated_at = chrono::Utc::now();

                Ok((Some(account), CommitOutcome { new_balance }))
            })
            .await;

        if let Ok(outcome) = &result {
            self.recent_commits.record(
                transaction_id,
                CommitRecord { account_id, new_balance: outcome.new_balance },
            );
            self.metrics.commit_total.inc();
            info!(%transaction_id, %account_id, new_balance = %outcome.new_balance, "committed");
        }

        result
    }

    /// `Abort(tx_id, account_id) → ack` (spec.md §4.2). Idempotent: a
    /// mismatched or absent lock is success, not an error.
    pub async fn abort(&self, transaction_id: TransactionId, account_id: AccountId) -> LedgerResult<()> {
        let result = self
            .store
            .with_account(account_id, |current| {
                let mut account: Account = current.ok_or_else(|| {
                    LedgerError::NotFound(format!("account {account_id} not found"))
                })?;

                if account.lock_holder == Some(transaction_id) {
                    account.lock_holder = None;
                    account.pending_delta = None;
                    account.updated_at = chrono::Utc::now();
                    Ok((Some(account), ()))
                } else {
                    // Already released (by this or an earlier abort), or
                    // held by someone else entirely: either way, nothing
                    // for this abort to do.
                    Ok((None, ()))
                }
            })
            .await;

        if result.is_ok() {
            self.metrics.abort_total.inc();
            info!(%transaction_id, %account_id, "aborted");
        }

        result
    }

    /// Backing query for `GET /2pc/lock/{transaction_id}` (SPEC_FULL.md §2).
    pub fn lock_holder_account(&self, transaction_id: TransactionId) -> LedgerResult<Option<AccountId>> {
        self.store.find_by_lock_holder(transaction_id)
    }

    pub fn store(&self) -> &Arc<AccountStore> {
        &self.store
    }
}
