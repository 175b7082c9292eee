//! The coordinator's transfer state machine (spec.md §4.1):
//! `INIT → PREPARING → (COMMITTING | ABORTING) → DONE_*`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::coordinator::client::ParticipantClient;
use crate::coordinator::transaction::{Transaction, TransactionStore};
use crate::error::{LedgerError, LedgerResult};
use crate::telemetry::CoordinatorMetrics;
use crate::types::{AccountId, Money, Operation, TransactionId, TransactionStatus, Vote};

#[derive(Debug, Clone)]
pub struct TransferResult {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub amount: Money,
    pub retry_attempt: u32,
    pub total_attempts: u32,
    /// Error code explaining an aborted outcome, e.g. `InsufficientFunds`.
    /// Absent on a committed outcome.
    pub abort_code: Option<String>,
    pub abort_message: Option<String>,
}

pub struct Coordinator {
    transactions: Arc<TransactionStore>,
    client: Arc<ParticipantClient>,
    config: CoordinatorConfig,
    metrics: CoordinatorMetrics,
}

impl Coordinator {
    pub fn new(
        transactions: Arc<TransactionStore>,
        client: Arc<ParticipantClient>,
        config: CoordinatorConfig,
        metrics: CoordinatorMetrics,
    ) -> Self {
        Coordinator { transactions, client, config, metrics }
    }

    pub fn transactions(&self) -> &Arc<TransactionStore> {
        &self.transactions
    }

    fn result_from_row(&self, tx: &Transaction, retry_attempt: u32, total_attempts: u32, abort_code: Option<String>, abort_message: Option<String>) -> TransferResult {
        TransferResult {
            transaction_id: tx.transaction_id,
            status: tx.status,
            source_account_id: tx.source_account_id,
            destination_account_id: tx.destination_account_id,
            amount: tx.amount,
            retry_attempt,
            total_attempts,
            abort_code,
            abort_message,
        }
    }

    /// One attempt of `Transfer(src, dst, amount, caller)` (spec.md §4.1).
    /// Always finalizes the transaction row, committed or aborted.
    pub async fn transfer(
        &self,
        source_account_id: AccountId,
        destination_account_id: AccountId,
        amount: Money,
        transaction_id: Option<TransactionId>,
    ) -> LedgerResult<TransferResult> {
        self.attempt(source_account_id, destination_account_id, amount, transaction_id, true, 1, 1).await
    }

    /// `TransferWithRetry`: re-attempt the same `tx_id` up to
    /// `max_retries` times with a fixed delay, stopping at the first
    /// committed outcome (spec.md §4.1).
    ///
    /// Testable property 4 (terminal monotonicity) requires that the
    /// transaction row never leaves a terminal status once reached. An
    /// abort decided mid-retry may have been a false negative (e.g. a lost
    /// prepare response whose participant actually locked the account), so
    /// every attempt but the last leaves the row `pending` rather than
    /// finalizing it `aborted` — only the final attempt (committed, or the
    /// last one allowed) writes a terminal status. Each attempt still
    /// sends `Abort` to both participants to release any lock it may have
    /// acquired, so a following attempt with the same `tx_id` starts clean.
    pub async fn transfer_with_retry(
        &self,
        source_account_id: AccountId,
        destination_account_id: AccountId,
        amount: Money,
        transaction_id: Option<TransactionId>,
    ) -> LedgerResult<TransferResult> {
        let tx_id = transaction_id.unwrap_or_else(Uuid::new_v4);
        let max_attempts = self.config.max_retries.max(1);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let is_last_attempt = attempt >= max_attempts;
            let result = self
                .attempt(source_account_id, destination_account_id, amount, Some(tx_id), is_last_attempt, attempt, max_attempts)
                .await?;

            if result.status == TransactionStatus::Committed || is_last_attempt {
                return Ok(TransferResult { retry_attempt: attempt, total_attempts: attempt, ..result });
            }

            self.metrics.retries_total.inc();
            warn!(transaction_id = %tx_id, attempt, "transfer aborted, retrying after delay");
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }

    /// One pass of the 2PC protocol for `tx_id` (spec.md §4.1 steps 1-5).
    /// `finalize_abort` controls whether an abort outcome is written to
    /// the transaction row as terminal, or left `pending` for a
    /// subsequent retry attempt to pick back up.
    async fn attempt(
        &self,
        source_account_id: AccountId,
        destination_account_id: AccountId,
        amount: Money,
        transaction_id: Option<TransactionId>,
        finalize_abort: bool,
        retry_attempt: u32,
        total_attempts: u32,
    ) -> LedgerResult<TransferResult> {
        if source_account_id == destination_account_id {
            return Err(LedgerError::InvalidArgument("source and destination accounts must differ".to_string()));
        }
        if !amount.is_positive() {
            return Err(LedgerError::InvalidArgument("amount must be positive".to_string()));
        }

        let tx_id = transaction_id.unwrap_or_else(Uuid::new_v4);
        let start = Instant::now();

        // Begin: reuse an existing row for this tx_id (retry), or insert
        // a fresh pending one (spec.md §4.1 step 1).
        let row = match self.transactions.get(tx_id)? {
            Some(existing) => existing,
            None => {
                let row = Transaction::new(tx_id, source_account_id, destination_account_id, amount);
                self.transactions.begin(&row)?;
                row
            }
        };

        if row.status.is_terminal() {
            info!(transaction_id = %tx_id, status = ?row.status, "transfer already finalized, returning prior outcome");
            self.metrics.transfer_duration.observe(start.elapsed().as_secs_f64());
            return Ok(self.result_from_row(&row, retry_attempt, total_attempts, None, None));
        }

        info!(transaction_id = %tx_id, %source_account_id, %destination_account_id, %amount, "prepare phase starting");

        let debit = amount.neg();
        let (vote_src, vote_dst) = tokio::join!(
            self.client.prepare(tx_id, source_account_id, debit.as_decimal(), Operation::Debit, self.config.prepare_timeout),
            self.client.prepare(tx_id, destination_account_id, amount.as_decimal(), Operation::Credit, self.config.prepare_timeout),
        );

        self.metrics.prepare_calls_total.with_label_values(&[vote_label(vote_src.vote)]).inc();
        self.metrics.prepare_calls_total.with_label_values(&[vote_label(vote_dst.vote)]).inc();

        let both_commit = vote_src.vote == Vote::Commit && vote_dst.vote == Vote::Commit;

        if both_commit {
            info!(transaction_id = %tx_id, "commit phase starting");
            let (commit_src, commit_dst) = tokio::join!(
                self.client.commit(tx_id, source_account_id, self.config.commit_timeout),
                self.client.commit(tx_id, destination_account_id, self.config.commit_timeout),
            );

            if commit_src.is_err() || commit_dst.is_err() {
                self.metrics.critical_inconsistencies_total.inc();
                error!(
                    target: "critical",
                    transaction_id = %tx_id,
                    source_failed = commit_src.is_err(),
                    destination_failed = commit_dst.is_err(),
                    "post-decision inconsistency: commit decided but not confirmed on both sides"
                );
            }

            self.metrics.transfers_total.with_label_values(&["committed"]).inc();
            let finalized = self.transactions.finalize(tx_id, TransactionStatus::Committed)?;
            self.metrics.transfer_duration.observe(start.elapsed().as_secs_f64());
            return Ok(self.result_from_row(&finalized, retry_attempt, total_attempts, None, None));
        }

        warn!(transaction_id = %tx_id, "abort phase starting");
        let (abort_src, abort_dst) = tokio::join!(
            self.client.abort(tx_id, source_account_id, self.config.commit_timeout),
            self.client.abort(tx_id, destination_account_id, self.config.commit_timeout),
        );
        if let Err(e) = abort_src {
            warn!(transaction_id = %tx_id, error = %e, "abort call to source failed");
        }
        if let Err(e) = abort_dst {
            warn!(transaction_id = %tx_id, error = %e, "abort call to destination failed");
        }

        let (abort_code, abort_message) = if vote_src.vote == Vote::Abort {
            (vote_src.reason_code, vote_src.reason_message)
        } else {
            (vote_dst.reason_code, vote_dst.reason_message)
        };

        self.metrics.transfer_duration.observe(start.elapsed().as_secs_f64());

        if finalize_abort {
            self.metrics.transfers_total.with_label_values(&["aborted"]).inc();
            let finalized = self.transactions.finalize(tx_id, TransactionStatus::Aborted)?;
            Ok(self.result_from_row(&finalized, retry_attempt, total_attempts, abort_code, abort_message))
        } else {
            // Leave the row `pending`: this attempt's abort may be a false
            // negative (e.g. a lost response after the participant really
            // locked), and a further retry with this same tx_id still
            // needs `row.status.is_terminal()` above to read `false`.
            Ok(TransferResult {
                transaction_id: tx_id,
                status: TransactionStatus::Aborted,
                source_account_id,
                destination_account_id,
                amount,
                retry_attempt,
                total_attempts,
                abort_code,
                abort_message,
            })
        }
    }
}

fn vote_label(vote: Vote) -> &'static str {
    match vote {
        Vote::Commit => "commit",
        Vote::Abort => "abort",
    }
}
