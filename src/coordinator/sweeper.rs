//! Background reconciliation for coordinator crashes (spec.md §9,
//! "Failure-of-coordinator"): periodically scan *pending* rows older
//! than `transaction_timeout` and ask the participant whether a lock for
//! that transaction id is still held.
//!
//! A lock still held means the coordinator crashed before sending the
//! commit/abort decision, so it's safe to abort. A lock no longer held
//! is ambiguous: the coordinator may have crashed *after* deciding to
//! commit but before writing that decision, in which case the balances
//! were already applied and the participant released the lock on its
//! own. spec.md §7's bias toward reporting commit once the commit phase
//! has begun means this case must never be asserted `Aborted` — it's
//! logged and counted via the Critical path for an operator to
//! reconcile, and the row is left `Pending`.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::CoordinatorConfig;
use crate::coordinator::client::ParticipantClient;
use crate::coordinator::transaction::TransactionStore;
use crate::telemetry::CoordinatorMetrics;
use crate::types::TransactionStatus;

pub struct Sweeper {
    transactions: Arc<TransactionStore>,
    client: Arc<ParticipantClient>,
    config: CoordinatorConfig,
    metrics: CoordinatorMetrics,
}

impl Sweeper {
    pub fn new(
        transactions: Arc<TransactionStore>,
        client: Arc<ParticipantClient>,
        config: CoordinatorConfig,
        metrics: CoordinatorMetrics,
    ) -> Self {
        Sweeper { transactions, client, config, metrics }
    }

    /// Run forever, sweeping every `sweep_interval`. Intended to be
    /// `tokio::spawn`ed once at startup.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep_once().await {
                warn!(error = %e, "sweeper pass failed");
            }
        }
    }

    pub async fn sweep_once(&self) -> Result<(), crate::error::LedgerError> {
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(self.config.transaction_timeout).unwrap_or(chrono::Duration::zero());
        let stale = self.transactions.pending_older_than(cutoff)?;

        if stale.is_empty() {
            return Ok(());
        }

        info!(count = stale.len(), "sweeper found stale pending transactions");

        for tx in stale {
            let held_on_source = self
                .client
                .lock_holder(tx.transaction_id, self.config.commit_timeout)
                .await
                .ok()
                .flatten();

            let still_locked = held_on_source.is_some();

            if still_locked {
                warn!(transaction_id = %tx.transaction_id, "sweeper aborting stale lock");
                let _ = self.client.abort(tx.transaction_id, tx.source_account_id, self.config.commit_timeout).await;
                let _ = self.client.abort(tx.transaction_id, tx.destination_account_id, self.config.commit_timeout).await;
                self.transactions.finalize(tx.transaction_id, TransactionStatus::Aborted)?;
            } else {
                // No lock remains, so the commit phase may already have run
                // to completion before the coordinator crashed. Asserting
                // `Aborted` here could record a committed transfer as
                // aborted, so the row stays `Pending` and this is surfaced
                // as a critical inconsistency for reconciliation instead.
                self.metrics.critical_inconsistencies_total.inc();
                error!(
                    target: "critical",
                    transaction_id = %tx.transaction_id,
                    "stale pending transaction has no held lock; leaving pending for reconciliation rather than asserting aborted"
                );
            }
        }

        Ok(())
    }
}

/// Convenience for binaries: spawn the sweeper loop as a background task.
pub fn spawn(
    transactions: Arc<TransactionStore>,
    client: Arc<ParticipantClient>,
    config: CoordinatorConfig,
    metrics: CoordinatorMetrics,
) -> tokio::task::JoinHandle<()> {
    let sweeper = Sweeper::new(transactions, client, config, metrics);
    tokio::spawn(sweeper.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::transaction::Transaction;
    use crate::participant::{Account, AccountStore, Participant, ParticipantAppState, RecentCommits};
    use crate::telemetry::ParticipantMetrics;
    use crate::types::{Money, Operation};
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use std::time::Duration;
    use uuid::Uuid;

    const TOKEN_SECRET: &str = "sweeper-test-secret";

    async fn spawn_participant(accounts: Vec<Account>) -> (String, Arc<Participant>) {
        let dir = std::env::temp_dir().join(format!("ledger-sweeper-participant-{}", Uuid::new_v4()));
        let store = Arc::new(AccountStore::open(dir).unwrap());
        for account in &accounts {
            store.put(account).unwrap();
        }
        let metrics = ParticipantMetrics::new().unwrap();
        let participant = Arc::new(Participant::new(store, Arc::new(RecentCommits::new(16)), metrics.clone()));
        let state = ParticipantAppState { participant: participant.clone(), metrics, token_secret: TOKEN_SECRET.to_string() };
        let app = crate::participant::router(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), participant)
    }

    fn test_sweeper(participant_url: &str, transactions: Arc<TransactionStore>) -> Sweeper {
        let client = Arc::new(ParticipantClient::new(participant_url, TOKEN_SECRET));
        let config = CoordinatorConfig {
            prepare_timeout: Duration::from_secs(2),
            commit_timeout: Duration::from_secs(2),
            transaction_timeout: Duration::from_millis(1),
            max_retries: 1,
            retry_delay: Duration::from_millis(1),
            participant_urls: vec![participant_url.to_string()],
            token_secret: TOKEN_SECRET.to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            sweep_interval: Duration::from_secs(30),
        };
        let metrics = CoordinatorMetrics::new().unwrap();
        Sweeper::new(transactions, client, config, metrics)
    }

    fn open_transactions() -> Arc<TransactionStore> {
        let dir = std::env::temp_dir().join(format!("ledger-sweeper-tx-{}", Uuid::new_v4()));
        Arc::new(TransactionStore::open(dir).unwrap())
    }

    #[tokio::test]
    async fn still_locked_row_is_aborted() {
        let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), Money::new(Decimal::from_str("500").unwrap()));
        let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), Money::new(Decimal::from_str("500").unwrap()));
        let (participant_url, participant) = spawn_participant(vec![alice.clone(), bob.clone()]).await;

        let tx_id = Uuid::new_v4();
        let amount = Money::new(Decimal::from_str("50").unwrap());
        participant.prepare(tx_id, alice.account_id, amount.neg(), Operation::Debit).await.unwrap();
        participant.prepare(tx_id, bob.account_id, amount, Operation::Credit).await.unwrap();

        let transactions = open_transactions();
        transactions.begin(&Transaction::new(tx_id, alice.account_id, bob.account_id, amount)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sweeper = test_sweeper(&participant_url, transactions.clone());
        sweeper.sweep_once().await.unwrap();

        let row = transactions.get(tx_id).unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Aborted);
        assert!(participant.lock_holder_account(tx_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn released_lock_row_is_left_pending_not_aborted() {
        let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), Money::new(Decimal::from_str("500").unwrap()));
        let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), Money::new(Decimal::from_str("500").unwrap()));
        let (participant_url, _participant) = spawn_participant(vec![alice.clone(), bob.clone()]).await;

        // No prepare call was ever made for this tx_id on the participant,
        // simulating the coordinator crashing after the commit phase
        // finished and the lock was already released.
        let tx_id = Uuid::new_v4();
        let amount = Money::new(Decimal::from_str("50").unwrap());

        let transactions = open_transactions();
        transactions.begin(&Transaction::new(tx_id, alice.account_id, bob.account_id, amount)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let sweeper = test_sweeper(&participant_url, transactions.clone());
        sweeper.sweep_once().await.unwrap();

        let row = transactions.get(tx_id).unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Pending);
        assert_eq!(sweeper.metrics.critical_inconsistencies_total.get(), 1.0);
    }
}
