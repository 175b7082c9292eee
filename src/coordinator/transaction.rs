//! The transaction log store (spec.md §4.3): owned solely by the
//! coordinator, inserted at *pending*, updated exactly once to a
//! terminal status.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rocksdb::{Options, DB};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::types::{AccountId, Money, TransactionId, TransactionStatus};

const CF_TRANSACTIONS: &str = "transactions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub source_account_id: AccountId,
    pub destination_account_id: AccountId,
    pub amount: Money,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(transaction_id: TransactionId, source_account_id: AccountId, destination_account_id: AccountId, amount: Money) -> Self {
        let now = Utc::now();
        Transaction {
            transaction_id,
            source_account_id,
            destination_account_id,
            amount,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-memory secondary indexes, rebuilt from the column family on load
/// (SPEC_FULL.md §4.3) since this single coordinator process is the only
/// reader/writer (per Non-goals: no coordinator HA).
struct Indexes {
    by_account: HashMap<AccountId, Vec<TransactionId>>,
}

pub struct TransactionStore {
    db: Arc<DB>,
    indexes: Mutex<Indexes>,
}

impl TransactionStore {
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open_cf(&opts, path, vec![CF_TRANSACTIONS])
            .map_err(|e| LedgerError::Critical(format!("failed to open transaction store: {e}")))?;

        let store = TransactionStore { db: Arc::new(db), indexes: Mutex::new(Indexes { by_account: HashMap::new() }) };
        store.rebuild_indexes()?;
        Ok(store)
    }

    fn cf(&self) -> LedgerResult<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(CF_TRANSACTIONS)
            .ok_or_else(|| LedgerError::Critical("transactions column family missing".to_string()))
    }

    fn key(transaction_id: TransactionId) -> Vec<u8> {
        transaction_id.as_bytes().to_vec()
    }

    fn rebuild_indexes(&self) -> LedgerResult<()> {
        let cf = self.cf()?;
        let mut by_account: HashMap<AccountId, Vec<TransactionId>> = HashMap::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) =
                item.map_err(|e| LedgerError::Critical(format!("transaction scan error: {e}")))?;
            let tx: Transaction = bincode::deserialize(&value)
                .map_err(|e| LedgerError::Critical(format!("transaction deserialize error: {e}")))?;
            by_account.entry(tx.source_account_id).or_default().push(tx.transaction_id);
            by_account.entry(tx.destination_account_id).or_default().push(tx.transaction_id);
        }
        *self.indexes.lock().expect("transaction index lock poisoned") = Indexes { by_account };
        Ok(())
    }

    pub fn get(&self, transaction_id: TransactionId) -> LedgerResult<Option<Transaction>> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, Self::key(transaction_id)) {
            Ok(Some(bytes)) => {
                let tx: Transaction = bincode::deserialize(&bytes)
                    .map_err(|e| LedgerError::Critical(format!("transaction deserialize error: {e}")))?;
                Ok(Some(tx))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(LedgerError::Critical(format!("transaction get error: {e}"))),
        }
    }

    fn put(&self, tx: &Transaction) -> LedgerResult<()> {
        let cf = self.cf()?;
        let bytes = bincode::serialize(tx)
            .map_err(|e| LedgerError::Critical(format!("transaction serialize error: {e}")))?;
        self.db
            .put_cf(cf, Self::key(tx.transaction_id), bytes)
            .map_err(|e| LedgerError::Critical(format!("transaction put error: {e}")))
    }

    /// Insert a fresh *pending* row (spec.md §4.1 step 1, "Begin").
    pub fn begin(&self, tx: &Transaction) -> LedgerResult<()> {
        self.put(tx)?;
        let mut indexes = self.indexes.lock().expect("transaction index lock poisoned");
        indexes.by_account.entry(tx.source_account_id).or_default().push(tx.transaction_id);
        indexes.by_account.entry(tx.destination_account_id).or_default().push(tx.transaction_id);
        Ok(())
    }

    /// Update to a terminal status (spec.md §3: a sink automaton — only
    /// ever moves out of *pending*, once).
    pub fn finalize(&self, transaction_id: TransactionId, status: TransactionStatus) -> LedgerResult<Transaction> {
        let mut tx = self
            .get(transaction_id)?
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {transaction_id} not found")))?;
        tx.status = status;
        tx.updated_at = Utc::now();
        self.put(&tx)?;
        Ok(tx)
    }

    /// History by account: union of source and destination matches,
    /// newest first (spec.md §4.3, §6.2). No de-duplication step: a
    /// transfer's source and destination can never be the same account
    /// (spec.md §3 invariant), so the union never contains one transfer
    /// twice for a single account (SPEC_FULL.md §9).
    pub fn history(&self, account_id: AccountId, limit: usize, offset: usize) -> LedgerResult<Vec<Transaction>> {
        let ids: Vec<TransactionId> = {
            let indexes = self.indexes.lock().expect("transaction index lock poisoned");
            indexes.by_account.get(&account_id).cloned().unwrap_or_default()
        };

        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(tx) = self.get(id)? {
                rows.push(tx);
            }
        }
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    /// Pending rows older than `transaction_timeout`, for the sweeper
    /// (spec.md §9, SPEC_FULL.md §2).
    pub fn pending_older_than(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Transaction>> {
        let cf = self.cf()?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) =
                item.map_err(|e| LedgerError::Critical(format!("transaction scan error: {e}")))?;
            let tx: Transaction = bincode::deserialize(&value)
                .map_err(|e| LedgerError::Critical(format!("transaction deserialize error: {e}")))?;
            if tx.status == TransactionStatus::Pending && tx.created_at < cutoff {
                rows.push(tx);
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn tmp_store() -> TransactionStore {
        let dir = std::env::temp_dir().join(format!("ledger-tx-test-{}", Uuid::new_v4()));
        TransactionStore::open(dir).unwrap()
    }

    #[test]
    fn begin_then_finalize_transitions_status() {
        let store = tmp_store();
        let tx = Transaction::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Money::new(Decimal::from_str("50").unwrap()));
        let id = tx.transaction_id;
        store.begin(&tx).unwrap();
        let finalized = store.finalize(id, TransactionStatus::Committed).unwrap();
        assert_eq!(finalized.status, TransactionStatus::Committed);
    }

    #[test]
    fn history_returns_newest_first_for_either_side() {
        let store = tmp_store();
        let account = Uuid::new_v4();
        let other_a = Uuid::new_v4();
        let other_b = Uuid::new_v4();

        let tx1 = Transaction::new(Uuid::new_v4(), account, other_a, Money::new(Decimal::from_str("10").unwrap()));
        store.begin(&tx1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let tx2 = Transaction::new(Uuid::new_v4(), other_b, account, Money::new(Decimal::from_str("20").unwrap()));
        store.begin(&tx2).unwrap();

        let history = store.history(account, 10, 0).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].transaction_id, tx2.transaction_id);
    }
}
