//! The `Account` row (spec.md §3) and its per-account state machine
//! (spec.md §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AccountId, Money, OwnerId, TransactionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub owner_id: OwnerId,
    pub balance: Money,
    pub lock_holder: Option<TransactionId>,
    pub pending_delta: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account_id: AccountId, owner_id: OwnerId, opening_balance: Money) -> Self {
        let now = Utc::now();
        Account {
            account_id,
            owner_id,
            balance: opening_balance,
            lock_holder: None,
            pending_delta: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock_holder.is_some()
    }

    /// The balance this account would present to its holder if the
    /// in-flight transaction committed.
    pub fn effective_balance(&self) -> Money {
        match self.pending_delta {
            Some(delta) => self.balance.checked_add(delta).unwrap_or(self.balance),
            None => self.balance,
        }
    }

    /// Invariant 2 of spec.md §3: `pending_delta` is set iff `lock_holder`
    /// is set.
    pub fn invariants_hold(&self) -> bool {
        self.lock_holder.is_some() == self.pending_delta.is_some() && self.balance.is_non_negative()
    }
}
