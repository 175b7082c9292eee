//! Atomic fund transfers between independently-owned accounts using
//! Two-Phase Commit.
//!
//! # Architecture
//!
//! - `types`: shared identifiers and value types (`Money`, `Operation`, `Vote`)
//! - `error`: the wire error taxonomy (`LedgerError`) and its HTTP mapping
//! - `config`: environment-driven configuration for both services
//! - `auth`: bearer-token minting/verification
//! - `middleware`: the shared request pipeline (logging, auth)
//! - `telemetry`: tracing setup and Prometheus metrics
//! - `participant`: the accounts service — holds balances, locks, applies debits/credits
//! - `coordinator`: orchestrates a transfer across two participant calls

pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod telemetry;
pub mod types;

pub mod coordinator;
pub mod participant;

pub use error::{LedgerError, LedgerResult};
pub use types::{AccountId, Money, Operation, OwnerId, TransactionId, TransactionStatus, Vote};
