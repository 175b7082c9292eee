//! The transfer orchestrator: owns the transaction log and drives 2PC
//! against the accounts participant (spec.md §4.1, §4.3).

pub mod api;
pub mod client;
pub mod orchestrator;
pub mod sweeper;
pub mod transaction;

pub use api::{router, CoordinatorAppState};
pub use client::ParticipantClient;
pub use orchestrator::{Coordinator, TransferResult};
pub use transaction::{Transaction, TransactionStore};
