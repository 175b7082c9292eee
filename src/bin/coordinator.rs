//! The transfer coordinator binary.

use std::sync::Arc;

use ledger_core::config::CoordinatorConfig;
use ledger_core::coordinator::{Coordinator, CoordinatorAppState, ParticipantClient, TransactionStore};
use ledger_core::telemetry::{self, CoordinatorMetrics};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let config = CoordinatorConfig::from_env();
    tracing::info!(config = %config.redacted(), "starting coordinator");

    let transactions = Arc::new(TransactionStore::open("./data/coordinator").expect("failed to open transaction store"));
    let client = Arc::new(ParticipantClient::new(config.participant_url().to_string(), config.token_secret.clone()));
    let metrics = CoordinatorMetrics::new().expect("failed to register coordinator metrics");

    let coordinator = Arc::new(Coordinator::new(transactions.clone(), client.clone(), config.clone(), metrics.clone()));

    ledger_core::coordinator::sweeper::spawn(transactions, client, config.clone(), metrics.clone());

    let app_state = CoordinatorAppState {
        coordinator,
        metrics,
        token_secret: config.token_secret.clone(),
    };

    let app = ledger_core::coordinator::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind_addr));

    tracing::info!(addr = %config.bind_addr, "coordinator listening");
    axum::serve(listener, app).await.expect("coordinator server crashed");
}
