//! The accounts participant binary.

use std::sync::Arc;

use ledger_core::config::ParticipantConfig;
use ledger_core::participant::{AccountStore, ParticipantAppState, Participant, RecentCommits};
use ledger_core::telemetry::{self, ParticipantMetrics};

#[tokio::main]
async fn main() {
    telemetry::init_tracing();

    let config = ParticipantConfig::from_env();
    tracing::info!(config = %config.redacted(), "starting participant");

    let store = Arc::new(AccountStore::open(&config.db_path).expect("failed to open account store"));
    let recent_commits = Arc::new(RecentCommits::new(config.recent_commits_capacity));
    let metrics = ParticipantMetrics::new().expect("failed to register participant metrics");

    let participant = Arc::new(Participant::new(store, recent_commits, metrics.clone()));

    let app_state = ParticipantAppState {
        participant,
        metrics,
        token_secret: config.token_secret.clone(),
    };

    let app = ledger_core::participant::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind_addr));

    tracing::info!(addr = %config.bind_addr, "participant listening");
    axum::serve(listener, app).await.expect("participant server crashed");
}
