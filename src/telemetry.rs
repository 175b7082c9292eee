//! Structured logging and metrics, shared by both services.
//!
//! Grounded in the teacher's `distributed_metrics.rs`: one `Registry`,
//! one struct of already-registered collectors, constructed once at
//! startup and cloned (metrics are all `Clone` handles) into whatever
//! needs to record against them.

use prometheus::{Counter, CounterVec, Histogram, HistogramOpts, Opts, Registry};
use tracing_subscriber::EnvFilter;

/// Initialize `tracing` from `RUST_LOG`, defaulting to `info` for this
/// crate and `warn` for its dependencies when the variable is unset.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ledger_core=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Metrics recorded by the coordinator.
#[derive(Clone)]
pub struct CoordinatorMetrics {
    pub registry: Registry,
    pub transfers_total: CounterVec,
    pub transfer_duration: Histogram,
    pub prepare_calls_total: CounterVec,
    pub critical_inconsistencies_total: Counter,
    pub retries_total: Counter,
}

impl CoordinatorMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let transfers_total = CounterVec::new(
            Opts::new("ledger_transfers_total", "Total transfer requests by outcome"),
            &["outcome"],
        )?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_transfer_duration_seconds",
                "End-to-end transfer duration",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        let prepare_calls_total = CounterVec::new(
            Opts::new("ledger_prepare_calls_total", "Prepare calls made to participants by vote"),
            &["vote"],
        )?;

        let critical_inconsistencies_total = Counter::new(
            "ledger_critical_inconsistencies_total",
            "Transactions where commit was decided but not confirmed on both sides",
        )?;

        let retries_total = Counter::new(
            "ledger_retries_total",
            "Total retried participant calls",
        )?;

        registry.register(Box::new(transfers_total.clone()))?;
        registry.register(Box::new(transfer_duration.clone()))?;
        registry.register(Box::new(prepare_calls_total.clone()))?;
        registry.register(Box::new(critical_inconsistencies_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;

        Ok(Self {
            registry,
            transfers_total,
            transfer_duration,
            prepare_calls_total,
            critical_inconsistencies_total,
            retries_total,
        })
    }
}

/// Metrics recorded by the participant.
#[derive(Clone)]
pub struct ParticipantMetrics {
    pub registry: Registry,
    pub prepare_total: CounterVec,
    pub commit_total: Counter,
    pub abort_total: Counter,
    pub lock_conflicts_total: Counter,
    pub idempotent_replays_total: Counter,
}

impl ParticipantMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let prepare_total = CounterVec::new(
            Opts::new("ledger_participant_prepare_total", "Prepare requests by vote"),
            &["vote"],
        )?;

        let commit_total = Counter::new(
            "ledger_participant_commit_total",
            "Total commit requests applied",
        )?;

        let abort_total = Counter::new(
            "ledger_participant_abort_total",
            "Total abort requests applied",
        )?;

        let lock_conflicts_total = Counter::new(
            "ledger_participant_lock_conflicts_total",
            "Prepare requests that voted abort due to an existing lock",
        )?;

        let idempotent_replays_total = Counter::new(
            "ledger_participant_idempotent_replays_total",
            "Commit/abort requests that matched a recent-transaction replay",
        )?;

        registry.register(Box::new(prepare_total.clone()))?;
        registry.register(Box::new(commit_total.clone()))?;
        registry.register(Box::new(abort_total.clone()))?;
        registry.register(Box::new(lock_conflicts_total.clone()))?;
        registry.register(Box::new(idempotent_replays_total.clone()))?;

        Ok(Self {
            registry,
            prepare_total,
            commit_total,
            abort_total,
            lock_conflicts_total,
            idempotent_replays_total,
        })
    }
}

/// Render a registry in Prometheus text exposition format, for the
/// `/metrics` handler on both services.
pub fn render(registry: &Registry) -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry.gather();
    let mut buf = Vec::new();
    encoder
        .encode(&metric_families, &mut buf)
        .expect("prometheus text encoding never fails");
    String::from_utf8(buf).expect("prometheus output is valid utf8")
}
