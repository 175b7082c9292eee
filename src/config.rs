//! Environment-driven configuration (spec.md §6.4).
//!
//! Every option has a default matching spec.md; `from_env` overlays
//! whatever is set in the process environment on top of those defaults.

use std::env;
use std::time::Duration;

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Shared timeout/retry knobs used by both the coordinator's outbound
/// calls and (for symmetry in tests) anything that wants to simulate the
/// same network conditions.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub prepare_timeout: Duration,
    pub commit_timeout: Duration,
    pub transaction_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Base URLs of participant services. spec.md §6.4 names this key
    /// `participant_urls` (plural) but describes it as "base URL of the
    /// accounts participant" (singular) — see SPEC_FULL.md §9 for the
    /// resolution: one configured participant today, a list so a second
    /// one is a config change tomorrow.
    pub participant_urls: Vec<String>,
    pub token_secret: String,
    pub bind_addr: String,
    pub sweep_interval: Duration,
}

impl CoordinatorConfig {
    pub fn from_env() -> Self {
        let participant_urls = env::var("PARTICIPANT_URLS")
            .unwrap_or_else(|_| "http://127.0.0.1:4100".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        CoordinatorConfig {
            prepare_timeout: Duration::from_millis(env_u64("PREPARE_TIMEOUT_MS", 5000)),
            commit_timeout: Duration::from_millis(env_u64("COMMIT_TIMEOUT_MS", 5000)),
            transaction_timeout: Duration::from_millis(env_u64("TRANSACTION_TIMEOUT_MS", 30_000)),
            max_retries: env_u64("MAX_RETRIES", 3) as u32,
            retry_delay: Duration::from_millis(env_u64("RETRY_DELAY_MS", 1000)),
            participant_urls,
            token_secret: env_string("TOKEN_SECRET", "dev-only-insecure-secret"),
            bind_addr: env_string("COORDINATOR_BIND_ADDR", "127.0.0.1:4000"),
            sweep_interval: Duration::from_millis(env_u64("SWEEP_INTERVAL_MS", 10_000)),
        }
    }

    /// The participant this coordinator talks to. Only one is supported
    /// today (see field doc on `participant_urls`).
    pub fn participant_url(&self) -> &str {
        self.participant_urls
            .first()
            .map(|s| s.as_str())
            .unwrap_or("http://127.0.0.1:4100")
    }

    /// Redacted view safe to log at startup.
    pub fn redacted(&self) -> String {
        format!(
            "CoordinatorConfig {{ prepare_timeout: {:?}, commit_timeout: {:?}, \
             transaction_timeout: {:?}, max_retries: {}, retry_delay: {:?}, \
             participant_urls: {:?}, bind_addr: {}, token_secret: <redacted> }}",
            self.prepare_timeout,
            self.commit_timeout,
            self.transaction_timeout,
            self.max_retries,
            self.retry_delay,
            self.participant_urls,
            self.bind_addr,
        )
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    pub bind_addr: String,
    pub token_secret: String,
    pub db_path: String,
    /// Capacity of the bounded recent-commits idempotence table
    /// (spec.md §4.2 "a bounded recent-transactions table").
    pub recent_commits_capacity: usize,
}

impl ParticipantConfig {
    pub fn from_env() -> Self {
        ParticipantConfig {
            bind_addr: env_string("PARTICIPANT_BIND_ADDR", "127.0.0.1:4100"),
            token_secret: env_string("TOKEN_SECRET", "dev-only-insecure-secret"),
            db_path: env_string("PARTICIPANT_DB_PATH", "./data/participant"),
            recent_commits_capacity: env_u64("RECENT_COMMITS_CAPACITY", 10_000) as usize,
        }
    }

    pub fn redacted(&self) -> String {
        format!(
            "ParticipantConfig {{ bind_addr: {}, db_path: {}, recent_commits_capacity: {}, \
             token_secret: <redacted> }}",
            self.bind_addr, self.db_path, self.recent_commits_capacity,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_defaults_match_spec() {
        // Isolated from the process environment: no env vars set here.
        let cfg = CoordinatorConfig {
            prepare_timeout: Duration::from_millis(5000),
            commit_timeout: Duration::from_millis(5000),
            transaction_timeout: Duration::from_millis(30_000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            participant_urls: vec!["http://127.0.0.1:4100".to_string()],
            token_secret: "x".to_string(),
            bind_addr: "127.0.0.1:4000".to_string(),
            sweep_interval: Duration::from_millis(10_000),
        };
        assert_eq!(cfg.prepare_timeout, Duration::from_secs(5));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.participant_url(), "http://127.0.0.1:4100");
    }
}
