//! End-to-end scenarios driving a real participant and coordinator over
//! loopback HTTP, matching the scenarios enumerated in spec.md §8.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ledger_core::config::CoordinatorConfig;
use ledger_core::coordinator::{Coordinator, CoordinatorAppState, ParticipantClient, TransactionStore};
use ledger_core::participant::{AccountStore, Account, ParticipantAppState, Participant, RecentCommits};
use ledger_core::telemetry::{CoordinatorMetrics, ParticipantMetrics};
use ledger_core::types::{AccountId, Money, TransactionStatus};
use rust_decimal::Decimal;
use uuid::Uuid;

const TOKEN_SECRET: &str = "test-secret";

async fn spawn_participant(accounts: Vec<Account>) -> (String, Arc<Participant>) {
    let dir = std::env::temp_dir().join(format!("ledger-e2e-participant-{}", Uuid::new_v4()));
    let store = Arc::new(AccountStore::open(dir).unwrap());
    for account in &accounts {
        store.put(account).unwrap();
    }
    let recent_commits = Arc::new(RecentCommits::new(1000));
    let metrics = ParticipantMetrics::new().unwrap();
    let participant = Arc::new(Participant::new(store, recent_commits, metrics.clone()));

    let state = ParticipantAppState {
        participant: participant.clone(),
        metrics,
        token_secret: TOKEN_SECRET.to_string(),
    };
    let app = ledger_core::participant::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), participant)
}

async fn spawn_coordinator(participant_url: &str, max_retries: u32) -> (String, Arc<Coordinator>) {
    let dir = std::env::temp_dir().join(format!("ledger-e2e-coordinator-{}", Uuid::new_v4()));
    let transactions = Arc::new(TransactionStore::open(dir).unwrap());
    let client = Arc::new(ParticipantClient::new(participant_url, TOKEN_SECRET));
    let config = CoordinatorConfig {
        prepare_timeout: Duration::from_secs(2),
        commit_timeout: Duration::from_secs(2),
        transaction_timeout: Duration::from_secs(30),
        max_retries,
        retry_delay: Duration::from_millis(20),
        participant_urls: vec![participant_url.to_string()],
        token_secret: TOKEN_SECRET.to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        sweep_interval: Duration::from_secs(30),
    };
    let metrics = CoordinatorMetrics::new().unwrap();
    let coordinator = Arc::new(Coordinator::new(transactions, client, config, metrics.clone()));

    let state = CoordinatorAppState {
        coordinator: coordinator.clone(),
        metrics,
        token_secret: TOKEN_SECRET.to_string(),
    };
    let app = ledger_core::coordinator::router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), coordinator)
}

fn money(s: &str) -> Money {
    Money::new(Decimal::from_str(s).unwrap())
}

#[tokio::test]
async fn happy_path_transfer_commits() {
    let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("1000.0000"));
    let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("750.0000"));
    let (alice_id, bob_id) = (alice.account_id, bob.account_id);

    let (participant_url, _participant) = spawn_participant(vec![alice, bob]).await;
    let (_coordinator_url, coordinator) = spawn_coordinator(&participant_url, 3).await;

    let result = coordinator.transfer(alice_id, bob_id, money("50"), None).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Committed);
}

#[tokio::test]
async fn insufficient_funds_aborts_without_changing_balances() {
    let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("1000.0000"));
    let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("0"));
    let (alice_id, bob_id) = (alice.account_id, bob.account_id);

    let (participant_url, participant) = spawn_participant(vec![alice, bob]).await;
    let (_coordinator_url, coordinator) = spawn_coordinator(&participant_url, 1).await;

    let result = coordinator.transfer(alice_id, bob_id, money("10000"), None).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Aborted);
    assert_eq!(result.abort_code.as_deref(), Some("InsufficientFunds"));

    let alice_row = participant.store().get(alice_id).unwrap().unwrap();
    assert_eq!(alice_row.balance, money("1000.0000"));
    assert!(!alice_row.is_locked());
}

#[tokio::test]
async fn lock_contention_serializes_concurrent_transfers_from_one_account() {
    let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("150"));
    let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("0"));
    let carol = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("0"));
    let (alice_id, bob_id, carol_id) = (alice.account_id, bob.account_id, carol.account_id);

    let (participant_url, participant) = spawn_participant(vec![alice, bob, carol]).await;
    let (_coordinator_url, coordinator) = spawn_coordinator(&participant_url, 1).await;

    let (r1, r2) = tokio::join!(
        coordinator.transfer(alice_id, bob_id, money("100"), None),
        coordinator.transfer(alice_id, carol_id, money("100"), None),
    );
    let r1 = r1.unwrap();
    let r2 = r2.unwrap();

    let committed = [r1.status, r2.status].iter().filter(|s| **s == TransactionStatus::Committed).count();
    assert_eq!(committed, 1);

    let alice_balance = participant.store().get(alice_id).unwrap().unwrap().balance;
    let bob_balance = participant.store().get(bob_id).unwrap().unwrap().balance;
    let carol_balance = participant.store().get(carol_id).unwrap().unwrap().balance;
    let total = alice_balance.checked_add(bob_balance).unwrap().checked_add(carol_balance).unwrap();
    assert_eq!(total, money("150"));
    assert_eq!(alice_balance, money("50"));
}

#[tokio::test]
async fn idempotent_prepare_then_commit() {
    let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("1000"));
    let alice_id = alice.account_id;
    let (_url, participant) = spawn_participant(vec![alice]).await;

    let tx = Uuid::new_v4();
    let delta = money("-50");

    let first = participant.prepare(tx, alice_id, delta, ledger_core::types::Operation::Debit).await.unwrap();
    let second = participant.prepare(tx, alice_id, delta, ledger_core::types::Operation::Debit).await.unwrap();
    assert_eq!(first.vote, second.vote);

    let commit = participant.commit(tx, alice_id).await.unwrap();
    assert_eq!(commit.new_balance, money("950"));
}

#[tokio::test]
async fn retry_with_same_transaction_id_is_idempotent_after_commit() {
    let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("1000"));
    let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("750"));
    let (alice_id, bob_id) = (alice.account_id, bob.account_id);

    let (participant_url, _participant) = spawn_participant(vec![alice, bob]).await;
    let (_coordinator_url, coordinator) = spawn_coordinator(&participant_url, 3).await;

    let tx_id = Uuid::new_v4();
    let first = coordinator.transfer_with_retry(alice_id, bob_id, money("50"), Some(tx_id)).await.unwrap();
    assert_eq!(first.status, TransactionStatus::Committed);

    // A second call with the same tx_id must not double-apply the
    // transfer: the transaction row is already terminal.
    let replay = coordinator.transfer(alice_id, bob_id, money("50"), Some(tx_id)).await.unwrap();
    assert_eq!(replay.status, TransactionStatus::Committed);
    assert_eq!(replay.transaction_id, first.transaction_id);
}

/// spec.md §8 scenario 4: an in-flight conflict aborts the first attempt
/// of the same `tx_id`; once the conflicting lock clears, a later attempt
/// with that same id commits, reaching the same end state as the
/// happy path.
#[tokio::test]
async fn retry_recovers_after_transient_conflict_on_one_side() {
    let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("1000"));
    let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("750"));
    let (alice_id, bob_id) = (alice.account_id, bob.account_id);

    let (participant_url, participant) = spawn_participant(vec![alice, bob]).await;
    let (_coordinator_url, coordinator) = spawn_coordinator(&participant_url, 5).await;

    // Simulate a foreign transaction already holding bob's lock when the
    // first attempt's prepare reaches him, forcing that attempt to abort.
    let foreign_tx = Uuid::new_v4();
    participant
        .prepare(foreign_tx, bob_id, money("1"), ledger_core::types::Operation::Credit)
        .await
        .unwrap();

    // Release it shortly after, well before the configured retry delay
    // elapses, so a subsequent attempt with the real tx_id succeeds.
    let release_participant = participant.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        release_participant.abort(foreign_tx, bob_id).await.unwrap();
    });

    let result = coordinator.transfer_with_retry(alice_id, bob_id, money("50"), None).await.unwrap();
    assert_eq!(result.status, TransactionStatus::Committed);
    assert!(result.retry_attempt >= 2, "first attempt should have aborted on the bob-side conflict");

    let alice_balance = participant.store().get(alice_id).unwrap().unwrap().balance;
    let bob_balance = participant.store().get(bob_id).unwrap().unwrap().balance;
    assert_eq!(alice_balance, money("950"));
    assert_eq!(bob_balance, money("800"));
}

#[tokio::test]
async fn stress_conservation_under_concurrent_transfers() {
    let alice = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("1000"));
    let bob = Account::new(Uuid::new_v4(), Uuid::new_v4(), money("750"));
    let (alice_id, bob_id) = (alice.account_id, bob.account_id);

    let (participant_url, participant) = spawn_participant(vec![alice, bob]).await;
    let (_coordinator_url, coordinator) = spawn_coordinator(&participant_url, 1).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.transfer(alice_id, bob_id, money("10"), None).await.unwrap()
        }));
    }

    let mut committed = 0i64;
    for handle in handles {
        if handle.await.unwrap().status == TransactionStatus::Committed {
            committed += 1;
        }
    }

    let alice_balance = participant.store().get(alice_id).unwrap().unwrap();
    let bob_balance = participant.store().get(bob_id).unwrap().unwrap();
    assert!(!alice_balance.is_locked());
    assert!(!bob_balance.is_locked());

    let expected_alice = Decimal::from_str("1000").unwrap() - Decimal::from(10 * committed);
    let expected_bob = Decimal::from_str("750").unwrap() + Decimal::from(10 * committed);
    assert_eq!(alice_balance.balance.as_decimal(), expected_alice);
    assert_eq!(bob_balance.balance.as_decimal(), expected_bob);
}
