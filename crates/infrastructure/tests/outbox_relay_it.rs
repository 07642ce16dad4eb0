//! Integration tests for the relay against a real Postgres store.
//!
//! The broker side stays a scripted double: broker integration is
//! exercised through the publish port.

mod common;

use async_trait::async_trait;
use buzon_domain::event_bus::{EventPublisher, PublishError};
use buzon_domain::outbox::{
    NewOutboxEvent, OutboxEnqueue, OutboxRepository, OutboxStatus,
};
use buzon_infrastructure::messaging::outbox_relay::{OutboxRelay, RelayConfig};
use buzon_infrastructure::persistence::outbox::PostgresOutboxRepository;
use common::PostgresTestDatabase;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct ScriptedPublisher {
    script: Mutex<VecDeque<Result<(), PublishError>>>,
    calls: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl ScriptedPublisher {
    fn with_script(script: Vec<Result<(), PublishError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<(String, String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for ScriptedPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.calls
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_string(), payload.to_vec()));
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

async fn setup() -> (PostgresTestDatabase, PgPool, Arc<PostgresOutboxRepository>) {
    let db = common::get_postgres_context().await;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&db.connection_string)
        .await
        .expect("Failed to connect to test database");

    let repo = PostgresOutboxRepository::new(pool.clone());
    repo.run_migrations().await.expect("migrations");

    (db, pool, Arc::new(repo))
}

async fn commit_event(
    pool: &PgPool,
    repo: &PostgresOutboxRepository,
    aggregate_id: &str,
    payload: serde_json::Value,
) -> uuid::Uuid {
    let mut tx = pool.begin().await.unwrap();
    let stored = repo
        .enqueue(
            &mut tx,
            NewOutboxEvent::new(aggregate_id, "wallet.balance_updated", "wallet.events", &payload)
                .unwrap(),
        )
        .await
        .unwrap();
    tx.commit().await.unwrap();
    stored.id
}

fn relay_config(max_attempts: i32) -> RelayConfig {
    RelayConfig::builder()
        .poll_interval(Duration::from_millis(20))
        .max_attempts(max_attempts)
        .build()
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn committed_event_reaches_the_bus_once() {
    let (_db, pool, repo) = setup().await;
    let publisher = Arc::new(ScriptedPublisher::default());

    let id = commit_event(&pool, &repo, "w-1", serde_json::json!({"x": 1})).await;

    let relay = OutboxRelay::new(repo.clone(), publisher.clone(), relay_config(5));
    let (tx, mut rx) = broadcast::channel(1);
    let report = relay.drain(&mut rx).await.unwrap();
    drop(tx);

    assert_eq!(report.published, 1);

    let calls = publisher.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "wallet.events");
    assert_eq!(calls[0].1, "w-1");
    let wire_payload: serde_json::Value = serde_json::from_slice(&calls[0].2).unwrap();
    assert_eq!(wire_payload, serde_json::json!({"x": 1}));

    let event = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(event.status, OutboxStatus::Published);
    assert_eq!(event.attempts, 0);
    assert!(event.published_at.is_some());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn transient_failures_retry_across_drains() {
    let (_db, pool, repo) = setup().await;
    let publisher = Arc::new(ScriptedPublisher::with_script(vec![
        Err(PublishError::Retryable("leader unavailable".into())),
        Err(PublishError::Retryable("leader unavailable".into())),
        Ok(()),
    ]));

    let id = commit_event(&pool, &repo, "w-1", serde_json::json!({"x": 1})).await;

    let relay = OutboxRelay::new(repo.clone(), publisher, relay_config(5));
    let (tx, mut rx) = broadcast::channel(1);

    relay.drain(&mut rx).await.unwrap();
    let after_first = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(after_first.status, OutboxStatus::Pending);
    assert_eq!(after_first.attempts, 1);

    relay.drain(&mut rx).await.unwrap();
    let after_second = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(after_second.status, OutboxStatus::Pending);
    assert_eq!(after_second.attempts, 2);

    relay.drain(&mut rx).await.unwrap();
    drop(tx);

    let published = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(published.status, OutboxStatus::Published);
    assert_eq!(published.attempts, 2);
    assert!(published.published_at.is_some());
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn exhausted_retries_end_terminally_failed() {
    let (_db, pool, repo) = setup().await;
    let publisher = Arc::new(ScriptedPublisher::with_script(
        (0..3)
            .map(|_| Err(PublishError::Retryable("broker down".into())))
            .collect(),
    ));

    let id = commit_event(&pool, &repo, "w-1", serde_json::json!({"x": 1})).await;

    let relay = OutboxRelay::new(repo.clone(), publisher.clone(), relay_config(3));
    let (tx, mut rx) = broadcast::channel(1);
    loop {
        let report = relay.drain(&mut rx).await.unwrap();
        if report.fetched == 0 {
            break;
        }
    }
    drop(tx);

    let event = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(event.status, OutboxStatus::Failed);
    assert_eq!(event.attempts, 3);
    assert!(event.last_error.is_some());
    assert_eq!(publisher.calls().len(), 3);
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn same_transaction_events_publish_in_order() {
    let (_db, pool, repo) = setup().await;
    let publisher = Arc::new(ScriptedPublisher::default());

    let mut tx = pool.begin().await.unwrap();
    for i in 1..=2 {
        repo.enqueue(
            &mut tx,
            NewOutboxEvent::new(
                "w-7",
                "wallet.balance_updated",
                "wallet.events",
                &serde_json::json!({"seq": i}),
            )
            .unwrap(),
        )
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();

    let relay = OutboxRelay::new(repo, publisher.clone(), relay_config(5));
    let (shutdown_tx, mut rx) = broadcast::channel(1);
    relay.drain(&mut rx).await.unwrap();
    drop(shutdown_tx);

    let calls = publisher.calls();
    assert_eq!(calls.len(), 2);
    let first: serde_json::Value = serde_json::from_slice(&calls[0].2).unwrap();
    let second: serde_json::Value = serde_json::from_slice(&calls[1].2).unwrap();
    assert_eq!(first, serde_json::json!({"seq": 1}));
    assert_eq!(second, serde_json::json!({"seq": 2}));
}

#[tokio::test]
#[ignore = "requires a local Docker daemon"]
async fn relay_loop_drains_while_running() {
    let (_db, pool, repo) = setup().await;
    let publisher = Arc::new(ScriptedPublisher::default());

    let id = commit_event(&pool, &repo, "w-1", serde_json::json!({"x": 1})).await;

    let relay = OutboxRelay::new(repo.clone(), publisher, relay_config(5));
    let (tx, rx) = broadcast::channel(1);
    let handle = tokio::spawn({
        let relay = relay.clone();
        async move { relay.start(rx).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("relay stopped in time")
        .unwrap();

    let event = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(event.status, OutboxStatus::Published);
    assert_eq!(relay.metrics().total_published, 1);
}
