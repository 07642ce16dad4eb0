//! Outbox Relay
//!
//! Background worker driving the `pending → published` transition. Each
//! tick fetches a batch of pending events and publishes them one by one,
//! in insertion order, so events for the same aggregate reach the bus in
//! the order they were committed. Retry state lives in the outbox rows
//! themselves: one publish attempt per event per drain, with the attempts
//! ceiling enforced through the store.

use buzon_domain::event_bus::{EventPublisher, PublishError};
use buzon_domain::outbox::{OutboxError, OutboxRepository};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Configuration for the outbox relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Cadence of drain invocations.
    pub poll_interval: Duration,
    /// Upper bound on rows fetched per drain.
    pub batch_limit: usize,
    /// Publish attempts before an event is terminally failed.
    pub max_attempts: i32,
    /// Cap on stored error message length, in bytes.
    pub error_message_cap: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_limit: 100,
            max_attempts: 5,
            error_message_cap: 4096,
        }
    }
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Load settings from `BUZON_RELAY_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll_interval = std::env::var("BUZON_RELAY_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        let batch_limit = std::env::var("BUZON_RELAY_BATCH_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.batch_limit);

        let max_attempts = std::env::var("BUZON_RELAY_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_attempts);

        let error_message_cap = std::env::var("BUZON_RELAY_ERROR_MESSAGE_CAP")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.error_message_cap);

        Self {
            poll_interval,
            batch_limit,
            max_attempts,
            error_message_cap,
        }
    }
}

/// Builder for [`RelayConfig`].
#[derive(Debug, Clone, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
        }
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval;
        self
    }

    pub fn batch_limit(mut self, batch_limit: usize) -> Self {
        self.config.batch_limit = batch_limit;
        self
    }

    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn error_message_cap(mut self, cap: usize) -> Self {
        self.config.error_message_cap = cap;
        self
    }

    pub fn build(self) -> RelayConfig {
        self.config
    }
}

/// Counters collected by the relay.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    published_total: AtomicU64,
    retried_total: AtomicU64,
    failed_total: AtomicU64,
    batches_total: AtomicU64,
    last_drain_ms: AtomicU64,
}

impl RelayMetrics {
    pub fn snapshot(&self) -> RelayMetricsSnapshot {
        RelayMetricsSnapshot {
            total_published: self.published_total.load(Ordering::SeqCst),
            total_retried: self.retried_total.load(Ordering::SeqCst),
            total_failed: self.failed_total.load(Ordering::SeqCst),
            total_batches: self.batches_total.load(Ordering::SeqCst),
            last_drain_ms: self.last_drain_ms.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time view of the relay counters.
#[derive(Debug, Clone)]
pub struct RelayMetricsSnapshot {
    pub total_published: u64,
    pub total_retried: u64,
    pub total_failed: u64,
    pub total_batches: u64,
    pub last_drain_ms: u64,
}

impl std::fmt::Display for RelayMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "published={} retried={} failed={} batches={} last_drain_ms={}",
            self.total_published,
            self.total_retried,
            self.total_failed,
            self.total_batches,
            self.last_drain_ms
        )
    }
}

/// Outcome of a single drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Rows fetched from the store.
    pub fetched: usize,
    /// Events acknowledged by the broker and marked published.
    pub published: usize,
    /// Events whose failure was recorded for a later retry.
    pub retried: usize,
    /// Events that reached a terminal failure.
    pub failed: usize,
    /// Whether the drain stopped early on a shutdown signal.
    pub stopped: bool,
}

/// Errors surfaced by a drain pass.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("store error: {0}")]
    Store(#[from] OutboxError),
}

/// Background relay between the outbox table and the event bus.
#[derive(Clone)]
pub struct OutboxRelay {
    store: Arc<dyn OutboxRepository>,
    publisher: Arc<dyn EventPublisher>,
    config: RelayConfig,
    metrics: Arc<RelayMetrics>,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxRepository>,
        publisher: Arc<dyn EventPublisher>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            metrics: Arc::new(RelayMetrics::default()),
        }
    }

    pub fn metrics(&self) -> RelayMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run the relay until the shutdown channel fires.
    ///
    /// Ticks at `poll_interval`; a tick that fires while a drain is still
    /// running is skipped rather than queued, so drains never overlap. On
    /// shutdown the in-flight publish settles, its status transition is
    /// recorded, and the remaining batch stays pending for the next start.
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            batch_limit = self.config.batch_limit,
            max_attempts = self.config.max_attempts,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "🚀 outbox relay started"
        );

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            match self.drain(&mut shutdown).await {
                Ok(report) if report.stopped => break,
                Ok(report) => {
                    if report.fetched > 0 {
                        debug!(
                            fetched = report.fetched,
                            published = report.published,
                            retried = report.retried,
                            failed = report.failed,
                            "drain complete"
                        );
                    }
                }
                Err(e) => error!(error = %e, "drain failed; retrying next tick"),
            }
        }

        info!(metrics = %self.metrics.snapshot(), "🛑 outbox relay stopped");
    }

    /// Fetch one batch of pending events and publish them in order.
    pub async fn drain(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<DrainReport, RelayError> {
        let started = Instant::now();

        let events = self
            .store
            .fetch_pending(self.config.batch_limit, self.config.max_attempts)
            .await?;

        let mut report = DrainReport {
            fetched: events.len(),
            ..DrainReport::default()
        };

        if events.is_empty() {
            return Ok(report);
        }

        info!(count = events.len(), "📦 publishing pending outbox events");

        for event in events {
            if shutdown_requested(shutdown) {
                report.stopped = true;
                info!(
                    remaining = report.fetched - report.published - report.retried - report.failed,
                    "shutdown requested; leaving remaining events pending"
                );
                break;
            }

            match self
                .publisher
                .publish(&event.topic, &event.aggregate_id, &event.payload)
                .await
            {
                Ok(()) => {
                    report.published += 1;
                    self.metrics.published_total.fetch_add(1, Ordering::SeqCst);

                    match self.store.mark_published(event.id).await {
                        Ok(()) => {}
                        Err(OutboxError::NotFound(id)) => {
                            warn!(event_id = %id, "published event no longer in outbox");
                        }
                        Err(e) => {
                            // At-least-once boundary: the row stays pending
                            // and will be re-published on a later drain.
                            warn!(
                                event_id = %event.id,
                                error = %e,
                                "publish acknowledged but status update failed"
                            );
                        }
                    }
                }
                Err(publish_err) => {
                    let terminal = !publish_err.is_retryable()
                        || event.attempts + 1 >= self.config.max_attempts;
                    let reason = publish_err.to_string();

                    if terminal {
                        report.failed += 1;
                        self.metrics.failed_total.fetch_add(1, Ordering::SeqCst);
                        error!(
                            event_id = %event.id,
                            attempts = event.attempts + 1,
                            error = %reason,
                            "event terminally failed"
                        );
                    } else {
                        report.retried += 1;
                        self.metrics.retried_total.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            event_id = %event.id,
                            attempts = event.attempts + 1,
                            max_attempts = self.config.max_attempts,
                            error = %reason,
                            "publish failed; will retry"
                        );
                    }

                    match self.store.record_failure(event.id, &reason, terminal).await {
                        Ok(()) => {}
                        Err(OutboxError::NotFound(id)) => {
                            warn!(event_id = %id, "failed event no longer in outbox");
                        }
                        Err(e) => {
                            error!(event_id = %event.id, error = %e, "could not record failure");
                        }
                    }
                }
            }
        }

        self.metrics.batches_total.fetch_add(1, Ordering::SeqCst);
        self.metrics
            .last_drain_ms
            .store(started.elapsed().as_millis() as u64, Ordering::SeqCst);

        Ok(report)
    }
}

fn shutdown_requested(shutdown: &mut broadcast::Receiver<()>) -> bool {
    match shutdown.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Closed) => true,
        Err(TryRecvError::Lagged(_)) => true,
        Err(TryRecvError::Empty) => false,
    }
}
