//! Outbox Repository Ports
//!
//! Abstractions for outbox event persistence. The enqueue port is the only
//! surface producers touch; the repository port is driven exclusively by
//! the relay.

use crate::outbox::{NewOutboxEvent, OutboxError, OutboxEvent, OutboxStats};
use async_trait::async_trait;
use sqlx::PgTransaction;
use uuid::Uuid;

/// Repository for outbox event persistence, as seen by the relay.
///
/// The relay is the sole mutator of `status`, `attempts`, `last_error` and
/// `published_at` once a row is committed.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Retrieve pending events for publication.
    ///
    /// Returns at most `limit` rows with `status = pending` and
    /// `attempts < max_attempts`, ordered by `created_at` ascending with
    /// ties broken by `id` so batches are deterministic. A row whose
    /// payload cannot be decoded as JSON is skipped with a warning and
    /// left untouched for operator inspection.
    ///
    /// # Errors
    /// Returns `OutboxError::Database` on query failure; partial batches
    /// are never returned.
    async fn fetch_pending(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Mark an event as published and stamp `published_at`.
    ///
    /// Never touches `attempts` or `last_error`. Calling it again on an
    /// already-published row succeeds and refreshes `published_at`.
    ///
    /// # Errors
    /// Returns `OutboxError::NotFound` if no row matches.
    async fn mark_published(&self, event_id: Uuid) -> Result<(), OutboxError>;

    /// Record a publish failure.
    ///
    /// Always increments `attempts` and stores `reason` (truncated to the
    /// repository's cap) in `last_error`. With `terminal = false` the row
    /// stays `pending` for a later retry; with `terminal = true` it moves
    /// to `failed` and is never fetched again.
    ///
    /// # Errors
    /// Returns `OutboxError::NotFound` if no row matches.
    async fn record_failure(
        &self,
        event_id: Uuid,
        reason: &str,
        terminal: bool,
    ) -> Result<(), OutboxError>;

    /// Count rows still awaiting publication.
    async fn count_pending(&self) -> Result<u64, OutboxError>;

    /// Aggregate counts by status, for monitoring and alerting.
    async fn stats(&self) -> Result<OutboxStats, OutboxError>;

    /// Fetch a single event by id, for audit and debug lookups.
    async fn find_by_id(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError>;
}

/// Puerta de entrada de los productores: alta de eventos dentro de su
/// propia transacción de negocio.
#[async_trait]
pub trait OutboxEnqueue: Send + Sync {
    /// Insert one event on the caller's open transaction.
    ///
    /// The insert commits or rolls back together with the caller's
    /// business rows, which is the whole point of the pattern. Returns the
    /// stored event with the server-assigned `id` and `created_at`; both
    /// are only meaningful once the caller commits.
    ///
    /// # Errors
    /// * `OutboxError::Validation` if a required field is empty
    /// * `OutboxError::Encode` if the payload bytes are not valid JSON
    /// * `OutboxError::Database` on insert failure
    async fn enqueue(
        &self,
        tx: &mut PgTransaction<'_>,
        event: NewOutboxEvent,
    ) -> Result<OutboxEvent, OutboxError>;
}
