//! Transactional Enqueue
//!
//! Producer-facing half of the outbox store: the insert runs on the
//! caller's open transaction so the event commits or rolls back together
//! with the business rows.

use super::PostgresOutboxRepository;
use buzon_domain::outbox::{NewOutboxEvent, OutboxEnqueue, OutboxError, OutboxEvent, OutboxStatus};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgTransaction;
use uuid::Uuid;

#[async_trait::async_trait]
impl OutboxEnqueue for PostgresOutboxRepository {
    async fn enqueue(
        &self,
        tx: &mut PgTransaction<'_>,
        event: NewOutboxEvent,
    ) -> Result<OutboxEvent, OutboxError> {
        event.validate()?;

        let payload = String::from_utf8(event.payload)
            .map_err(|e| OutboxError::Validation(format!("payload is not valid UTF-8: {}", e)))?;

        // created_at is stamped with clock_timestamp() rather than the
        // transaction-level now(): events enqueued in the same transaction
        // must keep distinct timestamps so fetch order equals insert order.
        let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO outbox_events
                (aggregate_id, event_type, topic, payload, status, attempts, created_at)
            VALUES ($1, $2, $3, $4::jsonb, 'pending', 0, clock_timestamp())
            RETURNING id, created_at
            "#,
        )
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.topic)
        .bind(&payload)
        .fetch_one(&mut **tx)
        .await?;

        Ok(OutboxEvent {
            id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            topic: event.topic,
            payload: payload.into_bytes(),
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at,
            published_at: None,
        })
    }
}
