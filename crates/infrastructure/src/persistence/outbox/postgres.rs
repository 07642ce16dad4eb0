//! PostgreSQL Outbox Repository
//!
//! SQLx-based implementation of the relay-facing outbox port. Uses the
//! runtime query API instead of the `query!` macros to avoid offline
//! preparation requirements.

use buzon_domain::outbox::{OutboxError, OutboxEvent, OutboxRepository, OutboxStats, OutboxStatus};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

/// Suffix appended to error messages cut at the storage cap.
const TRUNCATION_MARKER: &str = " … [truncated]";

/// Default cap on stored `last_error` text, in bytes.
pub const DEFAULT_ERROR_MESSAGE_CAP: usize = 4096;

/// Row struct for outbox_events queries.
///
/// `payload` is selected as text so the raw JSON document reaches the
/// relay byte-for-byte as stored.
#[derive(FromRow)]
struct OutboxEventRow {
    id: Uuid,
    aggregate_id: String,
    event_type: String,
    topic: String,
    payload: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
}

impl OutboxEventRow {
    fn into_event(self) -> Result<OutboxEvent, OutboxError> {
        Ok(OutboxEvent {
            id: self.id,
            aggregate_id: self.aggregate_id,
            event_type: self.event_type,
            topic: self.topic,
            payload: self.payload.into_bytes(),
            status: OutboxStatus::parse(&self.status)?,
            attempts: self.attempts,
            last_error: self.last_error,
            created_at: self.created_at,
            published_at: self.published_at,
        })
    }
}

const SELECT_COLUMNS: &str = "id, aggregate_id, event_type, topic, payload::text AS payload, \
     status, attempts, last_error, created_at, published_at";

/// PostgreSQL implementation of the outbox store.
#[derive(Clone)]
pub struct PostgresOutboxRepository {
    pool: PgPool,
    error_message_cap: usize,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            error_message_cap: DEFAULT_ERROR_MESSAGE_CAP,
        }
    }

    /// Override the cap applied to stored `last_error` text.
    pub fn with_error_message_cap(mut self, cap: usize) -> Self {
        self.error_message_cap = cap;
        self
    }

    /// Create the outbox table and its indexes if they do not exist.
    ///
    /// Mirrors `migrations/0001_outbox_events.sql`; invoking it at startup
    /// is a deployment decision.
    pub async fn run_migrations(&self) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id            UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                aggregate_id  VARCHAR(255) NOT NULL,
                event_type    VARCHAR(100) NOT NULL,
                topic         VARCHAR(100) NOT NULL,
                payload       JSONB NOT NULL,
                status        VARCHAR(20) NOT NULL DEFAULT 'pending',
                attempts      INT NOT NULL DEFAULT 0,
                last_error    TEXT,
                created_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
                published_at  TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_status_created
            ON outbox_events(status, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_aggregate
            ON outbox_events(aggregate_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_published_at
            ON outbox_events(published_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn fetch_pending(
        &self,
        limit: usize,
        max_attempts: i32,
    ) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows: Vec<OutboxEventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events
            WHERE status = 'pending' AND attempts < $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        ))
        .bind(max_attempts)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            // Quarantine: an undecodable payload is skipped, not failed.
            // The row stays pending for operator inspection.
            if let Err(e) = payload_decode_check(&row.payload) {
                warn!(
                    event_id = %row.id,
                    error = %e,
                    "skipping outbox event with undecodable payload"
                );
                continue;
            }
            events.push(row.into_event()?);
        }

        Ok(events)
    }

    async fn mark_published(&self, event_id: Uuid) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'published', published_at = now()
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(event_id));
        }

        Ok(())
    }

    async fn record_failure(
        &self,
        event_id: Uuid,
        reason: &str,
        terminal: bool,
    ) -> Result<(), OutboxError> {
        let reason = truncate_reason(reason, self.error_message_cap);

        let query = if terminal {
            r#"
            UPDATE outbox_events
            SET status = 'failed', attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#
        } else {
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1, last_error = $2
            WHERE id = $1
            "#
        };

        let result = sqlx::query(query)
            .bind(event_id)
            .bind(&reason)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(event_id));
        }

        Ok(())
    }

    async fn count_pending(&self) -> Result<u64, OutboxError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox_events WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let (pending, published, failed, oldest): (i64, i64, i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'published'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                CAST(MIN(CASE WHEN status = 'pending'
                    THEN EXTRACT(EPOCH FROM (now() - created_at)) END) AS BIGINT)
            FROM outbox_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(OutboxStats {
            pending_count: pending as u64,
            published_count: published as u64,
            failed_count: failed as u64,
            oldest_pending_age_seconds: oldest,
        })
    }

    async fn find_by_id(&self, event_id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let row: Option<OutboxEventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM outbox_events
            WHERE id = $1
            "#,
        ))
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutboxEventRow::into_event).transpose()
    }
}

/// Verify a fetched payload still parses as JSON.
fn payload_decode_check(raw: &str) -> Result<(), serde_json::Error> {
    serde_json::from_str::<serde::de::IgnoredAny>(raw).map(|_| ())
}

/// Cut `reason` at `cap` bytes (on a char boundary) and append the marker.
fn truncate_reason(reason: &str, cap: usize) -> String {
    if reason.len() <= cap {
        return reason.to_string();
    }

    let mut cut = cap;
    while cut > 0 && !reason.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut truncated = reason[..cut].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
