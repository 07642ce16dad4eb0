//! Outbox Event Model
//!
//! Domain model for outbox events. Payloads cross this boundary as opaque
//! JSON bytes: producers serialize exactly once at construction, and the
//! relay later puts those same bytes on the wire.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Status of an outbox event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Event has been created but not yet published
    Pending,
    /// Event has been acknowledged by the event bus
    Published,
    /// Event exhausted its publish attempts
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, OutboxError> {
        match s {
            "pending" => Ok(OutboxStatus::Pending),
            "published" => Ok(OutboxStatus::Published),
            "failed" => Ok(OutboxStatus::Failed),
            other => Err(OutboxError::Infrastructure {
                message: format!("invalid outbox status: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error types for outbox operations
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("invalid outbox event: {0}")]
    Validation(String),

    #[error("outbox event not found: {0}")]
    NotFound(Uuid),

    #[error("infrastructure error: {message}")]
    Infrastructure { message: String },
}

/// An outbox event ready to be enlisted in a producer transaction.
///
/// `aggregate_id` becomes the partition key on the bus, so all events for
/// one aggregate are observed in order. `topic` and `event_type` are opaque
/// to the relay.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub aggregate_id: String,
    pub event_type: String,
    pub topic: String,
    pub payload: Vec<u8>,
}

impl NewOutboxEvent {
    /// Create a new event, serializing the payload to JSON bytes.
    pub fn new<T: Serialize>(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: &T,
    ) -> Result<Self, OutboxError> {
        let event = Self {
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            topic: topic.into(),
            payload: serde_json::to_vec(payload)?,
        };
        event.validate()?;
        Ok(event)
    }

    /// Create an event from payload bytes the producer already serialized.
    ///
    /// The bytes must hold a valid JSON document.
    pub fn from_json_bytes(
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        topic: impl Into<String>,
        payload: Vec<u8>,
    ) -> Result<Self, OutboxError> {
        serde_json::from_slice::<serde::de::IgnoredAny>(&payload)?;
        let event = Self {
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            topic: topic.into(),
            payload,
        };
        event.validate()?;
        Ok(event)
    }

    /// Check the required fields are non-empty.
    pub fn validate(&self) -> Result<(), OutboxError> {
        if self.aggregate_id.is_empty() {
            return Err(OutboxError::Validation("aggregate_id is empty".into()));
        }
        if self.event_type.is_empty() {
            return Err(OutboxError::Validation("event_type is empty".into()));
        }
        if self.topic.is_empty() {
            return Err(OutboxError::Validation("topic is empty".into()));
        }
        Ok(())
    }
}

/// A stored outbox event as fetched from the database.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_type: String,
    pub topic: String,
    /// Raw JSON bytes exactly as persisted; never introspected by the relay.
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, OutboxStatus::Pending)
    }

    pub fn is_published(&self) -> bool {
        matches!(self.status, OutboxStatus::Published)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, OutboxStatus::Failed)
    }

    /// Age of the event since insertion.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

/// Aggregate counts over the outbox table, for monitoring.
#[derive(Debug, Clone)]
pub struct OutboxStats {
    pub pending_count: u64,
    pub published_count: u64,
    pub failed_count: u64,
    pub oldest_pending_age_seconds: Option<i64>,
}

impl OutboxStats {
    pub fn total(&self) -> u64 {
        self.pending_count + self.published_count + self.failed_count
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count > 0
    }

    /// Share of events that ended terminally failed, as a percentage.
    pub fn error_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (self.failed_count as f64 / total as f64) * 100.0
        }
    }
}
