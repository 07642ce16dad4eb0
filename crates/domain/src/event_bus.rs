//! Event Bus Port
//!
//! Publish-only contract towards the partitioned event bus. Implementations
//! must not report success until the broker has durably accepted the
//! message; fire-and-forget publication is forbidden.

use async_trait::async_trait;
use thiserror::Error;

/// Publish failure, classified for the retry machinery.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The broker did not acknowledge but a retry is meaningful
    /// (connection loss, timeout, leader unavailable).
    #[error("retryable publish failure: {0}")]
    Retryable(String),

    /// Protocol-level rejection that no retry will fix (message too large,
    /// authorization, malformed request).
    #[error("terminal publish failure: {0}")]
    Terminal(String),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Retryable(_))
    }
}

/// Define la interfaz de publicación hacia el bus de eventos.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `payload` to `topic`, partitioned by `key`.
    ///
    /// The payload bytes go on the wire unwrapped, so consumers see exactly
    /// what the producer stored. Returns only after the broker has durably
    /// accepted the message.
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError>;
}
