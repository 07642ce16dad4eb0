//! NATS JetStream Event Publisher
//!
//! Publishes outbox payloads to JetStream subjects. A publish only counts
//! as delivered once the JetStream acknowledgement arrives, which is the
//! durability contract the relay relies on.

use async_nats::jetstream::Context as JetStreamContext;
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use buzon_domain::event_bus::{EventPublisher, PublishError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Header carrying the partition key alongside the raw payload.
///
/// The body stays unwrapped so consumers read exactly the bytes the
/// producer stored; only the key travels out-of-band.
pub const PARTITION_KEY_HEADER: &str = "Buzon-Partition-Key";

/// NATS connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsConfig {
    /// NATS server URLs
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connection_timeout_secs: u64,
    /// Request timeout in seconds (None = no timeout)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: Option<u64>,
    /// Max reconnection attempts (None = infinite)
    #[serde(default = "default_max_reconnects")]
    pub max_reconnects: Option<usize>,
    /// Credentials file path (optional)
    #[serde(default)]
    pub credentials_file: Option<String>,
    /// Client connection name
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            connection_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            max_reconnects: default_max_reconnects(),
            credentials_file: None,
            name: None,
        }
    }
}

fn default_urls() -> Vec<String> {
    vec!["nats://localhost:4222".to_string()]
}

const fn default_connect_timeout() -> u64 {
    5
}

fn default_request_timeout() -> Option<u64> {
    Some(30)
}

fn default_max_reconnects() -> Option<usize> {
    Some(5)
}

impl NatsConfig {
    /// Defaults for local development.
    pub fn for_local() -> Self {
        Self {
            name: Some("buzon-relayd".to_string()),
            ..Self::default()
        }
    }

    /// Load settings from `BUZON_NATS_*` environment variables.
    pub fn from_env() -> Self {
        let urls = std::env::var("BUZON_NATS_URL")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_else(|_| default_urls());

        let connection_timeout_secs = std::env::var("BUZON_NATS_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_connect_timeout);

        let credentials_file = std::env::var("BUZON_NATS_CREDENTIALS_FILE").ok();

        Self {
            urls,
            connection_timeout_secs,
            credentials_file,
            name: Some("buzon-relayd".to_string()),
            ..Self::default()
        }
    }

    /// Primary URL used for the connection.
    pub fn primary_url(&self) -> &str {
        self.urls
            .first()
            .map(|s| s.as_str())
            .unwrap_or("nats://localhost:4222")
    }
}

/// Connection-time errors, distinct from per-publish failures.
#[derive(Debug, thiserror::Error)]
pub enum NatsConnectError {
    #[error("failed to connect to NATS: {0}")]
    Connect(String),

    #[error("failed to load NATS credentials: {0}")]
    Credentials(String),
}

/// JetStream-backed implementation of the publish port.
#[derive(Clone)]
pub struct NatsEventPublisher {
    client: Arc<Client>,
    jetstream: JetStreamContext,
}

impl NatsEventPublisher {
    /// Connect to NATS and set up the JetStream context.
    pub async fn connect(config: NatsConfig) -> Result<Self, NatsConnectError> {
        let mut connect_options = ConnectOptions::default()
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs));

        if let Some(timeout_secs) = config.request_timeout_secs {
            connect_options =
                connect_options.request_timeout(Some(Duration::from_secs(timeout_secs)));
        }

        if let Some(name) = &config.name {
            connect_options = connect_options.name(name);
        }

        if let Some(max_reconnects) = config.max_reconnects {
            connect_options = connect_options.max_reconnects(max_reconnects);
        }

        let connect_options = if let Some(creds_file) = &config.credentials_file {
            connect_options
                .credentials_file(creds_file)
                .await
                .map_err(|e| NatsConnectError::Credentials(e.to_string()))?
        } else {
            connect_options
        };

        let client = async_nats::connect_with_options(config.primary_url(), connect_options)
            .await
            .map_err(|e| NatsConnectError::Connect(e.to_string()))?;

        let jetstream = async_nats::jetstream::new(client.clone());

        Ok(Self {
            client: Arc::new(client),
            jetstream,
        })
    }

    /// Round-trip to the server, for startup health checks.
    pub async fn ping(&self) -> Result<(), NatsConnectError> {
        self.client
            .flush()
            .await
            .map_err(|e| NatsConnectError::Connect(e.to_string()))
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(PARTITION_KEY_HEADER, key);

        // All broker failures are classified retryable; the attempts
        // ceiling turns persistent ones terminal.
        let ack = self
            .jetstream
            .publish_with_headers(topic.to_string(), headers, payload.to_vec().into())
            .await
            .map_err(|e| PublishError::Retryable(e.to_string()))?;

        // Wait for the acknowledgement; only then is the message durable.
        ack.await
            .map_err(|e| PublishError::Retryable(e.to_string()))?;

        debug!(topic, key, "event published");
        Ok(())
    }
}
