pub mod nats;
pub mod outbox_relay;

pub use nats::{NatsConfig, NatsEventPublisher};
pub use outbox_relay::{OutboxRelay, RelayConfig, RelayMetricsSnapshot};
