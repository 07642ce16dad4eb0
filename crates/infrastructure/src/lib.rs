// Buzon - Infrastructure Layer
// Implementaciones concretas organizadas por tecnología

pub mod config;
pub mod messaging;
pub mod observability;
pub mod persistence;

pub use config::DatabaseSettings;
pub use messaging::nats::{NatsConfig, NatsEventPublisher};
pub use messaging::outbox_relay::{OutboxRelay, RelayConfig};
pub use persistence::outbox::PostgresOutboxRepository;
