// Buzon - Domain Layer
// Contextos del núcleo:
// - outbox: modelo de eventos, puertos de persistencia y estadísticas
// - event_bus: puerto de publicación hacia el bus de eventos

pub mod event_bus;
pub mod outbox;

pub use event_bus::{EventPublisher, PublishError};
pub use outbox::{
    NewOutboxEvent, OutboxEnqueue, OutboxError, OutboxEvent, OutboxRepository, OutboxStats,
    OutboxStatus,
};
