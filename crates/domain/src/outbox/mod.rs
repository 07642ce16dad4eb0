//! Transactional Outbox Pattern
//!
//! Domain-level abstractions for the transactional outbox, which solves the
//! dual-write problem between the database and the event bus: producers
//! enlist outbound events in their own business transaction, and a
//! background relay publishes committed events afterwards.

pub mod model;
pub mod repository;

pub use model::{NewOutboxEvent, OutboxError, OutboxEvent, OutboxStats, OutboxStatus};
pub use repository::{OutboxEnqueue, OutboxRepository};
