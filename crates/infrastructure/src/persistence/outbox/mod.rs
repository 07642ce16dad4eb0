//! PostgreSQL Outbox Store
//!
//! SQLx-backed implementation of the outbox persistence ports.

pub mod postgres;
pub mod postgres_tx;

pub use postgres::PostgresOutboxRepository;
