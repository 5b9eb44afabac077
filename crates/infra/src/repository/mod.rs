//! Durable store for execution records.
//!
//! Four record kinds (instances, parameters, job executions, step executions)
//! behind one synchronous contract, with an in-memory adapter for tests/dev
//! and a Postgres adapter for production.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryJobRepository;
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobRepository;
pub use r#trait::{JobRepository, RepositoryError};
