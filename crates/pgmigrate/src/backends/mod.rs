//! Database Backend Abstractions
//!
//! The executor traits the migrator is written against, and the PostgreSQL
//! implementation of them.

pub mod core;
pub mod postgres;

// Re-export core traits and types
pub use core::*;
pub use postgres::{redact_database_url, validate_database_url, PostgresExecutor, PostgresTransaction};
