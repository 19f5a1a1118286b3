//! # pgmigrate: forward-only SQL migrations
//!
//! Applies numbered SQL files (`0001_*.sql`, `0002_*.sql`, ...) to a
//! PostgreSQL database exactly once each. Progress lives in a single-row
//! version table; every run applies the whole pending batch inside one
//! transaction, so it either advances the version with all scripts applied
//! or changes nothing.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pgmigrate::{DatabasePoolConfig, Migrator, MigratorConfig, PostgresExecutor};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = PostgresExecutor::connect("postgres://localhost/app", DatabasePoolConfig::default()).await?;
//! let config = MigratorConfig::new("migrations").with_logging(true);
//! let migrator = Migrator::new(Arc::new(executor), config)?;
//!
//! let report = migrator.migrate(&CancellationToken::new()).await?;
//! println!("schema at version {}", report.current_version);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod error;
pub mod logging;
pub mod migrations;

#[cfg(test)]
mod testing;


pub use backends::{
    redact_database_url, validate_database_url, DatabaseExecutor, DatabasePoolConfig, DatabaseRow,
    DatabaseRowExt, DatabaseTransaction, DatabaseValue, PostgresExecutor, StatementCanceller,
};
pub use config::MigratorConfig;
pub use error::*;
pub use logging::{LogLevel, MigrationLogger, NoopLogger, TracingLogger};
pub use migrations::*;
