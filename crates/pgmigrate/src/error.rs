//! Error types for the migration system
//!
//! `DatabaseError` is what a relational executor reports; `MigrationError` is
//! what a migration run reports to its caller, tagged with the phase that
//! failed.

use std::fmt;
use thiserror::Error;

/// Result type alias for executor operations
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Result type alias for migration operations
pub type MigrationResult<T> = Result<T, MigrationError>;

/// Errors reported by a database executor or transaction
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    /// Connecting to the database or acquiring a connection failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement was rejected by the database
    #[error("Query error: {0}")]
    Query(String),

    /// A column could not be read or converted
    #[error("Decode error: {0}")]
    Decode(String),

    /// The transaction was already committed or rolled back
    #[error("Transaction already completed")]
    TransactionClosed,
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                DatabaseError::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
                DatabaseError::Decode(err.to_string())
            }
            other => DatabaseError::Query(other.to_string()),
        }
    }
}

/// The step of a migration run an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPhase {
    LoadScripts,
    Begin,
    EnsureTable,
    ReadVersion,
    Validate,
    DisableIntegrityChecks,
    ApplyPending,
    RestoreIntegrityChecks,
    PersistVersion,
    Commit,
    Rollback,
}

impl MigrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::LoadScripts => "load scripts",
            MigrationPhase::Begin => "begin transaction",
            MigrationPhase::EnsureTable => "ensure version table",
            MigrationPhase::ReadVersion => "read version",
            MigrationPhase::Validate => "validate version",
            MigrationPhase::DisableIntegrityChecks => "disable foreign keys",
            MigrationPhase::ApplyPending => "apply pending migrations",
            MigrationPhase::RestoreIntegrityChecks => "restore foreign keys",
            MigrationPhase::PersistVersion => "persist version",
            MigrationPhase::Commit => "commit",
            MigrationPhase::Rollback => "rollback",
        }
    }

    /// Begin, commit and rollback are reported as transaction errors
    pub fn is_transaction_boundary(&self) -> bool {
        matches!(
            self,
            MigrationPhase::Begin | MigrationPhase::Commit | MigrationPhase::Rollback
        )
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors reported by a migration run
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The migration source or the migrator settings are unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The persisted version cannot be trusted against the known scripts
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// A migration script failed to execute
    #[error("Migration {index} ({name}) failed: {source}")]
    Execution {
        /// 0-based position of the script in the migration set
        index: usize,
        name: String,
        #[source]
        source: DatabaseError,
    },

    /// Begin, commit or rollback failed
    #[error("Transaction error during {phase}: {source}")]
    Transaction {
        phase: MigrationPhase,
        #[source]
        source: DatabaseError,
    },

    /// Any other statement inside the run failed
    #[error("Database error during {phase}: {source}")]
    Database {
        phase: MigrationPhase,
        #[source]
        source: DatabaseError,
    },

    /// The caller's cancellation token fired
    #[error("Migration run cancelled during {phase}")]
    Cancelled { phase: MigrationPhase },
}

impl MigrationError {
    /// Wrap an executor error raised during `phase`
    pub fn at(phase: MigrationPhase, source: DatabaseError) -> Self {
        if phase.is_transaction_boundary() {
            MigrationError::Transaction { phase, source }
        } else {
            MigrationError::Database { phase, source }
        }
    }

    pub fn configuration<T: ToString>(msg: T) -> Self {
        MigrationError::Configuration(msg.to_string())
    }

    /// The phase this error is attributed to, where one applies
    pub fn phase(&self) -> Option<MigrationPhase> {
        match self {
            MigrationError::Configuration(_) => Some(MigrationPhase::LoadScripts),
            MigrationError::Integrity(_) => Some(MigrationPhase::Validate),
            MigrationError::Execution { .. } => Some(MigrationPhase::ApplyPending),
            MigrationError::Transaction { phase, .. }
            | MigrationError::Database { phase, .. }
            | MigrationError::Cancelled { phase } => Some(*phase),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled { .. })
    }
}
