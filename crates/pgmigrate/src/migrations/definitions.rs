//! Migration Definitions - Core types shared by the migration system

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One migration script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationScript {
    /// File name the script was read from, or its zero-padded index
    pub name: String,
    /// Raw SQL text, executed as one batch
    pub sql: String,
}

impl MigrationScript {
    pub fn new<N: Into<String>, S: Into<String>>(name: N, sql: S) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// A script that is empty after trimming is skipped rather than executed
    pub fn is_blank(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

/// The persisted schema version row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Number of migration positions applied so far
    pub version: i64,
    /// Set once, when the table was bootstrapped
    pub created_at: NaiveDateTime,
    /// Set on every successful version advance
    pub updated_at: Option<NaiveDateTime>,
}

/// Result of a successful migration run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Version read at the start of the run
    pub starting_version: usize,
    /// Version persisted at the end of the run
    pub current_version: usize,
    /// Scripts executed against the database
    pub applied: usize,
    /// Blank scripts passed over without executing
    pub skipped_blank: usize,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationReport {
    /// A run that found nothing pending
    pub fn up_to_date(version: usize, execution_time_ms: u128) -> Self {
        Self {
            starting_version: version,
            current_version: version,
            applied: 0,
            skipped_blank: 0,
            execution_time_ms,
        }
    }

    /// True when the run did not move the persisted version
    pub fn is_noop(&self) -> bool {
        self.current_version == self.starting_version
    }
}

/// Persisted version compared against the scripts on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub schema: SchemaVersion,
    /// Number of scripts known to this run
    pub available: usize,
    /// Scripts not yet applied; `None` when the version exceeds `available`
    pub pending: Option<usize>,
}

impl MigrationStatus {
    pub fn new(schema: SchemaVersion, available: usize) -> Self {
        let pending = usize::try_from(schema.version)
            .ok()
            .and_then(|version| available.checked_sub(version));

        Self {
            schema,
            available,
            pending,
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending == Some(0)
    }
}
