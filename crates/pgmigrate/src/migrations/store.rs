//! Version Store - the single-row table recording the schema version
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS _migrations (
//!     version    INTEGER NOT NULL UNIQUE,
//!     created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
//!     updated_at TIMESTAMP
//! );
//! ```
//!
//! Every method runs on the caller's transaction.

use chrono::NaiveDateTime;

use crate::backends::{DatabaseRowExt, DatabaseTransaction, DatabaseValue};
use crate::config::{validate_table_name, DEFAULT_TABLE_NAME};
use crate::error::{MigrationError, MigrationPhase, MigrationResult};
use super::definitions::SchemaVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionStore {
    table: String,
}

impl VersionStore {
    /// Create a store for `table`, which must be a valid identifier
    pub fn new<S: Into<String>>(table: S) -> MigrationResult<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL to create the version table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version    INTEGER NOT NULL UNIQUE,\n    \
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,\n    \
                updated_at TIMESTAMP\n\
            );",
            self.table
        )
    }

    /// SQL to seed version 0 when the table holds no row yet
    ///
    /// `ON CONFLICT` alone would add a second row once the version has moved
    /// past 0, so the insert is also guarded on the table being empty.
    pub fn seed_sql(&self) -> String {
        format!(
            "INSERT INTO {table} (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM {table}) ON CONFLICT DO NOTHING",
            table = self.table
        )
    }

    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(1) AS count FROM {}", self.table)
    }

    pub fn select_version_sql(&self) -> String {
        format!("SELECT version FROM {} ORDER BY version DESC LIMIT 1", self.table)
    }

    pub fn select_record_sql(&self) -> String {
        format!(
            "SELECT version, created_at, updated_at FROM {} ORDER BY version DESC LIMIT 1",
            self.table
        )
    }

    pub fn update_version_sql(&self) -> String {
        format!("UPDATE {} SET version = $1, updated_at = $2", self.table)
    }

    /// Create the table and seed the singleton row; safe to repeat
    pub async fn ensure_table(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<()> {
        tx.execute(&self.create_table_sql(), &[])
            .await
            .map_err(|e| MigrationError::at(MigrationPhase::EnsureTable, e))?;

        tx.execute(&self.seed_sql(), &[])
            .await
            .map_err(|e| MigrationError::at(MigrationPhase::EnsureTable, e))?;

        Ok(())
    }

    /// Number of rows in the table; diagnostic only
    pub async fn count_rows(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<i64> {
        let row = tx
            .fetch_optional(&self.count_sql(), &[])
            .await
            .map_err(|e| MigrationError::at(MigrationPhase::ReadVersion, e))?;

        match row {
            Some(row) => row
                .get_i64("count")
                .map_err(|e| MigrationError::at(MigrationPhase::ReadVersion, e)),
            None => Ok(0),
        }
    }

    /// Read the persisted version
    pub async fn read_version(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<i64> {
        let row = tx
            .fetch_optional(&self.select_version_sql(), &[])
            .await
            .map_err(|e| MigrationError::at(MigrationPhase::ReadVersion, e))?
            .ok_or_else(|| MigrationError::Integrity(format!("{} holds no version row", self.table)))?;

        let version = row
            .get_i64("version")
            .map_err(|e| MigrationError::at(MigrationPhase::ReadVersion, e))?;

        if version < 0 {
            return Err(MigrationError::Integrity(format!(
                "want current migration to be version 0 or more; got {}",
                version
            )));
        }

        Ok(version)
    }

    /// Read the whole version row
    pub async fn read_record(&self, tx: &mut dyn DatabaseTransaction) -> MigrationResult<SchemaVersion> {
        let row = tx
            .fetch_optional(&self.select_record_sql(), &[])
            .await
            .map_err(|e| MigrationError::at(MigrationPhase::ReadVersion, e))?
            .ok_or_else(|| MigrationError::Integrity(format!("{} holds no version row", self.table)))?;

        let decode = |e| MigrationError::at(MigrationPhase::ReadVersion, e);
        let version = row.get_i64("version").map_err(decode)?;
        let created_at = row
            .get_timestamp("created_at")
            .map_err(decode)?
            .ok_or_else(|| MigrationError::Integrity(format!("{}.created_at is null", self.table)))?;
        let updated_at = row.get_timestamp("updated_at").map_err(decode)?;

        Ok(SchemaVersion {
            version,
            created_at,
            updated_at,
        })
    }

    /// Persist `version` and stamp `updated_at`
    pub async fn write_version(
        &self,
        tx: &mut dyn DatabaseTransaction,
        version: usize,
        at: NaiveDateTime,
    ) -> MigrationResult<()> {
        let version = i32::try_from(version).map_err(|_| {
            MigrationError::Integrity(format!("version {} does not fit the INTEGER version column", version))
        })?;

        tx.execute(
            &self.update_version_sql(),
            &[DatabaseValue::Int32(version), DatabaseValue::Timestamp(at)],
        )
        .await
        .map_err(|e| MigrationError::at(MigrationPhase::PersistVersion, e))?;

        Ok(())
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}
