//! Referential-integrity toggle
//!
//! Run around the pending batch when migrations drop and recreate tables that
//! reference each other. `SET LOCAL` scopes the change to the migration
//! transaction, so a rollback also undoes the relaxed mode.

use crate::backends::DatabaseTransaction;
use crate::error::{MigrationError, MigrationPhase, MigrationResult};

/// Stop firing foreign key triggers for the rest of the transaction
pub const DISABLE_FOREIGN_KEYS_SQL: &str = "SET LOCAL session_replication_role = replica;";

/// Restore normal foreign key enforcement
pub const RESTORE_FOREIGN_KEYS_SQL: &str = "SET LOCAL session_replication_role = origin;";

pub async fn disable_foreign_keys(tx: &mut dyn DatabaseTransaction) -> MigrationResult<()> {
    tx.execute(DISABLE_FOREIGN_KEYS_SQL, &[])
        .await
        .map_err(|e| MigrationError::at(MigrationPhase::DisableIntegrityChecks, e))?;
    Ok(())
}

pub async fn restore_foreign_keys(tx: &mut dyn DatabaseTransaction) -> MigrationResult<()> {
    tx.execute(RESTORE_FOREIGN_KEYS_SQL, &[])
        .await
        .map_err(|e| MigrationError::at(MigrationPhase::RestoreIntegrityChecks, e))?;
    Ok(())
}
