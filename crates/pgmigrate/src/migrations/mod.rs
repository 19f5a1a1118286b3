//! Migration System
//!
//! Forward-only migrations tracked by a single persisted version number.

pub mod definitions;
pub mod integrity;
pub mod runner;
pub mod source;
pub mod store;

pub use definitions::*;
pub use integrity::{DISABLE_FOREIGN_KEYS_SQL, RESTORE_FOREIGN_KEYS_SQL};
pub use runner::Migrator;
pub use source::{create_migration_file, index_prefix, MigrationSet};
pub use store::VersionStore;
