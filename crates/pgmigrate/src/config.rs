//! Migrator configuration
//!
//! A plain settings value handed to the migrator at construction. It can be
//! built in code with the `with_*` setters or read from `PGMIGRATE_*`
//! environment variables.

use std::env;
use std::path::PathBuf;
use once_cell::sync::Lazy;
use regex::Regex;
use crate::error::{MigrationError, MigrationResult};

/// Default name of the version table
pub const DEFAULT_TABLE_NAME: &str = "_migrations";

/// Default directory migration files are read from
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}(\.[A-Za-z_][A-Za-z0-9_]{0,62})?$")
        .expect("table name pattern is a valid regex")
});

/// Settings for a [`Migrator`](crate::Migrator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Directory holding `0001_*.sql`, `0002_*.sql`, ...
    pub migrations_dir: PathBuf,
    /// Emit progress logs
    pub logging: bool,
    /// Emit verbose diagnostic logs (implies `logging`)
    pub debug_logging: bool,
    /// Relax foreign key enforcement while the pending batch runs
    pub disable_foreign_keys: bool,
    /// Name of the version table, optionally schema-qualified
    pub internal_table_name: String,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from(DEFAULT_MIGRATIONS_DIR),
            logging: false,
            debug_logging: false,
            disable_foreign_keys: false,
            internal_table_name: DEFAULT_TABLE_NAME.to_string(),
        }
    }
}

impl MigratorConfig {
    pub fn new<P: Into<PathBuf>>(migrations_dir: P) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    pub fn with_disable_foreign_keys(mut self, disable: bool) -> Self {
        self.disable_foreign_keys = disable;
        self
    }

    pub fn with_internal_table_name<S: Into<String>>(mut self, name: S) -> Self {
        self.internal_table_name = name.into();
        self
    }

    /// Whether info-level progress logs are on
    pub fn logging_enabled(&self) -> bool {
        self.logging || self.debug_logging
    }

    /// Load configuration from environment variables
    ///
    /// | variable | field |
    /// |----------|-------|
    /// | `PGMIGRATE_DIR` | `migrations_dir` |
    /// | `PGMIGRATE_LOGGING` | `logging` |
    /// | `PGMIGRATE_DEBUG` | `debug_logging` |
    /// | `PGMIGRATE_DISABLE_FOREIGN_KEYS` | `disable_foreign_keys` |
    /// | `PGMIGRATE_TABLE` | `internal_table_name` |
    pub fn from_env() -> MigrationResult<Self> {
        let config = Self {
            migrations_dir: PathBuf::from(get_env_or_default("PGMIGRATE_DIR", DEFAULT_MIGRATIONS_DIR)),
            logging: get_env_bool("PGMIGRATE_LOGGING", false)?,
            debug_logging: get_env_bool("PGMIGRATE_DEBUG", false)?,
            disable_foreign_keys: get_env_bool("PGMIGRATE_DISABLE_FOREIGN_KEYS", false)?,
            internal_table_name: get_env_or_default("PGMIGRATE_TABLE", DEFAULT_TABLE_NAME),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> MigrationResult<()> {
        validate_table_name(&self.internal_table_name)?;

        if self.migrations_dir.as_os_str().is_empty() {
            return Err(MigrationError::configuration("migrations directory cannot be empty"));
        }

        Ok(())
    }
}

/// The version table name is interpolated into SQL, so only plain or
/// schema-qualified identifiers are accepted.
pub fn validate_table_name(name: &str) -> MigrationResult<()> {
    if TABLE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(MigrationError::Configuration(format!(
            "invalid internal table name {:?}: expected an identifier such as _migrations or schema._migrations",
            name
        )))
    }
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_bool(key: &str, default: bool) -> MigrationResult<bool> {
    match env::var(key) {
        Ok(value) => parse_bool(&value).ok_or_else(|| {
            MigrationError::Configuration(format!(
                "{} must be one of true, false, 1, 0, yes, no, on, off; got {:?}",
                key, value
            ))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "PGMIGRATE_DIR",
        "PGMIGRATE_LOGGING",
        "PGMIGRATE_DEBUG",
        "PGMIGRATE_DISABLE_FOREIGN_KEYS",
        "PGMIGRATE_TABLE",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_defaults() {
        let config = MigratorConfig::default();
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
        assert_eq!(config.internal_table_name, "_migrations");
        assert!(!config.logging_enabled());
        assert!(!config.disable_foreign_keys);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_setters() {
        let config = MigratorConfig::new("db/migrations")
            .with_debug_logging(true)
            .with_disable_foreign_keys(true)
            .with_internal_table_name("meta.schema_version");

        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert!(config.logging_enabled());
        assert!(config.disable_foreign_keys);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_table_name_validation() {
        for ok in ["_migrations", "schema_version", "app._migrations", "T1"] {
            assert!(validate_table_name(ok).is_ok(), "{} should be accepted", ok);
        }
        for bad in ["", "1table", "drop table x;--", "a.b.c", "my-table", "\"quoted\""] {
            assert!(
                matches!(validate_table_name(bad), Err(MigrationError::Configuration(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    #[serial]
    fn test_from_env() {
        clear_env();
        env::set_var("PGMIGRATE_DIR", "sql");
        env::set_var("PGMIGRATE_LOGGING", "yes");
        env::set_var("PGMIGRATE_DISABLE_FOREIGN_KEYS", "1");
        env::set_var("PGMIGRATE_TABLE", "public.versions");

        let config = MigratorConfig::from_env().unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("sql"));
        assert!(config.logging);
        assert!(!config.debug_logging);
        assert!(config.disable_foreign_keys);
        assert_eq!(config.internal_table_name, "public.versions");

        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_values() {
        clear_env();
        env::set_var("PGMIGRATE_DEBUG", "sometimes");
        assert!(matches!(MigratorConfig::from_env(), Err(MigrationError::Configuration(_))));

        clear_env();
        env::set_var("PGMIGRATE_TABLE", "x; DROP TABLE users");
        assert!(matches!(MigratorConfig::from_env(), Err(MigrationError::Configuration(_))));

        clear_env();
    }
}
