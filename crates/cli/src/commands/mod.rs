pub mod migrate;

use std::path::PathBuf;
use anyhow::{anyhow, Context};
use clap::Args;
use pgmigrate::{validate_database_url, MigratorConfig};

/// Flags shared by every command
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalOptions {
    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Migrations directory [default: $PGMIGRATE_DIR or ./migrations]
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Version table name [default: $PGMIGRATE_TABLE or _migrations]
    #[arg(long, global = true)]
    pub table: Option<String>,

    /// Relax foreign key enforcement while pending migrations run
    #[arg(long, global = true)]
    pub disable_foreign_keys: bool,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Log every step of the run
    #[arg(long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

impl GlobalOptions {
    /// Environment settings with command line flags layered on top
    pub fn migrator_config(&self) -> anyhow::Result<MigratorConfig> {
        let mut config = MigratorConfig::from_env().context("invalid PGMIGRATE_* environment")?;

        if let Some(dir) = &self.dir {
            config.migrations_dir = dir.clone();
        }
        if let Some(table) = &self.table {
            config.internal_table_name = table.clone();
        }
        if self.disable_foreign_keys {
            config.disable_foreign_keys = true;
        }
        if self.debug {
            config.debug_logging = true;
        }
        config.logging = !self.quiet;

        config.validate()?;
        Ok(config)
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        let url = self
            .database_url
            .as_deref()
            .ok_or_else(|| anyhow!("no database URL: pass --database-url or set DATABASE_URL"))?;

        validate_database_url(url)?;
        Ok(url)
    }
}
