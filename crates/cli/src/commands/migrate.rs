use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Context;
use pgmigrate::{
    create_migration_file, redact_database_url, DatabasePoolConfig, MigrationStatus, Migrator, PostgresExecutor,
};
use tokio_util::sync::CancellationToken;

use super::GlobalOptions;

async fn connect(options: &GlobalOptions) -> anyhow::Result<(Arc<PostgresExecutor>, Migrator)> {
    let config = options.migrator_config()?;
    let url = options.database_url()?;

    tracing::debug!(target: "pgmigrate", database = %redact_database_url(url), "connecting");
    let executor = PostgresExecutor::connect(url, DatabasePoolConfig::default())
        .await
        .with_context(|| format!("connect to {}", redact_database_url(url)))?;
    let executor = Arc::new(executor);

    let migrator = Migrator::new(executor.clone(), config)?;
    Ok((executor, migrator))
}

/// Apply every pending migration
pub async fn up(options: &GlobalOptions, cancel: &CancellationToken) -> anyhow::Result<()> {
    let (executor, migrator) = connect(options).await?;
    let result = migrator.migrate(cancel).await;
    executor.close().await;

    let report = result.context("migration failed")?;
    if report.is_noop() {
        println!("Schema is up to date at version {}", report.current_version);
    } else {
        println!(
            "Migrated from version {} to {}: {} applied, {} blank skipped ({}ms)",
            report.starting_version,
            report.current_version,
            report.applied,
            report.skipped_blank,
            report.execution_time_ms
        );
    }

    Ok(())
}

pub async fn status(options: &GlobalOptions, json: bool, cancel: &CancellationToken) -> anyhow::Result<()> {
    let (executor, migrator) = connect(options).await?;
    let result = migrator.status(cancel).await;
    executor.close().await;

    let status = result.context("read migration status")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&status));
    }

    Ok(())
}

/// Create the next numbered migration file
pub fn create(options: &GlobalOptions, name: &str) -> anyhow::Result<PathBuf> {
    let config = options.migrator_config()?;
    let path = create_migration_file(&config.migrations_dir, name)?;

    println!("Created migration: {}", path.display());
    Ok(path)
}

fn render_status(status: &MigrationStatus) -> String {
    let updated = status
        .schema
        .updated_at
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());

    let pending = match status.pending {
        Some(0) => "none".to_string(),
        Some(n) => n.to_string(),
        None => format!(
            "unknown: version {} is ahead of the {} migration files",
            status.schema.version, status.available
        ),
    };

    format!(
        "Migration Status:\n\
         ================\n\
         Schema version: {}\n\
         Last migrated:  {}\n\
         Available:      {}\n\
         Pending:        {}\n",
        status.schema.version, updated, status.available, pending
    )
}
