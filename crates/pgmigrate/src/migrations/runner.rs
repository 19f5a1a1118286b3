//! Migration Runner - applies pending migrations in a single transaction
//!
//! One run walks these steps, in order, on one transaction:
//!
//! `Begin → EnsureTable → ReadVersion → Validate → [DisableIntegrityChecks] →
//! ApplyPending → [RestoreIntegrityChecks] → [PersistVersion] → Commit`
//!
//! Any failure rolls the transaction back, so the schema either advances to
//! the new version with every intervening script applied, or does not change.
//!
//! Cancelling the token also asks the server to abort the statement in flight,
//! so a long script does not have to finish before the rollback can run.
//!
//! The runner takes no locks of its own. Two runs started at the same time
//! against the same database can both read the same starting version; callers
//! that need a single writer must serialize runs themselves, for example with
//! `pg_advisory_lock` around the call.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::backends::{DatabaseExecutor, DatabaseTransaction, StatementCanceller};
use crate::config::MigratorConfig;
use crate::error::{DatabaseError, MigrationError, MigrationPhase, MigrationResult};
use crate::logging::{MigrationLogger, TracingLogger};
use super::definitions::{MigrationReport, MigrationStatus};
use super::integrity;
use super::source::MigrationSet;
use super::store::VersionStore;

/// Upper bound on delivering a cancel request to the server
const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(5);

/// The caller's token plus, once a transaction is open, its canceller
struct CancelScope<'a> {
    token: &'a CancellationToken,
    canceller: Option<Arc<dyn StatementCanceller>>,
}

impl<'a> CancelScope<'a> {
    fn new(token: &'a CancellationToken) -> Self {
        Self { token, canceller: None }
    }

    fn for_transaction(token: &'a CancellationToken, tx: &dyn DatabaseTransaction) -> Self {
        Self {
            token,
            canceller: tx.canceller(),
        }
    }
}

/// Applies a [`MigrationSet`] through a [`DatabaseExecutor`]
pub struct Migrator {
    executor: Arc<dyn DatabaseExecutor>,
    config: MigratorConfig,
    store: VersionStore,
    logger: Arc<dyn MigrationLogger>,
}

impl Migrator {
    /// Create a migrator logging through `tracing` as `config` dictates
    pub fn new(executor: Arc<dyn DatabaseExecutor>, config: MigratorConfig) -> MigrationResult<Self> {
        config.validate()?;

        let store = VersionStore::new(config.internal_table_name.clone())?;
        let logger: Arc<dyn MigrationLogger> = Arc::new(TracingLogger::from_config(&config));
        logger.debug("debug logging enabled", &[]);

        Ok(Self {
            executor,
            config,
            store,
            logger,
        })
    }

    /// Replace the logging capability
    pub fn with_logger(mut self, logger: Arc<dyn MigrationLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Read the configured migrations directory
    pub fn load_scripts(&self) -> MigrationResult<MigrationSet> {
        let dir = self.config.migrations_dir.display();
        self.logger.info("reading migrations from dir", &[("dir", &dir)]);

        let set = MigrationSet::from_dir(&self.config.migrations_dir)?;
        self.logger.debug("loaded migrations", &[("count", &set.len())]);
        Ok(set)
    }

    /// Load the migrations directory and apply whatever is pending
    pub async fn migrate(&self, cancel: &CancellationToken) -> MigrationResult<MigrationReport> {
        let set = self.load_scripts()?;
        self.apply(&set, cancel).await
    }

    /// Apply the pending part of `set`
    ///
    /// An empty set returns immediately without opening a transaction; its
    /// report carries version 0 since nothing was read.
    pub async fn apply(&self, set: &MigrationSet, cancel: &CancellationToken) -> MigrationResult<MigrationReport> {
        let started = Instant::now();

        if set.is_empty() {
            self.logger.info("no migrations to apply", &[]);
            return Ok(MigrationReport::up_to_date(0, started.elapsed().as_millis()));
        }

        let mut tx = self.begin(cancel).await?;
        let scope = CancelScope::for_transaction(cancel, &*tx);
        let result = self.apply_in_transaction(tx.as_mut(), set, &scope).await;
        let mut report = self.finish(tx.as_mut(), result, &scope).await?;

        report.execution_time_ms = started.elapsed().as_millis();
        self.logger.info(
            "migrations complete",
            &[
                ("from", &report.starting_version),
                ("to", &report.current_version),
                ("applied", &report.applied),
                ("elapsed_ms", &report.execution_time_ms),
            ],
        );

        Ok(report)
    }

    /// Report the persisted version against the migrations directory
    ///
    /// Bootstraps the version table when it is missing.
    pub async fn status(&self, cancel: &CancellationToken) -> MigrationResult<MigrationStatus> {
        let set = self.load_scripts()?;

        let mut tx = self.begin(cancel).await?;
        let scope = CancelScope::for_transaction(cancel, &*tx);
        let result = async {
            self.guard(&scope, MigrationPhase::EnsureTable, self.store.ensure_table(tx.as_mut()))
                .await?;
            self.guard(&scope, MigrationPhase::ReadVersion, self.store.read_record(tx.as_mut()))
                .await
        }
        .await;
        let schema = self.finish(tx.as_mut(), result, &scope).await?;

        Ok(MigrationStatus::new(schema, set.len()))
    }

    async fn apply_in_transaction(
        &self,
        tx: &mut dyn DatabaseTransaction,
        set: &MigrationSet,
        scope: &CancelScope<'_>,
    ) -> MigrationResult<MigrationReport> {
        self.guard(scope, MigrationPhase::EnsureTable, self.store.ensure_table(tx)).await?;
        self.logger.debug("version table ready", &[("table", &self.store.table())]);

        let rows = self.guard(scope, MigrationPhase::ReadVersion, self.store.count_rows(tx)).await?;
        self.logger.debug("version table row count", &[("count", &rows)]);

        let version = self.guard(scope, MigrationPhase::ReadVersion, self.store.read_version(tx)).await?;
        let starting = usize::try_from(version)
            .map_err(|_| MigrationError::Integrity(format!("version {} is out of range", version)))?;
        let available = set.len();

        // Fewer scripts than the recorded version means some were lost or
        // renumbered; the recorded state can't be trusted.
        if available < starting {
            return Err(MigrationError::Integrity(format!(
                "want at least {} migration scripts; got {}",
                starting, available
            )));
        }

        if available == starting {
            self.logger.info("schema is up to date", &[("version", &starting)]);
            return Ok(MigrationReport::up_to_date(starting, 0));
        }

        self.logger.info(
            "applying pending migrations",
            &[("version", &starting), ("pending", &(available - starting))],
        );

        if self.config.disable_foreign_keys {
            self.guard(
                scope,
                MigrationPhase::DisableIntegrityChecks,
                integrity::disable_foreign_keys(tx),
            )
            .await?;
            self.logger.debug("foreign key enforcement disabled", &[]);
        }

        let mut applied = 0;
        let mut skipped_blank = 0;
        for (index, script) in set.pending_from(starting) {
            if script.is_blank() {
                skipped_blank += 1;
                self.logger.debug("skipping blank migration", &[("name", &script.name)]);
                continue;
            }

            self.logger.info("applying migration", &[("index", &index), ("name", &script.name)]);
            self.guard(scope, MigrationPhase::ApplyPending, async {
                tx.execute(script.sql.trim(), &[])
                    .await
                    .map_err(|source| MigrationError::Execution {
                        index,
                        name: script.name.clone(),
                        source,
                    })
            })
            .await?;
            applied += 1;
        }

        if self.config.disable_foreign_keys {
            self.guard(
                scope,
                MigrationPhase::RestoreIntegrityChecks,
                integrity::restore_foreign_keys(tx),
            )
            .await?;
            self.logger.debug("foreign key enforcement restored", &[]);
        }

        // Blank placeholders count as consumed positions, so the next run
        // starts after them instead of re-running the scripts that follow.
        let current = available;
        if current > starting {
            let now = Utc::now().naive_utc();
            self.guard(
                scope,
                MigrationPhase::PersistVersion,
                self.store.write_version(tx, current, now),
            )
            .await?;
        }

        Ok(MigrationReport {
            starting_version: starting,
            current_version: current,
            applied,
            skipped_blank,
            execution_time_ms: 0,
        })
    }

    async fn begin(&self, cancel: &CancellationToken) -> MigrationResult<Box<dyn DatabaseTransaction>> {
        self.guard(&CancelScope::new(cancel), MigrationPhase::Begin, async {
            self.executor
                .begin_transaction()
                .await
                .map_err(|e| MigrationError::at(MigrationPhase::Begin, e))
        })
        .await
        .map_err(|err| {
            self.logger.error("begin transaction", &[("error", &err)]);
            err
        })
    }

    /// Commit on success; roll back on any failure, including a failed commit
    async fn finish<T>(
        &self,
        tx: &mut dyn DatabaseTransaction,
        result: MigrationResult<T>,
        scope: &CancelScope<'_>,
    ) -> MigrationResult<T> {
        let result = match result {
            Ok(value) => self.guard(scope, MigrationPhase::Commit, async {
                tx.commit()
                    .await
                    .map_err(|e| MigrationError::at(MigrationPhase::Commit, e))
            })
            .await
            .map(|()| value),
            Err(err) => Err(err),
        };

        if let Err(err) = &result {
            let phase = err.phase().map_or("unknown", |phase| phase.as_str());
            self.logger.error("migration run failed", &[("phase", &phase), ("error", err)]);
            self.rollback(tx).await;
        }

        result
    }

    /// Never masks the error that triggered it
    async fn rollback(&self, tx: &mut dyn DatabaseTransaction) {
        match tx.rollback().await {
            Ok(()) => self.logger.info("migration transaction rolled back", &[]),
            Err(DatabaseError::TransactionClosed) => {}
            Err(e) => {
                let err = MigrationError::at(MigrationPhase::Rollback, e);
                self.logger.error("rollback", &[("error", &err)]);
            }
        }
    }

    /// Race `fut` against the caller's cancellation token
    ///
    /// On cancellation `fut` is dropped first, then the server is asked to
    /// abort whatever the transaction was still executing.
    async fn guard<T, F>(&self, scope: &CancelScope<'_>, phase: MigrationPhase, fut: F) -> MigrationResult<T>
    where
        F: Future<Output = MigrationResult<T>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = scope.token.cancelled() => None,
            result = fut => Some(result),
        };

        match outcome {
            Some(result) => result,
            None => {
                self.interrupt(scope, phase).await;
                Err(MigrationError::Cancelled { phase })
            }
        }
    }

    async fn interrupt(&self, scope: &CancelScope<'_>, phase: MigrationPhase) {
        let Some(canceller) = &scope.canceller else {
            return;
        };

        match tokio::time::timeout(INTERRUPT_TIMEOUT, canceller.cancel_running()).await {
            Ok(Ok(())) => self.logger.debug("cancel request sent", &[("phase", &phase)]),
            Ok(Err(e)) => self.logger.warn("cancel request failed", &[("phase", &phase), ("error", &e)]),
            Err(_) => self.logger.warn("cancel request timed out", &[("phase", &phase)]),
        }
    }
}
