//! In-memory executor and logger used by the unit tests
//!
//! `MockExecutor` understands the handful of statements the version store and
//! the integrity toggle issue; anything else is recorded as an applied
//! migration script. Each transaction works on a copy of the committed state
//! that only replaces it on commit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::backends::{DatabaseExecutor, DatabaseRow, DatabaseTransaction, DatabaseValue, StatementCanceller};
use crate::error::{DatabaseError, DatabaseResult};
use crate::logging::{render_fields, LogField, LogLevel, MigrationLogger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRow {
    pub version: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbState {
    pub table_exists: bool,
    pub rows: Vec<VersionRow>,
    /// Migration scripts, in execution order
    pub applied: Vec<String>,
    pub replication_role: Option<String>,
}

impl DbState {
    pub fn version(&self) -> Option<i64> {
        self.rows.iter().map(|row| row.version).max()
    }

    pub fn row(&self) -> Option<&VersionRow> {
        self.rows.iter().max_by_key(|row| row.version)
    }
}

/// A statement as the executor saw it; `tx` is `None` outside transactions
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub tx: Option<usize>,
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

#[derive(Clone)]
enum Fault {
    Fail(DatabaseError),
    Ignore,
    Cancel(CancellationToken),
}

#[derive(Default)]
struct Inner {
    committed: DbState,
    statements: Vec<Statement>,
    faults: Vec<(String, Fault)>,
    fail_begin: bool,
    fail_commit: bool,
    fail_rollback: bool,
    next_tx: usize,
    begins: usize,
    commits: usize,
    rollbacks: usize,
    /// Transaction ids an out-of-band cancel was requested for
    interrupts: Vec<usize>,
}

#[derive(Clone, Default)]
pub struct MockExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a bootstrapped table holding `version`
    pub fn with_version(self, version: i64) -> Self {
        {
            let mut inner = self.lock();
            inner.committed.table_exists = true;
            inner.committed.rows = vec![VersionRow {
                version,
                created_at: Utc::now().naive_utc(),
                updated_at: None,
            }];
        }
        self
    }

    /// Statements containing `pattern` fail with `error`
    pub fn fail_on(self, pattern: &str, error: DatabaseError) -> Self {
        self.lock().faults.push((pattern.to_string(), Fault::Fail(error)));
        self
    }

    /// Statements containing `pattern` succeed without any effect
    pub fn ignore_on(self, pattern: &str) -> Self {
        self.lock().faults.push((pattern.to_string(), Fault::Ignore));
        self
    }

    /// Statements containing `pattern` cancel `token` and never complete
    pub fn cancel_on(self, pattern: &str, token: CancellationToken) -> Self {
        self.lock().faults.push((pattern.to_string(), Fault::Cancel(token)));
        self
    }

    pub fn fail_begin(self) -> Self {
        self.lock().fail_begin = true;
        self
    }

    pub fn fail_commit(self) -> Self {
        self.lock().fail_commit = true;
        self
    }

    pub fn fail_rollback(self) -> Self {
        self.lock().fail_rollback = true;
        self
    }

    pub fn state(&self) -> DbState {
        self.lock().committed.clone()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.lock().statements.clone()
    }

    pub fn begins(&self) -> usize {
        self.lock().begins
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    pub fn interrupts(&self) -> Vec<usize> {
        self.lock().interrupts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }
}

fn lock(inner: &Arc<Mutex<Inner>>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

enum Step {
    Done(DatabaseResult<(u64, Option<MockRow>)>),
    Hang,
}

/// Log the statement, apply faults, then interpret it against `state`
fn run_statement(
    inner: &mut Inner,
    tx: Option<usize>,
    staged: Option<&mut DbState>,
    sql: &str,
    params: &[DatabaseValue],
) -> Step {
    inner.statements.push(Statement {
        tx,
        sql: sql.to_string(),
        params: params.to_vec(),
    });

    let fault = inner
        .faults
        .iter()
        .find(|(pattern, _)| sql.contains(pattern.as_str()))
        .map(|(_, fault)| fault.clone());

    match fault {
        Some(Fault::Fail(err)) => return Step::Done(Err(err)),
        Some(Fault::Ignore) => return Step::Done(Ok((0, None))),
        Some(Fault::Cancel(token)) => {
            token.cancel();
            return Step::Hang;
        }
        None => {}
    }

    let state = match staged {
        Some(state) => state,
        None => &mut inner.committed,
    };
    Step::Done(interpret(state, sql, params))
}

fn interpret(state: &mut DbState, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<(u64, Option<MockRow>)> {
    let sql = sql.trim();
    let touches_table = sql.starts_with("INSERT INTO")
        || sql.starts_with("SELECT COUNT(1)")
        || sql.starts_with("SELECT version")
        || sql.starts_with("UPDATE");

    if touches_table && !state.table_exists {
        return Err(DatabaseError::Query("relation does not exist".to_string()));
    }

    if sql.starts_with("CREATE TABLE IF NOT EXISTS") {
        state.table_exists = true;
        Ok((0, None))
    } else if sql.starts_with("INSERT INTO") {
        if state.rows.is_empty() {
            state.rows.push(VersionRow {
                version: 0,
                created_at: Utc::now().naive_utc(),
                updated_at: None,
            });
            Ok((1, None))
        } else {
            Ok((0, None))
        }
    } else if sql.starts_with("SELECT COUNT(1)") {
        let row = MockRow::new().with("count", DatabaseValue::Int64(state.rows.len() as i64));
        Ok((0, Some(row)))
    } else if sql.starts_with("SELECT version, created_at, updated_at") {
        let row = state.row().map(|row| {
            MockRow::new()
                .with("version", DatabaseValue::Int32(row.version as i32))
                .with("created_at", DatabaseValue::Timestamp(row.created_at))
                .with("updated_at", row.updated_at.into())
        });
        Ok((0, row))
    } else if sql.starts_with("SELECT version") {
        let row = state
            .version()
            .map(|version| MockRow::new().with("version", DatabaseValue::Int32(version as i32)));
        Ok((0, row))
    } else if sql.starts_with("UPDATE") {
        let version = params
            .first()
            .and_then(DatabaseValue::as_i64)
            .ok_or_else(|| DatabaseError::Query("missing version parameter".to_string()))?;
        let updated_at = params.get(1).and_then(DatabaseValue::as_timestamp);
        for row in &mut state.rows {
            row.version = version;
            row.updated_at = updated_at;
        }
        Ok((state.rows.len() as u64, None))
    } else if let Some(role) = sql.strip_prefix("SET LOCAL session_replication_role = ") {
        state.replication_role = Some(role.trim_end_matches(';').to_string());
        Ok((0, None))
    } else {
        state.applied.push(sql.to_string());
        Ok((0, None))
    }
}

async fn settle(step: Step) -> DatabaseResult<(u64, Option<MockRow>)> {
    match step {
        Step::Done(result) => result,
        Step::Hang => {
            std::future::pending::<()>().await;
            Err(DatabaseError::Query("unreachable".to_string()))
        }
    }
}

fn boxed(row: Option<MockRow>) -> Option<Box<dyn DatabaseRow>> {
    row.map(|row| Box::new(row) as Box<dyn DatabaseRow>)
}

#[async_trait]
impl DatabaseExecutor for MockExecutor {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let step = run_statement(&mut self.lock(), None, None, sql, params);
        settle(step).await.map(|(affected, _)| affected)
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let step = run_statement(&mut self.lock(), None, None, sql, params);
        settle(step).await.map(|(_, row)| boxed(row))
    }

    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>> {
        let mut inner = self.lock();
        if inner.fail_begin {
            return Err(DatabaseError::Connection("connection refused".to_string()));
        }

        inner.next_tx += 1;
        inner.begins += 1;
        Ok(Box::new(MockTransaction {
            id: inner.next_tx,
            staged: inner.committed.clone(),
            inner: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

pub struct MockTransaction {
    id: usize,
    staged: DbState,
    inner: Arc<Mutex<Inner>>,
    closed: bool,
}

impl MockTransaction {
    fn step(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Step> {
        if self.closed {
            return Err(DatabaseError::TransactionClosed);
        }
        let mut inner = lock(&self.inner);
        Ok(run_statement(&mut inner, Some(self.id), Some(&mut self.staged), sql, params))
    }
}

#[async_trait]
impl DatabaseTransaction for MockTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let step = self.step(sql, params)?;
        settle(step).await.map(|(affected, _)| affected)
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let step = self.step(sql, params)?;
        settle(step).await.map(|(_, row)| boxed(row))
    }

    async fn commit(&mut self) -> DatabaseResult<()> {
        if self.closed {
            return Err(DatabaseError::TransactionClosed);
        }
        self.closed = true;

        let mut inner = lock(&self.inner);
        if inner.fail_commit {
            return Err(DatabaseError::Query("could not serialize access".to_string()));
        }
        inner.committed = std::mem::take(&mut self.staged);
        inner.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> DatabaseResult<()> {
        if self.closed {
            return Err(DatabaseError::TransactionClosed);
        }
        self.closed = true;

        let mut inner = lock(&self.inner);
        inner.rollbacks += 1;
        if inner.fail_rollback {
            return Err(DatabaseError::Connection("connection reset by peer".to_string()));
        }
        Ok(())
    }

    fn canceller(&self) -> Option<Arc<dyn StatementCanceller>> {
        Some(Arc::new(MockCanceller {
            tx: self.id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockCanceller {
    tx: usize,
    inner: Arc<Mutex<Inner>>,
}

#[async_trait]
impl StatementCanceller for MockCanceller {
    async fn cancel_running(&self) -> DatabaseResult<()> {
        lock(&self.inner).interrupts.push(self.tx);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MockRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl MockRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: DatabaseValue) -> Self {
        self.columns.push((name.to_string(), value));
        self
    }
}

impl DatabaseRow for MockRow {
    fn get_by_index(&self, index: usize) -> DatabaseResult<DatabaseValue> {
        self.columns
            .get(index)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DatabaseError::Decode(format!("Column index {} out of range", index)))
    }

    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| DatabaseError::Decode(format!("Column '{}' not found", name)))
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Captures every event regardless of level
#[derive(Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<(LogLevel, String, String)>>,
}

impl RecordingLogger {
    pub fn events(&self) -> Vec<(LogLevel, String, String)> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|(l, _, _)| *l == level)
            .map(|(_, message, fields)| format!("{} {}", message, fields))
            .collect()
    }
}

impl MigrationLogger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &[LogField<'_>]) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((level, message.to_string(), render_fields(fields)));
    }
}

/// Convenience for assertions on grouped statements
pub fn statements_by_tx(statements: &[Statement]) -> HashMap<Option<usize>, Vec<String>> {
    let mut grouped: HashMap<Option<usize>, Vec<String>> = HashMap::new();
    for statement in statements {
        grouped.entry(statement.tx).or_default().push(statement.sql.clone());
    }
    grouped
}
