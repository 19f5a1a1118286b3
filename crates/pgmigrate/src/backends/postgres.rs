//! PostgreSQL Backend Implementation
//!
//! Implements the executor traits on top of a sqlx `PgPool`. Statements
//! without parameters go through the simple-query protocol so a migration
//! file containing several statements executes as a single batch.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres};
use crate::error::{DatabaseError, DatabaseResult};
use super::core::*;

/// PostgreSQL executor backed by a connection pool
#[derive(Debug, Clone)]
pub struct PostgresExecutor {
    pool: Arc<Pool<Postgres>>,
}

impl PostgresExecutor {
    /// Wrap an existing pool
    pub fn new(pool: Arc<Pool<Postgres>>) -> Self {
        Self { pool }
    }

    /// Connect a new pool to `database_url`
    pub async fn connect(database_url: &str, config: DatabasePoolConfig) -> DatabaseResult<Self> {
        validate_database_url(database_url)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(database_url)
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::new(Arc::new(pool)))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DatabaseExecutor for PostgresExecutor {
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let result = if params.is_empty() {
            sqlx::Executor::execute(&*self.pool, sql).await?
        } else {
            bind_all(sqlx::query(sql), params).execute(&*self.pool).await?
        };

        Ok(result.rows_affected())
    }

    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }

    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>> {
        let mut tx = self.pool.begin().await?;

        // Needed to cancel this connection's statements from another one
        let backend_pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *tx)
            .await?;

        Ok(Box::new(PostgresTransaction::new(tx, backend_pid, Arc::clone(&self.pool))))
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    backend_pid: i32,
    pool: Arc<Pool<Postgres>>,
}

impl PostgresTransaction {
    /// `backend_pid` is the server process behind `tx`; `pool` must be able
    /// to hand out a second connection for cancel requests.
    pub fn new(tx: sqlx::Transaction<'static, Postgres>, backend_pid: i32, pool: Arc<Pool<Postgres>>) -> Self {
        Self {
            tx: Some(tx),
            backend_pid,
            pool,
        }
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64> {
        let tx = self.tx.as_mut().ok_or(DatabaseError::TransactionClosed)?;

        let result = if params.is_empty() {
            sqlx::Executor::execute(&mut **tx, sql).await?
        } else {
            bind_all(sqlx::query(sql), params).execute(&mut **tx).await?
        };

        Ok(result.rows_affected())
    }

    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>> {
        let tx = self.tx.as_mut().ok_or(DatabaseError::TransactionClosed)?;

        let row = bind_all(sqlx::query(sql), params)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| Box::new(PostgresRow::new(r)) as Box<dyn DatabaseRow>))
    }

    async fn commit(&mut self) -> DatabaseResult<()> {
        let tx = self.tx.take().ok_or(DatabaseError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> DatabaseResult<()> {
        let tx = self.tx.take().ok_or(DatabaseError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }

    fn canceller(&self) -> Option<Arc<dyn StatementCanceller>> {
        Some(Arc::new(PostgresCanceller {
            pool: Arc::clone(&self.pool),
            backend_pid: self.backend_pid,
        }))
    }
}

/// Cancels a backend's running statement with `pg_cancel_backend`
struct PostgresCanceller {
    pool: Arc<Pool<Postgres>>,
    backend_pid: i32,
}

#[async_trait]
impl StatementCanceller for PostgresCanceller {
    async fn cancel_running(&self) -> DatabaseResult<()> {
        let signalled: bool = sqlx::query_scalar("SELECT pg_cancel_backend($1)")
            .bind(self.backend_pid)
            .fetch_one(&*self.pool)
            .await?;

        if !signalled {
            tracing::debug!(target: "pgmigrate", pid = self.backend_pid, "backend already gone; nothing to cancel");
        }
        Ok(())
    }
}

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> DatabaseResult<DatabaseValue> {
        postgres_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue> {
        use sqlx::{Column, Row};

        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| DatabaseError::Decode(format!("Column '{}' not found", name)))?;

        postgres_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        use sqlx::Row;
        self.row.len()
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_all<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> PgQuery<'q> {
    for param in params {
        query = bind_database_value(query, param);
    }
    query
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> PgQuery<'q> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
        DatabaseValue::Timestamp(ts) => query.bind(*ts),
        DatabaseValue::TimestampTz(ts) => query.bind(*ts),
    }
}

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> DatabaseResult<DatabaseValue> {
    use sqlx::{Column, Row, TypeInfo, ValueRef};

    if index >= row.len() {
        return Err(DatabaseError::Decode(format!("Column index {} out of range", index)));
    }

    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();

    match type_name.as_str() {
        "BOOL" => Ok(DatabaseValue::Bool(row.try_get(index)?)),
        "INT2" => {
            let value: i16 = row.try_get(index)?;
            Ok(DatabaseValue::Int32(i32::from(value)))
        }
        "INT4" => Ok(DatabaseValue::Int32(row.try_get(index)?)),
        "INT8" => Ok(DatabaseValue::Int64(row.try_get(index)?)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Ok(DatabaseValue::String(row.try_get(index)?)),
        "TIMESTAMP" => Ok(DatabaseValue::Timestamp(row.try_get(index)?)),
        "TIMESTAMPTZ" => Ok(DatabaseValue::TimestampTz(row.try_get(index)?)),
        other => Err(DatabaseError::Decode(format!(
            "Unsupported column type '{}' at index {}",
            other, index
        ))),
    }
}

/// Check that `url` is a postgres connection URL
pub fn validate_database_url(url: &str) -> DatabaseResult<()> {
    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
        return Err(DatabaseError::Connection("Invalid PostgreSQL URL scheme".to_string()));
    }

    let parsed = url::Url::parse(url)
        .map_err(|e| DatabaseError::Connection(format!("Invalid database URL: {}", e)))?;

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(DatabaseError::Connection("Missing host in database URL".to_string()));
    }

    Ok(())
}

/// Replace the password of a connection URL for display
pub fn redact_database_url(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() && url.set_password(Some("****")).is_err() {
                return "<unprintable database url>".to_string();
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}
