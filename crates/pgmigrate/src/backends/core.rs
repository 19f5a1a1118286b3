//! Core Database Backend Traits
//!
//! The migrator never talks to a concrete driver. It consumes a
//! [`DatabaseExecutor`] that can run statements, fetch a single row and open a
//! [`DatabaseTransaction`]; everything else stays behind these traits.

use std::sync::Arc;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use crate::error::{DatabaseError, DatabaseResult};

/// Abstract relational executor
#[async_trait]
pub trait DatabaseExecutor: Send + Sync {
    /// Execute a statement and return the affected rows count.
    ///
    /// With an empty `params` slice the text is sent as-is, so a script made
    /// of several statements runs as one batch.
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a query and return the first result row
    async fn fetch_optional(&self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> DatabaseResult<Box<dyn DatabaseTransaction>>;
}

/// Abstract database transaction
///
/// Once `commit` or `rollback` has been called every further call returns
/// [`DatabaseError::TransactionClosed`].
#[async_trait]
pub trait DatabaseTransaction: Send + Sync {
    /// Execute a statement within the transaction
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<u64>;

    /// Execute a query and return the first result row within the transaction
    async fn fetch_optional(&mut self, sql: &str, params: &[DatabaseValue]) -> DatabaseResult<Option<Box<dyn DatabaseRow>>>;

    /// Commit the transaction
    async fn commit(&mut self) -> DatabaseResult<()>;

    /// Rollback the transaction
    async fn rollback(&mut self) -> DatabaseResult<()>;

    /// Handle that can interrupt a statement this transaction is running
    ///
    /// Dropping an in-flight statement future does not stop it on the server;
    /// backends that can abort it out of band return a canceller here.
    fn canceller(&self) -> Option<Arc<dyn StatementCanceller>> {
        None
    }
}

/// Out-of-band interruption of a transaction's running statement
#[async_trait]
pub trait StatementCanceller: Send + Sync {
    /// Ask the server to abort whatever the transaction is executing
    async fn cancel_running(&self) -> DatabaseResult<()>;
}

/// Abstract database row
pub trait DatabaseRow: Send + Sync {
    /// Get a column value by index
    fn get_by_index(&self, index: usize) -> DatabaseResult<DatabaseValue>;

    /// Get a column value by name
    fn get_by_name(&self, name: &str) -> DatabaseResult<DatabaseValue>;

    /// Get column count
    fn column_count(&self) -> usize;
}

/// Typed accessors on top of [`DatabaseRow`]
pub trait DatabaseRowExt {
    fn get_i64(&self, column: &str) -> DatabaseResult<i64>;

    fn get_timestamp(&self, column: &str) -> DatabaseResult<Option<NaiveDateTime>>;
}

impl<R: DatabaseRow + ?Sized> DatabaseRowExt for R {
    fn get_i64(&self, column: &str) -> DatabaseResult<i64> {
        let value = self.get_by_name(column)?;
        value
            .as_i64()
            .ok_or_else(|| DatabaseError::Decode(format!("column '{}' is not an integer: {:?}", column, value)))
    }

    fn get_timestamp(&self, column: &str) -> DatabaseResult<Option<NaiveDateTime>> {
        match self.get_by_name(column)? {
            DatabaseValue::Null => Ok(None),
            value => value
                .as_timestamp()
                .map(Some)
                .ok_or_else(|| DatabaseError::Decode(format!("column '{}' is not a timestamp: {:?}", column, value))),
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Widen any integer value to `i64`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    /// Timestamps with a zone are normalised to UTC wall-clock time
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            DatabaseValue::Timestamp(ts) => Some(*ts),
            DatabaseValue::TimestampTz(ts) => Some(ts.naive_utc()),
            _ => None,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl From<NaiveDateTime> for DatabaseValue {
    fn from(value: NaiveDateTime) -> Self {
        DatabaseValue::Timestamp(value)
    }
}

impl From<DateTime<Utc>> for DatabaseValue {
    fn from(value: DateTime<Utc>) -> Self {
        DatabaseValue::TimestampTz(value)
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Connection pool settings for executors backed by a pool
#[derive(Debug, Clone)]
pub struct DatabasePoolConfig {
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabasePoolConfig {
    fn default() -> Self {
        // One run holds a single transaction; a second slot serves status reads.
        Self {
            max_connections: 2,
            acquire_timeout_seconds: 30,
        }
    }
}
