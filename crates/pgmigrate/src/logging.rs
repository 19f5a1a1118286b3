//! Logging capability handed to the migrator
//!
//! The migrator never decides on its own whether to log. It calls a
//! [`MigrationLogger`] supplied at construction; [`TracingLogger`] forwards to
//! `tracing` according to the `logging`/`debug_logging` settings and
//! [`NoopLogger`] discards everything.

use std::fmt;
use crate::config::MigratorConfig;

/// Log target used for every event emitted by [`TracingLogger`]
pub const LOG_TARGET: &str = "pgmigrate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// A key/value pair attached to a log event
pub type LogField<'a> = (&'static str, &'a dyn fmt::Display);

pub trait MigrationLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &[LogField<'_>]);

    fn debug(&self, message: &str, fields: &[LogField<'_>]) {
        self.log(LogLevel::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: &[LogField<'_>]) {
        self.log(LogLevel::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: &[LogField<'_>]) {
        self.log(LogLevel::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: &[LogField<'_>]) {
        self.log(LogLevel::Error, message, fields);
    }
}

/// Forwards to `tracing`, gated by the migrator's logging settings
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger {
    enabled: bool,
    debug: bool,
}

impl TracingLogger {
    pub fn new(enabled: bool, debug: bool) -> Self {
        Self {
            enabled: enabled || debug,
            debug,
        }
    }

    pub fn from_config(config: &MigratorConfig) -> Self {
        Self::new(config.logging, config.debug_logging)
    }

    pub fn is_enabled(&self, level: LogLevel) -> bool {
        match level {
            LogLevel::Debug => self.debug,
            _ => self.enabled,
        }
    }
}

/// Keys recorded as individual `tracing` fields; anything else lands in `extra`
const STRUCTURED_FIELDS: [&str; 13] = [
    "version", "pending", "index", "name", "count", "dir", "table", "from", "to", "applied", "elapsed_ms", "phase",
    "error",
];

fn field<'a>(fields: &[LogField<'a>], key: &str) -> Option<tracing::field::DisplayValue<&'a dyn fmt::Display>> {
    fields
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| tracing::field::display(*value))
}

fn extra_fields(fields: &[LogField<'_>]) -> Option<String> {
    let extra: Vec<LogField<'_>> = fields
        .iter()
        .filter(|(name, _)| !STRUCTURED_FIELDS.contains(name))
        .copied()
        .collect();

    if extra.is_empty() {
        None
    } else {
        Some(render_fields(&extra))
    }
}

macro_rules! emit {
    ($level:ident, $fields:expr, $message:expr) => {{
        let fields = $fields;
        let extra = extra_fields(fields);
        tracing::$level!(
            target: LOG_TARGET,
            version = field(fields, "version"),
            pending = field(fields, "pending"),
            index = field(fields, "index"),
            name = field(fields, "name"),
            count = field(fields, "count"),
            dir = field(fields, "dir"),
            table = field(fields, "table"),
            from = field(fields, "from"),
            to = field(fields, "to"),
            applied = field(fields, "applied"),
            elapsed_ms = field(fields, "elapsed_ms"),
            phase = field(fields, "phase"),
            error = field(fields, "error"),
            extra = extra.as_deref(),
            "{}",
            $message
        )
    }};
}

impl MigrationLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &[LogField<'_>]) {
        if !self.is_enabled(level) {
            return;
        }

        match level {
            LogLevel::Debug => emit!(debug, fields, message),
            LogLevel::Info => emit!(info, fields, message),
            LogLevel::Warn => emit!(warn, fields, message),
            LogLevel::Error => emit!(error, fields, message),
        }
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl MigrationLogger for NoopLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: &[LogField<'_>]) {}
}

/// Render fields as `key=value` pairs separated by spaces
pub fn render_fields(fields: &[LogField<'_>]) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(" ")
}
