//! Subscriber setup for the command line
//!
//! Logs go to stderr so `status --json` output on stdout stays parseable.
//! `RUST_LOG` takes precedence over the flags when set.

use std::io;
use tracing_subscriber::{fmt::Layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level for the migrator's own events
    pub level: String,
    /// One JSON object per line instead of plain text
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_flags(quiet: bool, debug: bool, json_format: bool) -> Self {
        let level = if debug {
            "debug"
        } else if quiet {
            "warn"
        } else {
            "info"
        };

        Self {
            level: level.to_string(),
            json_format,
        }
    }

    /// Directive used when `RUST_LOG` is absent
    pub fn env_filter(&self) -> String {
        format!("{}={},sqlx=warn", pgmigrate::logging::LOG_TARGET, self.level)
    }
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(config.env_filter()))?;

    if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).json())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(Layer::new().with_writer(io::stderr).with_target(false))
            .try_init()?;
    }

    Ok(())
}
