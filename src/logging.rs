//! Logging initialization
//!
//! Logs never go to stdout: stdout belongs to the prompt, and other
//! sessions' messages arrive on the same terminal.

use std::fs::{self, File};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ChatError, Result};

/// Level named by `logging.level`; unknown names are an error
pub fn level(config: &LoggingConfig) -> Result<Level> {
    match config.level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(ChatError::Config(format!("unknown log level '{other}'"))),
    }
}

/// Where log lines go, and whether they may carry colors
///
/// Several sessions may share one log file; it is only appended to.
fn sink(config: &LoggingConfig) -> Result<(BoxMakeWriter, bool)> {
    let Some(path) = &config.file else {
        return Ok((BoxMakeWriter::new(std::io::stderr), true));
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::options().create(true).append(true).open(path)?;
    Ok((BoxMakeWriter::new(Arc::new(file)), false))
}

/// Install the global subscriber
///
/// `RUST_LOG` directives still apply on top of the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(level(config)?.into());
    let (writer, ansi) = sink(config)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(ansi)
                .with_target(true),
        )
        .with(filter)
        .try_init()
        .map_err(|e| ChatError::Config(format!("logging already initialized: {e}")))
}
