//! Configuration for venom_chat sessions

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ChatError, Result};

/// How List and Fan-out read the shared roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadConsistency {
    /// Read without coordination; may observe a writer mid-update
    Relaxed,
    /// Retry until no writer was active during the copy
    Sequenced,
}

/// Write lock polling behavior
#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// Delay between attempts while another writer holds the lock.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Give up after this long; absent means wait forever.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_poll_interval() -> u64 {
    100
}

impl LockConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            timeout_ms: None,
        }
    }
}

/// Shared roster geometry and behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    /// Prefix of the shared memory object name.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Number of slots when this process creates the roster.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Bytes per slot, terminator included.
    #[serde(default = "default_slot_width")]
    pub slot_width: usize,
    #[serde(default = "default_read_consistency")]
    pub read_consistency: ReadConsistency,
    /// Unlink the shared object when the last member leaves.
    #[serde(default)]
    pub destroy_when_empty: bool,
    #[serde(default)]
    pub lock: LockConfig,
}

fn default_namespace() -> String {
    "venom_room".to_string()
}

fn default_capacity() -> usize {
    20
}

fn default_slot_width() -> usize {
    30
}

fn default_read_consistency() -> ReadConsistency {
    ReadConsistency::Relaxed
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            capacity: default_capacity(),
            slot_width: default_slot_width(),
            read_consistency: default_read_consistency(),
            destroy_when_empty: false,
            lock: LockConfig::default(),
        }
    }
}

/// Which registry answers liveness questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessMode {
    /// Consult the utmp login records
    Utmp,
    /// Treat every recorded identity as alive
    Disabled,
}

/// Liveness check configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_liveness_mode")]
    pub mode: LivenessMode,
    /// Location of the utmp file.
    #[serde(default = "default_utmp_path")]
    pub utmp_path: PathBuf,
}

fn default_liveness_mode() -> LivenessMode {
    LivenessMode::Utmp
}

fn default_utmp_path() -> PathBuf {
    PathBuf::from("/var/run/utmp")
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            mode: default_liveness_mode(),
            utmp_path: default_utmp_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file; logs go to stderr when absent.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub roster: RosterConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ChatError::Config(format!(
                "failed to read {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| ChatError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.roster.capacity == 0 {
            return Err(ChatError::Config("roster.capacity must be at least 1".into()));
        }
        // One byte of login, the delimiter, and the terminator
        if self.roster.slot_width < 3 {
            return Err(ChatError::Config("roster.slot_width must be at least 3".into()));
        }
        if self.roster.namespace.is_empty() || self.roster.namespace.contains('/') {
            return Err(ChatError::Config(
                "roster.namespace must be non-empty and contain no '/'".into(),
            ));
        }
        crate::logging::level(&self.logging)?;
        Ok(())
    }
}
