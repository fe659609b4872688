//! Liveness check against the OS login registry
//!
//! Join uses this to evict roster entries whose sessions have ended without
//! leaving (crashed, killed, network drop).

use crate::config::{LivenessConfig, LivenessMode};
use crate::identity::Identity;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Answers whether a recorded identity still belongs to a live login
pub trait SessionRegistry {
    fn is_active(&self, identity: &Identity) -> bool;

    /// Liveness of an entry whose tail may have been cut off by the slot
    /// width; the recorded login and endpoint are then only prefixes
    fn is_active_truncated(&self, identity: &Identity) -> bool {
        self.is_active(identity)
    }
}

/// Build the registry selected by the configuration
pub fn from_config(config: &LivenessConfig) -> Box<dyn SessionRegistry> {
    match config.mode {
        LivenessMode::Utmp => Box::new(UtmpRegistry::new(&config.utmp_path)),
        LivenessMode::Disabled => Box::new(AssumeActive),
    }
}

/// Never evicts anyone
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeActive;

impl SessionRegistry for AssumeActive {
    fn is_active(&self, _identity: &Identity) -> bool {
        true
    }
}

/// glibc `struct utmp` on Linux
mod utmp {
    pub const RECORD_SIZE: usize = 384;

    pub const LOGIN_PROCESS: i16 = 6;
    pub const USER_PROCESS: i16 = 7;

    pub const TYPE_OFFSET: usize = 0;
    pub const LINE_OFFSET: usize = 8;
    pub const LINE_LEN: usize = 32;
    pub const USER_OFFSET: usize = 44;
    pub const USER_LEN: usize = 32;
}

/// One login record, reduced to the fields liveness needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub kind: i16,
    pub line: String,
    pub user: String,
}

impl LoginRecord {
    fn parse(record: &[u8]) -> Option<Self> {
        if record.len() < utmp::RECORD_SIZE {
            return None;
        }
        let kind = i16::from_ne_bytes([record[utmp::TYPE_OFFSET], record[utmp::TYPE_OFFSET + 1]]);
        Some(Self {
            kind,
            line: c_field(&record[utmp::LINE_OFFSET..utmp::LINE_OFFSET + utmp::LINE_LEN]),
            user: c_field(&record[utmp::USER_OFFSET..utmp::USER_OFFSET + utmp::USER_LEN]),
        })
    }

    fn is_login(&self) -> bool {
        self.kind == utmp::USER_PROCESS || self.kind == utmp::LOGIN_PROCESS
    }
}

fn c_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// utmp `ut_line` for an endpoint: the path relative to `/dev/`
fn tty_line(endpoint: &Path) -> String {
    endpoint
        .strip_prefix("/dev/")
        .unwrap_or(endpoint)
        .to_string_lossy()
        .into_owned()
}

/// Reads the utmp file on every query
#[derive(Debug, Clone)]
pub struct UtmpRegistry {
    path: PathBuf,
}

impl UtmpRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// All records of the registry file
    pub fn records(&self) -> std::io::Result<Vec<LoginRecord>> {
        let data = std::fs::read(&self.path)?;
        Ok(data
            .chunks_exact(utmp::RECORD_SIZE)
            .filter_map(LoginRecord::parse)
            .collect())
    }
}

impl SessionRegistry for UtmpRegistry {
    fn is_active(&self, identity: &Identity) -> bool {
        let records = match self.records() {
            Ok(records) => records,
            Err(e) => {
                // No evidence either way: keep the entry
                warn!(path = %self.path.display(), error = %e, "Cannot read login registry");
                return true;
            }
        };

        let line = tty_line(identity.endpoint());
        let active = records
            .iter()
            .filter(|r| r.is_login() && r.line == line)
            .any(|r| r.user == identity.login());
        debug!(%identity, active, "Liveness check");
        active
    }

    fn is_active_truncated(&self, identity: &Identity) -> bool {
        let records = match self.records() {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read login registry");
                return true;
            }
        };

        let endpoint = identity.endpoint().to_string_lossy();
        let active = records
            .iter()
            .filter(|r| r.is_login() && format!("/dev/{}", r.line).starts_with(&*endpoint))
            .any(|r| r.user.starts_with(identity.login()));
        debug!(%identity, active, "Liveness check of truncated entry");
        active
    }
}
