//! Error types for venom_chat

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for venom_chat operations
pub type Result<T> = std::result::Result<T, ChatError>;

/// Errors that can occur in roster and membership operations
#[derive(Debug, Error)]
pub enum ChatError {
    /// The shared roster could not be created, sized or mapped
    #[error("Shared roster '{name}' unavailable ({stage}): {source}")]
    SegmentUnavailable {
        name: String,
        stage: &'static str,
        #[source]
        source: io::Error,
    },

    /// Segment exists but was never initialized as a roster
    #[error("Invalid roster magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic { expected: u32, got: u32 },

    /// Segment header disagrees with the mapped size
    #[error("Invalid roster layout: {0}")]
    InvalidLayout(String),

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },

    /// Join scan found no assignable slot
    #[error("Room is full: all {capacity} slots are taken")]
    RosterFull { capacity: usize },

    /// Write lock was not released in time
    #[error("Timed out after {waited_ms} ms waiting for the roster write lock (held by pid {holder})")]
    LockTimeout { waited_ms: u128, holder: u32 },

    /// Operation requires a joined session
    #[error("Session is not registered in the room")]
    NotRegistered,

    /// Login name or endpoint could not be derived from the environment
    #[error("Cannot determine {0} for this session")]
    MissingIdentity(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A message could not be delivered to one recipient
///
/// Never aborts a fan-out; collected in [`crate::fanout::FanoutReport`].
#[derive(Debug, Error)]
#[error("Delivery to slot {slot} ({endpoint}) failed: {source}", endpoint = .endpoint.display())]
pub struct DeliveryFailure {
    pub slot: usize,
    pub endpoint: PathBuf,
    #[source]
    pub source: io::Error,
}
