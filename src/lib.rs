//! venom_chat - same-host chat rooms over shared memory
//!
//! Every process in a room attaches to one shared roster (a POSIX shared
//! memory object named after the room key) and records itself as
//! `login@endpoint`. Messages never travel through the shared memory: the
//! sender writes each line straight to every member's terminal endpoint.
//!
//! # Architecture
//!
//! - **Roster**: fixed table of identity slots plus a cross-process write lock
//! - **Membership**: join / leave / clear / list, with lazy eviction of
//!   sessions the login registry no longer knows
//! - **Fan-out**: best-effort delivery, one open/write/close per recipient
//!
//! Writers serialize on the roster lock; readers never block writers.

pub mod command;
pub mod config;
pub mod error;
pub mod fanout;
pub mod identity;
pub mod liveness;
pub mod lock;
pub mod logging;
pub mod membership;
pub mod roster;
pub mod session;
pub mod shm;

pub use config::{Config, ReadConsistency, RosterConfig};
pub use error::{ChatError, DeliveryFailure, Result};
pub use identity::Identity;
pub use liveness::SessionRegistry;
pub use roster::{RoomKey, Roster};
pub use session::{Session, SessionState};
