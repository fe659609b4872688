//! Per-process session state
//!
//! Nothing here is shared: each process owns one `Session` and passes it to
//! every membership and fan-out call.

use crate::identity::Identity;

/// Where a session is in its lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not (or no longer) holding a slot
    Unregistered,
    /// Holding a slot
    Registered,
    /// Leave in progress
    Terminating,
    /// Left the room and released the roster
    Detached,
}

#[derive(Debug, Clone)]
pub struct Session {
    identity: Identity,
    slot: Option<usize>,
    anonymous: bool,
    state: SessionState,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            slot: None,
            anonymous: false,
            state: SessionState::Unregistered,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Own slot index, once Join succeeded
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_anonymous(&self) -> bool {
        self.anonymous
    }

    /// Toggle `:hide` / `:nohide`
    pub fn set_anonymous(&mut self, anonymous: bool) {
        self.anonymous = anonymous;
    }

    pub(crate) fn register(&mut self, slot: usize) {
        self.slot = Some(slot);
        self.state = SessionState::Registered;
    }

    pub(crate) fn begin_terminating(&mut self) {
        self.state = SessionState::Terminating;
    }

    pub(crate) fn detach(&mut self) {
        self.slot = None;
        self.state = SessionState::Detached;
    }
}
