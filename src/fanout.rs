//! Message fan-out to every occupied slot
//!
//! Each recipient gets its own open/write/close on its endpoint. A failure
//! for one recipient is recorded and the rest still get the message.

use crate::error::DeliveryFailure;
use crate::identity::Identity;
use crate::roster::Roster;
use crate::session::Session;
use rustix::fs::{open, Mode, OFlags};
use std::io;
use tracing::{debug, warn};

/// Cursor up one line, then clear it: replaces the sender's local echo
pub const ECHO_REWRITE: &str = "\x1b[1A\x1b[K";

/// Outcome of one fan-out
#[derive(Debug, Default)]
pub struct FanoutReport {
    /// Slots that received the full line
    pub delivered: Vec<usize>,
    pub failures: Vec<DeliveryFailure>,
}

impl FanoutReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The line as other members see it
pub fn compose(text: &str, sender: &Session) -> String {
    let mut line = if sender.is_anonymous() {
        text.to_string()
    } else {
        format!("** {}: {}", sender.identity(), text)
    };
    if !line.ends_with('\n') {
        line.push('\n');
    }
    line
}

/// Broadcast `text` from `sender` to everyone in the roster
///
/// Reads the roster without the write lock.
pub fn send(roster: &Roster, text: &str, sender: &Session) -> FanoutReport {
    let line = compose(text, sender);
    let echo = format!("{}{}", ECHO_REWRITE, line);
    let own_entry = sender.identity().stored(roster.slot_width());
    let mut report = FanoutReport::default();

    for (index, recipient) in roster.occupied() {
        let own = sender.slot() == Some(index) && recipient.same_endpoint(&own_entry);
        let payload = if own { &echo } else { &line };

        match deliver(&recipient, payload.as_bytes()) {
            Ok(()) => report.delivered.push(index),
            Err(source) => {
                warn!(slot = index, %recipient, error = %source, "Delivery failed");
                report.failures.push(DeliveryFailure {
                    slot: index,
                    endpoint: recipient.endpoint().to_path_buf(),
                    source,
                });
            }
        }
    }

    debug!(
        delivered = report.delivered.len(),
        failed = report.failures.len(),
        "Fan-out finished"
    );
    report
}

/// Write one complete line to a single recipient's endpoint
///
/// The endpoint must already exist; it is never created, and opening a
/// terminal here never makes it our controlling terminal. Lines are
/// appended, so an endpoint that is a plain file keeps every delivery.
pub fn deliver(recipient: &Identity, line: &[u8]) -> io::Result<()> {
    let fd = open(
        recipient.endpoint(),
        OFlags::WRONLY | OFlags::APPEND | OFlags::NOCTTY | OFlags::CLOEXEC,
        Mode::empty(),
    )?;
    let written = rustix::io::write(&fd, line)?;
    if written != line.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write: {} of {} bytes", written, line.len()),
        ));
    }
    Ok(())
}
