//! Session identities and their fixed-width slot encoding
//!
//! Internally an identity is a `(login, endpoint)` pair. It is flattened to
//! `login@endpoint` only when written into a roster slot, and parsed back
//! by splitting at the first `@`.

use crate::error::{ChatError, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Separator between login name and endpoint in the slot encoding
pub const DELIMITER: char = '@';

/// A login name bound to the writable path that reaches its terminal
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    login: String,
    endpoint: PathBuf,
}

impl Identity {
    pub fn new(login: impl Into<String>, endpoint: impl Into<PathBuf>) -> Self {
        Self {
            login: login.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Build the identity of the current process
    ///
    /// Login comes from `$USER` (or `$LOGNAME`); the endpoint from
    /// `$SSH_TTY`, falling back to the terminal behind stdin.
    pub fn from_env() -> Result<Self> {
        let login = std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .ok()
            .filter(|s| !s.is_empty())
            .ok_or(ChatError::MissingIdentity("login name"))?;

        let endpoint = std::env::var_os("SSH_TTY")
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(stdin_tty)
            .ok_or(ChatError::MissingIdentity("terminal endpoint"))?;

        Ok(Self::new(login, endpoint))
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Endpoint comparison used for deduplication
    ///
    /// Device paths are compared ASCII case-insensitively.
    pub fn same_endpoint(&self, other: &Identity) -> bool {
        self.endpoint
            .as_os_str()
            .eq_ignore_ascii_case(other.endpoint.as_os_str())
    }

    /// Encode into a slot of `width` bytes, terminator included
    ///
    /// Longer values are cut at the tail to `width - 1` bytes (backing off
    /// to a UTF-8 boundary) and the rest of the slot is zero-filled. The
    /// login is shortened first if needed so the delimiter always survives.
    pub fn encode(&self, width: usize) -> Vec<u8> {
        let mut slot = vec![0u8; width];
        let login_cut = truncation_point(&self.login, width.saturating_sub(2));
        let full = format!(
            "{}{}{}",
            &self.login[..login_cut],
            DELIMITER,
            self.endpoint.display()
        );
        let cut = truncation_point(&full, width.saturating_sub(1));
        slot[..cut].copy_from_slice(&full.as_bytes()[..cut]);
        slot
    }

    /// Decode a slot; `None` for empty or malformed slots
    pub fn decode(slot: &[u8]) -> Option<Self> {
        let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
        let text = String::from_utf8_lossy(&slot[..end]);
        let (login, endpoint) = text.split_once(DELIMITER)?;
        Some(Self::new(login, endpoint))
    }

    /// The identity exactly as it reads back from a slot of `width` bytes
    pub fn stored(&self, width: usize) -> Self {
        Self::decode(&self.encode(width)).unwrap_or_else(|| self.clone())
    }

    /// Whether an entry read from a slot of `width` bytes may have lost its
    /// tail
    ///
    /// Truncation backs off up to three bytes to a UTF-8 boundary, so any
    /// entry that close to the limit counts.
    pub fn fills_slot(&self, width: usize) -> bool {
        self.to_string().len() + 4 >= width
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.login, DELIMITER, self.endpoint.display())
    }
}

fn truncation_point(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    cut
}

fn stdin_tty() -> Option<PathBuf> {
    let target = std::fs::read_link("/proc/self/fd/0").ok()?;
    target.starts_with("/dev/").then_some(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let id = Identity::new("alice", "/dev/pts/1");
        let slot = id.encode(30);
        assert_eq!(slot.len(), 30);
        assert_eq!(&slot[..16], b"alice@/dev/pts/1");
        assert!(slot[16..].iter().all(|&b| b == 0));
        assert_eq!(Identity::decode(&slot), Some(id));
    }

    #[test]
    fn test_empty_and_undelimited_slots() {
        assert_eq!(Identity::decode(&[0u8; 30]), None);
        assert_eq!(Identity::decode(b"no-delimiter\0\0\0"), None);
    }

    #[test]
    fn test_tail_truncation_is_stable() {
        let id = Identity::new("someone-with-a-long-name", "/dev/pts/12345");
        let slot = id.encode(30);
        let back = Identity::decode(&slot).unwrap();
        assert_eq!(back.to_string().len(), 29);
        assert_eq!(back.to_string(), "someone-with-a-long-name@/dev");
        // Reading back and storing again yields the same bytes
        assert_eq!(back.encode(30), slot);
        assert_eq!(id.stored(30), back);
    }

    #[test]
    fn test_truncation_respects_utf8() {
        // 30 bytes of login: cut back to 28 so the delimiter still fits
        let id = Identity::new("é".repeat(15), "/dev/pts/1");
        let back = id.stored(30);
        assert_eq!(back.login(), "é".repeat(14));
        assert_eq!(back.to_string().len(), 29);
        assert_eq!(back.endpoint(), Path::new(""));
    }

    #[test]
    fn test_fills_slot() {
        let long = Identity::new("firstname.lastname", "/dev/pts/10").stored(30);
        assert_eq!(long.endpoint(), Path::new("/dev/pts/1"));
        assert!(long.fills_slot(30));
        assert!(!Identity::new("bob", "/dev/pts/2").fills_slot(30));
    }

    #[test]
    fn test_delimiter_in_endpoint_splits_at_first() {
        let id = Identity::new("bob", "/tmp/odd@name");
        let back = Identity::decode(&id.encode(30)).unwrap();
        assert_eq!(back.login(), "bob");
        assert_eq!(back.endpoint(), Path::new("/tmp/odd@name"));
    }

    #[test]
    fn test_same_endpoint_ignores_case() {
        let a = Identity::new("a", "/dev/PTS/3");
        let b = Identity::new("b", "/dev/pts/3");
        let c = Identity::new("a", "/dev/pts/4");
        assert!(a.same_endpoint(&b));
        assert!(!a.same_endpoint(&c));
    }
}
