//! Join, Leave, ClearAll and List on top of the shared roster

use crate::error::{ChatError, DeliveryFailure, Result};
use crate::fanout::{self, FanoutReport};
use crate::identity::Identity;
use crate::liveness::SessionRegistry;
use crate::roster::Roster;
use crate::session::Session;
use tracing::{info, warn};

/// Result of a successful Join
#[derive(Debug)]
pub struct JoinReport {
    /// Slot now holding the caller
    pub slot: usize,
    /// Stale entries removed during the scan
    pub evicted: Vec<Identity>,
    /// Delivery of the welcome broadcast
    pub welcome: FanoutReport,
}

/// Result of Leave
#[derive(Debug)]
pub struct LeaveReport {
    /// No slot was occupied after our own was cleared
    pub room_empty: bool,
    /// The shared object was unlinked because the room became empty
    pub destroyed: bool,
    pub farewell: FanoutReport,
}

/// Result of ClearAll
#[derive(Debug, Default)]
pub struct ClearReport {
    pub cleared: Vec<Identity>,
    pub failures: Vec<DeliveryFailure>,
}

/// Claim a slot for `session`
///
/// One pass over every slot under the write lock:
/// - an empty slot, or one already carrying our endpoint, is a candidate;
///   the first candidate is claimed, later ones are cleared so that the
///   endpoint appears at most once
/// - any other occupied slot is checked against `registry` and cleared if
///   its session is gone
///
/// The welcome broadcast happens after the lock is released.
pub fn join(
    roster: &Roster,
    registry: &dyn SessionRegistry,
    session: &mut Session,
) -> Result<JoinReport> {
    // Compare against what actually fits in a slot
    let width = roster.slot_width();
    let own = session.identity().stored(width);
    if own != *session.identity() {
        warn!(identity = %session.identity(), stored = %own, width, "Identity does not fit a roster slot");
    }
    let mut claimed = None;
    let mut evicted = Vec::new();

    {
        let mut guard = roster.acquire_write()?;
        for index in 0..guard.capacity() {
            match guard.get(index) {
                Some(other) if !other.same_endpoint(&own) => {
                    let active = if other.fills_slot(width) {
                        registry.is_active_truncated(&other)
                    } else {
                        registry.is_active(&other)
                    };
                    if !active {
                        info!(slot = index, identity = %other, "Evicting stale entry");
                        guard.clear(index);
                        evicted.push(other);
                    }
                }
                _ => {
                    if claimed.is_none() {
                        guard.set(index, session.identity());
                        claimed = Some(index);
                    } else {
                        guard.clear(index);
                    }
                }
            }
        }
    }

    let Some(slot) = claimed else {
        warn!(room = %roster.key(), capacity = roster.capacity(), "Room is full");
        return Err(ChatError::RosterFull {
            capacity: roster.capacity(),
        });
    };

    session.register(slot);
    info!(room = %roster.key(), slot, identity = %own, "Joined room");

    let notice = format!("\n  ## Welcome {} to our room.\n", own);
    let welcome = fanout::send(roster, &notice, session);

    Ok(JoinReport {
        slot,
        evicted,
        welcome,
    })
}

/// Announce departure, free our slot and detach from the roster
///
/// The roster handle is consumed even when the session was never
/// registered. Only a slot that still carries our endpoint is cleared:
/// after a ClearAll somebody else may sit there.
pub fn leave(roster: Roster, session: &mut Session) -> Result<LeaveReport> {
    let Some(slot) = session.slot() else {
        session.detach();
        roster.detach();
        return Err(ChatError::NotRegistered);
    };

    session.begin_terminating();
    let own = session.identity().stored(roster.slot_width());

    let notice = format!("\n  ## {} exit the room.\n", own);
    let farewell = fanout::send(&roster, &notice, session);

    let room_empty = {
        let mut guard = match roster.acquire_write() {
            Ok(guard) => guard,
            Err(e) => {
                session.detach();
                return Err(e);
            }
        };
        match guard.get(slot) {
            Some(current) if current.same_endpoint(&own) => guard.clear(slot),
            Some(current) => {
                warn!(slot, identity = %current, "Own slot was taken over, leaving it alone")
            }
            None => {}
        }
        guard.is_room_empty()
    };

    session.detach();
    info!(room = %roster.key(), slot, room_empty, "Left room");

    let destroyed = room_empty && roster.config().destroy_when_empty;
    if destroyed {
        roster.destroy()?;
    } else {
        roster.detach();
    }

    Ok(LeaveReport {
        room_empty,
        destroyed,
        farewell,
    })
}

/// Kick everyone out of the room
///
/// Each occupied slot gets one notice on its own endpoint and is cleared.
/// Sessions of the kicked processes are not touched; they find out through
/// [`still_registered`].
pub fn clear_all(roster: &Roster) -> Result<ClearReport> {
    let mut report = ClearReport::default();
    let mut guard = roster.acquire_write()?;

    for index in 0..guard.capacity() {
        let Some(member) = guard.get(index) else {
            continue;
        };

        let notice = format!("\n  ## {} has been kicked out of the room.\n\n\n", member);
        if let Err(source) = fanout::deliver(&member, notice.as_bytes()) {
            warn!(slot = index, identity = %member, error = %source, "Kick notice not delivered");
            report.failures.push(DeliveryFailure {
                slot: index,
                endpoint: member.endpoint().to_path_buf(),
                source,
            });
        }

        guard.clear(index);
        report.cleared.push(member);
    }

    info!(room = %roster.key(), cleared = report.cleared.len(), "Cleared room");
    Ok(report)
}

/// Occupied slots in slot order, read without the write lock
pub fn list(roster: &Roster) -> Vec<(usize, Identity)> {
    roster.occupied()
}

/// Whether the session's slot still carries its endpoint
pub fn still_registered(roster: &Roster, session: &Session) -> bool {
    let Some(slot) = session.slot() else {
        return false;
    };
    let own = session.identity().stored(roster.slot_width());
    roster
        .snapshot()
        .get(slot)
        .and_then(Option::as_ref)
        .is_some_and(|current| current.same_endpoint(&own))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LockConfig, RosterConfig};
    use crate::liveness::AssumeActive;
    use crate::roster::RoomKey;
    use crate::session::SessionState;
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};

    /// Registry with an explicit set of live logins
    struct LiveSet(HashSet<String>);

    impl LiveSet {
        fn of(logins: &[&str]) -> Self {
            Self(logins.iter().map(|s| s.to_string()).collect())
        }
    }

    impl SessionRegistry for LiveSet {
        fn is_active(&self, identity: &Identity) -> bool {
            self.0.contains(identity.login())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: RosterConfig,
    }

    impl Fixture {
        fn new(tag: &str, capacity: usize) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                config: RosterConfig {
                    namespace: format!("venom_chat_test_member_{}_{}", tag, std::process::id()),
                    capacity,
                    slot_width: 128,
                    lock: LockConfig {
                        poll_interval_ms: 1,
                        timeout_ms: Some(1000),
                    },
                    ..RosterConfig::default()
                },
            }
        }

        fn attach(&self) -> Roster {
            Roster::attach(RoomKey::new(0), &self.config).unwrap()
        }

        /// Identity with an existing, writable endpoint file
        fn identity(&self, login: &str) -> Identity {
            let endpoint = self.dir.path().join(login);
            std::fs::write(&endpoint, "").unwrap();
            Identity::new(login, endpoint)
        }

        fn endpoint(&self, login: &str) -> PathBuf {
            self.dir.path().join(login)
        }

        fn destroy(&self) {
            self.attach().destroy().unwrap();
        }
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    fn logins(roster: &Roster) -> Vec<String> {
        list(roster)
            .into_iter()
            .map(|(_, id)| id.login().to_string())
            .collect()
    }

    #[test]
    fn test_join_takes_first_empty_slot_and_welcomes() {
        let fx = Fixture::new("first", 3);
        let roster = fx.attach();

        let mut alice = Session::new(fx.identity("alice"));
        let report = join(&roster, &AssumeActive, &mut alice).unwrap();
        assert_eq!(report.slot, 0);
        assert!(report.evicted.is_empty());
        assert_eq!(alice.slot(), Some(0));
        assert_eq!(alice.state(), SessionState::Registered);
        assert!(read(&fx.endpoint("alice")).contains("Welcome"));

        let mut bob = Session::new(fx.identity("bob"));
        assert_eq!(join(&roster, &AssumeActive, &mut bob).unwrap().slot, 1);
        assert!(read(&fx.endpoint("alice")).contains("Welcome bob@"));

        fx.destroy();
    }

    #[test]
    fn test_rejoin_reclaims_own_endpoint_and_dedups() {
        let fx = Fixture::new("dedup", 4);
        let roster = fx.attach();
        let alice = fx.identity("alice");
        let bob = fx.identity("bob");

        // Stale copies of alice's endpoint at 1 and 3, bob at 0
        {
            let mut guard = roster.acquire_write().unwrap();
            guard.set(0, &bob);
            guard.set(1, &Identity::new("old-alice", alice.endpoint()));
            guard.set(3, &alice);
        }

        let mut session = Session::new(alice.clone());
        let report = join(&roster, &AssumeActive, &mut session).unwrap();
        // Slot 1 carries our endpoint and comes before the empty slot 2
        assert_eq!(report.slot, 1);

        let listed = list(&roster);
        assert_eq!(listed, vec![(0, bob), (1, alice.clone())]);
        let endpoints: HashSet<_> = listed.iter().map(|(_, id)| id.endpoint().to_path_buf()).collect();
        assert_eq!(endpoints.len(), listed.len());

        fx.destroy();
    }

    #[test]
    fn test_own_endpoint_is_not_liveness_checked() {
        let fx = Fixture::new("ownlive", 2);
        let roster = fx.attach();
        let alice = fx.identity("alice");
        {
            let mut guard = roster.acquire_write().unwrap();
            guard.set(0, &alice);
        }

        // Registry knows nobody, yet our own slot is reclaimed, not evicted
        let mut session = Session::new(alice.clone());
        let report = join(&roster, &LiveSet::of(&[]), &mut session).unwrap();
        assert_eq!(report.slot, 0);
        assert!(report.evicted.is_empty());
        assert_eq!(list(&roster), vec![(0, alice)]);

        fx.destroy();
    }

    #[test]
    fn test_join_evicts_dead_sessions() {
        let fx = Fixture::new("evict", 3);
        let roster = fx.attach();
        let ghost = fx.identity("ghost");
        let bob = fx.identity("bob");
        {
            let mut guard = roster.acquire_write().unwrap();
            guard.set(1, &ghost);
            guard.set(2, &bob);
        }

        let mut alice = Session::new(fx.identity("alice"));
        let report = join(&roster, &LiveSet::of(&["alice", "bob"]), &mut alice).unwrap();
        assert_eq!(report.slot, 0);
        assert_eq!(report.evicted, vec![ghost]);
        assert_eq!(logins(&roster), vec!["alice", "bob"]);

        fx.destroy();
    }

    #[test]
    fn test_join_full_room_fails_and_changes_nothing() {
        let fx = Fixture::new("full", 2);
        let roster = fx.attach();
        let mut alice = Session::new(fx.identity("alice"));
        let mut bob = Session::new(fx.identity("bob"));
        join(&roster, &AssumeActive, &mut alice).unwrap();
        join(&roster, &AssumeActive, &mut bob).unwrap();
        let before = list(&roster);

        let mut carol = Session::new(fx.identity("carol"));
        let live = LiveSet::of(&["alice", "bob", "carol"]);
        match join(&roster, &live, &mut carol) {
            Err(ChatError::RosterFull { capacity }) => assert_eq!(capacity, 2),
            other => panic!("expected RosterFull, got {:?}", other.map(|r| r.slot)),
        }
        assert_eq!(carol.state(), SessionState::Unregistered);
        assert_eq!(carol.slot(), None);
        assert_eq!(list(&roster), before);
        assert!(!roster.is_write_locked());

        fx.destroy();
    }

    #[test]
    fn test_leave_clears_only_own_slot() {
        let fx = Fixture::new("leave", 4);
        let roster = fx.attach();
        let mut alice = Session::new(fx.identity("alice"));
        let mut bob = Session::new(fx.identity("bob"));
        let mut carol = Session::new(fx.identity("carol"));
        join(&roster, &AssumeActive, &mut alice).unwrap();
        join(&roster, &AssumeActive, &mut bob).unwrap();
        join(&roster, &AssumeActive, &mut carol).unwrap();

        let report = leave(fx.attach(), &mut bob).unwrap();
        assert!(!report.room_empty);
        assert!(!report.destroyed);
        assert_eq!(bob.state(), SessionState::Detached);
        assert_eq!(bob.slot(), None);

        assert_eq!(logins(&roster), vec!["alice", "carol"]);
        assert_eq!(list(&roster)[1].0, 2);
        assert!(read(&fx.endpoint("carol")).contains("exit the room"));

        fx.destroy();
    }

    #[test]
    fn test_last_leave_reports_empty_room() {
        let fx = Fixture::new("last", 2);
        let mut alice = Session::new(fx.identity("alice"));
        join(&fx.attach(), &AssumeActive, &mut alice).unwrap();

        let report = leave(fx.attach(), &mut alice).unwrap();
        assert!(report.room_empty);
        assert!(!report.destroyed);

        fx.destroy();
    }

    #[test]
    fn test_last_leave_destroys_when_configured() {
        let mut fx = Fixture::new("destroy", 2);
        fx.config.destroy_when_empty = true;
        let mut alice = Session::new(fx.identity("alice"));
        join(&fx.attach(), &AssumeActive, &mut alice).unwrap();

        let report = leave(fx.attach(), &mut alice).unwrap();
        assert!(report.destroyed);
        // Already unlinked
        assert!(fx.attach().destroy().is_ok());
    }

    #[test]
    fn test_leave_without_slot() {
        let fx = Fixture::new("noslot", 2);
        let mut session = Session::new(fx.identity("alice"));
        assert!(matches!(
            leave(fx.attach(), &mut session),
            Err(ChatError::NotRegistered)
        ));
        assert_eq!(session.state(), SessionState::Detached);
        fx.destroy();
    }

    #[test]
    fn test_leave_after_takeover_spares_new_owner() {
        let fx = Fixture::new("takeover", 1);
        let roster = fx.attach();
        let mut alice = Session::new(fx.identity("alice"));
        join(&roster, &AssumeActive, &mut alice).unwrap();

        clear_all(&roster).unwrap();
        assert!(!still_registered(&roster, &alice));
        let mut bob = Session::new(fx.identity("bob"));
        join(&roster, &AssumeActive, &mut bob).unwrap();

        leave(fx.attach(), &mut alice).unwrap();
        assert_eq!(logins(&roster), vec!["bob"]);
        assert!(still_registered(&roster, &bob));

        fx.destroy();
    }

    #[test]
    fn test_clear_all_notifies_each_member_once() {
        let fx = Fixture::new("clear", 3);
        let roster = fx.attach();
        let mut alice = Session::new(fx.identity("alice"));
        let mut bob = Session::new(fx.identity("bob"));
        join(&roster, &AssumeActive, &mut alice).unwrap();
        join(&roster, &AssumeActive, &mut bob).unwrap();

        let report = clear_all(&roster).unwrap();
        assert_eq!(report.cleared.len(), 2);
        assert!(report.failures.is_empty());
        assert!(list(&roster).is_empty());

        for login in ["alice", "bob"] {
            let received = read(&fx.endpoint(login));
            assert_eq!(received.matches("kicked out").count(), 1, "{login}");
            assert!(received.contains(&format!("{login}@")));
            // Earlier traffic is still there, the notice comes last
            let welcome = received.find("Welcome bob@").unwrap();
            assert!(received.find("kicked out").unwrap() > welcome);
        }
        // Sessions are untouched
        assert_eq!(alice.state(), SessionState::Registered);

        // Nobody left to notify
        assert!(clear_all(&roster).unwrap().cleared.is_empty());
        assert_eq!(read(&fx.endpoint("alice")).matches("kicked out").count(), 1);

        fx.destroy();
    }

    #[test]
    fn test_each_broadcast_reaches_each_member_once() {
        let fx = Fixture::new("once", 3);
        let roster = fx.attach();
        let mut alice = Session::new(fx.identity("alice"));
        let mut bob = Session::new(fx.identity("bob"));
        let mut carol = Session::new(fx.identity("carol"));
        join(&roster, &AssumeActive, &mut alice).unwrap();
        join(&roster, &AssumeActive, &mut bob).unwrap();
        join(&roster, &AssumeActive, &mut carol).unwrap();
        leave(fx.attach(), &mut carol).unwrap();

        let received = read(&fx.endpoint("alice"));
        assert_eq!(received.matches("Welcome alice@").count(), 1);
        assert_eq!(received.matches("Welcome bob@").count(), 1);
        assert_eq!(received.matches("Welcome carol@").count(), 1);
        assert_eq!(received.matches("exit the room").count(), 1);

        fx.destroy();
    }

    #[test]
    fn test_truncated_identity_stays_registered() {
        let mut fx = Fixture::new("trunc", 3);
        fx.config.slot_width = 30;
        let roster = fx.attach();

        // 30 bytes with the delimiter, one too many for the slot
        let long = Identity::new("firstname.lastname", "/nonexistent/pts/10");
        let mut session = Session::new(long.clone());
        let report = join(&roster, &AssumeActive, &mut session).unwrap();
        assert_eq!(report.slot, 0);
        assert_eq!(list(&roster), vec![(0, long.stored(30))]);
        assert!(still_registered(&roster, &session));

        // Rejoining reclaims the truncated entry instead of adding another
        let mut again = Session::new(long);
        assert_eq!(join(&roster, &AssumeActive, &mut again).unwrap().slot, 0);
        assert_eq!(list(&roster).len(), 1);

        fx.destroy();
    }

    /// Only entries that may have been truncated count as live
    struct TruncatedAlive;

    impl SessionRegistry for TruncatedAlive {
        fn is_active(&self, _identity: &Identity) -> bool {
            false
        }

        fn is_active_truncated(&self, _identity: &Identity) -> bool {
            true
        }
    }

    #[test]
    fn test_truncated_entries_use_prefix_liveness() {
        let mut fx = Fixture::new("truncalive", 3);
        fx.config.slot_width = 30;
        let roster = fx.attach();
        let long = Identity::new("firstname.lastname", "/nonexistent/pts/10");
        let ghost = Identity::new("ghost", "/nonexistent/pts/2");
        {
            let mut guard = roster.acquire_write().unwrap();
            guard.set(0, &long);
            guard.set(1, &ghost);
        }

        let mut bob = Session::new(fx.identity("bob"));
        let report = join(&roster, &TruncatedAlive, &mut bob).unwrap();
        assert_eq!(report.evicted, vec![ghost]);
        assert_eq!(report.slot, 2);
        assert_eq!(list(&roster)[0], (0, long.stored(30)));

        fx.destroy();
    }

    #[test]
    fn test_list_is_idempotent() {
        let fx = Fixture::new("idem", 3);
        let roster = fx.attach();
        let mut alice = Session::new(fx.identity("alice"));
        join(&roster, &AssumeActive, &mut alice).unwrap();
        assert_eq!(list(&roster), list(&roster));
        fx.destroy();
    }
}
