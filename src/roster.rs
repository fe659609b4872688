//! Shared roster: a fixed table of identity slots per room
//!
//! # Layout
//!
//! ```text
//! +--------------------------+  0
//! | RosterHeader (64 bytes)  |  magic, version, geometry, LockWord
//! +--------------------------+ 64
//! | slot 0 (slot_width)      |  "login@endpoint\0\0..."
//! | slot 1                   |
//! | ...                      |
//! +--------------------------+
//! ```
//!
//! Writers go through [`Roster::acquire_write`]. Readers use
//! [`Roster::snapshot`] / [`Roster::occupied`], which honor the configured
//! [`ReadConsistency`].

use crate::config::{ReadConsistency, RosterConfig};
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::lock::{LockGuard, LockWord};
use crate::shm::RoomShm;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Magic number for roster validation
const ROSTER_MAGIC: u32 = 0x564E_4348; // "VNCH"
const ROSTER_VERSION: u32 = 1;

const HEADER_SIZE: usize = 64;

const MAGIC_WAIT_ATTEMPTS: u32 = 200;
const MAGIC_WAIT_INTERVAL: Duration = Duration::from_millis(5);

/// Roster header stored at the beginning of shared memory
#[repr(C)]
struct RosterHeader {
    /// Published last by the creator
    magic: AtomicU32,
    version: u32,
    capacity: u32,
    slot_width: u32,
    lock: LockWord,
    _pad: [u8; HEADER_SIZE - 32],
}

const _: () = assert!(std::mem::size_of::<RosterHeader>() == HEADER_SIZE);

/// Integer room identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomKey(i32);

impl RoomKey {
    pub const fn new(key: i32) -> Self {
        Self(key)
    }

    /// Parse like C `atoi`
    ///
    /// Leading whitespace and an optional sign are accepted, parsing stops
    /// at the first non-digit, and input without leading digits yields 0.
    /// So every non-numeric room name lands in room 0.
    pub fn parse(input: &str) -> Self {
        let s = input.trim_start_matches([' ', '\t', '\n', '\r', '\x0b', '\x0c']);
        let (negative, digits) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };

        let mut value: i32 = 0;
        for b in digits.bytes().take_while(u8::is_ascii_digit) {
            value = value.wrapping_mul(10).wrapping_add(i32::from(b - b'0'));
        }
        Self(if negative { value.wrapping_neg() } else { value })
    }

    pub fn value(&self) -> i32 {
        self.0
    }

    /// POSIX shared memory object name for this room
    pub fn shm_name(&self, namespace: &str) -> String {
        format!("/{}_{}", namespace, self.0)
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Header plus slot table, `None` on overflow
fn segment_size(capacity: usize, slot_width: usize) -> Option<usize> {
    capacity.checked_mul(slot_width)?.checked_add(HEADER_SIZE)
}

/// Attached handle to a room's roster
pub struct Roster {
    shm: RoomShm,
    header: *const RosterHeader,
    slots: *mut u8,
    key: RoomKey,
    capacity: usize,
    slot_width: usize,
    config: RosterConfig,
}

// SAFETY: all shared state behind the pointers lives in the mapping owned
// by `shm`; mutation is serialized by the LockWord
unsafe impl Send for Roster {}

impl Roster {
    /// Attach to the room's roster, creating it if absent
    ///
    /// A creator sizes the table from `config`; later attachers adopt the
    /// geometry recorded in the header.
    pub fn attach(key: RoomKey, config: &RosterConfig) -> Result<Self> {
        let name = key.shm_name(&config.namespace);
        let total_size = segment_size(config.capacity, config.slot_width).ok_or_else(|| {
            ChatError::Config(format!(
                "{} slots of {} bytes overflow the roster size",
                config.capacity, config.slot_width
            ))
        })?;
        let capacity = u32::try_from(config.capacity)
            .map_err(|_| ChatError::Config(format!("capacity {} too large", config.capacity)))?;
        let slot_width = u32::try_from(config.slot_width)
            .map_err(|_| ChatError::Config(format!("slot width {} too large", config.slot_width)))?;

        let shm = RoomShm::create_or_open(&name, total_size)?;
        if shm.size() < HEADER_SIZE {
            return Err(ChatError::InvalidLayout(format!(
                "segment of {} bytes cannot hold a roster header",
                shm.size()
            )));
        }

        let base = shm.as_ptr();
        let header = base as *mut RosterHeader;

        if shm.created() {
            unsafe {
                (*header).version = ROSTER_VERSION;
                (*header).capacity = capacity;
                (*header).slot_width = slot_width;
                LockWord::init(std::ptr::addr_of_mut!((*header).lock));
                (*header).magic.store(ROSTER_MAGIC, Ordering::Release);
            }
            info!(room = %key, name = %name, capacity, slot_width, "Created roster");
        } else {
            unsafe { Self::wait_for_magic(&*header)? };
        }

        let (capacity, slot_width) = unsafe {
            ((*header).capacity as usize, (*header).slot_width as usize)
        };
        let fits = segment_size(capacity, slot_width).is_some_and(|size| size <= shm.size());
        if capacity == 0 || slot_width == 0 || !fits {
            return Err(ChatError::InvalidLayout(format!(
                "{} slots of {} bytes do not fit a {} byte segment",
                capacity,
                slot_width,
                shm.size()
            )));
        }
        if capacity != config.capacity || slot_width != config.slot_width {
            debug!(
                room = %key,
                capacity,
                slot_width,
                "Adopting geometry of existing roster"
            );
        }

        let slots = unsafe { base.add(HEADER_SIZE) };

        Ok(Self {
            shm,
            header,
            slots,
            key,
            capacity,
            slot_width,
            config: config.clone(),
        })
    }

    fn wait_for_magic(header: &RosterHeader) -> Result<()> {
        let mut got = 0;
        for _ in 0..MAGIC_WAIT_ATTEMPTS {
            got = header.magic.load(Ordering::Acquire);
            if got == ROSTER_MAGIC {
                return Ok(());
            }
            thread::sleep(MAGIC_WAIT_INTERVAL);
        }
        Err(ChatError::InvalidMagic {
            expected: ROSTER_MAGIC,
            got,
        })
    }

    /// Release this process's mapping; the roster stays for everyone else
    pub fn detach(self) {
        debug!(room = %self.key, "Detached from roster");
    }

    /// Remove the shared object
    ///
    /// Processes still attached keep their mapping, but new attachers get a
    /// fresh, empty roster.
    pub fn destroy(self) -> Result<()> {
        RoomShm::unlink(self.shm.name())?;
        info!(room = %self.key, "Destroyed roster");
        Ok(())
    }

    /// Unlink a room's roster without attaching to it
    ///
    /// Also recovers a segment whose creator died before initializing it.
    pub fn destroy_room(key: RoomKey, config: &RosterConfig) -> Result<()> {
        RoomShm::unlink(&key.shm_name(&config.namespace))?;
        info!(room = %key, "Destroyed roster");
        Ok(())
    }

    #[inline]
    pub fn key(&self) -> RoomKey {
        self.key
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn slot_width(&self) -> usize {
        self.slot_width
    }

    #[inline]
    pub fn config(&self) -> &RosterConfig {
        &self.config
    }

    #[inline]
    fn lock_word(&self) -> &LockWord {
        unsafe { &(*self.header).lock }
    }

    /// Whether some writer currently holds the roster
    pub fn is_write_locked(&self) -> bool {
        self.lock_word().is_locked()
    }

    /// Take the cross-process write lock
    pub fn acquire_write(&self) -> Result<WriteGuard<'_>> {
        let lock = self.lock_word().acquire(&self.config.lock)?;
        Ok(WriteGuard { roster: self, _lock: lock })
    }

    /// Raw slot bytes, unsynchronized
    fn read_raw(&self, index: usize) -> Vec<u8> {
        let mut buf = vec![0u8; self.slot_width];
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.slots.add(index * self.slot_width),
                buf.as_mut_ptr(),
                self.slot_width,
            );
        }
        buf
    }

    fn read_slot(&self, index: usize) -> Option<Identity> {
        if index >= self.capacity {
            return None;
        }
        Identity::decode(&self.read_raw(index))
    }

    fn read_all(&self) -> Vec<Option<Identity>> {
        (0..self.capacity).map(|i| self.read_slot(i)).collect()
    }

    /// Every slot in index order, read without the write lock
    pub fn snapshot(&self) -> Vec<Option<Identity>> {
        match self.config.read_consistency {
            ReadConsistency::Relaxed => self.read_all(),
            ReadConsistency::Sequenced => self
                .lock_word()
                .read_consistent(&self.config.lock, || self.read_all()),
        }
    }

    /// Occupied slots in index order
    pub fn occupied(&self) -> Vec<(usize, Identity)> {
        self.snapshot()
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|id| (i, id)))
            .collect()
    }
}

/// Exclusive write access to the slots; the lock is released on drop
pub struct WriteGuard<'a> {
    roster: &'a Roster,
    _lock: LockGuard<'a>,
}

impl WriteGuard<'_> {
    #[inline]
    pub fn capacity(&self) -> usize {
        self.roster.capacity
    }

    pub fn get(&self, index: usize) -> Option<Identity> {
        self.roster.read_slot(index)
    }

    /// Store `identity`, tail-truncated to the slot width
    pub fn set(&mut self, index: usize, identity: &Identity) {
        if index >= self.roster.capacity {
            return;
        }
        let bytes = identity.encode(self.roster.slot_width);
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.roster.slots.add(index * self.roster.slot_width),
                self.roster.slot_width,
            );
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index >= self.roster.capacity {
            return;
        }
        unsafe {
            std::ptr::write_bytes(
                self.roster.slots.add(index * self.roster.slot_width),
                0,
                self.roster.slot_width,
            );
        }
    }

    /// No slot is occupied
    pub fn is_room_empty(&self) -> bool {
        (0..self.roster.capacity).all(|i| self.get(i).is_none())
    }
}
