//! Cooperative write lock living inside the roster segment
//!
//! Writers from any process serialize on a single flag word. Each critical
//! section also moves a sequence counter from even to odd and back, the way
//! a SeqLock does, so readers that want a consistent view can retry instead
//! of blocking writers.

use crate::config::LockConfig;
use crate::error::{ChatError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// Lock state stored in shared memory
#[repr(C)]
pub struct LockWord {
    /// `UNLOCKED` or `LOCKED`
    flag: AtomicU32,
    /// pid of the current writer, 0 when free
    holder: AtomicU32,
    /// odd = write in progress, even = stable
    sequence: AtomicU64,
}

impl LockWord {
    /// Reset to the unlocked state
    ///
    /// # Safety
    /// The pointer must point to valid, properly aligned memory that no other
    /// process is using yet
    pub unsafe fn init(ptr: *mut Self) {
        (*ptr).flag = AtomicU32::new(UNLOCKED);
        (*ptr).holder = AtomicU32::new(0);
        (*ptr).sequence = AtomicU64::new(0);
    }

    /// Try to take the lock once
    #[inline]
    pub fn try_acquire(&self) -> Option<LockGuard<'_>> {
        self.flag
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        self.holder.store(std::process::id(), Ordering::Relaxed);
        // Increment to odd - write in progress
        self.sequence.fetch_add(1, Ordering::AcqRel);
        Some(LockGuard { word: self })
    }

    /// Poll until the lock is free, then take it
    ///
    /// Waits forever unless `config` carries a timeout.
    pub fn acquire(&self, config: &LockConfig) -> Result<LockGuard<'_>> {
        if let Some(guard) = self.try_acquire() {
            return Ok(guard);
        }

        let started = Instant::now();
        let timeout = config.timeout();
        info!(holder = self.holder(), "Waiting for roster write lock");

        loop {
            thread::sleep(config.poll_interval());

            if let Some(guard) = self.try_acquire() {
                debug!(waited_ms = started.elapsed().as_millis() as u64, "Roster write lock acquired");
                return Ok(guard);
            }

            let waited = started.elapsed();
            if let Some(limit) = timeout {
                if waited >= limit {
                    return Err(ChatError::LockTimeout {
                        waited_ms: waited.as_millis(),
                        holder: self.holder(),
                    });
                }
            }
            debug!(holder = self.holder(), waited_ms = waited.as_millis() as u64, "Still waiting...");
        }
    }

    /// Run `read` until it observed no concurrent writer
    ///
    /// Gives up after the lock timeout (if any) and returns an unchecked
    /// read, since a writer that died mid-section never ends its sequence.
    pub fn read_consistent<T>(&self, config: &LockConfig, mut read: impl FnMut() -> T) -> T {
        let started = Instant::now();
        loop {
            let seq1 = self.sequence.load(Ordering::Acquire);
            if seq1 & 1 == 0 {
                let value = read();
                std::sync::atomic::fence(Ordering::Acquire);
                let seq2 = self.sequence.load(Ordering::Acquire);
                if seq1 == seq2 {
                    return value;
                }
                continue;
            }

            if let Some(limit) = config.timeout() {
                if started.elapsed() >= limit {
                    warn!(holder = self.holder(), "Writer never finished, reading roster unchecked");
                    return read();
                }
            }
            thread::sleep(config.poll_interval());
        }
    }

    /// pid of the current writer, 0 when free
    #[inline]
    pub fn holder(&self) -> u32 {
        self.holder.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.flag.load(Ordering::Acquire) == LOCKED
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

/// Held write lock; released on drop
pub struct LockGuard<'a> {
    word: &'a LockWord,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        // Increment to even - write complete
        self.word.sequence.fetch_add(1, Ordering::AcqRel);
        self.word.holder.store(0, Ordering::Relaxed);
        self.word.flag.store(UNLOCKED, Ordering::Release);
    }
}
