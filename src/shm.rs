//! Low-level POSIX shared memory operations for room rosters

use crate::error::{ChatError, Result};
use rustix::fd::OwnedFd;
use rustix::fs::{fchmod, fstat, ftruncate};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ptr::NonNull;
use std::thread;
use std::time::Duration;

const MAX_NAME_LEN: usize = 255;

/// How many times an opener re-checks the size of a segment still being created
const SIZE_WAIT_ATTEMPTS: u32 = 200;
const SIZE_WAIT_INTERVAL: Duration = Duration::from_millis(5);

/// Every session of every user must be able to attach
fn room_mode() -> Mode {
    Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP | Mode::ROTH | Mode::WOTH
}

/// Handle to a mapped room segment
pub struct RoomShm {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    created: bool,
}

// SAFETY: the mapping is shared with other processes anyway; all
// cross-process synchronization goes through atomics in the roster header
unsafe impl Send for RoomShm {}
unsafe impl Sync for RoomShm {}

impl RoomShm {
    /// Create the segment if absent, otherwise open the existing one
    ///
    /// `name` must start with `/`. A freshly created segment is sized to
    /// `size` and zero-filled by the kernel; an existing one keeps its own
    /// size, which the caller validates against the header.
    pub fn create_or_open(name: &str, size: usize) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(ChatError::NamespaceTooLong {
                max: MAX_NAME_LEN,
                got: name.len(),
            });
        }

        let unavailable = |stage: &'static str| {
            let name = name.to_string();
            move |e: rustix::io::Errno| ChatError::SegmentUnavailable {
                name,
                stage,
                source: e.into(),
            }
        };

        // Try to create exclusively first, fall back to open if exists
        let (fd, created) = match shm_open(
            name,
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            room_mode(),
        ) {
            Ok(fd) => {
                // umask may have stripped the group/other write bits
                fchmod(&fd, room_mode()).map_err(unavailable("chmod"))?;
                ftruncate(&fd, size as u64).map_err(unavailable("truncate"))?;
                (fd, true)
            }
            Err(_) => {
                let fd = shm_open(name, ShmOFlags::RDWR, Mode::empty())
                    .map_err(unavailable("open"))?;
                (fd, false)
            }
        };

        let size = if created {
            size
        } else {
            Self::wait_for_size(&fd, name)?
        };

        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                &fd,
                0,
            )
            .map_err(unavailable("mmap"))?
        };

        let addr = NonNull::new(addr.cast::<u8>()).ok_or_else(|| ChatError::SegmentUnavailable {
            name: name.to_string(),
            stage: "mmap",
            source: std::io::Error::other("mmap returned null"),
        })?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            created,
        })
    }

    /// The creator may not have sized the object yet
    fn wait_for_size(fd: &OwnedFd, name: &str) -> Result<usize> {
        for _ in 0..SIZE_WAIT_ATTEMPTS {
            let stat = fstat(fd).map_err(|e| ChatError::SegmentUnavailable {
                name: name.to_string(),
                stage: "stat",
                source: e.into(),
            })?;
            if stat.st_size > 0 {
                return Ok(stat.st_size as usize);
            }
            thread::sleep(SIZE_WAIT_INTERVAL);
        }
        Err(ChatError::InvalidLayout(format!(
            "segment '{}' was never sized by its creator",
            name
        )))
    }

    /// Remove the named object; existing mappings stay valid until unmapped
    pub fn unlink(name: &str) -> Result<()> {
        shm_unlink(name).map_err(|e| ChatError::SegmentUnavailable {
            name: name.to_string(),
            stage: "unlink",
            source: e.into(),
        })
    }

    /// Get raw pointer to shared memory
    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    /// Get size of shared memory region
    #[inline(always)]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Get the name of shared memory
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this handle created the object (and must initialize it)
    #[inline(always)]
    pub fn created(&self) -> bool {
        self.created
    }
}

impl Drop for RoomShm {
    fn drop(&mut self) {
        // Detach only; the object outlives every session
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }
    }
}
