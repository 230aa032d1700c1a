//! Advisory work-tree locking.
//!
//! Uses advisory file locks (`flock(2)` on Unix) via the `fs2` crate on
//! the zero-length `lock` file in the metadata directory. Acquisition is
//! always non-blocking: a held lock means another process owns the work
//! tree and the operation fails with `Busy` instead of waiting. The OS
//! releases locks when a process exits, so no stale-lock detection is
//! needed.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{WorktreeError, WtResult};

/// The advisory lock on a work tree's metadata directory.
///
/// The open file handle is held for the lifetime of the work tree; the
/// flock mode moves between shared and exclusive as operations demand.
#[derive(Debug)]
pub struct WorktreeLock {
    file: File,
}

impl WorktreeLock {
    /// Open the lock file and take the exclusive lock, non-blocking.
    pub fn acquire_exclusive(path: &Path) -> WtResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                if crate::error::oserr::missing(&e) {
                    WorktreeError::NotAWorktree(path.display().to_string())
                } else {
                    WorktreeError::Io(e)
                }
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file }),
            Err(_) => Err(WorktreeError::Busy),
        }
    }

    /// Upgrade to the exclusive lock, non-blocking.
    pub fn lock_exclusive(&self) -> WtResult<()> {
        self.file.try_lock_exclusive().map_err(|_| WorktreeError::Busy)
    }

    /// Downgrade (or re-take) the shared lock, non-blocking.
    pub fn lock_shared(&self) -> WtResult<()> {
        self.file.try_lock_shared().map_err(|_| WorktreeError::Busy)
    }
}
