//! Advisory file locks for state shared between processes.
//!
//! On unix these are `flock(2)` locks, which belong to the open file
//! description: two opens of the same path conflict even within one process.
//! Elsewhere the lock is a no-op and only in-process synchronisation applies.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::util::fs::ensure_dir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// A held lock; released when dropped.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock is acquired.
    pub fn acquire(path: &Path, mode: LockMode) -> io::Result<Self> {
        let file = open(path)?;
        lock(&file, mode, true)?;
        Ok(FileLock {
            _file: file,
            path: path.to_path_buf(),
        })
    }

    /// Acquire without blocking; `None` if someone else holds it.
    pub fn try_acquire(path: &Path, mode: LockMode) -> io::Result<Option<Self>> {
        let file = open(path)?;
        match lock(&file, mode, false) {
            Ok(()) => Ok(Some(FileLock {
                _file: file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn open(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
}

#[cfg(unix)]
fn lock(file: &File, mode: LockMode, blocking: bool) -> io::Result<()> {
    use rustix::fs::{flock, FlockOperation};
    use std::os::unix::io::AsFd;

    let operation = match (mode, blocking) {
        (LockMode::Shared, true) => FlockOperation::LockShared,
        (LockMode::Exclusive, true) => FlockOperation::LockExclusive,
        (LockMode::Shared, false) => FlockOperation::NonBlockingLockShared,
        (LockMode::Exclusive, false) => FlockOperation::NonBlockingLockExclusive,
    };

    loop {
        match flock(file.as_fd(), operation) {
            Ok(()) => return Ok(()),
            Err(e) if e == rustix::io::Errno::INTR => continue,
            Err(e) => return Err(io::Error::from_raw_os_error(e.raw_os_error())),
        }
    }
}

#[cfg(not(unix))]
fn lock(_file: &File, _mode: LockMode, _blocking: bool) -> io::Result<()> {
    Ok(())
}
