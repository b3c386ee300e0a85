//! Cross-process lock around device enumeration.
//!
//! Concurrent enumerations from several processes can race while devices
//! are being claimed. Discovery takes the lock once before its first scan.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::UsbError;
use crate::protocol::constants::ENUMERATION_LOCK_FILE;

/// Held for as long as the lock must stay taken.
pub struct LockGuard {
    _inner: Option<Box<dyn Send>>,
}

impl LockGuard {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            _inner: Some(Box::new(inner)),
        }
    }

    /// Guard for a lock that was never taken.
    pub fn unlocked() -> Self {
        Self { _inner: None }
    }

    pub fn is_locked(&self) -> bool {
        self._inner.is_some()
    }
}

pub trait EnumerationLock: Send {
    fn acquire(&mut self) -> Result<LockGuard, UsbError>;
}

/// Lock that never blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl EnumerationLock for NoLock {
    fn acquire(&mut self) -> Result<LockGuard, UsbError> {
        Ok(LockGuard::unlocked())
    }
}

/// Exclusive `flock(2)` on a shared lock file.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
}

#[cfg(unix)]
impl FileLock {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Lock file shared by every process on this host.
    pub fn system() -> Self {
        Self::new(std::env::temp_dir().join(ENUMERATION_LOCK_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
impl EnumerationLock for FileLock {
    fn acquire(&mut self) -> Result<LockGuard, UsbError> {
        use nix::fcntl::{Flock, FlockArg};
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| UsbError::Lock(format!("{}: {}", self.path.display(), e)))?;
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| UsbError::Lock(format!("{}: {}", self.path.display(), errno)))?;
        debug!(path = %self.path.display(), "Enumeration lock taken");
        Ok(LockGuard::new(lock))
    }
}

/// Platform lock used unless `no_lock` is set.
pub fn default_lock(no_lock: bool) -> Box<dyn EnumerationLock> {
    if no_lock {
        debug!("Enumeration lock disabled");
        return Box::new(NoLock);
    }
    #[cfg(unix)]
    {
        Box::new(FileLock::system())
    }
    #[cfg(not(unix))]
    {
        Box::new(NoLock)
    }
}
