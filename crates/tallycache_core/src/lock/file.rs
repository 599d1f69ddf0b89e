//! Cross-process lock service backed by advisory file locks.

use super::{LockScope, LockService, LockToken};
use crate::error::LockError;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_POLL: Duration = Duration::from_millis(10);

/// Lock service shared by processes that see the same directory.
///
/// Each scope maps to one lock file. Acquire polls `try_lock_exclusive`
/// until the deadline. Lock files are left in place after release.
#[derive(Debug)]
pub struct FileLockService {
    dir: PathBuf,
    poll: Duration,
    held: Mutex<HashMap<u64, File>>,
    next_id: AtomicU64,
}

impl FileLockService {
    /// Creates a service rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, LockError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            poll: DEFAULT_POLL,
            held: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Sets how often a busy scope is retried.
    #[must_use]
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Returns the lock directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, scope: &str) -> PathBuf {
        let mut name = String::with_capacity(scope.len() + 5);
        for b in scope.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(char::from(b));
            } else {
                let _ = write!(name, "%{b:02x}");
            }
        }
        name.push_str(".lock");
        self.dir.join(name)
    }
}

fn is_contended(e: &io::Error) -> bool {
    let contended = fs2::lock_contended_error();
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == contended.raw_os_error()
}

impl LockService for FileLockService {
    fn acquire(&self, scope: &LockScope, timeout: Duration) -> Result<Option<LockToken>, LockError> {
        let name = scope.name();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.path_for(&name))?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(self.poll.min(deadline - now));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.held.lock().insert(id, file);
        Ok(Some(LockToken::new(name, id)))
    }

    fn release(&self, token: LockToken) -> Result<(), LockError> {
        let file = self
            .held
            .lock()
            .remove(&token.id())
            .ok_or_else(|| LockError::UnknownToken {
                scope: token.scope().to_string(),
                id: token.id(),
            })?;
        file.unlock()?;
        Ok(())
    }
}
