//! Single-instance guard
//!
//! Two daemons resetting the same account at once would race on the remote
//! button state, so the entry point holds an [`InstanceGuard`] for its whole
//! lifetime. The guard is an exclusive `flock` on a lock file; the kernel drops
//! the lock when the holder dies, so a crashed instance never blocks the next
//! one. The file also carries a small JSON record naming the holder, which a
//! second instance reads to report (and optionally signal) the live holder.

use chrono::{DateTime, Local};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{RefillError, Result};

/// What the current holder wrote into the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub pid: u32,
    pub started_at: DateTime<Local>,
    pub version: String,
}

impl InstanceRecord {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: crate::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Whether the recorded process still exists
    pub fn is_alive(&self) -> bool {
        is_process_alive(self.pid)
    }
}

/// Exclusive right to perform reset attempts on this machine
pub struct InstanceGuard {
    path: PathBuf,
    lock: Option<Flock<File>>,
}

impl InstanceGuard {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.lock.is_some()
    }

    /// Try to become the only active instance.
    ///
    /// Returns `Ok(false)` when another live process holds the lock.
    pub fn acquire_exclusivity(&mut self) -> Result<bool> {
        if self.lock.is_some() {
            return Ok(true);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => {
                match self.holder() {
                    Some(holder) => warn!(
                        path = %self.path.display(),
                        holder_pid = holder.pid,
                        holder_alive = holder.is_alive(),
                        holder_started = %holder.started_at,
                        "Another instance holds the lock"
                    ),
                    None => warn!(path = %self.path.display(), "Another instance holds the lock"),
                }
                return Ok(false);
            }
            Err((_, errno)) => {
                return Err(RefillError::lock(format!(
                    "flock {} failed: {}",
                    self.path.display(),
                    errno
                )));
            }
        };

        if let Some(stale) = self.holder() {
            if stale.pid != std::process::id() {
                info!(
                    stale_pid = stale.pid,
                    stale_alive = stale.is_alive(),
                    "Taking over lock file left by a previous instance"
                );
            }
        }

        let record = InstanceRecord::current();
        let json = serde_json::to_vec_pretty(&record)?;
        let file: &mut File = &mut lock;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&json)?;
        file.flush()?;

        debug!(path = %self.path.display(), pid = record.pid, "Instance lock acquired");
        self.lock = Some(lock);
        Ok(true)
    }

    /// Give up exclusivity. The lock file is left in place (empty) so that a
    /// concurrent starter never locks an unlinked inode.
    pub fn release(&mut self) {
        let Some(mut lock) = self.lock.take() else {
            return;
        };

        let file: &mut File = &mut lock;
        if let Err(e) = file.set_len(0) {
            warn!(error = %e, "Failed to clear instance record");
        }

        match lock.unlock() {
            Ok(_) => debug!(path = %self.path.display(), "Instance lock released"),
            Err((_, errno)) => warn!(error = %errno, "Failed to unlock instance lock"),
        }
    }

    /// Read the record of whoever holds (or last held) the lock
    pub fn holder(&self) -> Option<InstanceRecord> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        if content.trim().is_empty() {
            return None;
        }
        serde_json::from_str(&content).ok()
    }

    /// Ask the live holder to shut down so this process can take over.
    ///
    /// Returns the pid that was signalled, if any.
    pub fn request_holder_exit(&self) -> Result<Option<u32>> {
        let Some(holder) = self.holder() else {
            return Ok(None);
        };

        if holder.pid == std::process::id() || !holder.is_alive() {
            return Ok(None);
        }

        info!(pid = holder.pid, "Asking running instance to exit");
        signal::kill(Pid::from_raw(holder.pid as i32), Signal::SIGTERM)
            .map_err(|e| RefillError::lock(format!("SIGTERM to {} failed: {}", holder.pid, e)))?;
        Ok(Some(holder.pid))
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Liveness probe via signal 0
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        // Exists but belongs to someone else
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
