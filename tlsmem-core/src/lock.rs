// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Exclusive lock files.
//!
//! The profiler's control channel and the workload manifest are both
//! single-consumer, so a session holds a lock file for each of them. The lock
//! is released when the guard drops, including on error paths.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

use crate::error::LockError;

/// Stale locks moved aside before giving up on a contended path.
const TAKEOVER_ATTEMPTS: usize = 3;

/// RAII guard for an exclusive lock file containing the owner's PID.
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
    released: bool,
}

impl SessionLock {
    /// Acquire the lock at `path`.
    ///
    /// Fails with [`LockError::Held`] while another live process owns it. A
    /// lock left behind by a dead process is replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LockError::Create {
                path: path.clone(),
                source: e,
            })?;
        }

        let mut attempts = 0;
        loop {
            match Self::try_create(&path) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempts < TAKEOVER_ATTEMPTS => {
                    attempts += 1;
                    let holder = Self::read_holder(&path);
                    if let Some(pid) = holder.filter(|pid| process_alive(*pid)) {
                        return Err(LockError::Held { path, pid });
                    }

                    tracing::warn!(
                        lock = %path.display(),
                        stale_pid = ?holder,
                        "Replacing stale lock"
                    );
                    Self::move_stale(&path, holder)?;
                }
                Err(e) => return Err(LockError::Create { path, source: e }),
            }
        }

        tracing::debug!(lock = %path.display(), "Lock acquired");

        Ok(Self {
            path,
            released: false,
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting a failure to remove the file.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        fs::remove_file(&self.path).map_err(|e| LockError::Release {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(lock = %self.path.display(), "Lock released");
        Ok(())
    }

    fn try_create(path: &Path) -> std::io::Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()
    }

    /// Move the stale lock out of the way.
    ///
    /// The rename is atomic, so whoever moves the file can check that it
    /// still names the dead `holder`. A live lock moved by mistake is linked
    /// back into place.
    fn move_stale(path: &Path, holder: Option<i32>) -> Result<(), LockError> {
        let mut aside = path.as_os_str().to_owned();
        aside.push(format!(".stale-{}", std::process::id()));
        let aside = PathBuf::from(aside);

        match fs::rename(path, &aside) {
            Ok(()) => {}
            // Another process moved it first
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(LockError::Create {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        }

        let moved = Self::read_holder(&aside);
        let live = moved.filter(|pid| moved != holder && process_alive(*pid));
        if let Some(pid) = live {
            if let Err(e) = fs::hard_link(&aside, path) {
                tracing::error!(
                    lock = %path.display(),
                    pid,
                    error = %e,
                    "Failed to put back live lock"
                );
            }
        }

        fs::remove_file(&aside).map_err(|e| LockError::Create {
            path: aside.clone(),
            source: e,
        })?;

        match live {
            Some(pid) => Err(LockError::Held {
                path: path.to_path_buf(),
                pid,
            }),
            None => Ok(()),
        }
    }

    fn read_holder(path: &Path) -> Option<i32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::error!(lock = %self.path.display(), error = %e, "Failed to release lock");
            }
        }
    }
}

/// Signal 0 checks for existence; EPERM still means the process exists.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}
