/*
 * mualib - mailbox locking.
 *
 * This file is part of mualib.
 *
 * mualib is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * mualib is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with mualib. If not, see <http://www.gnu.org/licenses/>.
 */

//! Mailbox file locking.
//!
//! Two cooperating primitives protect an mbox file:
//!
//! - [`AdvisoryLock`], the kernel's advisory exclusive lock (`flock(2)`).
//!   Fast, but honored only by processes on the same host.
//! - [`DotLock`], the mailx-style `<path>.lock` hard-link protocol, which
//!   works across NFS clients that do not propagate kernel locks.
//!
//! A correct mailbox open acquires *both* before reading, and both are
//! released on every exit path: each primitive unlocks itself when dropped.
//!
//! Both share the same bounded-wait algorithm in [`lock`](AdvisoryLock::lock):
//! try immediately, then sleep starting at 1/16 s and doubling up to 8 s,
//! until the timeout budget runs out. There is no signal-based timeout; the
//! blocking system call is only ever issued when no timeout was requested.

use std::{
    fs::OpenOptions,
    io::{self, Write},
    os::unix::fs::MetadataExt,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
    thread::sleep,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::error::{Error, ErrorKind, Result};

/// First retry sleep of the shared backoff schedule, 1/16 s.
const BACKOFF_START: Duration = Duration::from_micros(62_500);
/// Retry sleeps double up to this ceiling.
const BACKOFF_CEILING: Duration = Duration::from_secs(8);

/// Retry `attempt` until it succeeds or `timeout` is spent.
fn lock_with_backoff<F>(mut attempt: F, timeout: Duration) -> Result<bool>
where
    F: FnMut() -> Result<bool>,
{
    if attempt()? {
        return Ok(true);
    }
    let mut dt = BACKOFF_START;
    let mut budget = timeout;
    while !budget.is_zero() {
        let nap = dt.min(budget);
        sleep(nap);
        budget = budget.saturating_sub(nap);
        if attempt()? {
            return Ok(true);
        }
        if dt < BACKOFF_CEILING {
            dt = (dt * 2).min(BACKOFF_CEILING);
        }
    }
    Ok(false)
}

/// Kernel advisory exclusive lock on an open mailbox file.
///
/// Wraps the file so reads can go through the held lock; the lock is dropped
/// together with the wrapper.
#[derive(Debug)]
pub struct AdvisoryLock<T: AsRawFd> {
    inner: T,
    locked: bool,
}

impl<T: AsRawFd> AdvisoryLock<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            locked: false,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Attempt a non-blocking exclusive lock. An already-held lock maps to
    /// `Ok(false)`; any other OS failure propagates.
    pub fn try_lock(&mut self) -> Result<bool> {
        if self.locked {
            return Ok(false);
        }
        let ret = unsafe { libc::flock(self.inner.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret == 0 {
            self.locked = true;
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EWOULDBLOCK) | Some(libc::EACCES) => Ok(false),
            _ => Err(Error::from(err).set_summary("flock() failed")),
        }
    }

    /// Acquire the lock, waiting up to `timeout`. `None` blocks indefinitely.
    pub fn lock(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if self.locked {
            return Ok(false);
        }
        match timeout {
            None => {
                let ret = unsafe { libc::flock(self.inner.as_raw_fd(), libc::LOCK_EX) };
                if ret != 0 {
                    return Err(Error::from(io::Error::last_os_error())
                        .set_summary("flock() failed")
                        .set_kind(ErrorKind::OSError));
                }
                self.locked = true;
                Ok(true)
            }
            Some(timeout) => lock_with_backoff(|| self.try_lock(), timeout),
        }
    }

    /// Non-destructive probe: true if we hold the lock or could acquire it
    /// right now.
    pub fn check(&mut self) -> Result<bool> {
        if self.locked {
            return Ok(true);
        }
        if self.try_lock()? {
            self.unlock();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn unlock(&mut self) {
        if self.locked {
            let ret = unsafe { libc::flock(self.inner.as_raw_fd(), libc::LOCK_UN) };
            log::debug!(
                "released advisory lock for fd {}, flock returned {}",
                self.inner.as_raw_fd(),
                ret
            );
            self.locked = false;
        }
    }
}

impl<T: AsRawFd> Drop for AdvisoryLock<T> {
    fn drop(&mut self) {
        self.unlock();
    }
}

impl<T: AsRawFd + io::Read> io::Read for AdvisoryLock<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<T: AsRawFd + io::Seek> io::Seek for AdvisoryLock<T> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos)
    }
}

/// NFS-safe `<path>.lock` file, mailx protocol.
///
/// Acquisition creates a uniquely named temporary file next to the mailbox
/// and hard-links it to the canonical lock name; link creation is atomic even
/// over NFS. The temporary file's resulting link count decides ownership and
/// the temporary file is always removed afterwards.
///
/// A permission error while creating the temporary file is treated as "this
/// spool cannot be dotlocked, proceed" so read-only mailboxes stay readable;
/// [`DotLock::degraded`] reports when that happened.
#[derive(Debug)]
pub struct DotLock {
    path: PathBuf,
    lock_path: PathBuf,
    hostname: String,
    locked: bool,
    cantlock: bool,
}

impl DotLock {
    pub fn new<P: Into<PathBuf>>(path: P, hostname: &str) -> Self {
        let path = path.into();
        let mut lock_os = path.clone().into_os_string();
        lock_os.push(".lock");
        Self {
            lock_path: PathBuf::from(lock_os),
            path,
            hostname: hostname.to_string(),
            locked: false,
            cantlock: false,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// True if acquisition degraded to no-op because the spool directory
    /// refused the temporary file.
    pub fn degraded(&self) -> bool {
        self.cantlock
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Non-destructive probe: true if no one appears to hold the lock.
    pub fn check(&self) -> bool {
        !self.lock_path.exists()
    }

    /// Acquire the lock, return whether we got it.
    ///
    /// The steps come from mailx's dotlock implementation:
    /// make a mostly unique filename and create it, link the unique filename
    /// to the target, get the link count of the unique filename, unlink it;
    /// if the link count was 2 the lock is ours.
    pub fn try_lock(&mut self) -> Result<bool> {
        if self.locked || self.lock_path.exists() {
            return Ok(false);
        }
        let pid = std::process::id();
        let now = SystemTime::now();
        let secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        let mut tmp_os = self.path.clone().into_os_string();
        tmp_os.push(format!(".{}.{}.{:.3}.lock", self.hostname, pid, secs));
        let tmp_path = PathBuf::from(tmp_os);

        match self.write_owner_record(&tmp_path, pid, secs, now) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                self.cantlock = true;
                return Ok(true);
            }
            Err(err) => {
                return Err(Error::from(err).set_summary(format!(
                    "could not create dotlock temporary file for {}",
                    self.path.display()
                )));
            }
        }

        if let Err(err) = std::fs::hard_link(&tmp_path, &self.lock_path) {
            let _ = std::fs::remove_file(&tmp_path);
            if err.kind() == io::ErrorKind::AlreadyExists {
                return Ok(false);
            }
            return Err(Error::from(err).set_summary(format!(
                "could not link dotlock file {}",
                self.lock_path.display()
            )));
        }

        let nlink = std::fs::metadata(&tmp_path).map(|m| m.nlink());
        let _ = std::fs::remove_file(&tmp_path);
        match nlink {
            Ok(2) => {
                self.locked = true;
                Ok(true)
            }
            // Some other process raced us on the canonical name.
            Ok(_) | Err(_) => Ok(false),
        }
    }

    fn write_owner_record(
        &self,
        tmp_path: &Path,
        pid: u32,
        secs: f64,
        now: SystemTime,
    ) -> io::Result<()> {
        let mut ofile = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp_path)?;
        let program = std::env::args()
            .next()
            .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        // Informational only, never parsed back.
        writeln!(ofile, "{} {} {:.3}", self.hostname, pid, secs)?;
        writeln!(ofile, "locked by {} at {}", program, ctime(now))?;
        Ok(())
    }

    /// Acquire the lock, waiting up to `timeout`.
    pub fn lock(&mut self, timeout: Duration) -> Result<bool> {
        if self.locked {
            return Ok(false);
        }
        lock_with_backoff(|| self.try_lock(), timeout)
    }

    /// Touch the lock file so external staleness heuristics do not reclaim it
    /// during a long scan.
    pub fn refresh(&self) -> Result<bool> {
        if !self.locked {
            return Ok(false);
        }
        let _ = OpenOptions::new().append(true).open(&self.lock_path)?;
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        let tv = nix::sys::time::TimeVal::new(
            secs.as_secs() as nix::libc::time_t,
            secs.subsec_micros() as nix::libc::suseconds_t,
        );
        nix::sys::stat::utimes(&self.lock_path, &tv, &tv).map_err(|err| {
            Error::new(format!(
                "could not refresh dotlock {}: {}",
                self.lock_path.display(),
                err
            ))
            .set_kind(ErrorKind::OSError)
        })?;
        Ok(true)
    }

    pub fn unlock(&mut self) {
        if self.locked {
            if let Err(err) = std::fs::remove_file(&self.lock_path) {
                log::warn!(
                    "could not remove dotlock {}: {}",
                    self.lock_path.display(),
                    err
                );
            }
            self.locked = false;
        }
    }
}

impl Drop for DotLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn ctime(t: SystemTime) -> String {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0) as libc::time_t;
    let mut buf = [0 as libc::c_char; 26];
    unsafe {
        if libc::ctime_r(&secs, buf.as_mut_ptr()).is_null() {
            return String::new();
        }
        std::ffi::CStr::from_ptr(buf.as_ptr())
            .to_string_lossy()
            .trim_end()
            .to_string()
    }
}

/// Acquire advisory lock then dotlock with the same budget each; on dotlock
/// failure the advisory lock is released before returning.
pub fn lock_mailbox<T: AsRawFd>(
    flock: &mut AdvisoryLock<T>,
    dlock: &mut DotLock,
    timeout: Duration,
) -> Result<bool> {
    if !flock.lock(Some(timeout))? {
        return Ok(false);
    }
    if !dlock.lock(timeout)? {
        flock.unlock();
        return Ok(false);
    }
    Ok(true)
}
