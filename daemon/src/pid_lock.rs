//! Single-instance lock backed by a PID file

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidLockError {
    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),
}

/// Held for the lifetime of the daemon; removes the PID file on drop
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    owned: bool,
}

impl PidLock {
    /// Claim `path` for this process.
    ///
    /// A file naming a live process refuses the lock. Stale or unreadable
    /// files are replaced. If the new file cannot be written the lock is still
    /// returned, since playback matters more than the lock.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, PidLockError> {
        let path = path.into();

        if let Some(pid) = read_pid(&path) {
            if process_alive(pid) {
                return Err(PidLockError::AlreadyRunning(pid));
            }
            log::info!("Removing stale PID file {} (pid {})", path.display(), pid);
        }

        if path.exists()
            && let Err(e) = fs::remove_file(&path)
        {
            log::warn!("Failed to remove PID file {}: {}", path.display(), e);
        }

        let owned = match write_pid(&path) {
            Ok(()) => {
                log::debug!("Wrote PID file {}", path.display());
                true
            }
            Err(e) => {
                log::warn!("Failed to write PID file {}: {}", path.display(), e);
                false
            }
        };

        Ok(Self { path, owned })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the PID file now instead of on drop
    pub fn release(&mut self) {
        if !self.owned {
            return;
        }
        self.owned = false;
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            log::warn!("Failed to remove PID file {}: {}", self.path.display(), e);
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn read_pid(path: &Path) -> Option<i32> {
    let contents = fs::read_to_string(path).ok()?;
    // kill(0, 0) and kill(-1, 0) address process groups, not a single pid
    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => {
            log::warn!("Ignoring unparsable PID file {}", path.display());
            None
        }
    }
}

fn write_pid(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format!("{}\n", std::process::id()))
}

fn process_alive(pid: i32) -> bool {
    // Signal 0 only checks for existence; EPERM means it exists but is not ours
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/nctv-player.pid");

        let lock = PidLock::acquire(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.trim(), std::process::id().to_string());
        assert_eq!(lock.path(), path);

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_live_process_refuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nctv-player.pid");
        fs::write(&path, std::process::id().to_string()).unwrap();

        match PidLock::acquire(&path) {
            Err(PidLockError::AlreadyRunning(pid)) => {
                assert_eq!(pid, std::process::id() as i32)
            }
            other => panic!("expected AlreadyRunning, got {:?}", other),
        }
        // The other instance's file is left alone
        assert!(path.exists());
    }

    #[test]
    fn test_stale_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nctv-player.pid");
        fs::write(&path, "2147483646\n").unwrap();

        let _lock = PidLock::acquire(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_non_positive_pid_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nctv-player.pid");

        for contents in ["-1\n", "0\n", "-4242"] {
            fs::write(&path, contents).unwrap();
            let lock = PidLock::acquire(&path).unwrap();
            let written = fs::read_to_string(&path).unwrap();
            assert_eq!(written.trim(), std::process::id().to_string());
            drop(lock);
        }
    }

    #[test]
    fn test_garbage_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nctv-player.pid");
        fs::write(&path, "not a pid").unwrap();

        let _lock = PidLock::acquire(&path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written.trim(), std::process::id().to_string());
    }
}
