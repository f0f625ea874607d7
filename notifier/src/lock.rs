//! Whole-pipeline advisory lock for SSH Sentry.
//!
//! A single named lock file ensures at most one pipeline execution
//! proceeds at a time on a host. Acquisition is strictly non-blocking:
//! a second concurrent trigger that cannot take the lock exits without
//! sending a duplicate notification ("drop, don't queue"). The lock is
//! released when the guard drops, so a crashed invocation never leaves
//! the host permanently silenced.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

/// File name of the pipeline lock inside the state directory.
pub const LOCK_FILE_NAME: &str = "pipeline.lock";

/// Result of a lock acquisition attempt.
#[derive(Debug)]
pub enum LockAttempt {
    /// The lock was taken; hold the guard for the pipeline's lifetime.
    Acquired(PipelineLock),
    /// Another instance holds the lock.
    Contended,
}

impl LockAttempt {
    /// Returns `true` if this attempt took the lock.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

/// Guard over the advisory lock file. Dropping it releases the lock.
#[derive(Debug)]
pub struct PipelineLock {
    file: File,
    path: PathBuf,
}

impl PipelineLock {
    /// Tries to acquire the pipeline lock inside `state_dir` without
    /// blocking.
    ///
    /// # Errors
    ///
    /// Returns an error only for real I/O failures (unwritable state
    /// directory). Contention is not an error.
    pub fn try_acquire(state_dir: &Path) -> io::Result<LockAttempt> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE_NAME);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "Pipeline lock acquired");
                Ok(LockAttempt::Acquired(Self { file, path }))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(LockAttempt::Contended),
            Err(e) => Err(e),
        }
    }
}

impl Drop for PipelineLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "Failed to release pipeline lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lock_is_acquired_when_free() {
        let dir = TempDir::new().unwrap();
        let attempt = PipelineLock::try_acquire(dir.path()).unwrap();
        assert!(attempt.is_acquired());
    }

    #[test]
    fn second_acquire_in_same_process_contends() {
        let dir = TempDir::new().unwrap();
        let first = PipelineLock::try_acquire(dir.path()).unwrap();
        assert!(first.is_acquired());

        // fs2 locks are per file handle, so a second open handle contends
        let second = PipelineLock::try_acquire(dir.path()).unwrap();
        assert!(!second.is_acquired());
    }

    #[test]
    fn dropping_the_guard_releases_the_lock() {
        let dir = TempDir::new().unwrap();
        {
            let attempt = PipelineLock::try_acquire(dir.path()).unwrap();
            assert!(attempt.is_acquired());
        }
        let attempt = PipelineLock::try_acquire(dir.path()).unwrap();
        assert!(attempt.is_acquired());
    }

    #[test]
    fn missing_state_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("state");
        let attempt = PipelineLock::try_acquire(&nested).unwrap();
        assert!(attempt.is_acquired());
        assert!(nested.join(LOCK_FILE_NAME).is_file());
    }
}
