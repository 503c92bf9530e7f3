// SPDX-License-Identifier: MIT

//! Startup plumbing: single-instance lock and log rotation.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// Maximum log file size before startup rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Rotated log files kept (`relayd.log.1` … `.3`).
const MAX_ROTATED_LOGS: u32 = 3;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("another relayd instance holds the lock at {0}")]
    AlreadyRunning(String),
}

/// Exclusive-instance lock. Held for the process lifetime; the lock
/// releases when the file handle drops.
#[derive(Debug)]
pub struct LockFile {
    _file: File,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<Self, LifecycleError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(LifecycleError::AlreadyRunning(path.display().to_string()));
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { _file: file })
    }
}

/// Rotate the log file at startup if it has grown too large. Shifts
/// `relayd.log` → `.1` → `.2` → `.3`, dropping the oldest. Best-effort:
/// failures never block startup.
pub fn rotate_log_if_needed(log_path: &Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let base = log_path.display().to_string();
    for n in (1..MAX_ROTATED_LOGS).rev() {
        let _ = std::fs::rename(format!("{base}.{n}"), format!("{base}.{}", n + 1));
    }
    let _ = std::fs::rename(log_path, format!("{base}.1"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_exclusive_within_a_process_tree() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayd.lock");

        let held = LockFile::acquire(&path).unwrap();
        let err = LockFile::acquire(&path).unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyRunning(_)));

        drop(held);
        LockFile::acquire(&path).unwrap();
    }

    #[test]
    fn lock_file_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayd.lock");
        let _held = LockFile::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }

    #[test]
    fn small_logs_are_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayd.log");
        std::fs::write(&path, "short").unwrap();
        rotate_log_if_needed(&path);
        assert!(path.exists());
        assert!(!dir.path().join("relayd.log.1").exists());
    }
}
