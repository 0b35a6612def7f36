// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-instance enforcement via an advisory exclusive lock on one file
//! under the state directory, holding the PID for diagnostics.

use std::io::Write;
use std::path::Path;

use fs2::FileExt;

use crate::config::ConfigError;

pub struct LockFile {
    file: std::fs::File,
}

impl LockFile {
    /// Acquire the lock at `path`, failing immediately (no blocking wait) if
    /// another process already holds it.
    pub fn acquire(path: &Path) -> Result<Self, ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new().create(true).write(true).open(path)?;
        file.try_lock_exclusive().map_err(ConfigError::Io)?;
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file })
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        let first = LockFile::acquire(&path).unwrap();
        assert!(LockFile::acquire(&path).is_err());
        drop(first);
        assert!(LockFile::acquire(&path).is_ok());
    }

    #[test]
    fn acquire_writes_pid_to_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.pid");
        let _lock = LockFile::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
