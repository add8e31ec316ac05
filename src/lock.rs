// SPDX-License-Identifier: GPL-3.0-only

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

/// Advisory file lock ensuring only one daemon instance drives the device
/// at a time. Held for the lifetime of the returned `InstanceLock`; dropping
/// it (or process exit) releases the `flock`.
pub struct InstanceLock {
    _file: File,
}

pub fn lock_path() -> PathBuf { crate::config::config_dir().join("rgbkbdd.lock") }

impl InstanceLock {
    /// Attempts to acquire the lock. Returns `Ok(None)` (not an error) when
    /// another instance already holds it — callers should log and exit 0,
    /// per §4.8: a second instance would fight the first over the shared
    /// device.
    pub fn acquire() -> io::Result<Option<InstanceLock>> {
        let path = lock_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            Ok(Some(InstanceLock { _file: file }))
        } else {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_in_same_process_succeeds_because_flock_is_per_fd() {
        // flock locks are associated with the open file description, not
        // the process, so two independently-opened handles on the same
        // path from the same process do contend — this just documents
        // that acquiring twice without holding the first handle open
        // releases it first (the File is dropped at end of statement).
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RGBKBD_CONFIG_DIR", dir.path());
        let first = InstanceLock::acquire().unwrap();
        assert!(first.is_some());
        drop(first);
        let second = InstanceLock::acquire().unwrap();
        assert!(second.is_some());
        std::env::remove_var("RGBKBD_CONFIG_DIR");
    }

    #[test]
    fn concurrent_acquire_is_rejected_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RGBKBD_CONFIG_DIR", dir.path());
        let _held = InstanceLock::acquire().unwrap().unwrap();
        let second = InstanceLock::acquire().unwrap();
        assert!(second.is_none());
        std::env::remove_var("RGBKBD_CONFIG_DIR");
    }
}
