// SPDX-License-Identifier: GPL-3.0-only

use crate::power::PowerEvent;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn lid_state_paths() -> Vec<PathBuf> {
    glob_lid_paths("/proc/acpi/button/lid")
}

fn glob_lid_paths(root: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(root) else { return out };
    for entry in entries.flatten() {
        let candidate = entry.path().join("state");
        if candidate.exists() {
            out.push(candidate);
        }
    }
    out
}

fn read_lid_closed(paths: &[PathBuf]) -> Option<bool> {
    for path in paths {
        if let Ok(text) = std::fs::read_to_string(path) {
            if text.to_lowercase().contains("closed") {
                return Some(true);
            }
            if text.to_lowercase().contains("open") {
                return Some(false);
            }
        }
    }
    None
}

/// Polls `/proc/acpi/button/lid/*/state` at ~2 Hz, edge-detecting
/// open/closed transitions.
pub fn spawn(stop: Arc<AtomicBool>, on_event: impl Fn(PowerEvent) + Send + 'static) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let paths = lid_state_paths();
        let mut last_closed = read_lid_closed(&paths);
        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            let closed = read_lid_closed(&paths);
            if closed != last_closed {
                if let Some(closed) = closed {
                    on_event(if closed { PowerEvent::LidClosed } else { PowerEvent::LidOpened });
                }
                last_closed = closed;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_closed_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state"), "state:      closed\n").unwrap();
        assert_eq!(read_lid_closed(&[dir.path().join("state")]), Some(true));
    }

    #[test]
    fn reads_open_state() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("state"), "state:      open\n").unwrap();
        assert_eq!(read_lid_closed(&[dir.path().join("state")]), Some(false));
    }

    #[test]
    fn glob_skips_entries_without_a_state_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("LID0")).unwrap();
        let paths = glob_lid_paths(dir.path().to_str().unwrap());
        assert!(paths.is_empty());
    }
}
