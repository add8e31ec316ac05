// SPDX-License-Identifier: GPL-3.0-only

use crate::errors::LightingError;
use crate::intent::LightingIntent;
use log::warn;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const LOAD_RETRIES: u32 = 3;
const LOAD_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Resolves the config directory, honoring `RGBKBD_CONFIG_DIR` for tests
/// and overrides, falling back to the XDG config home.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("RGBKBD_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("rgbkbdd")
}

pub fn config_path() -> PathBuf { config_dir().join("config.json") }

/// Atomic-write JSON document holding the persisted `LightingIntent`.
/// Writes go to a sibling temp file, are fsynced, then renamed over the
/// target so a concurrent reader never observes a half-written document;
/// reads retry a
/// bounded number of times on transient decode failure (a writer may have
/// truncated the file mid-read) before giving up and keeping the last good
/// in-memory copy.
pub struct ConfigStore {
    path: PathBuf,
    intent: LightingIntent,
    last_mtime: Option<SystemTime>,
}

impl ConfigStore {
    pub fn load_or_default() -> ConfigStore {
        let path = config_path();
        let intent = Self::read(&path).unwrap_or_else(|err| {
            warn!("config load failed, using defaults: {err}");
            LightingIntent::default()
        });
        let last_mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
        ConfigStore { path, intent, last_mtime }
    }

    fn read(path: &Path) -> Result<LightingIntent, LightingError> {
        let mut last_err = None;
        for attempt in 0..LOAD_RETRIES {
            match fs::read_to_string(path) {
                Ok(text) => match serde_json::from_str::<LightingIntent>(&text) {
                    Ok(mut intent) => {
                        intent.normalize();
                        return Ok(intent);
                    }
                    Err(err) => {
                        last_err = Some(LightingError::ConfigCorrupt(err.to_string()));
                        if attempt + 1 < LOAD_RETRIES {
                            std::thread::sleep(LOAD_RETRY_DELAY);
                        }
                    }
                },
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Ok(LightingIntent::default());
                }
                Err(err) => return Err(LightingError::Io(err)),
            }
        }
        Err(last_err.unwrap_or_else(|| LightingError::ConfigCorrupt("unknown".into())))
    }

    pub fn intent(&self) -> &LightingIntent { &self.intent }

    pub fn intent_mut(&mut self) -> &mut LightingIntent { &mut self.intent }

    /// Atomically persists the current intent: write to a temp file in the
    /// same directory (so the rename is same-filesystem and thus atomic),
    /// fsync it, then rename over the target.
    pub fn save(&mut self) -> Result<(), LightingError> {
        self.intent.normalize();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(LightingError::Io)?;
        }
        let json = serde_json::to_string_pretty(&self.intent).map_err(|e| LightingError::ConfigCorrupt(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&temp_path).map_err(LightingError::Io)?;
            file.write_all(json.as_bytes()).map_err(LightingError::Io)?;
            file.sync_all().map_err(LightingError::Io)?;
        }
        fs::rename(&temp_path, &self.path).map_err(LightingError::Io)?;
        self.last_mtime = fs::metadata(&self.path).and_then(|m| m.modified()).ok();
        Ok(())
    }

    /// Polled at ~10Hz by the daemon's config watcher. Returns `true` (and
    /// reloads `self.intent`) exactly when the on-disk mtime advanced past
    /// what was last observed — an external writer (a GUI, or `rgbkbdd set`)
    /// changed the document.
    pub fn poll_reload(&mut self) -> bool {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(_) => return false,
        };
        if Some(mtime) == self.last_mtime {
            return false;
        }
        match Self::read(&self.path) {
            Ok(intent) => {
                self.intent = intent;
                self.last_mtime = Some(mtime);
                true
            }
            Err(err) => {
                warn!("config reload failed, keeping previous document: {err}");
                // Don't update last_mtime: a transient truncation should be
                // retried on the next poll tick, not silently accepted.
                false
            }
        }
    }
}

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn with_temp_config_dir<T>(f: impl FnOnce(&Path) -> T) -> T {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("RGBKBD_CONFIG_DIR", dir.path());
        let result = f(dir.path());
        std::env::remove_var("RGBKBD_CONFIG_DIR");
        result
    }

    #[test]
    fn missing_file_loads_defaults() {
        with_temp_config_dir(|_| {
            let store = ConfigStore::load_or_default();
            assert_eq!(store.intent().effect, "static");
        });
    }

    #[test]
    fn save_then_load_round_trips() {
        with_temp_config_dir(|_| {
            let mut store = ConfigStore::load_or_default();
            store.intent_mut().effect = "RAINBOW".to_string();
            store.intent_mut().brightness = 33;
            store.save().unwrap();

            let reloaded = ConfigStore::load_or_default();
            assert_eq!(reloaded.intent().effect, "rainbow");
            assert_eq!(reloaded.intent().brightness, 33);
        });
    }

    #[test]
    fn corrupt_file_keeps_previous_document_on_poll() {
        with_temp_config_dir(|_| {
            let mut store = ConfigStore::load_or_default();
            store.intent_mut().brightness = 9;
            store.save().unwrap();

            let mut file = File::create(config_path()).unwrap();
            file.write_all(b"{not valid json").unwrap();
            drop(file);

            assert!(!store.poll_reload());
            assert_eq!(store.intent().brightness, 9);
        });
    }
}
