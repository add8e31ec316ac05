// SPDX-License-Identifier: GPL-3.0-only

use crate::intent::PowerSourcePolicy;
use crate::power::PowerEvent;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEBOUNCE: Duration = Duration::from_secs(3);
const CRITICAL_THRESHOLD: u8 = 25;
const RECOVERED_THRESHOLD: u8 = 50;

fn power_supply_root() -> PathBuf {
    std::env::var("RGBKBD_POWER_SUPPLY_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/sys/class/power_supply"))
}

/// Reads whether any AC/mains power supply reports `online`. Mirrors the
/// teacher's `upower.rs::on_battery()` but sourced straight from sysfs
/// instead of going over D-Bus to UPower, since this daemon has no other
/// reason to hold a UPower connection open.
fn on_ac(root: &std::path::Path) -> Option<bool> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let type_path = path.join("type");
        let Ok(kind) = std::fs::read_to_string(&type_path) else { continue };
        if kind.trim() != "Mains" {
            continue;
        }
        if let Ok(online) = std::fs::read_to_string(path.join("online")) {
            return Some(online.trim() == "1");
        }
    }
    None
}

fn battery_percentage(root: &std::path::Path) -> Option<u8> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(kind) = std::fs::read_to_string(path.join("type")) else { continue };
        if kind.trim() != "Battery" {
            continue;
        }
        if let Ok(capacity) = std::fs::read_to_string(path.join("capacity")) {
            return capacity.trim().parse().ok();
        }
    }
    None
}

/// Debounced battery-saver dim/restore policy, independent of the simpler
/// per-power-source enabled/brightness override.
pub fn battery_saver_active(on_ac: bool, percentage: Option<u8>, enabled: bool) -> bool {
    enabled && !on_ac && percentage.map(|p| p <= CRITICAL_THRESHOLD).unwrap_or(false)
}

pub fn battery_saver_should_restore(on_ac: bool, percentage: Option<u8>) -> bool {
    on_ac || percentage.map(|p| p >= RECOVERED_THRESHOLD).unwrap_or(false)
}

/// Resolves the (enabled, brightness) tuple for whichever source is
/// active, from the persisted per-source policies.
pub fn resolve_policy(on_ac: bool, ac_policy: PowerSourcePolicy, battery_policy: PowerSourcePolicy) -> PowerSourcePolicy {
    if on_ac {
        ac_policy
    } else {
        battery_policy
    }
}

/// Polls AC/battery state at ~0.5Hz, debouncing transitions by `DEBOUNCE`
/// before firing a callback, and separately tracks the battery-saver
/// critical/recovered edge.
pub fn spawn(stop: Arc<AtomicBool>, on_event: impl Fn(PowerEvent) + Send + 'static) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let root = power_supply_root();
        let mut last_on_ac = on_ac(&root);
        let mut pending_since: Option<Instant> = None;
        let mut pending_value = last_on_ac;
        let mut critical = false;

        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);

            let current = on_ac(&root);
            if current != pending_value {
                pending_value = current;
                pending_since = Some(Instant::now());
            }

            if let (Some(since), Some(value)) = (pending_since, pending_value) {
                if since.elapsed() >= DEBOUNCE && Some(value) != last_on_ac {
                    on_event(if value { PowerEvent::OnAc } else { PowerEvent::OnBattery });
                    last_on_ac = Some(value);
                    pending_since = None;
                }
            }

            let percentage = battery_percentage(&root);
            let on_ac_now = last_on_ac.unwrap_or(true);
            if !critical && !on_ac_now && percentage.map(|p| p < CRITICAL_THRESHOLD).unwrap_or(false) {
                on_event(PowerEvent::BatteryCritical);
                critical = true;
            } else if critical && (on_ac_now || percentage.map(|p| p > RECOVERED_THRESHOLD).unwrap_or(false)) {
                on_event(PowerEvent::BatteryRecovered);
                critical = false;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::PowerSourcePolicy;

    #[test]
    fn resolve_policy_picks_matching_source() {
        let ac = PowerSourcePolicy { enabled: true, brightness: 40 };
        let battery = PowerSourcePolicy { enabled: true, brightness: 10 };
        assert_eq!(resolve_policy(true, ac, battery).brightness, 40);
        assert_eq!(resolve_policy(false, ac, battery).brightness, 10);
    }

    #[test]
    fn battery_saver_activates_only_on_battery_below_threshold() {
        assert!(battery_saver_active(false, Some(10), true));
        assert!(!battery_saver_active(true, Some(10), true));
        assert!(!battery_saver_active(false, Some(80), true));
        assert!(!battery_saver_active(false, Some(10), false));
    }

    #[test]
    fn battery_saver_restores_on_ac_or_recovery() {
        assert!(battery_saver_should_restore(true, Some(5)));
        assert!(battery_saver_should_restore(false, Some(60)));
        assert!(!battery_saver_should_restore(false, Some(30)));
    }

    #[test]
    fn reads_mains_online_state_from_sysfs_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let ac = dir.path().join("AC");
        std::fs::create_dir(&ac).unwrap();
        std::fs::write(ac.join("type"), "Mains\n").unwrap();
        std::fs::write(ac.join("online"), "1\n").unwrap();
        assert_eq!(on_ac(dir.path()), Some(true));
    }

    #[test]
    fn reads_battery_capacity_from_sysfs_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let bat = dir.path().join("BAT0");
        std::fs::create_dir(&bat).unwrap();
        std::fs::write(bat.join("type"), "Battery\n").unwrap();
        std::fs::write(bat.join("capacity"), "42\n").unwrap();
        assert_eq!(battery_percentage(dir.path()), Some(42));
    }
}
