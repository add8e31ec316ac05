// SPDX-License-Identifier: GPL-3.0-only

use crate::color::Color;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A position on the keyboard's fixed row/column matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyCoord {
    pub row: u8,
    pub col: u8,
}

impl KeyCoord {
    pub fn new(row: u8, col: u8) -> KeyCoord { KeyCoord { row, col } }

    pub fn in_bounds(self, rows: u8, cols: u8) -> bool { self.row < rows && self.col < cols }
}

impl fmt::Display for KeyCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{},{}", self.row, self.col) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseKeyCoordError(pub String);

impl fmt::Display for ParseKeyCoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid key coordinate: {}", self.0)
    }
}

impl std::str::FromStr for KeyCoord {
    type Err = ParseKeyCoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ',');
        let row = parts.next().ok_or_else(|| ParseKeyCoordError(s.to_string()))?;
        let col = parts.next().ok_or_else(|| ParseKeyCoordError(s.to_string()))?;
        let row: u8 = row.trim().parse().map_err(|_| ParseKeyCoordError(s.to_string()))?;
        let col: u8 = col.trim().parse().map_err(|_| ParseKeyCoordError(s.to_string()))?;
        Ok(KeyCoord { row, col })
    }
}

/// Sparse per-key color overrides. Serializes as `{"row,col": [r,g,b]}`
/// to keep the on-disk config document valid JSON (object keys must be
/// strings), matching the legacy config format this daemon persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerKeyMap(pub BTreeMap<KeyCoord, Color>);

impl PerKeyMap {
    pub fn new() -> PerKeyMap { PerKeyMap(BTreeMap::new()) }

    pub fn get(&self, coord: KeyCoord) -> Option<Color> { self.0.get(&coord).copied() }

    pub fn set(&mut self, coord: KeyCoord, color: Color) { self.0.insert(coord, color); }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn len(&self) -> usize { self.0.len() }

    /// A cheap signature used by the reconciler / config store to detect
    /// whether a re-applied map actually changed anything.
    pub fn signature(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (coord, color) in &self.0 {
            coord.hash(&mut hasher);
            color.r.hash(&mut hasher);
            color.g.hash(&mut hasher);
            color.b.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl Serialize for PerKeyMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (coord, color) in &self.0 {
            map.serialize_entry(&coord.to_string(), &[color.r, color.g, color.b])?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PerKeyMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw: BTreeMap<String, [u8; 3]> = BTreeMap::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        for (key, [r, g, b]) in raw {
            if let Ok(coord) = key.parse::<KeyCoord>() {
                map.insert(coord, Color::new(r, g, b));
            }
            // Unparseable keys are dropped rather than failing the whole
            // document load — a half-corrupt per-key map shouldn't take
            // down the rest of the intent.
        }
        Ok(PerKeyMap(map))
    }
}

/// Which per-power-source override is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerSourcePolicy {
    pub enabled: bool,
    pub brightness: u8,
}

impl Default for PowerSourcePolicy {
    fn default() -> Self { PowerSourcePolicy { enabled: true, brightness: 25 } }
}

/// The persisted lighting configuration. One JSON document holds the whole
/// of this struct; see `config.rs` for (de)serialization and atomic writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingIntent {
    pub effect: String,
    pub speed: u8,
    pub brightness: u8,
    pub color: Color,
    pub per_key_colors: PerKeyMap,

    pub reactive_color: Color,
    pub reactive_use_manual_color: bool,
    pub reactive_brightness: u8,

    pub autostart: bool,
    pub power_management_enabled: bool,
    pub power_off_on_suspend: bool,
    pub power_restore_on_resume: bool,
    pub power_off_on_lid_close: bool,
    pub power_restore_on_lid_open: bool,

    pub battery_saver_enabled: bool,
    pub battery_saver_brightness: u8,

    pub ac_policy: PowerSourcePolicy,
    pub battery_policy: PowerSourcePolicy,

    pub screen_dim_sync_enabled: bool,
    pub screen_dim_sync_mode: String,
    pub screen_dim_temp_brightness: u8,
}

impl Default for LightingIntent {
    fn default() -> Self {
        LightingIntent {
            effect: "static".to_string(),
            speed: 5,
            brightness: 25,
            color: Color::new(255, 255, 255),
            per_key_colors: PerKeyMap::new(),
            reactive_color: Color::new(0, 128, 255),
            reactive_use_manual_color: false,
            reactive_brightness: 50,
            autostart: true,
            power_management_enabled: true,
            power_off_on_suspend: true,
            power_restore_on_resume: true,
            power_off_on_lid_close: true,
            power_restore_on_lid_open: true,
            battery_saver_enabled: false,
            battery_saver_brightness: 10,
            ac_policy: PowerSourcePolicy { enabled: true, brightness: 35 },
            battery_policy: PowerSourcePolicy { enabled: true, brightness: 10 },
            screen_dim_sync_enabled: false,
            screen_dim_sync_mode: "dim".to_string(),
            screen_dim_temp_brightness: 5,
        }
    }
}

impl LightingIntent {
    pub const MAX_SPEED: u8 = 10;
    pub const MAX_BRIGHTNESS: u8 = 50;

    /// Clamps all numeric fields and lowercases the effect name. Called
    /// after every load and every client-side edit so an out-of-range value
    /// written by hand (or by a future version) can never reach a backend.
    pub fn normalize(&mut self) {
        self.effect = self.effect.trim().to_lowercase();
        if self.effect.is_empty() {
            self.effect = "static".to_string();
        }
        self.speed = self.speed.min(Self::MAX_SPEED);
        self.brightness = self.brightness.min(Self::MAX_BRIGHTNESS);
        self.reactive_brightness = self.reactive_brightness.min(Self::MAX_BRIGHTNESS);
        self.battery_saver_brightness = self.battery_saver_brightness.min(Self::MAX_BRIGHTNESS);
        self.screen_dim_temp_brightness = self.screen_dim_temp_brightness.min(Self::MAX_BRIGHTNESS);
        self.ac_policy.brightness = self.ac_policy.brightness.min(Self::MAX_BRIGHTNESS);
        self.battery_policy.brightness = self.battery_policy.brightness.min(Self::MAX_BRIGHTNESS);
    }

    /// A cheap signature for "did anything the reconciler cares about
    /// change", used to avoid redundant device writes.
    pub fn signature(&self) -> (String, u8, u8, u32, u64) {
        (self.effect.clone(), self.speed, self.brightness, self.color.to_u32(), self.per_key_colors.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_coord_round_trips_through_string() {
        let coord = KeyCoord::new(3, 17);
        let text = coord.to_string();
        assert_eq!(text, "3,17");
        assert_eq!(text.parse::<KeyCoord>().unwrap(), coord);
    }

    #[test]
    fn per_key_map_json_round_trip() {
        let mut map = PerKeyMap::new();
        map.set(KeyCoord::new(0, 0), Color::new(255, 0, 0));
        map.set(KeyCoord::new(5, 20), Color::new(0, 255, 0));
        let json = serde_json::to_string(&map).unwrap();
        let back: PerKeyMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }

    #[test]
    fn per_key_map_drops_unparseable_keys_instead_of_failing() {
        let json = r#"{"not-a-coord": [1,2,3], "1,1": [4,5,6]}"#;
        let map: PerKeyMap = serde_json::from_str(json).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(KeyCoord::new(1, 1)), Some(Color::new(4, 5, 6)));
    }

    #[test]
    fn normalize_clamps_and_lowercases() {
        let mut intent = LightingIntent { effect: "RAINBOW".into(), speed: 99, brightness: 200, ..Default::default() };
        intent.normalize();
        assert_eq!(intent.effect, "rainbow");
        assert_eq!(intent.speed, LightingIntent::MAX_SPEED);
        assert_eq!(intent.brightness, LightingIntent::MAX_BRIGHTNESS);
    }

    #[test]
    fn normalize_defaults_empty_effect_to_static() {
        let mut intent = LightingIntent { effect: "   ".into(), ..Default::default() };
        intent.normalize();
        assert_eq!(intent.effect, "static");
    }
}
