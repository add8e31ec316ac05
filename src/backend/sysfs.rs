// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::{HardwareEffectPayload, KeyboardBackend, KeyboardDevice};
use crate::capabilities::{BackendCapabilities, ProbeResult};
use crate::color::Color;
use crate::errors::LightingError;
use crate::intent::PerKeyMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const NOISE_TOKENS: &[&str] = &["capslock", "numlock", "scrolllock", "micmute", "mute", "airplane"];
const KEYBOARD_TOKENS: &[&str] = &["kbd", "keyboard"];
const VENDOR_TOKENS: &[&str] =
    &["tuxedo", "asus", "system76", "hp_omen", "dell", "tpacpi", "ite", "clevo"];

const MATRIX_ROWS: u8 = 6;
const MATRIX_COLS: u8 = 21;

fn leds_root() -> PathBuf {
    std::env::var("RGBKBD_SYSFS_LEDS_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("/sys/class/leds"))
}

/// Plain substring checks, deliberately not a regex — vendor LED class
/// names vary too much in punctuation and separators to pin to a pattern.
fn is_candidate_led(name: &str) -> bool {
    let lower = name.to_lowercase();
    KEYBOARD_TOKENS.iter().any(|t| lower.contains(t)) || VENDOR_TOKENS.iter().any(|t| lower.contains(t))
}

fn score_led_dir(dir: &Path) -> i32 {
    let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("").to_lowercase();
    let mut score = 0i32;

    if name.contains("kbd_backlight") {
        score += 40;
    }
    if NOISE_TOKENS.iter().any(|t| name.contains(t)) {
        score -= 60;
    }
    if dir.join("multi_intensity").exists() {
        score += 50;
    }
    if dir.join("color").exists() {
        score += 45;
    }
    if dir.join("rgb").exists() {
        score += 45;
    }
    if dir.join("color_center").exists() || dir.join("color_left").exists() {
        score += 45;
    }
    if dir.join("brightness").metadata().map(|m| !m.permissions().readonly()).unwrap_or(false) {
        score += 7;
    } else if dir.join("brightness").exists() {
        score += 3;
    }
    score
}

fn find_leds() -> Vec<PathBuf> {
    let root = leds_root();
    let mut candidates: Vec<(PathBuf, i32)> = Vec::new();
    let Ok(entries) = fs::read_dir(&root) else { return Vec::new() };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !is_candidate_led(&name) {
            continue;
        }
        let score = score_led_dir(&path);
        if score > 0 {
            candidates.push((path, score));
        }
    }
    candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    candidates.into_iter().map(|(p, _)| p).collect()
}

fn read_trimmed(path: &Path) -> std::io::Result<String> { Ok(fs::read_to_string(path)?.trim().to_string()) }

fn parse_u32(path: &Path) -> std::io::Result<u32> {
    read_trimmed(path)?.parse().map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "not a number"))
}

fn write_attr(path: &Path, value: &str) -> Result<(), LightingError> {
    fs::write(path, value).map_err(|e| LightingError::classify(&path.to_string_lossy(), e))
}

/// Which color sub-attribute a given LED directory exposes, in the
/// priority order `device.py` tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorAttr {
    MultiIntensity,
    Color,
    Rgb,
    System76Zones,
    None,
}

fn detect_color_attr(dir: &Path) -> ColorAttr {
    if dir.join("multi_intensity").exists() {
        ColorAttr::MultiIntensity
    } else if dir.join("color").exists() {
        ColorAttr::Color
    } else if dir.join("rgb").exists() {
        ColorAttr::Rgb
    } else if dir.join("color_left").exists() || dir.join("color_center").exists() {
        ColorAttr::System76Zones
    } else {
        ColorAttr::None
    }
}

pub struct SysfsBackend;

impl SysfsBackend {
    pub fn new() -> SysfsBackend { SysfsBackend }
}

impl Default for SysfsBackend {
    fn default() -> Self { Self::new() }
}

impl KeyboardBackend for SysfsBackend {
    fn name(&self) -> &'static str { "sysfs" }

    fn probe(&self) -> ProbeResult {
        let leds = find_leds();
        if leds.is_empty() {
            return ProbeResult::unavailable("no keyboard-lighting led class devices found");
        }
        let has_color = leds.iter().any(|d| detect_color_attr(d) != ColorAttr::None);
        let confidence = if has_color { 70 } else { 40 };
        ProbeResult::available(confidence, format!("{} candidate led(s) found", leds.len()))
            .with_identifier("led_count", leds.len().to_string())
            .with_identifier("primary", leds[0].display().to_string())
    }

    fn priority(&self) -> u8 { 50 }

    fn capabilities(&self) -> BackendCapabilities {
        let leds = find_leds();
        let color = leds.iter().any(|d| detect_color_attr(d) != ColorAttr::None);
        // Multiple LED directories (or System76 left/center/right/extra
        // zones under one directory) mean true per-key is impossible, but
        // the zone-bucketing emulation makes per_key usable; one LED with
        // no zone sub-attributes means brightness-only.
        let zoned = leds.len() > 1 || leds.first().map(|d| detect_color_attr(d) == ColorAttr::System76Zones).unwrap_or(false);
        BackendCapabilities { per_key: color, per_key_is_virtual: color && zoned, color, hardware_effects: false, palette: false }
    }

    fn matrix_dimensions(&self) -> (u8, u8) { (MATRIX_ROWS, MATRIX_COLS) }

    fn hardware_effect_list(&self) -> &'static [&'static str] { &[] }

    fn palette_list(&self) -> &'static [&'static str] { &[] }

    fn open_device(&self) -> Result<Box<dyn KeyboardDevice>, LightingError> {
        let leds = find_leds();
        if leds.is_empty() {
            return Err(LightingError::BackendUnsupported("no candidate led found".into()));
        }

        let mut zones = Vec::new();
        // System76-style single directory with four zone files takes
        // priority; otherwise each LED directory is its own zone.
        if leds.len() == 1 && detect_color_attr(&leds[0]) == ColorAttr::System76Zones {
            for suffix in ["color_left", "color_center", "color_right", "color_extra"] {
                if leds[0].join(suffix).exists() {
                    zones.push(Zone { dir: leds[0].clone(), attr: ColorAttr::System76Zones, file: Some(suffix.to_string()) });
                }
            }
        } else {
            for dir in &leds {
                let attr = detect_color_attr(dir);
                zones.push(Zone { dir: dir.clone(), attr, file: None });
            }
        }

        let max_brightness = parse_u32(&leds[0].join("max_brightness")).unwrap_or(255);

        Ok(Box::new(SysfsDevice { brightness_path: leds[0].join("brightness"), max_brightness, zones, brightness: 0, color: Color::WHITE }))
    }
}

struct Zone {
    dir: PathBuf,
    attr: ColorAttr,
    file: Option<String>,
}

pub struct SysfsDevice {
    brightness_path: PathBuf,
    max_brightness: u32,
    zones: Vec<Zone>,
    brightness: u8,
    color: Color,
}

impl SysfsDevice {
    /// `sysfs = round(intent / 50 * max)`, matching SPEC_FULL.md §4.2/§8.
    fn to_sysfs_scale(&self, intent: u8) -> u32 {
        ((f64::from(intent) / 50.0) * f64::from(self.max_brightness)).round() as u32
    }

    fn from_sysfs_scale(&self, sysfs: u32) -> u8 {
        if self.max_brightness == 0 {
            return 0;
        }
        ((f64::from(sysfs) / f64::from(self.max_brightness)) * 50.0).round().clamp(0.0, 50.0) as u8
    }

    fn write_zone_color(&self, zone: &Zone, color: Color) -> Result<(), LightingError> {
        let attempt = |zone: &Zone, color: Color| -> Result<(), LightingError> {
            match zone.attr {
                ColorAttr::MultiIntensity => write_attr(&zone.dir.join("multi_intensity"), &format!("{} {} {}", color.r, color.g, color.b)),
                ColorAttr::Color => write_attr(&zone.dir.join("color"), &color.to_hex()),
                ColorAttr::Rgb => write_attr(&zone.dir.join("rgb"), &format!("{} {} {}", color.r, color.g, color.b)),
                ColorAttr::System76Zones => {
                    let file = zone.file.as_deref().unwrap_or("color_center");
                    write_attr(&zone.dir.join(file), &color.to_hex())
                }
                ColorAttr::None => Ok(()),
            }
        };

        match attempt(zone, color) {
            Ok(()) => Ok(()),
            Err(LightingError::PermissionDenied { device, source }) => {
                if run_privileged_helper(&zone.dir, color).is_ok() {
                    Ok(())
                } else {
                    Err(LightingError::PermissionDenied { device, source })
                }
            }
            Err(other) => Err(other),
        }
    }
}

/// Optional privileged-helper fallback for root-owned sysfs nodes. Absent
/// a configured helper this simply fails and the caller surfaces the
/// original permission error.
fn run_privileged_helper(dir: &Path, color: Color) -> Result<(), ()> {
    let helper = std::env::var("RGBKBD_PRIVILEGED_HELPER").map_err(|_| ())?;
    let status = Command::new("pkexec")
        .arg(&helper)
        .arg(dir)
        .arg(color.to_hex())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|_| ())?;
    if status.success() { Ok(()) } else { Err(()) }
}

impl KeyboardDevice for SysfsDevice {
    fn turn_off(&mut self) -> Result<(), LightingError> {
        self.brightness = 0;
        write_attr(&self.brightness_path, "0")
    }

    fn is_off(&self) -> Result<bool, LightingError> {
        let raw = parse_u32(&self.brightness_path).map_err(|e| LightingError::classify("sysfs", e))?;
        Ok(raw == 0)
    }

    fn get_brightness(&self) -> Result<u8, LightingError> {
        let raw = parse_u32(&self.brightness_path).map_err(|e| LightingError::classify("sysfs", e))?;
        Ok(self.from_sysfs_scale(raw))
    }

    fn set_brightness(&mut self, brightness: u8) -> Result<(), LightingError> {
        self.brightness = brightness;
        write_attr(&self.brightness_path, &self.to_sysfs_scale(brightness).to_string())
    }

    fn set_color(&mut self, color: Color, brightness: u8) -> Result<(), LightingError> {
        self.color = color;
        for zone in &self.zones {
            self.write_zone_color(zone, color)?;
        }
        self.set_brightness(brightness)
    }

    fn set_key_colors(&mut self, map: &PerKeyMap, base: Color, brightness: u8, _enable_user_mode: bool) -> Result<(), LightingError> {
        if self.zones.is_empty() {
            return self.set_brightness(brightness);
        }
        let n_zones = self.zones.len() as u32;
        let chunk = f64::from(MATRIX_COLS) / f64::from(n_zones as u8).max(1.0);

        let mut sums = vec![(0u32, 0u32, 0u32, 0u32); self.zones.len()];
        for (coord, color) in &map.0 {
            let zone_idx = ((f64::from(coord.col) / chunk) as usize).min(self.zones.len() - 1);
            sums[zone_idx].0 += u32::from(color.r);
            sums[zone_idx].1 += u32::from(color.g);
            sums[zone_idx].2 += u32::from(color.b);
            sums[zone_idx].3 += 1;
        }

        for (idx, zone) in self.zones.iter().enumerate() {
            let (r, g, b, count) = sums[idx];
            let color = if count == 0 { base } else { Color::new((r / count) as u8, (g / count) as u8, (b / count) as u8) };
            self.write_zone_color(zone, color)?;
        }

        self.set_brightness(brightness)
    }

    fn set_effect(&mut self, payload: &HardwareEffectPayload) -> Result<(), LightingError> {
        Err(LightingError::BackendUnsupported(format!("sysfs backend has no hardware effects ({})", payload.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_matching_is_substring_not_regex() {
        assert!(is_candidate_led("tuxedo::kbd_backlight"));
        assert!(is_candidate_led("asus::kbd"));
        assert!(is_candidate_led("system76_acpi::kbd_backlight"));
        assert!(!is_candidate_led("input3::capslock"));
    }

    #[test]
    fn noise_tokens_are_penalized_below_zero() {
        let dir = tempfile::tempdir().unwrap();
        let led = dir.path().join("foo::capslock");
        fs::create_dir_all(&led).unwrap();
        fs::write(led.join("brightness"), "0").unwrap();
        assert!(score_led_dir(&led) < 0);
    }

    #[test]
    fn brightness_round_trips_within_quantization() {
        let device = SysfsDevice { brightness_path: PathBuf::new(), max_brightness: 100, zones: Vec::new(), brightness: 0, color: Color::WHITE };
        assert_eq!(device.to_sysfs_scale(10), 20);
        assert_eq!(device.from_sysfs_scale(20), 10);
    }

    #[test]
    fn zone_bucketing_covers_full_matrix_width() {
        let device = SysfsDevice {
            brightness_path: PathBuf::new(),
            max_brightness: 255,
            zones: vec![
                Zone { dir: PathBuf::new(), attr: ColorAttr::None, file: None },
                Zone { dir: PathBuf::new(), attr: ColorAttr::None, file: None },
            ],
            brightness: 0,
            color: Color::WHITE,
        };
        let chunk = f64::from(MATRIX_COLS) / (device.zones.len() as f64);
        let left_zone = ((0.0_f64 / chunk) as usize).min(1);
        let right_zone = ((f64::from(MATRIX_COLS - 1) / chunk) as usize).min(1);
        assert_eq!(left_zone, 0);
        assert_eq!(right_zone, 1);
    }
}
