// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::{HardwareEffectPayload, KeyboardBackend, KeyboardDevice};
use crate::capabilities::{BackendCapabilities, ProbeResult};
use crate::color::Color;
use crate::errors::LightingError;
use crate::intent::PerKeyMap;
use std::process::{Command, Stdio};
use std::time::Duration;

const MATRIX_ROWS: u8 = 6;
const MATRIX_COLS: u8 = 21;
const CLI_TIMEOUT: Duration = Duration::from_secs(2);

fn cli_name() -> String { std::env::var("RGBKBD_CLI_NAME").unwrap_or_else(|_| "asusctl".to_string()) }

fn zones() -> Vec<String> {
    std::env::var("RGBKBD_ASUSCTL_ZONES").map(|v| v.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect()).unwrap_or_default()
}

fn which(cmd: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(cmd).is_file()))
        .unwrap_or(false)
}

/// Runs a vendor CLI subcommand with a bounded timeout, per SPEC_FULL.md
/// §4.2's "≤2 s timeout" requirement. `std::process::Command` has no
/// built-in timeout, so this spawns and polls in small increments rather
/// than blocking indefinitely on `wait()`.
fn run_with_timeout(cmd: &str, args: &[&str]) -> Result<(), LightingError> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| LightingError::classify(cmd, e))?;

    let start = std::time::Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return if status.success() {
                    Ok(())
                } else {
                    Err(LightingError::ProtocolError { device: cmd.to_string(), reason: format!("exited with {status}") })
                };
            }
            Ok(None) => {
                if start.elapsed() > CLI_TIMEOUT {
                    let _ = child.kill();
                    return Err(LightingError::Timeout(format!("{cmd} did not exit within {CLI_TIMEOUT:?}")));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(LightingError::classify(cmd, e)),
        }
    }
}

fn brightness_level(brightness: u8) -> &'static str {
    match brightness {
        0 => "off",
        1..=16 => "low",
        17..=33 => "med",
        _ => "high",
    }
}

pub struct CliBackend;

impl CliBackend {
    pub fn new() -> CliBackend { CliBackend }
}

impl Default for CliBackend {
    fn default() -> Self { Self::new() }
}

impl KeyboardBackend for CliBackend {
    fn name(&self) -> &'static str { "cli" }

    fn probe(&self) -> ProbeResult {
        let cmd = cli_name();
        if which(&cmd) {
            ProbeResult::available(30, format!("{cmd} found on PATH")).with_identifier("cli", cmd)
        } else {
            ProbeResult::unavailable(format!("{cmd} not found on PATH"))
        }
    }

    fn priority(&self) -> u8 { 10 }

    fn capabilities(&self) -> BackendCapabilities {
        let zone_count = zones().len();
        BackendCapabilities { per_key: zone_count > 1, per_key_is_virtual: zone_count > 1, color: true, hardware_effects: false, palette: false }
    }

    fn matrix_dimensions(&self) -> (u8, u8) { (MATRIX_ROWS, MATRIX_COLS) }

    fn hardware_effect_list(&self) -> &'static [&'static str] { &[] }

    fn palette_list(&self) -> &'static [&'static str] { &[] }

    fn open_device(&self) -> Result<Box<dyn KeyboardDevice>, LightingError> {
        if !which(&cli_name()) {
            return Err(LightingError::BackendUnsupported(format!("{} not found on PATH", cli_name())));
        }
        Ok(Box::new(CliDevice { cmd: cli_name(), zones: zones(), brightness: 0, off: true }))
    }
}

pub struct CliDevice {
    cmd: String,
    zones: Vec<String>,
    brightness: u8,
    off: bool,
}

impl CliDevice {
    fn set_zone_color(&self, zone: Option<&str>, color: Color) -> Result<(), LightingError> {
        let hex = color.to_hex();
        let mut args = vec!["aura", "effect", "static", "-c", hex.as_str()];
        if let Some(zone) = zone {
            args.push("--zone");
            args.push(zone);
        }
        run_with_timeout(&self.cmd, &args)
    }
}

impl KeyboardDevice for CliDevice {
    fn turn_off(&mut self) -> Result<(), LightingError> {
        run_with_timeout(&self.cmd, &["leds", "set", "off"])?;
        self.off = true;
        Ok(())
    }

    fn is_off(&self) -> Result<bool, LightingError> { Ok(self.off) }

    fn get_brightness(&self) -> Result<u8, LightingError> { Ok(self.brightness) }

    fn set_brightness(&mut self, brightness: u8) -> Result<(), LightingError> {
        self.brightness = brightness;
        self.off = brightness == 0;
        run_with_timeout(&self.cmd, &["leds", "set", brightness_level(brightness)])
    }

    fn set_color(&mut self, color: Color, brightness: u8) -> Result<(), LightingError> {
        self.set_zone_color(None, color)?;
        self.set_brightness(brightness)
    }

    fn set_key_colors(&mut self, map: &PerKeyMap, base: Color, brightness: u8, _enable_user_mode: bool) -> Result<(), LightingError> {
        if self.zones.is_empty() || map.is_empty() {
            return self.set_color(base, brightness);
        }
        let n_zones = self.zones.len();
        let chunk = f64::from(MATRIX_COLS) / (n_zones as f64);
        let mut sums = vec![(0u32, 0u32, 0u32, 0u32); n_zones];
        for (coord, color) in &map.0 {
            let idx = ((f64::from(coord.col) / chunk) as usize).min(n_zones - 1);
            sums[idx].0 += u32::from(color.r);
            sums[idx].1 += u32::from(color.g);
            sums[idx].2 += u32::from(color.b);
            sums[idx].3 += 1;
        }
        for (idx, zone) in self.zones.iter().enumerate() {
            let (r, g, b, count) = sums[idx];
            let color = if count == 0 { base } else { Color::new((r / count) as u8, (g / count) as u8, (b / count) as u8) };
            self.set_zone_color(Some(zone), color)?;
        }
        self.set_brightness(brightness)
    }

    fn set_effect(&mut self, payload: &HardwareEffectPayload) -> Result<(), LightingError> {
        Err(LightingError::BackendUnsupported(format!("cli backend has no hardware effects ({})", payload.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_levels_are_monotonic_buckets() {
        assert_eq!(brightness_level(0), "off");
        assert_eq!(brightness_level(10), "low");
        assert_eq!(brightness_level(25), "med");
        assert_eq!(brightness_level(50), "high");
    }
}
