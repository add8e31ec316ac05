// SPDX-License-Identifier: GPL-3.0-only

use crate::color::Color;
use crate::effects::render::ColorGrid;
use crate::intent::KeyCoord;
use rand::Rng;
use std::time::{Duration, Instant};

/// A transient visual event anchored at a matrix coordinate, spawned by a
/// recognized key-down (or, absent an input device, a synthetic spawner).
#[derive(Debug, Clone, Copy)]
pub struct Pulse {
    pub coord: KeyCoord,
    pub born: Instant,
    pub ttl: Duration,
}

impl Pulse {
    pub fn age(&self, now: Instant) -> f32 { now.duration_since(self.born).as_secs_f32() }

    pub fn is_expired(&self, now: Instant) -> bool { self.age(now) >= self.ttl.as_secs_f32() }

    /// 1.0 when freshly spawned, 0.0 at TTL expiry.
    pub fn intensity(&self, now: Instant) -> f32 { (1.0 - self.age(now) / self.ttl.as_secs_f32()).clamp(0.0, 1.0) }
}

/// TTL scales inversely with pace — faster effects get shorter-lived,
/// snappier pulses so the keyboard doesn't look smeared at high speed.
pub fn pulse_ttl(speed_pace: f32) -> Duration { Duration::from_secs_f32((1.2 / speed_pace.max(0.1)).clamp(0.15, 2.0)) }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactiveMode {
    Fade,
    Ripple,
}

impl ReactiveMode {
    pub fn from_effect_name(name: &str) -> ReactiveMode {
        if name.ends_with("ripple") { ReactiveMode::Ripple } else { ReactiveMode::Fade }
    }
}

/// Renders every live pulse into a per-cell overlay, on top of `backdrop`.
/// `Fade` mode lights only the pulse's own cell, dimming over its TTL.
/// `Ripple` mode spreads an expanding ring whose radius grows with age and
/// whose brightness falls off with distance from the pulse center.
pub fn render_pulses(pulses: &[Pulse], mode: ReactiveMode, color: Color, rows: u8, cols: u8, now: Instant) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, Color::BLACK);
    for pulse in pulses {
        if pulse.is_expired(now) {
            continue;
        }
        let intensity = pulse.intensity(now);
        match mode {
            ReactiveMode::Fade => {
                let existing = grid.get(pulse.coord);
                let blended = color.scale(intensity, intensity > 0.0);
                grid.set(pulse.coord, brighter(existing, blended));
            }
            ReactiveMode::Ripple => {
                let radius = pulse.age(now) * 6.0;
                for row in 0..rows {
                    for col in 0..cols {
                        let dr = f32::from(row) - f32::from(pulse.coord.row);
                        let dc = f32::from(col) - f32::from(pulse.coord.col);
                        let dist = (dr * dr + dc * dc).sqrt();
                        let ring = (1.0 - (dist - radius).abs() / 2.0).clamp(0.0, 1.0);
                        if ring <= 0.0 {
                            continue;
                        }
                        let coord = KeyCoord::new(row, col);
                        let existing = grid.get(coord);
                        let blended = color.scale(ring * intensity, ring * intensity > 0.0);
                        grid.set(coord, brighter(existing, blended));
                    }
                }
            }
        }
    }
    grid
}

fn brighter(a: Color, b: Color) -> Color {
    Color::new(a.r.max(b.r), a.g.max(b.g), a.b.max(b.b))
}

/// Resolves a physical key-down event (row/col unknown to the caller) to a
/// matrix coordinate via the profile keymap; falls back to a random
/// in-bounds coordinate when the keymap has no entry, so an unrecognized
/// scancode still animates somewhere instead of being dropped.
pub fn resolve_coord(keymap: &std::collections::HashMap<u16, KeyCoord>, evdev_code: u16, rows: u8, cols: u8, rng: &mut impl Rng) -> KeyCoord {
    keymap.get(&evdev_code).copied().unwrap_or_else(|| KeyCoord::new(rng.gen_range(0..rows), rng.gen_range(0..cols)))
}

/// Synthetic pulse spawner used when no recognized input device is present,
/// so a reactive effect still animates instead of sitting static.
pub fn synthetic_pulse(rows: u8, cols: u8, speed_pace: f32, rng: &mut impl Rng) -> Pulse {
    Pulse { coord: KeyCoord::new(rng.gen_range(0..rows), rng.gen_range(0..cols)), born: Instant::now(), ttl: pulse_ttl(speed_pace) }
}

/// Enumerates evdev input devices, keeping only ones that look like
/// keyboards (report `EV_KEY` and have a name without "mouse"/"touchpad").
/// Polled synchronously from inside the effect worker's own loop rather
/// than through a separate reactor.
pub fn open_keyboard_devices() -> Vec<evdev::Device> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir("/dev/input") else { return out };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.file_name().map(|n| n.to_string_lossy().starts_with("event")).unwrap_or(false) {
            continue;
        }
        if let Ok(device) = evdev::Device::open(&path) {
            let name = device.name().unwrap_or_default().to_lowercase();
            if name.contains("mouse") || name.contains("touchpad") || name.contains("trackpad") {
                continue;
            }
            if device.supported_events().contains(evdev::types::EventType::KEY) {
                out.push(device);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_intensity_decays_to_zero_at_ttl() {
        let pulse = Pulse { coord: KeyCoord::new(0, 0), born: Instant::now() - Duration::from_millis(500), ttl: Duration::from_millis(500) };
        let now = Instant::now();
        assert!(pulse.intensity(now) <= 0.05);
        assert!(pulse.is_expired(now));
    }

    #[test]
    fn ttl_scales_inversely_with_pace() {
        assert!(pulse_ttl(10.0) < pulse_ttl(1.0));
    }

    #[test]
    fn reactive_mode_parses_from_effect_name() {
        assert_eq!(ReactiveMode::from_effect_name("reactive_fade"), ReactiveMode::Fade);
        assert_eq!(ReactiveMode::from_effect_name("reactive_ripple"), ReactiveMode::Ripple);
    }

    #[test]
    fn resolve_coord_falls_back_to_random_in_bounds() {
        let keymap = std::collections::HashMap::new();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let coord = resolve_coord(&keymap, 999, 6, 21, &mut rng);
        assert!(coord.in_bounds(6, 21));
    }

    #[test]
    fn fresh_fade_pulse_lights_only_its_own_cell() {
        let now = Instant::now();
        let pulse = Pulse { coord: KeyCoord::new(2, 3), born: now, ttl: Duration::from_secs(1) };
        let grid = render_pulses(&[pulse], ReactiveMode::Fade, Color::new(255, 0, 0), 6, 21, now);
        assert!(grid.get(KeyCoord::new(2, 3)).r > 0);
        assert_eq!(grid.get(KeyCoord::new(0, 0)), Color::BLACK);
    }
}
