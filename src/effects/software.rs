// SPDX-License-Identifier: GPL-3.0-only

use crate::color::Color;
use crate::effects::render::ColorGrid;
use rand::Rng;
use std::time::Duration;

pub const SOFTWARE_EFFECT_NAMES: &[&str] = &[
    "rainbow_wave",
    "rainbow_swirl",
    "spectrum",
    "color_cycle",
    "twinkle",
    "strobe",
    "chase",
    "fire",
    "rain",
    "random",
    "breathing",
];

/// UI speed (0-10) to an animation pace multiplier. Quadratic so speed 10
/// is meaningfully snappier than speed 5, per SPEC_FULL.md §4.4.
pub fn pace(ui_speed: u8) -> f32 {
    let s = f32::from(ui_speed.min(10));
    0.25 + 9.75 * (s / 10.0).powi(2)
}

/// The interval between software-effect frames never drops below a floor
/// fast enough to look smooth but slow enough to not peg a core at max
/// pace.
pub fn frame_interval(ui_speed: u8) -> Duration {
    let base = Duration::from_millis(1000 / 60);
    let divisor = pace(ui_speed).max(0.01);
    Duration::from_secs_f32(base.as_secs_f32() / divisor).max(Duration::from_millis(8))
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Color {
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r1, g1, b1) = match h as u32 {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Color::new(((r1 + m) * 255.0) as u8, ((g1 + m) * 255.0) as u8, ((b1 + m) * 255.0) as u8)
}

/// Renders one frame of `name` at elapsed time `t` (seconds since the
/// effect started) and `speed_pace` (from `pace()`). Unknown effect names
/// fall back to a static base-color frame rather than panicking — matching
/// the engine's "never crash the process on a lighting failure" policy.
pub fn render_frame(name: &str, t: f32, speed_pace: f32, rows: u8, cols: u8, base: Color, rng: &mut impl Rng) -> ColorGrid {
    match name {
        "rainbow_wave" => rainbow_wave(t, speed_pace, rows, cols),
        "rainbow_swirl" => rainbow_swirl(t, speed_pace, rows, cols),
        "spectrum" | "color_cycle" => spectrum(t, speed_pace, rows, cols),
        "twinkle" => twinkle(t, speed_pace, rows, cols, base, rng),
        "strobe" => strobe(t, speed_pace, rows, cols, base),
        "chase" => chase(t, speed_pace, rows, cols, base),
        "fire" => fire(t, speed_pace, rows, cols, rng),
        "rain" => rain(t, speed_pace, rows, cols, rng),
        "random" => random_sparkle(rows, cols, rng),
        "breathing" => breathing(t, speed_pace, rows, cols, base),
        _ => ColorGrid::filled(rows, cols, base),
    }
}

fn rainbow_wave(t: f32, speed_pace: f32, rows: u8, cols: u8) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, Color::BLACK);
    for row in 0..rows {
        for col in 0..cols {
            let hue = (f32::from(col) * 12.0 + t * speed_pace * 60.0) % 360.0;
            grid.set(crate::intent::KeyCoord::new(row, col), hsv_to_rgb(hue, 1.0, 1.0));
        }
    }
    grid
}

fn rainbow_swirl(t: f32, speed_pace: f32, rows: u8, cols: u8) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, Color::BLACK);
    let cx = f32::from(cols) / 2.0;
    let cy = f32::from(rows) / 2.0;
    for row in 0..rows {
        for col in 0..cols {
            let angle = (f32::from(row) - cy).atan2(f32::from(col) - cx).to_degrees();
            let hue = (angle + t * speed_pace * 90.0) % 360.0;
            grid.set(crate::intent::KeyCoord::new(row, col), hsv_to_rgb(hue, 1.0, 1.0));
        }
    }
    grid
}

fn spectrum(t: f32, speed_pace: f32, rows: u8, cols: u8) -> ColorGrid {
    let hue = (t * speed_pace * 45.0) % 360.0;
    ColorGrid::filled(rows, cols, hsv_to_rgb(hue, 1.0, 1.0))
}

fn breathing(t: f32, speed_pace: f32, rows: u8, cols: u8, base: Color) -> ColorGrid {
    let phase = (t * speed_pace * 1.2).sin() * 0.5 + 0.5;
    let grid = ColorGrid::filled(rows, cols, base);
    super::render::scale_grid_nonzero(&grid, phase.clamp(0.05, 1.0))
}

fn strobe(t: f32, speed_pace: f32, rows: u8, cols: u8, base: Color) -> ColorGrid {
    let on = ((t * speed_pace * 4.0) as u64) % 2 == 0;
    let color = if on { base } else { Color::BLACK.scale(0.0, false) };
    // Anti-blink: never emit a true full-black frame when the backdrop is
    // non-black — nudge the "off" phase to a dim version of base instead.
    let visible = if on { color } else { base.scale(0.04, true) };
    ColorGrid::filled(rows, cols, visible)
}

fn chase(t: f32, speed_pace: f32, rows: u8, cols: u8, base: Color) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, Color::BLACK);
    let width = 3i32;
    let head = ((t * speed_pace * f32::from(cols)) as i32) % i32::from(cols);
    for row in 0..rows {
        for col in 0..cols {
            let dist = (i32::from(col) - head).rem_euclid(i32::from(cols));
            let intensity = if dist < width { 1.0 - (dist as f32 / width as f32) } else { 0.0 };
            grid.set(crate::intent::KeyCoord::new(row, col), base.scale(intensity, intensity > 0.0));
        }
    }
    grid
}

fn fire(t: f32, speed_pace: f32, rows: u8, cols: u8, rng: &mut impl Rng) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, Color::BLACK);
    for row in 0..rows {
        for col in 0..cols {
            let flicker = rng.gen_range(0.55..1.0);
            let heat = (1.0 - f32::from(row) / f32::from(rows.max(1))) * flicker;
            let _ = t * speed_pace; // pace still influences caller's frame rate
            grid.set(crate::intent::KeyCoord::new(row, col), hsv_to_rgb(20.0 * heat, 1.0, heat));
        }
    }
    grid
}

fn rain(t: f32, speed_pace: f32, rows: u8, cols: u8, rng: &mut impl Rng) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, Color::BLACK);
    for col in 0..cols {
        let phase = (t * speed_pace * 2.0 + f32::from(col) * 0.37).fract();
        let drop_row = (phase * f32::from(rows)) as u8;
        if rng.gen_bool(0.9) {
            grid.set(crate::intent::KeyCoord::new(drop_row.min(rows.saturating_sub(1)), col), Color::new(40, 120, 255));
        }
    }
    grid
}

fn random_sparkle(rows: u8, cols: u8, rng: &mut impl Rng) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, Color::BLACK);
    for row in 0..rows {
        for col in 0..cols {
            grid.set(crate::intent::KeyCoord::new(row, col), Color::new(rng.gen(), rng.gen(), rng.gen()));
        }
    }
    grid
}

fn twinkle(t: f32, speed_pace: f32, rows: u8, cols: u8, base: Color, rng: &mut impl Rng) -> ColorGrid {
    let mut grid = ColorGrid::filled(rows, cols, base.scale(0.08, true));
    let sparkle_count = (f32::from(rows) * f32::from(cols) * 0.05 * speed_pace.min(3.0)).round() as u32;
    let _ = t;
    for _ in 0..sparkle_count {
        let row = rng.gen_range(0..rows);
        let col = rng.gen_range(0..cols);
        grid.set(crate::intent::KeyCoord::new(row, col), Color::WHITE);
    }
    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn pace_is_quadratic_and_monotonic() {
        assert!((pace(0) - 0.25).abs() < 1e-6);
        assert!((pace(10) - 10.0).abs() < 1e-6);
        assert!(pace(10) > pace(5));
        assert!(pace(5) > pace(1));
    }

    #[test]
    fn unknown_effect_falls_back_to_static_base() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let grid = render_frame("not_a_real_effect", 0.0, 1.0, 2, 2, Color::new(9, 8, 7), &mut rng);
        assert_eq!(grid.get(crate::intent::KeyCoord::new(0, 0)), Color::new(9, 8, 7));
    }

    #[test]
    fn strobe_never_emits_full_black_with_nonblack_base() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for i in 0..20 {
            let t = i as f32 * 0.05;
            let grid = render_frame("strobe", t, 1.0, 1, 1, Color::new(255, 0, 0), &mut rng);
            let c = grid.get(crate::intent::KeyCoord::new(0, 0));
            assert!(c.r > 0 || c.g > 0 || c.b > 0, "frame at t={t} was fully black");
        }
    }
}
