// SPDX-License-Identifier: GPL-3.0-only

use crate::color::Color;
use crate::device::DeviceHandle;
use crate::effects::render::{densify, ColorGrid};
use crate::intent::PerKeyMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TARGET_FPS: u32 = 45;
const MAX_STEPS: u32 = 18;
const MIN_STEPS: u32 = 2;

/// Picks a step count for a fade given a duration, capped at ~`TARGET_FPS`
/// frames and clamped to `[MIN_STEPS, MAX_STEPS]`.
pub fn choose_steps(duration: Duration) -> u32 {
    let by_fps = (duration.as_secs_f64() * f64::from(TARGET_FPS)).round() as u32;
    by_fps.clamp(MIN_STEPS, MAX_STEPS)
}

/// Fades the device from its current uniform color to `target` over
/// `duration`, holding the device lock for each individual step (not for
/// the whole fade, so other callers aren't starved if the fade is
/// cancelled mid-flight by a stop flag check between steps).
pub fn fade_uniform_color(device: &DeviceHandle, from: Color, target: Color, brightness: u8, duration: Duration, should_stop: impl Fn() -> bool) {
    let steps = choose_steps(duration);
    let step_duration = duration / steps.max(1);
    for step in 1..=steps {
        if should_stop() {
            return;
        }
        let t = step as f32 / steps as f32;
        let color = from.lerp(target, t).scale(1.0, brightness > 0);
        let _ = device.set_color(color, brightness);
        std::thread::sleep(step_duration);
    }
}

/// Fades a per-key backdrop in from black (or from `from`) to the full
/// target grid, one step at a time.
pub fn fade_in_per_key(
    device: &DeviceHandle,
    from: Color,
    target_color: Color,
    target_map: &PerKeyMap,
    rows: u8,
    cols: u8,
    brightness: u8,
    duration: Duration,
    should_stop: impl Fn() -> bool,
) {
    let target_grid = densify(target_color, target_map, rows, cols);
    let steps = choose_steps(duration);
    let step_duration = duration / steps.max(1);
    for step in 1..=steps {
        if should_stop() {
            return;
        }
        let t = step as f32 / steps as f32;
        let mut frame = ColorGrid::filled(rows, cols, Color::BLACK);
        for (coord, target) in target_grid.iter() {
            frame.set(coord, from.lerp(target, t).scale(1.0, brightness > 0));
        }
        let _ = device.set_key_colors(&frame.into_per_key_map(), target_color, brightness, step == 1);
        std::thread::sleep(step_duration);
    }
}

/// Each call bumps the shared generation counter and returns it. An
/// in-flight fade compares its captured generation against the live value
/// before every step and aborts silently on mismatch — this is what lets a
/// rapid sequence of policy changes (lid close/open storms) cancel a
/// stale fade instead of layering two fades that fight each other.
#[derive(Default)]
pub struct FadeGeneration(AtomicU64);

impl FadeGeneration {
    pub fn new() -> FadeGeneration { FadeGeneration(AtomicU64::new(0)) }

    pub fn bump(&self) -> u64 { self.0.fetch_add(1, Ordering::SeqCst) + 1 }

    pub fn current(&self) -> u64 { self.0.load(Ordering::SeqCst) }
}

/// Fades brightness from `from` to `to`, aborting if `generation` no longer
/// matches the engine's live fade generation (a newer fade superseded this
/// one) or the shared `should_stop` flag fires.
pub fn fade_brightness(
    device: &DeviceHandle,
    color: Color,
    from: u8,
    to: u8,
    duration: Duration,
    generation: Arc<FadeGeneration>,
    my_generation: u64,
    should_stop: impl Fn() -> bool,
) {
    if from == to {
        return;
    }
    let steps = choose_steps(duration);
    let step_duration = duration / steps.max(1);
    for step in 1..=steps {
        if should_stop() || generation.current() != my_generation {
            return;
        }
        let t = step as f32 / steps as f32;
        let brightness = (f32::from(from) + (f32::from(to) - f32::from(from)) * t).round() as u8;
        let _ = device.set_brightness(brightness);
        std::thread::sleep(step_duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choose_steps_is_clamped() {
        assert_eq!(choose_steps(Duration::from_millis(1)), MIN_STEPS);
        assert_eq!(choose_steps(Duration::from_secs(10)), MAX_STEPS);
    }

    #[test]
    fn fade_generation_bump_is_monotonic_and_visible() {
        let gen = FadeGeneration::new();
        let first = gen.bump();
        let second = gen.bump();
        assert!(second > first);
        assert_eq!(gen.current(), second);
    }

    #[test]
    fn stale_generation_aborts_without_touching_device() {
        let gen = Arc::new(FadeGeneration::new());
        let my_gen = gen.bump();
        gen.bump(); // supersede immediately
        let device = DeviceHandle::empty();
        // Device is unavailable so any write would error; the fade must
        // return before attempting one because the generation mismatches.
        fade_brightness(&device, Color::WHITE, 50, 0, Duration::from_millis(50), gen, my_gen, || false);
    }
}
