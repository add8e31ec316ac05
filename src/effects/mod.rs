// SPDX-License-Identifier: GPL-3.0-only

pub mod fades;
pub mod hw;
pub mod reactive;
pub mod render;
pub mod software;

use crate::capabilities::BackendCapabilities;
use crate::color::Color;
use crate::device::DeviceHandle;
use crate::effects::fades::FadeGeneration;
use crate::effects::reactive::{open_keyboard_devices, render_pulses, resolve_coord, synthetic_pulse, Pulse, ReactiveMode};
use crate::effects::render::densify;
use crate::errors::LightingError;
use crate::intent::{KeyCoord, LightingIntent};
use log::{debug, warn};
use rand::thread_rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Short fade applied at every software/static effect transition, mirroring
/// the original's quick cross-fade between an old frame and a new one.
/// Hardware effects skip this; they own their own visuals once started.
const TRANSITION_FADE: Duration = Duration::from_millis(120);

/// Invoked once, the first time a worker observes `PermissionDenied`. The
/// engine itself has no notion of desktop notifications; it just tells the
/// daemon "this happened" once per process lifetime (enforced by
/// `DeviceHandle::note_permission_failure`, not by the callback itself).
pub type PermissionCallback = Arc<dyn Fn() + Send + Sync>;

/// Owns at most one running effect worker at a time. All lifecycle
/// operations (`start_effect`, `stop`, `turn_off`, `set_brightness`) run on
/// the caller's thread and serialize through `lifecycle_lock` so two
/// threads can never race to spawn two workers.
pub struct Engine {
    device: Arc<DeviceHandle>,
    matrix_dims: (u8, u8),
    capabilities: BackendCapabilities,
    hw_effects: &'static [&'static str],

    lifecycle_lock: Mutex<()>,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    fade_generation: Arc<FadeGeneration>,
    permission_callback: Mutex<Option<PermissionCallback>>,
    keymap: Arc<HashMap<u16, KeyCoord>>,
    /// Last color actually written to the device, used as the fade-from
    /// endpoint for the next transition.
    last_color: Mutex<Color>,
}

impl Engine {
    pub fn new(device: Arc<DeviceHandle>, matrix_dims: (u8, u8), capabilities: BackendCapabilities, hw_effects: &'static [&'static str]) -> Engine {
        Engine {
            device,
            matrix_dims,
            capabilities,
            hw_effects,
            lifecycle_lock: Mutex::new(()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            fade_generation: Arc::new(FadeGeneration::new()),
            permission_callback: Mutex::new(None),
            keymap: Arc::new(HashMap::new()),
            last_color: Mutex::new(Color::BLACK),
        }
    }

    pub fn set_permission_callback(&self, callback: PermissionCallback) { *self.permission_callback.lock().unwrap() = Some(callback); }

    pub fn set_keymap(&mut self, keymap: HashMap<u16, KeyCoord>) { self.keymap = Arc::new(keymap); }

    fn fire_permission_callback(&self) {
        if self.device.note_permission_failure() {
            if let Some(cb) = self.permission_callback.lock().unwrap().as_ref() {
                cb();
            }
        }
    }

    fn report_permission(&self, result: &Result<(), LightingError>) {
        if let Err(err) = result {
            if err.is_permission() {
                self.fire_permission_callback();
            }
        }
    }

    /// Signals the current worker to stop and joins it with a bounded
    /// timeout. If the join times out, this logs and returns without
    /// clearing the stop flag — the stale worker must still observe the
    /// flag on its own and exit; the engine does not spawn a replacement
    /// until `worker` is empty again. This is a deliberate behavior, not
    /// a bug: silently abandoning the stop flag and starting a second
    /// worker risks two threads racing writes to the same device.
    pub fn stop(&self) {
        let _guard = self.lifecycle_lock.lock().unwrap();
        self.stop_inner();
    }

    fn stop_inner(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let start = Instant::now();
            // JoinHandle::join blocks without a timeout; poll is_finished
            // in short increments to honor the 2s budget.
            loop {
                if handle.is_finished() {
                    let _ = handle.join();
                    break;
                }
                if start.elapsed() > JOIN_TIMEOUT {
                    warn!("effect worker did not join within {JOIN_TIMEOUT:?}; leaving it to exit on its own");
                    // Put the handle back so a later stop() can still reap it.
                    *self.worker.lock().unwrap() = Some(handle);
                    return;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        }
        self.stop_flag.store(false, Ordering::SeqCst);
    }

    pub fn turn_off(&self) {
        let _guard = self.lifecycle_lock.lock().unwrap();
        self.stop_inner();
        let generation = self.fade_generation.bump();
        let from = self.device.get_brightness().unwrap_or(0);
        let stop_flag = self.stop_flag.clone();
        fades::fade_brightness(&self.device, Color::BLACK, from, 1, Duration::from_millis(150), self.fade_generation.clone(), generation, move || {
            stop_flag.load(Ordering::SeqCst)
        });
        let result = self.device.turn_off();
        self.report_permission(&result);
        *self.last_color.lock().unwrap() = Color::BLACK;
    }

    pub fn set_brightness(&self, brightness: u8, fade: bool) {
        let generation = self.fade_generation.bump();
        if !fade {
            let result = self.device.set_brightness(brightness);
            self.report_permission(&result);
            return;
        }
        let from = self.device.get_brightness().unwrap_or(brightness);
        let stop_flag = self.stop_flag.clone();
        fades::fade_brightness(&self.device, Color::BLACK, from, brightness, Duration::from_millis(300), self.fade_generation.clone(), generation, move || {
            stop_flag.load(Ordering::SeqCst)
        });
    }

    /// Starts `intent.effect` at the given brightness, per §4.4's
    /// dispatch table: hardware effects if the backend supports them and
    /// lists the name, per-key static/uniform static with no worker, and
    /// everything else as a 60fps software render loop (including
    /// reactive variants).
    pub fn start_effect(&self, intent: &LightingIntent, brightness: u8) {
        let _guard = self.lifecycle_lock.lock().unwrap();
        self.stop_inner();

        let (rows, cols) = self.matrix_dims;
        let name = normalize_effect_name(intent.effect.as_str(), self.capabilities.hardware_effects, self.hw_effects);

        if self.capabilities.hardware_effects && self.hw_effects.contains(&name.as_str()) {
            let payload = hw::build_payload(&name, intent.speed, intent.color, Some(0));
            let result = self.device.set_effect(&payload);
            self.report_permission(&result);
            *self.last_color.lock().unwrap() = intent.color;
            return;
        }

        self.fade_to(intent, brightness);

        if name == "none" || name == "static" {
            let result = if !intent.per_key_colors.is_empty() && self.capabilities.per_key {
                self.device.set_key_colors(&intent.per_key_colors, intent.color, brightness, true)
            } else {
                self.device.set_color(intent.color, brightness)
            };
            self.report_permission(&result);
            return;
        }

        if name == "perkey" {
            let result = if self.capabilities.per_key {
                self.device.set_key_colors(&intent.per_key_colors, intent.color, brightness, true)
            } else {
                let grid = densify(intent.color, &intent.per_key_colors, rows, cols);
                self.device.set_color(grid.average(), brightness)
            };
            self.report_permission(&result);
            return;
        }

        self.spawn_software_worker(name, intent.clone(), brightness);
    }

    /// Cross-fades from the last color this engine wrote to `intent.color`,
    /// per-key when the backend and intent support it, uniform otherwise.
    /// Updates `last_color` to the new target regardless of which path ran.
    fn fade_to(&self, intent: &LightingIntent, brightness: u8) {
        let (rows, cols) = self.matrix_dims;
        let stop_flag = self.stop_flag.clone();
        let from = *self.last_color.lock().unwrap();
        if self.capabilities.per_key && !intent.per_key_colors.is_empty() {
            fades::fade_in_per_key(&self.device, from, intent.color, &intent.per_key_colors, rows, cols, brightness, TRANSITION_FADE, move || {
                stop_flag.load(Ordering::SeqCst)
            });
        } else {
            fades::fade_uniform_color(&self.device, from, intent.color, brightness, TRANSITION_FADE, move || stop_flag.load(Ordering::SeqCst));
        }
        *self.last_color.lock().unwrap() = intent.color;
    }

    fn spawn_software_worker(&self, name: String, intent: LightingIntent, brightness: u8) {
        self.stop_flag.store(false, Ordering::SeqCst);
        let stop_flag = self.stop_flag.clone();
        let device = self.device.clone();
        let (rows, cols) = self.matrix_dims;
        let per_key_supported = self.capabilities.per_key;
        let keymap = self.keymap.clone();
        let permission_callback = self.permission_callback.lock().unwrap().clone();

        let handle = std::thread::spawn(move || {
            let is_reactive = name.starts_with("reactive");
            let interval = software::frame_interval(intent.speed);
            let speed_pace = software::pace(intent.speed);
            let start = Instant::now();
            let mut rng = thread_rng();
            let mut user_mode_enabled = false;
            let mut input_devices = if is_reactive { open_keyboard_devices() } else { Vec::new() };
            let mut pulses: Vec<Pulse> = Vec::new();
            let mode = ReactiveMode::from_effect_name(&name);
            let mut last_synthetic = Instant::now();

            loop {
                if stop_flag.load(Ordering::SeqCst) {
                    return;
                }

                let frame = if is_reactive {
                    if input_devices.is_empty() {
                        if last_synthetic.elapsed() > Duration::from_millis(400) {
                            pulses.push(synthetic_pulse(rows, cols, speed_pace, &mut rng));
                            last_synthetic = Instant::now();
                        }
                    } else {
                        for device_in in &mut input_devices {
                            if let Ok(events) = device_in.fetch_events() {
                                for event in events {
                                    if event.event_type() == evdev::types::EventType::KEY && event.value() == 1 {
                                        let coord = resolve_coord(&keymap, event.code(), rows, cols, &mut rng);
                                        pulses.push(Pulse { coord, born: Instant::now(), ttl: reactive::pulse_ttl(speed_pace) });
                                    }
                                }
                            }
                        }
                    }
                    let now = Instant::now();
                    pulses.retain(|p| !p.is_expired(now));
                    let backdrop = densify(intent.color, &intent.per_key_colors, rows, cols);
                    let accent = if intent.reactive_use_manual_color { intent.reactive_color } else { intent.color };
                    let overlay = render_pulses(&pulses, mode, accent, rows, cols, now);
                    let backdrop = render::scale_grid_nonzero(&backdrop, brightness_scale_factor(brightness, intent.brightness));
                    let overlay = render::scale_grid_nonzero(&overlay, brightness_scale_factor(brightness, intent.reactive_brightness));
                    render::mix(&backdrop, &overlay, 1.0)
                } else {
                    let t = start.elapsed().as_secs_f32();
                    software::render_frame(&name, t, speed_pace, rows, cols, intent.color, &mut rng)
                };

                let result = if per_key_supported {
                    device.set_key_colors(&frame.into_per_key_map(), intent.color, brightness, !user_mode_enabled)
                } else {
                    device.set_color(frame.average(), brightness)
                };
                user_mode_enabled = true;

                match result {
                    Ok(()) => {}
                    Err(err) if err.is_permission() => {
                        debug!("effect worker stopping after permission failure: {err}");
                        if device.note_permission_failure() {
                            if let Some(cb) = &permission_callback {
                                cb();
                            }
                        }
                        return;
                    }
                    Err(err) if err.is_disconnect() => {
                        debug!("effect worker stopping after disconnect: {err}");
                        return;
                    }
                    Err(err) => {
                        warn!("effect worker frame failed: {err}");
                        return;
                    }
                }

                std::thread::sleep(interval);
            }
        });

        *self.worker.lock().unwrap() = Some(handle);
    }
}

/// Ratio to scale a layer configured at `layer_brightness` down to the
/// hardware write's `cap`. A layer already at or below the cap is left
/// untouched; a brighter one is scaled down proportionally so the hardware
/// write (always at `cap`) never shows more intensity than the policy cap
/// allows.
fn brightness_scale_factor(cap: u8, layer_brightness: u8) -> f32 {
    if cap == 0 || layer_brightness == 0 {
        return 0.0;
    }
    if layer_brightness <= cap {
        return 1.0;
    }
    f32::from(cap) / f32::from(layer_brightness)
}

/// Normalizes an effect name against the known catalog, falling back
/// `rainbow` -> `rainbow_wave` (or `none` if even that's unsupported) when
/// the selected backend lacks hardware effects, per §4.4.
fn normalize_effect_name(requested: &str, hw_supported: bool, hw_list: &'static [&'static str]) -> String {
    let lower = requested.trim().to_lowercase();
    if lower == "rainbow" && !(hw_supported && hw_list.contains(&"rainbow")) {
        return "rainbow_wave".to_string();
    }
    lower
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rainbow_falls_back_to_software_wave_without_hw_support() {
        assert_eq!(normalize_effect_name("rainbow", false, &[]), "rainbow_wave");
    }

    #[test]
    fn rainbow_stays_hardware_when_supported() {
        assert_eq!(normalize_effect_name("rainbow", true, &["rainbow"]), "rainbow");
    }

    #[test]
    fn stop_on_fresh_engine_is_a_noop() {
        let device = Arc::new(DeviceHandle::empty());
        let engine = Engine::new(device, (6, 21), BackendCapabilities::default(), &[]);
        engine.stop();
        engine.stop();
    }

    #[test]
    fn brightness_scale_factor_caps_a_brighter_layer() {
        assert_eq!(brightness_scale_factor(5, 50), 0.1);
    }

    #[test]
    fn brightness_scale_factor_leaves_a_dimmer_layer_untouched() {
        assert_eq!(brightness_scale_factor(50, 5), 1.0);
    }

    #[test]
    fn brightness_scale_factor_is_zero_at_zero_cap_or_layer() {
        assert_eq!(brightness_scale_factor(0, 50), 0.0);
        assert_eq!(brightness_scale_factor(50, 0), 0.0);
    }
}
