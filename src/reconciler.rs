// SPDX-License-Identifier: GPL-3.0-only

use crate::effects::Engine;
use crate::intent::LightingIntent;
use crate::power::ac_battery::{battery_saver_active, battery_saver_should_restore, resolve_policy};
use crate::power::PowerEvent;
use crate::state::{EffectiveState, ForceOffSource};
use log::debug;

/// Arbitrates every observer/config event into an `EffectiveState` and
/// applies it through the effects engine at a single choke point, per
/// §4.7. Holds the last-applied signature so redundant re-applies (two
/// observers firing for the same net effect, or a poller waking up to find
/// nothing changed) never touch the device or restart a running effect.
pub struct Reconciler {
    state: EffectiveState,
    last_applied: Option<(String, u8, u8, u32, u64, bool)>,
}

impl Reconciler {
    pub fn new(intent: LightingIntent) -> Reconciler { Reconciler { state: EffectiveState::new(intent), last_applied: None } }

    pub fn state(&self) -> &EffectiveState { &self.state }

    /// Call after a config-file reload: replaces the intent, preserving
    /// whatever forced-off mask is currently active (a config edit while
    /// the lid is closed doesn't un-close the lid).
    pub fn set_intent(&mut self, intent: LightingIntent, engine: &Engine) {
        self.state.intent = intent;
        self.apply(engine);
    }

    pub fn handle_user_toggle(&mut self, off: bool, engine: &Engine) {
        if off {
            self.state.forced_off.set(ForceOffSource::User);
        } else {
            self.state.forced_off.clear(ForceOffSource::User);
        }
        self.apply(engine);
    }

    pub fn handle_power_event(&mut self, event: PowerEvent, engine: &Engine) {
        match event {
            PowerEvent::LidClosed if self.state.intent.power_off_on_lid_close => self.state.forced_off.set(ForceOffSource::Power),
            PowerEvent::LidOpened if self.state.intent.power_restore_on_lid_open => self.state.forced_off.clear(ForceOffSource::Power),
            PowerEvent::Suspending if self.state.intent.power_off_on_suspend => self.state.forced_off.set(ForceOffSource::Power),
            PowerEvent::Resumed if self.state.intent.power_restore_on_resume => self.state.forced_off.clear(ForceOffSource::Power),
            PowerEvent::OnAc => {
                let policy = resolve_policy(true, self.state.intent.ac_policy, self.state.intent.battery_policy);
                self.apply_source_policy(policy.enabled, policy.brightness);
            }
            PowerEvent::OnBattery => {
                let policy = resolve_policy(false, self.state.intent.ac_policy, self.state.intent.battery_policy);
                self.apply_source_policy(policy.enabled, policy.brightness);
            }
            PowerEvent::BatteryCritical => {
                if battery_saver_active(false, Some(0), self.state.intent.battery_saver_enabled) && self.state.battery_saver_saved_brightness.is_none() {
                    self.state.battery_saver_saved_brightness = Some(self.state.intent.brightness);
                    self.state.intent.brightness = self.state.intent.battery_saver_brightness;
                }
            }
            PowerEvent::BatteryRecovered => {
                if battery_saver_should_restore(false, Some(100)) {
                    if let Some(saved) = self.state.battery_saver_saved_brightness.take() {
                        self.state.intent.brightness = saved;
                    }
                    debug!("battery saver released");
                }
            }
            PowerEvent::ScreenDimming => {
                self.state.saved_brightness = Some(self.state.intent.brightness);
                self.state.dim_temp_target = Some(self.state.intent.screen_dim_temp_brightness);
            }
            PowerEvent::ScreenUndimming => {
                self.state.dim_temp_target = None;
            }
            PowerEvent::ScreenOff => self.state.forced_off.set(ForceOffSource::Idle),
            PowerEvent::ScreenOn => self.state.forced_off.clear(ForceOffSource::Idle),
            _ => {}
        }
        self.apply(engine);
    }

    fn apply_source_policy(&mut self, enabled: bool, brightness: u8) {
        if !enabled {
            self.state.forced_off.set(ForceOffSource::Power);
        } else {
            self.state.forced_off.clear(ForceOffSource::Power);
            self.state.intent.brightness = brightness;
        }
    }

    /// The single choke point: recomputes the signature, and only touches
    /// the engine when it actually changed.
    pub fn apply(&mut self, engine: &Engine) {
        let signature = self.state.signature();
        if Some(&signature) == self.last_applied.as_ref() {
            return;
        }
        self.last_applied = Some(signature.clone());

        if self.state.is_off() {
            engine.turn_off();
        } else {
            engine.start_effect(&self.state.intent, self.state.effective_brightness());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::BackendCapabilities;
    use crate::device::DeviceHandle;
    use std::sync::Arc;

    fn fresh_engine() -> Engine { Engine::new(Arc::new(DeviceHandle::empty()), (6, 21), BackendCapabilities::default(), &[]) }

    #[test]
    fn redundant_apply_does_not_restart_the_engine() {
        let engine = fresh_engine();
        let mut reconciler = Reconciler::new(LightingIntent { brightness: 20, ..Default::default() });
        reconciler.apply(&engine);
        let first = reconciler.last_applied.clone();
        reconciler.apply(&engine);
        assert_eq!(reconciler.last_applied, first);
    }

    #[test]
    fn resume_after_user_off_stays_off() {
        let engine = fresh_engine();
        let mut reconciler = Reconciler::new(LightingIntent::default());
        reconciler.handle_user_toggle(true, &engine);
        reconciler.handle_power_event(PowerEvent::Suspending, &engine);
        reconciler.handle_power_event(PowerEvent::Resumed, &engine);
        assert!(reconciler.state().is_off());
    }

    /// Fires 40 alternating lid open/close events through the reconciler
    /// and checks the final state matches the last event, with no write
    /// left pending from an earlier, already-superseded event.
    #[test]
    fn lid_toggle_storm_converges() {
        let engine = fresh_engine();
        let mut reconciler = Reconciler::new(LightingIntent { power_off_on_lid_close: true, power_restore_on_lid_open: true, ..Default::default() });

        for i in 0..40 {
            let event = if i % 2 == 0 { PowerEvent::LidClosed } else { PowerEvent::LidOpened };
            reconciler.handle_power_event(event, &engine);
        }

        // Event 39 (last, odd index) is LidOpened, so the forced-off mask
        // must be clear and the signature must match a single plain apply.
        assert!(!reconciler.state().forced_off.contains(ForceOffSource::Power));
        assert!(!reconciler.state().is_off());

        let settled = reconciler.last_applied.clone();
        reconciler.apply(&engine);
        assert_eq!(reconciler.last_applied, settled);
    }

    #[test]
    fn battery_saver_restores_pre_dim_brightness_on_recovery() {
        let engine = fresh_engine();
        let mut reconciler =
            Reconciler::new(LightingIntent { brightness: 30, battery_saver_enabled: true, battery_saver_brightness: 5, ..Default::default() });

        reconciler.handle_power_event(PowerEvent::BatteryCritical, &engine);
        assert_eq!(reconciler.state().intent.brightness, 5);

        reconciler.handle_power_event(PowerEvent::BatteryRecovered, &engine);
        assert_eq!(reconciler.state().intent.brightness, 30);
        assert!(reconciler.state().battery_saver_saved_brightness.is_none());
    }
}
