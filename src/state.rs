// SPDX-License-Identifier: GPL-3.0-only

use crate::capabilities::{BackendCapabilities, ProbeResult};
use crate::intent::LightingIntent;
use serde::Serialize;
use std::collections::BTreeSet;

/// Independent sources that can each demand brightness 0. The mask is a set
/// rather than a single flag so that releasing one source (e.g. lid opens)
/// while another still holds the light off (e.g. user explicitly turned it
/// off) correctly keeps the keyboard dark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ForceOffSource {
    User,
    Power,
    Idle,
    DimScreen,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForcedOffMask(pub BTreeSet<ForceOffSource>);

impl ForcedOffMask {
    pub fn new() -> ForcedOffMask { ForcedOffMask(BTreeSet::new()) }

    pub fn set(&mut self, source: ForceOffSource) { self.0.insert(source); }

    pub fn clear(&mut self, source: ForceOffSource) { self.0.remove(&source); }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    pub fn contains(&self, source: ForceOffSource) -> bool { self.0.contains(&source) }
}

/// Reconciled state the effects engine actually renders. Never persisted;
/// recomputed whenever the intent or any observer fires.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveState {
    pub intent: LightingIntent,
    pub forced_off: ForcedOffMask,
    pub dim_temp_target: Option<u8>,
    /// Brightness saved before a forced-off/dim override, so it can be
    /// restored verbatim when every source releases.
    pub saved_brightness: Option<u8>,
    /// Brightness saved before the battery-saver override clobbers
    /// `intent.brightness`, kept separate from `saved_brightness` since the
    /// two overrides can be active at the same time.
    pub battery_saver_saved_brightness: Option<u8>,
}

impl EffectiveState {
    pub fn new(intent: LightingIntent) -> EffectiveState {
        EffectiveState {
            intent,
            forced_off: ForcedOffMask::new(),
            dim_temp_target: None,
            saved_brightness: None,
            battery_saver_saved_brightness: None,
        }
    }

    /// Per §4.7: any forced-off source wins over everything else; a dim
    /// override only applies when nothing is forcing the light fully off;
    /// otherwise the intent's own brightness stands.
    pub fn effective_brightness(&self) -> u8 {
        if !self.forced_off.is_empty() {
            return 0;
        }
        if let Some(dim) = self.dim_temp_target {
            return dim;
        }
        self.intent.brightness
    }

    pub fn is_off(&self) -> bool { self.effective_brightness() == 0 }

    /// Cheap change-detection signature the reconciler compares against the
    /// last applied state before touching the device.
    pub fn signature(&self) -> (String, u8, u8, u32, u64, bool) {
        let (effect, speed, _brightness, color, perkey) = self.intent.signature();
        (effect, speed, self.effective_brightness(), color, perkey, self.is_off())
    }
}

/// Read-only snapshot exposed by the external interface (§4.9) for a CLI
/// `status` call or any future diagnostics consumer.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsSnapshot {
    pub backend: Option<String>,
    pub probe_reason: String,
    pub probe_available: bool,
    pub per_key: bool,
    pub per_key_is_virtual: bool,
    pub color: bool,
    pub hardware_effects: bool,
    pub last_error: Option<String>,
    pub effect: String,
    pub speed: u8,
    pub brightness: u8,
    pub effective_brightness: u8,
    pub forced_off: bool,
}

impl DiagnosticsSnapshot {
    pub fn new(
        backend: Option<String>,
        probe: &ProbeResult,
        caps: Option<BackendCapabilities>,
        last_error: Option<String>,
        state: &EffectiveState,
    ) -> DiagnosticsSnapshot {
        let caps = caps.unwrap_or_default();
        DiagnosticsSnapshot {
            backend,
            probe_reason: probe.reason.clone(),
            probe_available: probe.available,
            per_key: caps.per_key,
            per_key_is_virtual: caps.per_key_is_virtual,
            color: caps.color,
            hardware_effects: caps.hardware_effects,
            last_error,
            effect: state.intent.effect.clone(),
            speed: state.intent.speed,
            brightness: state.intent.brightness,
            effective_brightness: state.effective_brightness(),
            forced_off: !state.forced_off.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::LightingIntent;

    #[test]
    fn no_mask_uses_intent_brightness() {
        let state = EffectiveState::new(LightingIntent { brightness: 30, ..Default::default() });
        assert_eq!(state.effective_brightness(), 30);
    }

    #[test]
    fn any_forced_off_source_wins_over_dim_override() {
        let mut state = EffectiveState::new(LightingIntent { brightness: 30, ..Default::default() });
        state.dim_temp_target = Some(5);
        state.forced_off.set(ForceOffSource::User);
        assert_eq!(state.effective_brightness(), 0);
    }

    #[test]
    fn dim_override_applies_when_not_forced_off() {
        let mut state = EffectiveState::new(LightingIntent { brightness: 30, ..Default::default() });
        state.dim_temp_target = Some(5);
        assert_eq!(state.effective_brightness(), 5);
    }

    #[test]
    fn releasing_one_of_two_sources_keeps_off() {
        let mut state = EffectiveState::new(LightingIntent { brightness: 30, ..Default::default() });
        state.forced_off.set(ForceOffSource::User);
        state.forced_off.set(ForceOffSource::Power);
        state.forced_off.clear(ForceOffSource::Power);
        assert!(state.is_off());
    }
}
