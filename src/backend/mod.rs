// SPDX-License-Identifier: GPL-3.0-only

pub mod cli_backend;
pub mod sysfs;
pub mod usb_hid;

use crate::capabilities::{BackendCapabilities, ProbeResult};
use crate::color::Color;
use crate::errors::LightingError;
use crate::intent::PerKeyMap;

/// A concrete, open keyboard lighting device. All methods are synchronous
/// and may block briefly on the underlying transport (USB control transfer,
/// sysfs write, subprocess); callers serialize access through
/// `device::DeviceHandle`, never call these directly from multiple threads.
pub trait KeyboardDevice: Send {
    fn turn_off(&mut self) -> Result<(), LightingError>;
    fn is_off(&self) -> Result<bool, LightingError>;
    fn get_brightness(&self) -> Result<u8, LightingError>;
    fn set_brightness(&mut self, brightness: u8) -> Result<(), LightingError>;
    fn set_color(&mut self, color: Color, brightness: u8) -> Result<(), LightingError>;
    fn set_key_colors(&mut self, map: &PerKeyMap, base: Color, brightness: u8, enable_user_mode: bool) -> Result<(), LightingError>;
    fn set_effect(&mut self, payload: &HardwareEffectPayload) -> Result<(), LightingError>;
}

/// A payload for a hardware-accelerated effect: a normalized name, the
/// hardware-scale speed (already inverted from the UI's 0-10 scale), a
/// color where the effect takes one, and an optional palette slot index
/// for effects (like breathing) that reference a pre-programmed color.
#[derive(Debug, Clone)]
pub struct HardwareEffectPayload {
    pub name: String,
    pub hw_speed: u8,
    pub color: Option<Color>,
    pub palette_slot: Option<u8>,
}

/// A backend family: something that can probe for its own hardware and,
/// once selected, open a `KeyboardDevice`.
pub trait KeyboardBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Read-only, bounded, side-effect-free (aside from enumerating
    /// hardware) check for whether this backend's hardware is present.
    fn probe(&self) -> ProbeResult;

    /// Tie-breaker when two backends are both available with equal
    /// confidence.
    fn priority(&self) -> u8;

    fn capabilities(&self) -> BackendCapabilities;

    fn matrix_dimensions(&self) -> (u8, u8);

    fn hardware_effect_list(&self) -> &'static [&'static str];

    fn palette_list(&self) -> &'static [&'static str];

    fn open_device(&self) -> Result<Box<dyn KeyboardDevice>, LightingError>;
}

/// Selects one backend out of a candidate list, following the rules in
/// SPEC_FULL.md §4.1: an explicit request (CLI flag or `RGBKBD_BACKEND`
/// env var) short-circuits everything else; otherwise the best-confidence,
/// priority-tie-broken probe wins.
pub fn select<'a>(
    backends: &'a [Box<dyn KeyboardBackend>],
    requested: Option<&str>,
) -> (Option<&'a dyn KeyboardBackend>, ProbeResult) {
    if let Some(requested) = requested {
        return match backends.iter().find(|b| b.name() == requested) {
            Some(backend) => {
                let probe = backend.probe();
                if probe.available {
                    (Some(backend.as_ref()), probe)
                } else {
                    (None, probe)
                }
            }
            None => (None, ProbeResult::unavailable(format!("no such backend: {requested}"))),
        };
    }

    let mut best: Option<(&dyn KeyboardBackend, ProbeResult)> = None;
    for backend in backends {
        let probe = backend.probe();
        if !probe.available {
            continue;
        }
        let replace = match &best {
            None => true,
            Some((current, current_probe)) => {
                (probe.confidence, backend.priority()) > (current_probe.confidence, current.priority())
            }
        };
        if replace {
            best = Some((backend.as_ref(), probe));
        }
    }

    match best {
        Some((backend, probe)) => (Some(backend), probe),
        None => (None, ProbeResult::unavailable("no supported keyboard lighting hardware found")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU8, Ordering};

    struct FakeBackend {
        probe_name: &'static str,
        available: bool,
        confidence: u8,
        priority: u8,
        opened: AtomicU8,
    }

    impl KeyboardBackend for FakeBackend {
        fn name(&self) -> &'static str { self.probe_name }

        fn probe(&self) -> ProbeResult {
            if self.available {
                ProbeResult::available(self.confidence, "fake")
            } else {
                ProbeResult::unavailable("fake unavailable")
            }
        }

        fn priority(&self) -> u8 { self.priority }

        fn capabilities(&self) -> BackendCapabilities { BackendCapabilities::default() }

        fn matrix_dimensions(&self) -> (u8, u8) { (6, 21) }

        fn hardware_effect_list(&self) -> &'static [&'static str] { &[] }

        fn palette_list(&self) -> &'static [&'static str] { &[] }

        fn open_device(&self) -> Result<Box<dyn KeyboardDevice>, LightingError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Err(LightingError::BackendUnsupported("fake".into()))
        }
    }

    #[test]
    fn selects_highest_confidence() {
        let backends: Vec<Box<dyn KeyboardBackend>> = vec![
            Box::new(FakeBackend { probe_name: "low", available: true, confidence: 50, priority: 10, opened: AtomicU8::new(0) }),
            Box::new(FakeBackend { probe_name: "high", available: true, confidence: 90, priority: 1, opened: AtomicU8::new(0) }),
            Box::new(FakeBackend { probe_name: "unavailable", available: false, confidence: 0, priority: 999, opened: AtomicU8::new(0) }),
        ];
        let (chosen, probe) = select(&backends, None);
        assert_eq!(chosen.unwrap().name(), "high");
        assert!(probe.available);
    }

    #[test]
    fn confidence_ties_broken_by_priority() {
        let backends: Vec<Box<dyn KeyboardBackend>> = vec![
            Box::new(FakeBackend { probe_name: "a", available: true, confidence: 50, priority: 10, opened: AtomicU8::new(0) }),
            Box::new(FakeBackend { probe_name: "b", available: true, confidence: 50, priority: 100, opened: AtomicU8::new(0) }),
        ];
        let (chosen, _) = select(&backends, None);
        assert_eq!(chosen.unwrap().name(), "b");
    }

    #[test]
    fn explicit_request_skips_auto_selection() {
        let backends: Vec<Box<dyn KeyboardBackend>> = vec![
            Box::new(FakeBackend { probe_name: "a", available: true, confidence: 99, priority: 99, opened: AtomicU8::new(0) }),
            Box::new(FakeBackend { probe_name: "b", available: true, confidence: 1, priority: 1, opened: AtomicU8::new(0) }),
        ];
        let (chosen, _) = select(&backends, Some("b"));
        assert_eq!(chosen.unwrap().name(), "b");
    }

    #[test]
    fn unavailable_backend_is_never_opened() {
        let backends: Vec<Box<dyn KeyboardBackend>> =
            vec![Box::new(FakeBackend { probe_name: "only", available: false, confidence: 0, priority: 1, opened: AtomicU8::new(0) })];
        let (chosen, probe) = select(&backends, None);
        assert!(chosen.is_none());
        assert!(!probe.available);
    }
}
