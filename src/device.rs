// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::{HardwareEffectPayload, KeyboardBackend, KeyboardDevice};
use crate::color::Color;
use crate::errors::LightingError;
use crate::intent::PerKeyMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// RAII wrapper serializing every write to the selected backend behind one
/// re-entrant-in-spirit lock. Rust's `Mutex` is not re-entrant, so callers
/// that need several writes to happen as one logical operation (e.g.
/// "enable user mode, then push a frame") take the guard once via `lock()`
/// and issue both calls through it, rather than locking per write.
///
/// A disconnect sets `available = false` and every call becomes a no-op
/// until the next successful probe/open reacquires the device; a
/// permission failure is reported once and does not disable writes (the
/// user can fix udev rules and retry without restarting).
pub struct DeviceHandle {
    device: Mutex<Option<Box<dyn KeyboardDevice>>>,
    available: AtomicBool,
    permission_reported: AtomicBool,
}

impl DeviceHandle {
    pub fn new(device: Box<dyn KeyboardDevice>) -> DeviceHandle {
        DeviceHandle { device: Mutex::new(Some(device)), available: AtomicBool::new(true), permission_reported: AtomicBool::new(false) }
    }

    pub fn empty() -> DeviceHandle {
        DeviceHandle { device: Mutex::new(None), available: AtomicBool::new(false), permission_reported: AtomicBool::new(false) }
    }

    pub fn is_available(&self) -> bool { self.available.load(Ordering::SeqCst) }

    /// Replaces the underlying device, e.g. after the hardware-state poller
    /// detects a reconnect.
    pub fn replace(&self, device: Box<dyn KeyboardDevice>) {
        *self.device.lock().unwrap() = Some(device);
        self.available.store(true, Ordering::SeqCst);
        self.permission_reported.store(false, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn KeyboardDevice>>> { self.device.lock().unwrap() }

    /// Runs `f` against the live device, classifying disconnect failures by
    /// marking the handle unavailable. Permission failures are returned as
    /// observed but only reported upward on their first occurrence per
    /// process lifetime (see `take_permission_notice`).
    fn with_device<T>(&self, f: impl FnOnce(&mut dyn KeyboardDevice) -> Result<T, LightingError>) -> Result<T, LightingError> {
        if !self.is_available() {
            return Err(LightingError::DeviceDisconnected("no device selected".into()));
        }
        let mut guard = self.lock();
        let device = guard.as_deref_mut().ok_or_else(|| LightingError::DeviceDisconnected("no device selected".into()))?;
        match f(device) {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_disconnect() {
                    self.available.store(false, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    /// Returns `true` exactly once per permission failure episode — callers
    /// use this to drive a one-shot notification instead of spamming on
    /// every frame of a software effect.
    pub fn note_permission_failure(&self) -> bool { !self.permission_reported.swap(true, Ordering::SeqCst) }

    pub fn turn_off(&self) -> Result<(), LightingError> { self.with_device(|d| d.turn_off()) }

    pub fn is_off(&self) -> Result<bool, LightingError> { self.with_device(|d| d.is_off()) }

    pub fn get_brightness(&self) -> Result<u8, LightingError> { self.with_device(|d| d.get_brightness()) }

    pub fn set_brightness(&self, brightness: u8) -> Result<(), LightingError> { self.with_device(|d| d.set_brightness(brightness)) }

    pub fn set_color(&self, color: Color, brightness: u8) -> Result<(), LightingError> { self.with_device(|d| d.set_color(color, brightness)) }

    pub fn set_key_colors(&self, map: &PerKeyMap, base: Color, brightness: u8, enable_user_mode: bool) -> Result<(), LightingError> {
        self.with_device(|d| d.set_key_colors(map, base, brightness, enable_user_mode))
    }

    pub fn set_effect(&self, payload: &HardwareEffectPayload) -> Result<(), LightingError> { self.with_device(|d| d.set_effect(payload)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{BackendCapabilities, ProbeResult};

    struct FlakyDevice {
        fail_with: Option<LightingError>,
    }

    impl KeyboardDevice for FlakyDevice {
        fn turn_off(&mut self) -> Result<(), LightingError> { Ok(()) }
        fn is_off(&self) -> Result<bool, LightingError> { Ok(false) }
        fn get_brightness(&self) -> Result<u8, LightingError> { Ok(25) }
        fn set_brightness(&mut self, _b: u8) -> Result<(), LightingError> {
            match self.fail_with.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        fn set_color(&mut self, _c: Color, _b: u8) -> Result<(), LightingError> { Ok(()) }
        fn set_key_colors(&mut self, _m: &PerKeyMap, _base: Color, _b: u8, _u: bool) -> Result<(), LightingError> { Ok(()) }
        fn set_effect(&mut self, _p: &HardwareEffectPayload) -> Result<(), LightingError> { Ok(()) }
    }

    #[test]
    fn disconnect_marks_handle_unavailable() {
        let handle = DeviceHandle::new(Box::new(FlakyDevice { fail_with: Some(LightingError::DeviceDisconnected("x".into())) }));
        assert!(handle.set_brightness(10).is_err());
        assert!(!handle.is_available());
        // Further calls short-circuit rather than touching the device again.
        assert!(handle.set_brightness(10).is_err());
    }

    #[test]
    fn permission_failure_does_not_disable_device() {
        let handle = DeviceHandle::new(Box::new(FlakyDevice {
            fail_with: Some(LightingError::PermissionDenied { device: "x".into(), source: std::io::Error::from(std::io::ErrorKind::PermissionDenied) }),
        }));
        assert!(handle.set_brightness(10).is_err());
        assert!(handle.is_available());
    }

    #[test]
    fn permission_notice_fires_once() {
        let handle = DeviceHandle::new(Box::new(FlakyDevice { fail_with: None }));
        assert!(handle.note_permission_failure());
        assert!(!handle.note_permission_failure());
    }

    #[test]
    fn empty_handle_is_unavailable() {
        let handle = DeviceHandle::empty();
        assert!(!handle.is_available());
        assert!(handle.turn_off().is_err());
        let _ = ProbeResult::unavailable("none");
        let _ = BackendCapabilities::default();
    }
}
