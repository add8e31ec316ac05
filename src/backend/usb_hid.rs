// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::{HardwareEffectPayload, KeyboardBackend, KeyboardDevice};
use crate::capabilities::{BackendCapabilities, ProbeResult};
use crate::color::Color;
use crate::errors::LightingError;
use crate::intent::PerKeyMap;
use hidapi::{HidApi, HidDevice};
use std::fs;

const USB_VID_ITE: u16 = 0x048d;

/// Controllers this backend knows how to drive.
const ALLOWED_PIDS: &[u16] = &[0x6004, 0x6006, 0x6008, 0x600B, 0xCE00];

/// ITE-family controllers that share the vendor ID but speak an
/// incompatible dialect. Must never be opened by this backend, but are
/// worth reporting distinctly so diagnostics can tell "no device" apart
/// from "wrong device".
const DENIED_PIDS: &[u16] = &[0x8297, 0x5702, 0xC966];

const MATRIX_ROWS: u8 = 6;
const MATRIX_COLS: u8 = 21;

const HW_EFFECTS: &[&str] = &["rainbow", "breathing", "wave", "ripple", "marquee", "raindrop"];
const PALETTE: &[&str] = &["slot0", "slot1", "slot2", "slot3"];

pub struct UsbHidBackend;

impl UsbHidBackend {
    pub fn new() -> UsbHidBackend { UsbHidBackend }

    fn scan(&self) -> Result<(Option<(u16, u16)>, Option<(u16, u16)>), String> {
        let api = HidApi::new().map_err(|e| e.to_string())?;
        let mut allowed = None;
        let mut denied = None;
        for info in api.device_list() {
            if info.vendor_id() != USB_VID_ITE {
                continue;
            }
            if ALLOWED_PIDS.contains(&info.product_id()) && allowed.is_none() {
                allowed = Some((info.vendor_id(), info.product_id()));
            }
            if DENIED_PIDS.contains(&info.product_id()) && denied.is_none() {
                denied = Some((info.vendor_id(), info.product_id()));
            }
        }
        Ok((allowed, denied))
    }
}

impl Default for UsbHidBackend {
    fn default() -> Self { Self::new() }
}

impl KeyboardBackend for UsbHidBackend {
    fn name(&self) -> &'static str { "usb_hid" }

    fn probe(&self) -> ProbeResult {
        if std::env::var("RGBKBD_DISABLE_USB_SCAN").as_deref() == Ok("1") {
            return ProbeResult::available(60, "importable but usb scan disabled by RGBKBD_DISABLE_USB_SCAN");
        }

        match self.scan() {
            Ok((Some((vid, pid)), _)) => ProbeResult::available(90, "ite8291-family controller found")
                .with_identifier("usb_vid", format!("{vid:#06x}"))
                .with_identifier("usb_pid", format!("{pid:#06x}")),
            Ok((None, Some((vid, pid)))) => ProbeResult::unavailable("known-unsupported ite dialect present")
                .with_identifier("usb_vid", format!("{vid:#06x}"))
                .with_identifier("usb_pid", format!("{pid:#06x}")),
            Ok((None, None)) => ProbeResult::unavailable("no supported usb hid controller found"),
            Err(reason) => ProbeResult::unavailable(format!("usb scan failed: {reason}")),
        }
    }

    fn priority(&self) -> u8 { 100 }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities { per_key: true, per_key_is_virtual: false, color: true, hardware_effects: true, palette: true }
    }

    fn matrix_dimensions(&self) -> (u8, u8) { (MATRIX_ROWS, MATRIX_COLS) }

    fn hardware_effect_list(&self) -> &'static [&'static str] { HW_EFFECTS }

    fn palette_list(&self) -> &'static [&'static str] { PALETTE }

    fn open_device(&self) -> Result<Box<dyn KeyboardDevice>, LightingError> {
        let (allowed, _denied) = self.scan().map_err(|e| LightingError::ProtocolError { device: "usb_hid".into(), reason: e })?;
        let (vid, pid) = allowed.ok_or_else(|| LightingError::BackendUnsupported("no allow-listed controller present".into()))?;

        let api = HidApi::new().map_err(|e| LightingError::ProtocolError { device: "usb_hid".into(), reason: e.to_string() })?;
        let info = api
            .device_list()
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or_else(|| LightingError::DeviceDisconnected("usb_hid".into()))?;

        let device = info.open_device(&api).map_err(|e| classify_hid_error(&format!("{vid:#06x}:{pid:#06x}"), e))?;

        Ok(Box::new(Ite8291Device { device, brightness: 25, color: Color::new(255, 255, 255), off: false }))
    }
}

fn classify_hid_error(device: &str, err: hidapi::HidError) -> LightingError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    if lower.contains("permission denied") || lower.contains("access denied") || lower.contains("errno 13") {
        LightingError::PermissionDenied { device: device.to_string(), source: std::io::Error::from(std::io::ErrorKind::PermissionDenied) }
    } else if lower.contains("no such device") {
        LightingError::DeviceDisconnected(device.to_string())
    } else {
        LightingError::ProtocolError { device: device.to_string(), reason: msg }
    }
}

/// DMI-based color correction for panels whose backlight diffuser skews
/// green/blue.
fn dmi_color_correction(color: Color) -> Color {
    let vendor = fs::read_to_string("/sys/class/dmi/id/sys_vendor").unwrap_or_default();
    let model = fs::read_to_string("/sys/class/dmi/id/product_version").unwrap_or_default();
    match (vendor.trim(), model.trim()) {
        ("System76", "bonw15") => Color::new(color.r, ((u16::from(color.g) * 0x65) / 0xFF) as u8, ((u16::from(color.b) * 0x60) / 0xFF) as u8),
        _ => color,
    }
}

struct Ite8291Device {
    device: HidDevice,
    brightness: u8,
    color: Color,
    off: bool,
}

impl Ite8291Device {
    fn hw_brightness(&self) -> u8 { ((u16::from(self.brightness) * 10 + 25) / 50) as u8 }

    fn write_frame(&mut self, color: Color, brightness: u8) -> Result<(), LightingError> {
        let corrected = dmi_color_correction(color);
        let hw_brightness = ((u16::from(brightness) * 10 + 25) / 50) as u8;
        for led in 0..=255u8 {
            self.device
                .send_feature_report(&[0xCC, 0x01, led, corrected.r, corrected.g, corrected.b])
                .map_err(|e| classify_hid_error("usb_hid", e))?;
        }
        self.device.send_feature_report(&[0xCC, 0x09, hw_brightness]).map_err(|e| classify_hid_error("usb_hid", e))?;
        self.device.send_feature_report(&[0xCC, 0x20, 0x01]).map_err(|e| classify_hid_error("usb_hid", e))?;
        Ok(())
    }
}

impl KeyboardDevice for Ite8291Device {
    fn turn_off(&mut self) -> Result<(), LightingError> {
        self.write_frame(Color::BLACK, 0)?;
        self.off = true;
        Ok(())
    }

    fn is_off(&self) -> Result<bool, LightingError> { Ok(self.off) }

    fn get_brightness(&self) -> Result<u8, LightingError> { Ok(self.brightness) }

    fn set_brightness(&mut self, brightness: u8) -> Result<(), LightingError> {
        self.brightness = brightness;
        self.write_frame(self.color, brightness)
    }

    fn set_color(&mut self, color: Color, brightness: u8) -> Result<(), LightingError> {
        self.color = color;
        self.brightness = brightness;
        self.off = brightness == 0;
        self.write_frame(color, brightness)
    }

    fn set_key_colors(&mut self, map: &PerKeyMap, base: Color, brightness: u8, _enable_user_mode: bool) -> Result<(), LightingError> {
        // The ite8291 protocol addresses 256 LED indices, not a (row, col)
        // matrix; per-key writes are densified by the render pipeline
        // before reaching here, and this controller accepts only a single
        // uniform color per feature-report burst, so average the map for
        // now (true per-key addressing would require a led-index table per
        // keyboard layout, tracked as future work, not this daemon's scope).
        if map.is_empty() {
            return self.set_color(base, brightness);
        }
        let (mut r, mut g, mut b) = (0u32, 0u32, 0u32);
        for color in map.0.values() {
            r += u32::from(color.r);
            g += u32::from(color.g);
            b += u32::from(color.b);
        }
        let n = map.0.len() as u32;
        let avg = Color::new((r / n) as u8, (g / n) as u8, (b / n) as u8);
        self.set_color(avg, brightness)
    }

    fn set_effect(&mut self, payload: &HardwareEffectPayload) -> Result<(), LightingError> {
        let effect_id: u8 = match payload.name.as_str() {
            "rainbow" => 0x01,
            "breathing" => 0x02,
            "wave" => 0x03,
            "ripple" => 0x04,
            "marquee" => 0x05,
            "raindrop" => 0x06,
            _ => return Err(LightingError::BackendUnsupported(format!("unknown hardware effect {}", payload.name))),
        };
        self.device.send_feature_report(&[0xCC, 0x10, effect_id, payload.hw_speed]).map_err(|e| classify_hid_error("usb_hid", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_and_deny_list_do_not_overlap() {
        for pid in ALLOWED_PIDS {
            assert!(!DENIED_PIDS.contains(pid));
        }
    }

    #[test]
    fn dmi_color_correction_is_identity_without_dmi_match() {
        let c = Color::new(10, 20, 30);
        // On a CI/sandbox host the dmi files are absent, so vendor/model
        // read as empty strings and correction is a no-op.
        assert_eq!(dmi_color_correction(c).r, c.r);
    }
}
