// SPDX-License-Identifier: GPL-3.0-only

use serde::{Deserialize, Serialize};

/// An 8-bit-per-channel RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color { r: 0, g: 0, b: 0 };
    pub const WHITE: Color = Color { r: 255, g: 255, b: 255 };

    pub fn new(r: u8, g: u8, b: u8) -> Color { Color { r, g, b } }

    pub fn is_black(&self) -> bool { self.r == 0 && self.g == 0 && self.b == 0 }

    /// Parses a `rrggbb` hex string, as written by `set --color` or read
    /// from a sysfs `color`/`color_left` attribute.
    pub fn from_hex(hex: &str) -> Option<Color> {
        let hex = hex.trim();
        if hex.len() != 6 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        Some(Color::from_u32(value))
    }

    pub fn to_hex(self) -> String { format!("{:06X}", self.to_u32()) }

    pub fn from_u32(value: u32) -> Color {
        Color { r: (value >> 16) as u8, g: (value >> 8) as u8, b: value as u8 }
    }

    pub fn to_u32(self) -> u32 { (u32::from(self.r) << 16) | (u32::from(self.g) << 8) | u32::from(self.b) }

    /// Linear per-channel interpolation used by fades and effect mixing.
    pub fn lerp(self, other: Color, t: f32) -> Color {
        let t = t.clamp(0.0, 1.0);
        Color {
            r: lerp_channel(self.r, other.r, t),
            g: lerp_channel(self.g, other.g, t),
            b: lerp_channel(self.b, other.b, t),
        }
    }

    /// Scales each channel by `ratio`, promoting a channel that would round
    /// to zero back to 1 when the source channel was non-zero and the
    /// overall brightness is non-zero. Prevents the one-frame full-black
    /// blink some firmware interprets as "off".
    pub fn scale(self, ratio: f32, brightness_nonzero: bool) -> Color {
        let ratio = ratio.clamp(0.0, 1.0);
        Color {
            r: scale_channel(self.r, ratio, brightness_nonzero),
            g: scale_channel(self.g, ratio, brightness_nonzero),
            b: scale_channel(self.b, ratio, brightness_nonzero),
        }
    }
}

fn lerp_channel(from: u8, to: u8, t: f32) -> u8 {
    let value = f32::from(from) + (f32::from(to) - f32::from(from)) * t;
    value.round().clamp(0.0, 255.0) as u8
}

fn scale_channel(value: u8, ratio: f32, brightness_nonzero: bool) -> u8 {
    let scaled = (f32::from(value) * ratio).round() as u8;
    if scaled == 0 && value > 0 && brightness_nonzero {
        1
    } else {
        scaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let c = Color::new(0xAB, 0xCD, 0xEF);
        assert_eq!(Color::from_hex(&c.to_hex()), Some(c));
    }

    #[test]
    fn from_hex_rejects_bad_length() {
        assert_eq!(Color::from_hex("fff"), None);
    }

    #[test]
    fn lerp_endpoints() {
        let a = Color::new(0, 0, 0);
        let b = Color::new(200, 100, 50);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
    }

    #[test]
    fn scale_never_fully_blanks_nonzero_channel() {
        let c = Color::new(3, 0, 255);
        let scaled = c.scale(0.001, true);
        assert!(scaled.r >= 1);
        assert_eq!(scaled.g, 0);
        assert!(scaled.b >= 1);
    }

    #[test]
    fn scale_stays_black_when_brightness_is_zero() {
        let c = Color::new(3, 0, 255);
        let scaled = c.scale(0.0, false);
        assert_eq!(scaled, Color::BLACK);
    }
}
