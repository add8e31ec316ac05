// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::HardwareEffectPayload;
use crate::color::Color;

/// UI speed (0-10, 10 fastest) inverted to a hardware speed scale (1-11,
/// 1 fastest) most controller firmwares use, clamped at both ends.
/// Round-trips within spec's `hw = 11 - ui` rule from §8.
pub fn ui_speed_to_hw(ui_speed: u8) -> u8 { 11u8.saturating_sub(ui_speed.min(10)) }

/// Builds the payload for a named hardware effect. Each effect declares its
/// accepted parameters up front instead of the source's "catch an
/// exception, strip the offending kwarg, retry" dance — so there's no
/// dynamic dispatch surprise at the one call site in `effects::mod`.
pub fn build_payload(name: &str, ui_speed: u8, color: Color, palette_slot: Option<u8>) -> HardwareEffectPayload {
    let hw_speed = ui_speed_to_hw(ui_speed);
    match name {
        "breathing" => HardwareEffectPayload { name: name.to_string(), hw_speed, color: None, palette_slot },
        "rainbow" | "wave" | "ripple" | "marquee" | "raindrop" => {
            HardwareEffectPayload { name: name.to_string(), hw_speed, color: None, palette_slot: None }
        }
        _ => HardwareEffectPayload { name: name.to_string(), hw_speed, color: Some(color), palette_slot: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_inversion_matches_spec_formula() {
        assert_eq!(ui_speed_to_hw(0), 11);
        assert_eq!(ui_speed_to_hw(10), 1);
        assert_eq!(ui_speed_to_hw(5), 6);
    }

    #[test]
    fn speed_inversion_clamps_out_of_range_input() {
        assert_eq!(ui_speed_to_hw(255), 1);
    }

    #[test]
    fn breathing_carries_palette_slot_not_raw_color() {
        let payload = build_payload("breathing", 5, Color::new(1, 2, 3), Some(2));
        assert_eq!(payload.palette_slot, Some(2));
        assert!(payload.color.is_none());
    }
}
