// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

/// What a selected backend can actually do. Immutable once probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackendCapabilities {
    pub per_key: bool,
    /// True when `per_key` is emulated by averaging keys into zones rather
    /// than addressing each key independently. See SPEC_FULL.md §9's
    /// resolved open question on virtual vs. native per-key.
    pub per_key_is_virtual: bool,
    pub color: bool,
    pub hardware_effects: bool,
    pub palette: bool,
}

/// Result of probing a single backend candidate.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub available: bool,
    pub reason: String,
    /// 0-100; higher wins among multiple available backends.
    pub confidence: u8,
    pub identifiers: BTreeMap<String, String>,
}

impl ProbeResult {
    pub fn unavailable(reason: impl Into<String>) -> ProbeResult {
        ProbeResult { available: false, reason: reason.into(), confidence: 0, identifiers: BTreeMap::new() }
    }

    pub fn available(confidence: u8, reason: impl Into<String>) -> ProbeResult {
        ProbeResult { available: true, reason: reason.into(), confidence, identifiers: BTreeMap::new() }
    }

    pub fn with_identifier(mut self, key: impl Into<String>, value: impl Into<String>) -> ProbeResult {
        self.identifiers.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_has_zero_confidence() {
        let probe = ProbeResult::unavailable("no device");
        assert!(!probe.available);
        assert_eq!(probe.confidence, 0);
    }

    #[test]
    fn identifiers_chain() {
        let probe =
            ProbeResult::unavailable("unsupported dialect").with_identifier("usb_vid", "0x048d").with_identifier("usb_pid", "0x8297");
        assert_eq!(probe.identifiers.get("usb_pid").map(String::as_str), Some("0x8297"));
    }
}
