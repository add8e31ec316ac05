// SPDX-License-Identifier: GPL-3.0-only

use std::io;

/// Failure taxonomy for the lighting core. Every backend and subsystem
/// classifies its own I/O errors into one of these before the error leaves
/// its module, so callers never have to pattern-match on `io::Error` kinds
/// or string contents again.
#[derive(Debug, thiserror::Error)]
pub enum LightingError {
    #[error("permission denied accessing {device}: {source}")]
    PermissionDenied { device: String, source: io::Error },

    #[error("device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("device busy: {0}")]
    DeviceBusy(String),

    #[error("protocol error talking to {device}: {reason}")]
    ProtocolError { device: String, reason: String },

    #[error("config document corrupt: {0}")]
    ConfigCorrupt(String),

    #[error("backend unsupported: {0}")]
    BackendUnsupported(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LightingError {
    /// Classifies a raw I/O error against a device path, per §7's
    /// propagation policy: ENODEV / "No such device" is a disconnect,
    /// EACCES / EPERM is a permission failure, everything else is a plain
    /// I/O error.
    pub fn classify(device: &str, err: io::Error) -> LightingError {
        if err.kind() == io::ErrorKind::PermissionDenied {
            return LightingError::PermissionDenied { device: device.to_string(), source: err };
        }
        if err.raw_os_error() == Some(libc::ENODEV) || err.to_string().contains("No such device") {
            return LightingError::DeviceDisconnected(device.to_string());
        }
        LightingError::Io(err)
    }

    pub fn is_disconnect(&self) -> bool { matches!(self, LightingError::DeviceDisconnected(_)) }

    pub fn is_permission(&self) -> bool { matches!(self, LightingError::PermissionDenied { .. }) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_permission_denied() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        let classified = LightingError::classify("/dev/hidraw0", err);
        assert!(classified.is_permission());
    }

    #[test]
    fn classifies_enodev() {
        let err = io::Error::from_raw_os_error(libc::ENODEV);
        let classified = LightingError::classify("/dev/hidraw0", err);
        assert!(classified.is_disconnect());
    }

    #[test]
    fn classifies_enodev_message_fallback() {
        let err = io::Error::new(io::ErrorKind::Other, "No such device");
        let classified = LightingError::classify("/sys/class/leds/foo", err);
        assert!(classified.is_disconnect());
    }
}
