// SPDX-License-Identifier: GPL-3.0-only

use crate::power::PowerEvent;

/// A pluggable source of screen-idle state. The lighting core has no
/// desktop-session integration of its own (that's an external
/// collaborator, out of scope per §1), so this is a small seam a future
/// desktop-integrated build can implement; the default never fires.
pub trait IdleHook: Send {
    /// Called periodically by the daemon's main loop; returns the next
    /// event if the screen idle state changed since the last poll.
    fn poll(&mut self) -> Option<PowerEvent>;
}

/// Default hook: the screen is always considered on. Used when no
/// desktop-session integration is configured.
pub struct NeverIdle;

impl IdleHook for NeverIdle {
    fn poll(&mut self) -> Option<PowerEvent> { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_idle_never_fires() {
        let mut hook = NeverIdle;
        assert!(hook.poll().is_none());
    }
}
