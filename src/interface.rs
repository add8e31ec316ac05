// SPDX-License-Identifier: GPL-3.0-only

use crate::state::DiagnosticsSnapshot;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

/// Severity carried alongside a notification, mirrored in `rgbkbdd status`
/// output and any future desktop-notification integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Warning,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

/// Bounded channel the daemon's internals push human-facing events onto
/// (permission denied, backend lost) without blocking on a slow or absent
/// consumer. A full channel drops the oldest-pending notification rather
/// than stalling the producer thread.
pub struct NotificationChannel {
    sender: SyncSender<Notification>,
    receiver: Mutex<Receiver<Notification>>,
}

impl NotificationChannel {
    pub fn new(capacity: usize) -> NotificationChannel {
        let (sender, receiver) = sync_channel(capacity.max(1));
        NotificationChannel { sender, receiver: Mutex::new(receiver) }
    }

    pub fn sender(&self) -> NotificationSender { NotificationSender(self.sender.clone()) }

    /// Drains whatever is currently queued without blocking; used by a
    /// `status` call or a desktop-session bridge polling periodically.
    pub fn drain(&self) -> Vec<Notification> {
        let receiver = self.receiver.lock().unwrap();
        receiver.try_iter().collect()
    }
}

#[derive(Clone)]
pub struct NotificationSender(SyncSender<Notification>);

impl NotificationSender {
    pub fn send(&self, kind: NotificationKind, message: impl Into<String>) {
        let _ = self.0.try_send(Notification { kind, message: message.into() });
    }
}

/// Read-only handle external callers (the CLI's `status` subcommand) use to
/// observe daemon state without reaching into its internals. Grounded on
/// §4.9/§4.11: the daemon owns the only writer, this is a cheap snapshot
/// clone behind a mutex.
pub struct DiagnosticsHandle {
    latest: Mutex<Option<DiagnosticsSnapshot>>,
}

impl DiagnosticsHandle {
    pub fn new() -> Arc<DiagnosticsHandle> { Arc::new(DiagnosticsHandle { latest: Mutex::new(None) }) }

    pub fn publish(&self, snapshot: DiagnosticsSnapshot) { *self.latest.lock().unwrap() = Some(snapshot); }

    pub fn current(&self) -> Option<DiagnosticsSnapshot> { self.latest.lock().unwrap().clone() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_drain_in_order() {
        let channel = NotificationChannel::new(4);
        let sender = channel.sender();
        sender.send(NotificationKind::Info, "a");
        sender.send(NotificationKind::Warning, "b");
        let drained = channel.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "a");
        assert_eq!(drained[1].kind, NotificationKind::Warning);
    }

    #[test]
    fn diagnostics_handle_starts_empty() {
        let handle = DiagnosticsHandle::new();
        assert!(handle.current().is_none());
    }
}
