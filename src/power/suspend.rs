// SPDX-License-Identifier: GPL-3.0-only

use crate::power::PowerEvent;
use futures_util::StreamExt as _;
use log::{error, warn};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use zbus::dbus_proxy;

#[dbus_proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    #[dbus_proxy(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/// Subscribes to logind's `PrepareForSleep` signal on a dedicated
/// current-thread Tokio runtime. `start=true` means the system is about to
/// suspend; `start=false` means it just resumed (the daemon waits a short
/// grace period before the first post-resume write, since hardware may not
/// be immediately ready).
pub fn spawn(stop: Arc<AtomicBool>, on_event: impl Fn(PowerEvent) + Send + 'static) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt,
            Err(err) => {
                error!("suspend observer: failed to build runtime: {err}, falling back to acpi_listen");
                return acpi_listen_fallback(stop, on_event);
            }
        };

        let result = runtime.block_on(run(stop.clone(), &on_event));
        if let Err(err) = result {
            warn!("suspend observer: login1 D-Bus path failed ({err}), falling back to acpi_listen");
            acpi_listen_fallback(stop, on_event);
        }
    })
}

async fn run(stop: Arc<AtomicBool>, on_event: &(impl Fn(PowerEvent) + Send)) -> zbus::Result<()> {
    let connection = zbus::Connection::system().await?;
    let proxy = Login1ManagerProxy::new(&connection).await?;
    let mut signals = proxy.receive_prepare_for_sleep().await?;

    while !stop.load(Ordering::SeqCst) {
        let next = tokio::time::timeout(Duration::from_millis(500), signals.next()).await;
        match next {
            Ok(Some(signal)) => {
                if let Ok(args) = signal.args() {
                    if args.start {
                        on_event(PowerEvent::Suspending);
                    } else {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        on_event(PowerEvent::Resumed);
                    }
                }
            }
            Ok(None) => break,
            Err(_) => continue, // timeout, just re-check the stop flag
        }
    }
    Ok(())
}

/// Fallback path when the system D-Bus is unreachable: shell out to
/// `acpi_listen` and parse its plain-text event lines. Used only as the
/// degraded path since the primary path is a native zbus subscription.
fn acpi_listen_fallback(stop: Arc<AtomicBool>, on_event: impl Fn(PowerEvent)) {
    use std::io::{BufRead, BufReader};

    let mut child = match std::process::Command::new("acpi_listen").stdout(Stdio::piped()).spawn() {
        Ok(child) => child,
        Err(err) => {
            error!("suspend observer: acpi_listen unavailable: {err}");
            return;
        }
    };

    let Some(stdout) = child.stdout.take() else { return };
    let reader = BufReader::new(stdout);
    for line in reader.lines().map_while(Result::ok) {
        if stop.load(Ordering::SeqCst) {
            let _ = child.kill();
            return;
        }
        let lower = line.to_lowercase();
        if lower.contains("suspend") || lower.contains("sleep") {
            on_event(PowerEvent::Suspending);
        } else if lower.contains("resume") || lower.contains("wake") {
            on_event(PowerEvent::Resumed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_event_variants_are_distinguishable() {
        assert_ne!(PowerEvent::Suspending, PowerEvent::Resumed);
    }
}
