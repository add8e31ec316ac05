// SPDX-License-Identifier: GPL-3.0-only

use crate::backend::cli_backend::CliBackend;
use crate::backend::sysfs::SysfsBackend;
use crate::backend::usb_hid::UsbHidBackend;
use crate::backend::{select, KeyboardBackend};
use crate::capabilities::BackendCapabilities;
use crate::config::{ConfigStore, POLL_INTERVAL};
use crate::device::DeviceHandle;
use crate::effects::Engine;
use crate::interface::{DiagnosticsHandle, NotificationChannel, NotificationKind};
use crate::lock::InstanceLock;
use crate::power::{ac_battery, idle::NeverIdle, lid, suspend, PowerEvent};
use crate::reconciler::Reconciler;
use crate::state::DiagnosticsSnapshot;
use anyhow::Context;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How often the main loop checks the live device for a hardware-driven
/// brightness change or a reconnect, per §4.7/§7. Deliberately coarser than
/// `POLL_INTERVAL`, which only paces the power-event/config-reload checks.
const HARDWARE_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct DaemonOptions {
    pub requested_backend: Option<String>,
    pub allow_hardware: bool,
}

/// Runs the long-lived daemon process: acquires the single-instance lock,
/// selects a backend, and wires the effects engine to the config store and
/// power observers through the reconciler until a termination signal
/// arrives.
pub fn run(options: DaemonOptions) -> anyhow::Result<()> {
    let Some(_lock) = InstanceLock::acquire().context("acquiring single-instance lock")? else {
        info!("another instance already holds the lock, exiting");
        return Ok(());
    };

    let backends: Vec<Box<dyn KeyboardBackend>> = vec![Box::new(UsbHidBackend::new()), Box::new(SysfsBackend::new()), Box::new(CliBackend::new())];
    let (chosen, probe) = select(&backends, options.requested_backend.as_deref());

    let matrix_dims;
    let capabilities: BackendCapabilities;
    let hw_effects: &'static [&'static str];
    let device_handle: Arc<DeviceHandle>;

    match chosen {
        Some(backend) => match backend.open_device() {
            Ok(device) => {
                info!("selected backend {} ({})", backend.name(), probe.reason);
                device_handle = Arc::new(DeviceHandle::new(device));
                matrix_dims = backend.matrix_dimensions();
                capabilities = backend.capabilities();
                hw_effects = backend.hardware_effect_list();
            }
            Err(err) => {
                error!("failed to open device for backend {}: {err}", backend.name());
                device_handle = Arc::new(DeviceHandle::empty());
                matrix_dims = (6, 21);
                capabilities = BackendCapabilities::default();
                hw_effects = &[];
            }
        },
        None => {
            if !options.allow_hardware {
                warn!("no keyboard lighting hardware detected: {}", probe.reason);
            }
            device_handle = Arc::new(DeviceHandle::empty());
            matrix_dims = (6, 21);
            capabilities = BackendCapabilities::default();
            hw_effects = &[];
        }
    }

    let notifications = NotificationChannel::new(16);
    let diagnostics = DiagnosticsHandle::new();

    let engine = Engine::new(device_handle.clone(), matrix_dims, capabilities, hw_effects);
    let permission_sender = notifications.sender();
    engine.set_permission_callback(Arc::new(move || {
        permission_sender.send(
            NotificationKind::Warning,
            "keyboard lighting permission denied — check udev rules or configure a privileged helper",
        );
    }));

    let mut config = ConfigStore::load_or_default();
    let mut reconciler = Reconciler::new(config.intent().clone());
    reconciler.apply(&engine);

    let stop = Arc::new(AtomicBool::new(false));
    let (power_tx, power_rx) = channel::<PowerEvent>();

    let mut worker_handles = Vec::new();
    {
        let tx = power_tx.clone();
        worker_handles.push(lid::spawn(stop.clone(), move |event| {
            let _ = tx.send(event);
        }));
    }
    {
        let tx = power_tx.clone();
        worker_handles.push(suspend::spawn(stop.clone(), move |event| {
            let _ = tx.send(event);
        }));
    }
    {
        let tx = power_tx.clone();
        worker_handles.push(ac_battery::spawn(stop.clone(), move |event| {
            let _ = tx.send(event);
        }));
    }
    drop(power_tx);
    worker_handles.push(spawn_signal_watcher(stop.clone()));

    let mut idle_hook = NeverIdle;
    let mut last_hardware_poll = Instant::now();

    info!("daemon started");
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        match power_rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => reconciler.handle_power_event(event, &engine),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if let Some(event) = crate::power::idle::IdleHook::poll(&mut idle_hook) {
            reconciler.handle_power_event(event, &engine);
        }

        if config.poll_reload() {
            reconciler.set_intent(config.intent().clone(), &engine);
        }

        if last_hardware_poll.elapsed() >= HARDWARE_POLL_INTERVAL {
            last_hardware_poll = Instant::now();
            poll_hardware_state(&device_handle, &backends, options.requested_backend.as_deref(), &mut config, &mut reconciler, &engine);
        }

        for notification in notifications.drain() {
            match notification.kind {
                NotificationKind::Warning => warn!("{}", notification.message),
                NotificationKind::Info => info!("{}", notification.message),
            }
        }

        let last_error = if !device_handle.is_available() { Some("device unavailable".to_string()) } else { None };
        diagnostics.publish(DiagnosticsSnapshot::new(
            chosen.map(|backend| backend.name().to_string()),
            &probe,
            Some(capabilities),
            last_error,
            reconciler.state(),
        ));
    }

    info!("daemon stopping");
    engine.stop();
    for handle in worker_handles {
        let _ = handle.join();
    }
    Ok(())
}

/// Reconciles the live device against the daemon's own idea of its state:
/// a hardware key changing brightness independently is treated as new user
/// intent (written back to the config store) per §4.7, and a disconnected
/// device is periodically re-probed and reopened per §7's recovery policy.
/// Skipped while an override (dim, battery saver, forced-off) is active, so
/// a deliberately reduced write-back never gets mistaken for a hardware key
/// press.
fn poll_hardware_state(
    device_handle: &DeviceHandle,
    backends: &[Box<dyn KeyboardBackend>],
    requested_backend: Option<&str>,
    config: &mut ConfigStore,
    reconciler: &mut Reconciler,
    engine: &Engine,
) {
    if !device_handle.is_available() {
        let (chosen, probe) = select(backends, requested_backend);
        if let Some(backend) = chosen {
            match backend.open_device() {
                Ok(device) => {
                    info!("reconnected to backend {} ({})", backend.name(), probe.reason);
                    device_handle.replace(device);
                }
                Err(err) => debug!("hardware-state poller: reopen of {} failed: {err}", backend.name()),
            }
        }
        return;
    }

    let Ok(hw_brightness) = device_handle.get_brightness() else { return };
    let state = reconciler.state();
    let no_override_active = state.effective_brightness() == state.intent.brightness;
    if no_override_active && hw_brightness != state.intent.brightness {
        config.intent_mut().brightness = hw_brightness;
        if let Err(err) = config.save() {
            warn!("failed to persist hardware-driven brightness change: {err}");
            return;
        }
        reconciler.set_intent(config.intent().clone(), engine);
    }
}

/// Watches SIGINT/SIGTERM/SIGHUP on a dedicated current-thread Tokio
/// runtime, setting `stop` so the main loop and every observer thread
/// unwind cleanly.
fn spawn_signal_watcher(stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
            error!("signal watcher: failed to build runtime, Ctrl-C/SIGTERM will not stop the daemon cleanly");
            return;
        };
        runtime.block_on(async {
            use tokio::signal::unix::{signal, SignalKind};
            let mut int = signal(SignalKind::interrupt()).unwrap();
            let mut term = signal(SignalKind::terminate()).unwrap();
            let mut hup = signal(SignalKind::hangup()).unwrap();
            let name = tokio::select! {
                _ = int.recv() => "SIGINT",
                _ = term.recv() => "SIGTERM",
                _ = hup.recv() => "SIGHUP",
            };
            info!("caught signal: {name}");
        });
        stop.store(true, Ordering::SeqCst);
    })
}
