// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use log::{error, LevelFilter};
use rgbkbdd::backend::cli_backend::CliBackend;
use rgbkbdd::backend::sysfs::SysfsBackend;
use rgbkbdd::backend::usb_hid::UsbHidBackend;
use rgbkbdd::backend::{select, KeyboardBackend};
use rgbkbdd::color::Color;
use rgbkbdd::config::ConfigStore;
use rgbkbdd::daemon::{self, DaemonOptions};
use rgbkbdd::lock::InstanceLock;
use rgbkbdd::state::{DiagnosticsSnapshot, EffectiveState};
use serde::Serialize;
use std::process;

#[derive(Parser)]
#[command(name = "rgbkbdd", version, about = "Per-key RGB keyboard backlight daemon for Linux laptops")]
struct Cli {
    #[arg(short, long, global = true, help = "enable debug logging")]
    verbose: bool,

    #[arg(short, long, global = true, help = "disable logging", conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the long-lived lighting daemon.
    Daemon {
        #[arg(long)]
        backend: Option<String>,
        #[arg(long)]
        allow_hardware: bool,
    },
    /// Print the current backend/effect diagnostics snapshot.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Edit the persisted lighting configuration.
    Set {
        #[arg(long)]
        effect: Option<String>,
        #[arg(long)]
        speed: Option<u8>,
        #[arg(long)]
        brightness: Option<u8>,
        #[arg(long, value_name = "rrggbb")]
        color: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else if cli.quiet {
        LevelFilter::Off
    } else {
        LevelFilter::Info
    };
    if let Err(err) = rgbkbdd::logging::setup(level) {
        eprintln!("failed to set up logging: {err}");
        process::exit(1);
    }

    let result = match cli.command {
        Command::Daemon { backend, allow_hardware } => daemon::run(DaemonOptions { requested_backend: backend, allow_hardware }),
        Command::Status { json } => run_status(json),
        Command::Set { effect, speed, brightness, color } => run_set(effect, speed, brightness, color),
    };

    if let Err(err) = result {
        error!("{err:#}");
        process::exit(1);
    }
}

#[derive(Serialize)]
struct StatusReport {
    running: bool,
    #[serde(flatten)]
    snapshot: DiagnosticsSnapshot,
}

/// Reads the config document directly and probes for hardware without
/// opening a device, so this works whether or not the daemon is currently
/// running; `running` is derived from whether the single-instance lock is
/// currently held by someone else.
fn run_status(json: bool) -> anyhow::Result<()> {
    let store = ConfigStore::load_or_default();
    let lock = InstanceLock::acquire()?;
    let running = lock.is_none();
    drop(lock);

    let backends: Vec<Box<dyn KeyboardBackend>> = vec![Box::new(UsbHidBackend::new()), Box::new(SysfsBackend::new()), Box::new(CliBackend::new())];
    let (chosen, probe) = select(&backends, None);
    let capabilities = chosen.map(|backend| backend.capabilities());
    let state = EffectiveState::new(store.intent().clone());
    let snapshot = DiagnosticsSnapshot::new(chosen.map(|backend| backend.name().to_string()), &probe, capabilities, None, &state);

    if json {
        println!("{}", serde_json::to_string_pretty(&StatusReport { running, snapshot })?);
    } else {
        println!("running: {}", if running { "yes" } else { "no" });
        println!("backend: {}", snapshot.backend.as_deref().unwrap_or("none"));
        println!("probe: {} (available={})", snapshot.probe_reason, snapshot.probe_available);
        println!(
            "effect: {} speed={} brightness={} (effective={})",
            snapshot.effect, snapshot.speed, snapshot.brightness, snapshot.effective_brightness
        );
        println!(
            "capabilities: per_key={} virtual={} color={} hardware_effects={}",
            snapshot.per_key, snapshot.per_key_is_virtual, snapshot.color, snapshot.hardware_effects
        );
        if let Some(err) = &snapshot.last_error {
            println!("last_error: {err}");
        }
    }
    Ok(())
}

/// Loads the config document, applies whichever fields were passed, and
/// writes it back atomically. Never talks to a running daemon directly —
/// the daemon's own config watcher picks up the change on its next poll.
fn run_set(effect: Option<String>, speed: Option<u8>, brightness: Option<u8>, color: Option<String>) -> anyhow::Result<()> {
    let mut store = ConfigStore::load_or_default();
    let intent = store.intent_mut();

    if let Some(effect) = effect {
        intent.effect = effect;
    }
    if let Some(speed) = speed {
        intent.speed = speed;
    }
    if let Some(brightness) = brightness {
        intent.brightness = brightness;
    }
    if let Some(color) = color {
        intent.color = Color::from_hex(&color).ok_or_else(|| anyhow::anyhow!("invalid color {color:?}, expected rrggbb hex"))?;
    }

    store.save()?;
    Ok(())
}
