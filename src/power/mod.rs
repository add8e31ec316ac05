// SPDX-License-Identifier: GPL-3.0-only

pub mod ac_battery;
pub mod idle;
pub mod lid;
pub mod suspend;

/// Events the power observers (C6) feed to the reconciler. Each variant
/// corresponds to one arbitration rule in SPEC_FULL.md §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    LidClosed,
    LidOpened,
    Suspending,
    Resumed,
    OnBattery,
    OnAc,
    BatteryCritical,
    BatteryRecovered,
    ScreenDimming,
    ScreenUndimming,
    ScreenOff,
    ScreenOn,
}
