// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

use std::sync::atomic::{AtomicU64, Ordering};

/// Device counters, updated from both the request path and the interrupt
/// handler.
#[derive(Default)]
pub struct DeviceStats {
    pub bursts: AtomicU64,
    pub interrupts: AtomicU64,
    pub timeouts: AtomicU64,
    pub streams: AtomicU64,
    pub single_shots: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStatsSnapshot {
    pub bursts: u64,
    pub interrupts: u64,
    pub timeouts: u64,
    pub streams: u64,
    pub single_shots: u64,
}

impl DeviceStats {
    pub fn snapshot(&self) -> DeviceStatsSnapshot {
        DeviceStatsSnapshot {
            bursts: self.bursts.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            streams: self.streams.load(Ordering::Relaxed),
            single_shots: self.single_shots.load(Ordering::Relaxed),
        }
    }
}
