// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Per-channel transfer statistics

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct ChannelStats {
    pub transfers: AtomicU64,
    pub bytes: AtomicU64,
    pub timeouts: AtomicU64,
    pub resets: AtomicU64,
    /// Transfers refused because the channel still had one outstanding
    pub busy_rejections: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub transfers: u64,
    pub bytes: u64,
    pub timeouts: u64,
    pub resets: u64,
    pub busy_rejections: u64,
}

impl ChannelStats {
    pub fn record_transfer(&self, bytes: u64) {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            transfers: self.transfers.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            busy_rejections: self.busy_rejections.load(Ordering::Relaxed),
        }
    }
}
