// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Streaming device configuration

use std::time::Duration;

/// Initial transfer geometry and wait bounds
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Dwords per TLP
    pub tlp_size: u32,
    /// TLPs per burst
    pub tlp_count: u32,
    /// Bursts per buffer half
    pub dma_count: u32,
    /// Bound on the wait for a buffer half during streaming
    pub stream_timeout: Duration,
    /// Bound on the wait of a single-shot read or write
    pub transfer_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            tlp_size: 32,
            tlp_count: 128,
            dma_count: 1,
            stream_timeout: Duration::from_millis(10),
            transfer_timeout: Duration::from_secs(1),
        }
    }
}

impl StreamConfig {
    /// Defaults overridden by `FPGA_PCIE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("FPGA_PCIE_TLP_SIZE") {
            if let Ok(n) = val.parse() {
                config.tlp_size = n;
            }
        }

        if let Ok(val) = std::env::var("FPGA_PCIE_TLP_COUNT") {
            if let Ok(n) = val.parse() {
                config.tlp_count = n;
            }
        }

        if let Ok(val) = std::env::var("FPGA_PCIE_DMA_COUNT") {
            if let Ok(n) = val.parse() {
                config.dma_count = n;
            }
        }

        if let Ok(val) = std::env::var("FPGA_PCIE_STREAM_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.stream_timeout = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("FPGA_PCIE_TRANSFER_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.transfer_timeout = Duration::from_millis(n);
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_overrides() {
        std::env::set_var("FPGA_PCIE_TLP_COUNT", "64");
        std::env::set_var("FPGA_PCIE_STREAM_TIMEOUT_MS", "25");
        std::env::set_var("FPGA_PCIE_DMA_COUNT", "two");

        let config = StreamConfig::from_env();
        assert_eq!(config.tlp_count, 64);
        assert_eq!(config.stream_timeout, Duration::from_millis(25));
        assert_eq!(config.dma_count, 1);
        assert_eq!(config.tlp_size, 32);

        std::env::remove_var("FPGA_PCIE_TLP_COUNT");
        std::env::remove_var("FPGA_PCIE_STREAM_TIMEOUT_MS");
        std::env::remove_var("FPGA_PCIE_DMA_COUNT");
    }
}
