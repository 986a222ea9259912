// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Engine configuration

use std::time::Duration;

/// DMA engine and allocation settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Wait for channel interrupts instead of polling the status register
    pub use_interrupts: bool,
    /// Maximum number of status polls before a transfer times out
    pub loop_limit: u32,
    /// Bound on an interrupt wait when the caller gives no timeout
    pub irq_timeout: Duration,
    /// Kernel memory allocation attempts before giving up
    pub max_alloc_retries: u32,
    /// Sleep between allocation attempts
    pub alloc_retry_sleep: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_interrupts: false,
            loop_limit: 1_000_000,
            irq_timeout: Duration::from_millis(1000),
            max_alloc_retries: 20,
            alloc_retry_sleep: Duration::from_millis(10),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `MPRACE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("MPRACE_USE_INTERRUPTS") {
            config.use_interrupts = val == "1" || val.to_lowercase() == "true";
        }

        if let Ok(val) = std::env::var("MPRACE_LOOP_LIMIT") {
            if let Ok(n) = val.parse() {
                config.loop_limit = n;
            }
        }

        if let Ok(val) = std::env::var("MPRACE_IRQ_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.irq_timeout = Duration::from_millis(n);
            }
        }

        if let Ok(val) = std::env::var("MPRACE_ALLOC_RETRIES") {
            if let Ok(n) = val.parse::<u32>() {
                config.max_alloc_retries = n.max(1);
            }
        }

        if let Ok(val) = std::env::var("MPRACE_ALLOC_RETRY_SLEEP_MS") {
            if let Ok(n) = val.parse() {
                config.alloc_retry_sleep = Duration::from_millis(n);
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
        std::env::set_var("MPRACE_USE_INTERRUPTS", "true");
        std::env::set_var("MPRACE_LOOP_LIMIT", "42");
        std::env::set_var("MPRACE_ALLOC_RETRIES", "not-a-number");

        let config = EngineConfig::from_env();
        assert!(config.use_interrupts);
        assert_eq!(config.loop_limit, 42);
        assert_eq!(config.max_alloc_retries, 20);

        std::env::remove_var("MPRACE_USE_INTERRUPTS");
        std::env::remove_var("MPRACE_LOOP_LIMIT");
        std::env::remove_var("MPRACE_ALLOC_RETRIES");
    }
}
