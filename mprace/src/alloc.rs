// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Kernel memory allocation with bounded retry
//!
//! Pinned contiguous memory is a scarce resource and allocation fails
//! transiently while the driver reclaims freed buffers. Each request is
//! retried a fixed number of times with a fixed sleep before
//! [`Error::AllocationFailed`] is returned. The attempt that succeeded is
//! recorded so the retry behaviour can be inspected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::driver::{Driver, KernelMemory};
use crate::error::{Error, Result};

pub struct KernelAllocator<D: Driver> {
    driver: Arc<D>,
    max_retries: u32,
    retry_sleep: Duration,
    /// `succeeded_at[n]` counts allocations that needed `n + 1` attempts
    succeeded_at: Box<[AtomicU64]>,
    failures: AtomicU64,
}

/// Point-in-time copy of the retry counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryStats {
    pub succeeded_at: Vec<u64>,
    pub failures: u64,
}

impl RetryStats {
    /// Allocations that needed more than one attempt.
    pub fn retried(&self) -> u64 {
        self.succeeded_at.iter().skip(1).sum()
    }
}

impl<D: Driver> KernelAllocator<D> {
    pub fn new(driver: Arc<D>, max_retries: u32, retry_sleep: Duration) -> Self {
        let max_retries = max_retries.max(1);
        Self {
            driver,
            max_retries,
            retry_sleep,
            succeeded_at: (0..max_retries).map(|_| AtomicU64::new(0)).collect(),
            failures: AtomicU64::new(0),
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn alloc(&self, size: usize) -> Result<KernelMemory> {
        for attempt in 0..self.max_retries {
            match self.driver.alloc_kernel_memory(size) {
                Ok(mem) => {
                    self.succeeded_at[attempt as usize].fetch_add(1, Ordering::Relaxed);
                    if attempt > 0 {
                        debug!(
                            "kernel memory: {} bytes allocated after {} attempts",
                            size,
                            attempt + 1
                        );
                    }
                    return Ok(mem);
                }
                Err(Error::AllocationFailed) => {
                    if attempt + 1 < self.max_retries {
                        thread::sleep(self.retry_sleep);
                    }
                }
                Err(err) => return Err(err),
            }
        }

        self.failures.fetch_add(1, Ordering::Relaxed);
        let stats = self.retry_stats();
        warn!(
            "kernel memory: giving up on {} bytes after {} attempts (succeeded at: {:?}, failures: {})",
            size, self.max_retries, stats.succeeded_at, stats.failures
        );
        Err(Error::AllocationFailed)
    }

    pub fn free(&self, mem: &KernelMemory) {
        self.driver.free_kernel_memory(mem);
    }

    pub fn retry_stats(&self) -> RetryStats {
        RetryStats {
            succeeded_at: self
                .succeeded_at
                .iter()
                .map(|count| count.load(Ordering::Relaxed))
                .collect(),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::SimDriver;

    #[test]
    fn test_transient_failures_are_retried() {
        let driver = SimDriver::new();
        driver.fail_next_allocations(3);

        let alloc = KernelAllocator::new(Arc::clone(&driver), 20, Duration::from_millis(1));
        let mem = alloc.alloc(4096).unwrap();
        assert_eq!(mem.size, 4096);

        let stats = alloc.retry_stats();
        assert_eq!(stats.succeeded_at[3], 1);
        assert_eq!(stats.retried(), 1);
        assert_eq!(stats.failures, 0);
        alloc.free(&mem);
    }

    #[test]
    fn test_exhausted_retries_fail() {
        let driver = SimDriver::new();
        driver.fail_next_allocations(5);

        let alloc = KernelAllocator::new(Arc::clone(&driver), 4, Duration::ZERO);
        assert_eq!(alloc.alloc(64).unwrap_err(), Error::AllocationFailed);
        assert_eq!(alloc.retry_stats().failures, 1);

        // the fifth injected failure is consumed, then memory is available
        let mem = alloc.alloc(64).unwrap();
        assert_eq!(alloc.retry_stats().succeeded_at[1], 1);
        alloc.free(&mem);
    }
}
