// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Driver capability
//!
//! Everything the board library needs from the operating system goes through
//! [`Driver`]: mapping device windows, waiting for interrupts, and obtaining
//! DMA-able memory. The library never knows how a region is mapped or how an
//! interrupt is delivered.

use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;

use common::io::RegisterSpace;

use crate::error::Result;

/// Host page size assumed by descriptor placement and user mappings.
pub const PAGE_SIZE: usize = 4096;

/// Cache maintenance direction for DMA memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDir {
    /// CPU writes must become visible to the device
    ToDevice,
    /// Device writes must become visible to the CPU
    FromDevice,
}

/// Physically contiguous memory pinned by the driver.
#[derive(Debug)]
pub struct KernelMemory {
    /// Driver handle used to release the allocation
    pub handle: u64,
    pub virt: NonNull<u8>,
    /// Bus address of the first byte
    pub phys: u64,
    pub size: usize,
}

unsafe impl Send for KernelMemory {}
unsafe impl Sync for KernelMemory {}

impl KernelMemory {
    pub fn as_ptr(&self) -> *mut u8 {
        self.virt.as_ptr()
    }
}

/// One physically contiguous run of a user mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    pub phys: u64,
    pub len: usize,
}

/// Pinned process memory with its scatter/gather list.
#[derive(Debug)]
pub struct UserMemory {
    pub handle: u64,
    pub virt: NonNull<u8>,
    pub size: usize,
    /// Physical runs in buffer order
    pub sg: Vec<SgEntry>,
}

unsafe impl Send for UserMemory {}
unsafe impl Sync for UserMemory {}

/// Operating system access to one PCI board.
pub trait Driver: Send + Sync + 'static {
    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    /// Maps device window `area` (a BAR index).
    fn mmap_area(&self, area: u32) -> Result<Arc<dyn RegisterSpace>>;

    fn unmap_area(&self, area: u32) -> Result<()>;

    /// Size in bytes of device window `area`.
    fn area_size(&self, area: u32) -> Result<usize>;

    /// Blocks until interrupt `source` fires.
    ///
    /// `None` waits without bound; an expired bound returns
    /// [`Error::DmaTimeout`](crate::Error::DmaTimeout).
    fn wait_for_interrupt(&self, source: u32, timeout: Option<Duration>) -> Result<()>;

    /// One attempt at allocating pinned contiguous memory.
    fn alloc_kernel_memory(&self, size: usize) -> Result<KernelMemory>;

    fn free_kernel_memory(&self, mem: &KernelMemory);

    /// Pins `size` bytes at `ptr` and returns their physical layout.
    fn map_user_memory(&self, ptr: NonNull<u8>, size: usize) -> Result<UserMemory>;

    fn unmap_user_memory(&self, mem: &UserMemory);

    fn sync_kernel_memory(&self, _mem: &KernelMemory, _dir: SyncDir) -> Result<()> {
        Ok(())
    }

    fn sync_user_memory(&self, _mem: &UserMemory, _dir: SyncDir) -> Result<()> {
        Ok(())
    }
}
