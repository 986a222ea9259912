// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use common::io::RegisterSpace;

use crate::abb;
use crate::driver::{Driver, KernelMemory, UserMemory};
use crate::error::{Error, Result};
use crate::sim::board::{SimBoard, SimFifo, SimRegisters, BRAM_SIZE, FIFO_WINDOW_SIZE, REGS_SIZE};
use crate::sim::memory::PhysMemory;

/// [`Driver`] backed by a [`SimBoard`].
pub struct SimDriver {
    memory: Arc<PhysMemory>,
    board: Arc<SimBoard>,
    open: AtomicBool,
    failing_allocations: AtomicU32,
    fail_user_mappings: AtomicBool,
}

impl SimDriver {
    pub fn new() -> Arc<Self> {
        let memory = Arc::new(PhysMemory::new());
        let board = SimBoard::new(Arc::clone(&memory));
        Arc::new(Self {
            memory,
            board,
            open: AtomicBool::new(false),
            failing_allocations: AtomicU32::new(0),
            fail_user_mappings: AtomicBool::new(false),
        })
    }

    pub fn board(&self) -> &Arc<SimBoard> {
        &self.board
    }

    pub fn memory(&self) -> &Arc<PhysMemory> {
        &self.memory
    }

    /// The next `count` kernel allocations fail transiently.
    pub fn fail_next_allocations(&self, count: u32) {
        self.failing_allocations.store(count, Ordering::Relaxed);
    }

    pub fn fail_user_mappings(&self, fail: bool) {
        self.fail_user_mappings.store(fail, Ordering::Relaxed);
    }

    pub fn live_kernel_allocations(&self) -> usize {
        self.memory.live_allocations()
    }

    fn check_open(&self) -> Result<()> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::DeviceNotOpen)
        }
    }
}

impl Driver for SimDriver {
    fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::Release);
        info!("sim: board opened");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::Release);
        Ok(())
    }

    fn mmap_area(&self, area: u32) -> Result<Arc<dyn RegisterSpace>> {
        self.check_open()?;
        match area {
            abb::BAR_REGS => Ok(Arc::new(SimRegisters(Arc::clone(&self.board)))),
            abb::BAR_MEM => Ok(Arc::clone(self.board.bram()) as Arc<dyn RegisterSpace>),
            abb::BAR_FIFO => Ok(Arc::new(SimFifo(Arc::clone(&self.board)))),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn unmap_area(&self, area: u32) -> Result<()> {
        self.area_size(area).map(|_| ())
    }

    fn area_size(&self, area: u32) -> Result<usize> {
        match area {
            abb::BAR_REGS => Ok(REGS_SIZE),
            abb::BAR_MEM => Ok(BRAM_SIZE),
            abb::BAR_FIFO => Ok(FIFO_WINDOW_SIZE),
            _ => Err(Error::InvalidArgument),
        }
    }

    fn wait_for_interrupt(&self, source: u32, timeout: Option<Duration>) -> Result<()> {
        self.check_open()?;
        self.board.irq().wait(source, timeout)
    }

    fn alloc_kernel_memory(&self, size: usize) -> Result<KernelMemory> {
        let injected = self
            .failing_allocations
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(Error::AllocationFailed);
        }
        self.memory.alloc(size)
    }

    fn free_kernel_memory(&self, mem: &KernelMemory) {
        self.memory.free(mem);
    }

    fn map_user_memory(&self, ptr: NonNull<u8>, size: usize) -> Result<UserMemory> {
        if self.fail_user_mappings.load(Ordering::Relaxed) {
            return Err(Error::UserMappingFailed);
        }
        self.memory.map_user(ptr, size)
    }

    fn unmap_user_memory(&self, mem: &UserMemory) {
        self.memory.unmap_user(mem);
    }
}
