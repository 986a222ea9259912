// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Platform capability
//!
//! Everything the streaming core needs from the bus and the kernel: the
//! register window, coherent memory, streaming mappings and the interrupt
//! line.

use std::ptr::NonNull;
use std::sync::Arc;

use common::io::RegisterSpace;

use crate::error::Result;

/// Coherent DMA memory visible to both CPU and device.
#[derive(Debug)]
pub struct CoherentBuffer {
    pub virt: NonNull<u8>,
    pub bus: u64,
    pub size: usize,
}

unsafe impl Send for CoherentBuffer {}
unsafe impl Sync for CoherentBuffer {}

/// A streaming mapping of part of a [`CoherentBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMapping {
    pub bus: u64,
    pub len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaDirection {
    /// Device writes host memory
    FromDevice,
    /// Device reads host memory
    ToDevice,
}

/// Interrupt handler; runs in interrupt context and must not block.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

pub trait Platform: Send + Sync + 'static {
    fn registers(&self) -> Arc<dyn RegisterSpace>;

    fn alloc_coherent(&self, size: usize) -> Result<CoherentBuffer>;

    fn free_coherent(&self, buffer: &CoherentBuffer);

    /// Maps `len` bytes at `offset` into `buffer` for one transfer.
    fn map_single(
        &self,
        buffer: &CoherentBuffer,
        offset: usize,
        len: usize,
        dir: DmaDirection,
    ) -> Result<DmaMapping>;

    fn unmap_single(&self, mapping: &DmaMapping);

    fn request_irq(&self, handler: IrqHandler) -> Result<()>;

    fn free_irq(&self);
}
