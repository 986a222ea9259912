// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Software XAPP1052 device
//!
//! Write DMA fills the programmed bus range with the `WDMATLPP` pattern,
//! read DMA captures host data and flags a data error when it differs from
//! `RDMATLPP`. Completion interrupts are delivered immediately, after a
//! delay, or not at all.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{trace, warn};
use parking_lot::Mutex;
use spin::Mutex as SpinMutex;

use common::io::{RegisterSpace, WordRegion};

use crate::error::{Error, Result};
use crate::platform::{CoherentBuffer, DmaDirection, DmaMapping, IrqHandler, Platform};
use crate::regs::{self, tlp_target, Dcsr, Ddmacr, TLPS_SIZE_MASK};

const PAGE_SIZE: usize = 4096;
const DEFAULT_BUS_BASE: u64 = 0x3000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqMode {
    Immediate,
    Delayed(Duration),
    Never,
}

struct Region {
    virt: NonNull<u8>,
    bus: u64,
    layout: Layout,
}

unsafe impl Send for Region {}

struct SimCard {
    regs: WordRegion,
    regions: Mutex<Vec<Region>>,
    next_bus: AtomicU64,
    handler: SpinMutex<Option<IrqHandler>>,
    irq_mode: Mutex<IrqMode>,
    live_mappings: AtomicUsize,
    write_bursts: AtomicU32,
    read_bursts: AtomicU32,
    interrupts: AtomicU32,
    received: Mutex<Vec<u32>>,
}

impl SimCard {
    fn translate(&self, bus: u64, len: usize) -> Option<*mut u8> {
        let regions = self.regions.lock();
        regions.iter().find_map(|region| {
            let end = region.bus + region.layout.size() as u64;
            if bus >= region.bus && bus + len as u64 <= end {
                Some(unsafe { region.virt.as_ptr().add((bus - region.bus) as usize) })
            } else {
                None
            }
        })
    }

    /// Target and length of the burst programmed in a register set.
    fn programmed(&self, addr: usize, size: usize, count: usize) -> (u64, usize) {
        let size_word = self.regs.read32(size);
        let bus = tlp_target(self.regs.read32(addr), size_word);
        let len = (size_word & TLPS_SIZE_MASK) as usize * self.regs.read32(count) as usize * 4;
        (bus, len)
    }

    fn dcsr_written(&self, value: u32) {
        if Dcsr::from_bits_retain(value).contains(Dcsr::INIT_RESET) {
            self.regs.write32(regs::DDMACR, 0);
        }
    }

    fn ddmacr_written(self: &Arc<Self>, value: u32) {
        let control = Ddmacr::from_bits_retain(value);

        if control.contains(Ddmacr::WDMA_START) {
            self.write_bursts.fetch_add(1, Ordering::Relaxed);
            let (bus, len) = self.programmed(regs::WDMATLPA, regs::WDMATLPS, regs::WDMATLPC);
            let pattern = self.regs.read32(regs::WDMATLPP);
            match self.translate(bus, len) {
                Some(host) => {
                    let host = host as *mut u32;
                    for i in 0..len / 4 {
                        unsafe { ptr::write_volatile(host.add(i), pattern) };
                    }
                }
                None => warn!("sim: write DMA to unmapped bus range {:#x}+{:#x}", bus, len),
            }
            self.regs.set_bits(regs::DDMACR, Ddmacr::WDMA_DONE.bits());
            trace!("sim: write DMA of {} bytes to {:#x}", len, bus);
            if !control.contains(Ddmacr::WDMA_INT_DISABLE) {
                self.interrupt();
            }
        }

        if control.contains(Ddmacr::RDMA_START) {
            self.read_bursts.fetch_add(1, Ordering::Relaxed);
            let (bus, len) = self.programmed(regs::RDMATLPA, regs::RDMATLPS, regs::RDMATLPC);
            let expected = self.regs.read32(regs::RDMATLPP);
            let mut status = Ddmacr::RDMA_DONE;
            match self.translate(bus, len) {
                Some(host) => {
                    let host = host as *const u32;
                    let mut received = self.received.lock();
                    received.clear();
                    for i in 0..len / 4 {
                        let value = unsafe { ptr::read_volatile(host.add(i)) };
                        if value != expected {
                            status |= Ddmacr::RDMA_DATA_ERROR;
                        }
                        received.push(value);
                    }
                }
                None => {
                    warn!("sim: read DMA from unmapped bus range {:#x}+{:#x}", bus, len);
                    status |= Ddmacr::RDMA_DATA_ERROR;
                }
            }
            self.regs.set_bits(regs::DDMACR, status.bits());
            trace!("sim: read DMA of {} bytes from {:#x}", len, bus);
            if !control.contains(Ddmacr::RDMA_INT_DISABLE) {
                self.interrupt();
            }
        }
    }

    fn interrupt(self: &Arc<Self>) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
        let mode = *self.irq_mode.lock();
        match mode {
            IrqMode::Immediate => self.fire(),
            IrqMode::Delayed(delay) => {
                let card = Arc::clone(self);
                thread::spawn(move || {
                    thread::sleep(delay);
                    card.fire();
                });
            }
            IrqMode::Never => {}
        }
    }

    fn fire(&self) {
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

impl Drop for SimCard {
    fn drop(&mut self) {
        for region in self.regions.get_mut().drain(..) {
            unsafe { alloc::dealloc(region.virt.as_ptr(), region.layout) };
        }
    }
}

struct SimWindow(Arc<SimCard>);

impl RegisterSpace for SimWindow {
    fn len(&self) -> usize {
        regs::WINDOW_SIZE
    }

    fn read32(&self, offset: usize) -> u32 {
        self.0.regs.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.0.regs.write32(offset, value);
        match offset {
            regs::DCSR => self.0.dcsr_written(value),
            regs::DDMACR => self.0.ddmacr_written(value),
            _ => {}
        }
    }
}

/// [`Platform`] backed by a software device.
pub struct SimPlatform {
    card: Arc<SimCard>,
}

impl SimPlatform {
    pub fn new() -> Arc<Self> {
        Self::with_bus_base(DEFAULT_BUS_BASE)
    }

    /// Coherent memory gets bus addresses from `base` upwards.
    pub fn with_bus_base(base: u64) -> Arc<Self> {
        Arc::new(Self {
            card: Arc::new(SimCard {
                regs: WordRegion::new(regs::WINDOW_SIZE),
                regions: Mutex::new(Vec::new()),
                next_bus: AtomicU64::new(base),
                handler: SpinMutex::new(None),
                irq_mode: Mutex::new(IrqMode::Immediate),
                live_mappings: AtomicUsize::new(0),
                write_bursts: AtomicU32::new(0),
                read_bursts: AtomicU32::new(0),
                interrupts: AtomicU32::new(0),
                received: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn set_irq_mode(&self, mode: IrqMode) {
        *self.card.irq_mode.lock() = mode;
    }

    /// Delivers the completion interrupt now.
    pub fn raise_irq(&self) {
        self.card.fire();
    }

    pub fn reg(&self, offset: usize) -> u32 {
        self.card.regs.read32(offset)
    }

    pub fn live_mappings(&self) -> usize {
        self.card.live_mappings.load(Ordering::Acquire)
    }

    pub fn coherent_allocations(&self) -> usize {
        self.card.regions.lock().len()
    }

    pub fn write_bursts(&self) -> u32 {
        self.card.write_bursts.load(Ordering::Relaxed)
    }

    pub fn read_bursts(&self) -> u32 {
        self.card.read_bursts.load(Ordering::Relaxed)
    }

    /// Interrupts raised by the device, delivered or not.
    pub fn interrupts(&self) -> u32 {
        self.card.interrupts.load(Ordering::Relaxed)
    }

    /// Dwords captured by the last read DMA.
    pub fn received(&self) -> Vec<u32> {
        self.card.received.lock().clone()
    }
}

impl Platform for SimPlatform {
    fn registers(&self) -> Arc<dyn RegisterSpace> {
        Arc::new(SimWindow(Arc::clone(&self.card)))
    }

    fn alloc_coherent(&self, size: usize) -> Result<CoherentBuffer> {
        let layout =
            Layout::from_size_align(size, PAGE_SIZE).map_err(|_| Error::AllocationFailed)?;
        let virt = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or(Error::AllocationFailed)?;
        let span = (size.div_ceil(PAGE_SIZE) + 1) * PAGE_SIZE;
        let bus = self.card.next_bus.fetch_add(span as u64, Ordering::Relaxed);

        self.card.regions.lock().push(Region { virt, bus, layout });
        Ok(CoherentBuffer { virt, bus, size })
    }

    fn free_coherent(&self, buffer: &CoherentBuffer) {
        let mut regions = self.card.regions.lock();
        if let Some(index) = regions.iter().position(|region| region.bus == buffer.bus) {
            let region = regions.swap_remove(index);
            unsafe { alloc::dealloc(region.virt.as_ptr(), region.layout) };
        }
    }

    fn map_single(
        &self,
        buffer: &CoherentBuffer,
        offset: usize,
        len: usize,
        _dir: DmaDirection,
    ) -> Result<DmaMapping> {
        if offset.checked_add(len).map_or(true, |end| end > buffer.size) {
            return Err(Error::InvalidArgument);
        }
        self.card.live_mappings.fetch_add(1, Ordering::AcqRel);
        Ok(DmaMapping {
            bus: buffer.bus + offset as u64,
            len,
        })
    }

    fn unmap_single(&self, _mapping: &DmaMapping) {
        let _ = self
            .card
            .live_mappings
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    fn request_irq(&self, handler: IrqHandler) -> Result<()> {
        let mut slot = self.card.handler.lock();
        if slot.is_some() {
            return Err(Error::Busy);
        }
        *slot = Some(handler);
        Ok(())
    }

    fn free_irq(&self) {
        self.card.handler.lock().take();
    }
}
