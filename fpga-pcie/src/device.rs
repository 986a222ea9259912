// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Ping-pong streaming device
//!
//! One coherent buffer of two halves is shared with the device. While a
//! stream runs, the device fills one half with a chain of `dma_count` write
//! DMA bursts while the caller reads the other. Only the last burst of a
//! chain raises the completion interrupt.
//!
//! ```text
//!   Reset ──start──▶ Streaming ◀──next──┐
//!     ▲                 │  └────────────┘
//!     │                end
//!     │                 ▼
//!     └─────reset───── Ended ──start──▶ Streaming
//! ```
//!
//! The interrupt handler is the only writer of the completion flag; the
//! request path is the only reader and clearer.
//!
//! A timed out wait does not stop the device. The stream stays in its state
//! and the caller may retry `next`, or reset the card.

use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use log::{debug, error, info, trace, warn};
use parking_lot::{Condvar, Mutex};

use common::io::{Io, Mmio, RegisterSpace};

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::ioctl::Request;
use crate::platform::{CoherentBuffer, DmaDirection, DmaMapping, IrqHandler, Platform};
use crate::regs::{self, tlp_size_word, Dcsr, Ddmacr};
use crate::stats::{DeviceStats, DeviceStatsSnapshot};

/// Size of one buffer half in bytes
pub const BUF_SIZE: usize = 16 * 1024;
pub const MAX_TLP_SIZE: u32 = 32;
pub const MAX_TLP_COUNT: u32 = 128;

/// Fill pattern of the first chain of a stream
pub const START_PATTERN: u32 = 0x2a2a_2a2a;
/// Fill pattern of chains issued when the even half became readable
pub const EVEN_PATTERN: u32 = 0x2b2b_2b2b;
/// Fill pattern of chains issued when the odd half became readable
pub const ODD_PATTERN: u32 = 0x2c2c_2c2c;
/// Pattern of single-shot reads and writes
pub const SINGLE_SHOT_PATTERN: u32 = 0x2a2b_2c2d;

// Power-on register defaults of the reference design
const RESET_WDMATLPS: u32 = 0x32;
const RESET_WDMATLPC: u32 = 0x128;
const RESET_WDMATLPP: u32 = 0x1e2e_3e4e;
const RESET_RDMATLPP: u32 = 0xfeed_beef;
const RESET_RDMATLPS: u32 = 0x20;
const RESET_RDMATLPC: u32 = 0x2000;

/// Outstanding mappings; one per burst of a chain at the smallest burst size
const MAPPING_SLOTS: usize = 2 * BUF_SIZE / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Reset,
    Streaming,
    Ended,
}

struct Session {
    state: StreamState,
    /// The even half is the one being filled
    even: bool,
    tlp_size: u32,
    tlp_count: u32,
    dma_count: u32,
}

impl Session {
    fn transfer_size(&self) -> usize {
        Self::burst_bytes(self.tlp_size, self.tlp_count)
    }

    fn burst_bytes(tlp_size: u32, tlp_count: u32) -> usize {
        4 * tlp_size as usize * tlp_count as usize
    }

    fn fits(tlp_size: u32, tlp_count: u32, dma_count: u32) -> bool {
        dma_count >= 1 && Self::burst_bytes(tlp_size, tlp_count) * dma_count as usize <= BUF_SIZE
    }

    fn target(&self) -> usize {
        if self.even {
            0
        } else {
            BUF_SIZE
        }
    }
}

struct Completion {
    done: AtomicBool,
    wake: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
    mappings: ArrayQueue<DmaMapping>,
}

impl Completion {
    fn new() -> Self {
        Self {
            done: AtomicBool::new(false),
            wake: AtomicBool::new(false),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            mappings: ArrayQueue::new(MAPPING_SLOTS),
        }
    }

    fn disarm(&self) {
        self.wake.store(false, Ordering::Release);
    }

    /// Clears the flag for the burst about to raise the interrupt.
    fn arm(&self) {
        self.done.store(false, Ordering::Release);
        self.wake.store(true, Ordering::Release);
    }

    /// Undoes [`arm`](Self::arm) for a chain that never started its last
    /// burst, so the previous completion still counts.
    fn abort(&self) {
        self.wake.store(false, Ordering::Release);
        self.done.store(true, Ordering::Release);
    }

    /// Interrupt side.
    fn complete(&self, unmap: impl Fn(&DmaMapping)) {
        while let Some(mapping) = self.mappings.pop() {
            unmap(&mapping);
        }
        self.done.store(true, Ordering::Release);
        if self.wake.load(Ordering::Acquire) {
            let _guard = self.lock.lock();
            self.cond.notify_all();
        }
    }

    /// Waits for the flag; `None` waits without bound.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut guard = self.lock.lock();
        while !self.done.load(Ordering::Acquire) {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return self.done.load(Ordering::Acquire);
                    }
                }
                None => self.cond.wait(&mut guard),
            }
        }
        true
    }
}

/// One programmed burst.
struct Burst {
    dir: DmaDirection,
    offset: usize,
    pattern: u32,
    interrupt: bool,
}

pub struct FpgaPcie<P: Platform> {
    platform: Arc<P>,
    regs: Arc<dyn RegisterSpace>,
    buffer: CoherentBuffer,
    config: StreamConfig,
    open: AtomicBool,
    session: Mutex<Session>,
    completion: Arc<Completion>,
    stats: Arc<DeviceStats>,
}

impl<P: Platform> FpgaPcie<P> {
    /// Allocates the stream buffer, installs the interrupt handler and
    /// loads the register defaults.
    pub fn probe(platform: Arc<P>, config: StreamConfig) -> Result<Arc<Self>> {
        if !(1..=MAX_TLP_SIZE).contains(&config.tlp_size)
            || !(1..=MAX_TLP_COUNT).contains(&config.tlp_count)
            || !Session::fits(config.tlp_size, config.tlp_count, config.dma_count)
        {
            return Err(Error::InvalidArgument);
        }

        let regs = platform.registers();
        if !regs.contains(0, regs::DMISCCONT + 4) {
            return Err(Error::InvalidArgument);
        }

        let buffer = platform.alloc_coherent(2 * BUF_SIZE)?;
        let completion = Arc::new(Completion::new());
        let stats = Arc::new(DeviceStats::default());

        let handler: IrqHandler = {
            let completion = Arc::clone(&completion);
            let stats = Arc::clone(&stats);
            let platform: Weak<P> = Arc::downgrade(&platform);
            Arc::new(move || {
                stats.interrupts.fetch_add(1, Ordering::Relaxed);
                let platform = platform.upgrade();
                completion.complete(|mapping| {
                    if let Some(platform) = &platform {
                        platform.unmap_single(mapping);
                    }
                });
            })
        };
        if let Err(err) = platform.request_irq(handler) {
            platform.free_coherent(&buffer);
            return Err(err);
        }

        let device = Self {
            platform,
            regs,
            buffer,
            session: Mutex::new(Session {
                state: StreamState::Reset,
                even: true,
                tlp_size: config.tlp_size,
                tlp_count: config.tlp_count,
                dma_count: config.dma_count,
            }),
            config,
            open: AtomicBool::new(false),
            completion,
            stats,
        };
        device.init_registers();

        info!(
            "fpga-pcie: buffer {:#x}, 2 x {} bytes, {} x {} dword TLPs per burst",
            device.buffer.bus, BUF_SIZE, device.config.tlp_count, device.config.tlp_size
        );
        Ok(Arc::new(device))
    }

    /// Claims the device. Only one handle exists at a time.
    pub fn open(self: &Arc<Self>) -> Result<DeviceHandle<P>> {
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy);
        }
        debug!("fpga-pcie: opened");
        Ok(DeviceHandle {
            device: Arc::clone(self),
        })
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn state(&self) -> StreamState {
        self.session.lock().state
    }

    /// Bus address of the stream buffer, which is also its mmap offset.
    pub fn buffer_bus(&self) -> u64 {
        self.buffer.bus
    }

    pub fn stats(&self) -> DeviceStatsSnapshot {
        self.stats.snapshot()
    }

    fn reset_initiator(&self) {
        self.regs.write32(regs::DCSR, Dcsr::INIT_RESET.bits());
        self.regs.write32(regs::DCSR, 0);
    }

    fn init_registers(&self) {
        let bus = self.buffer.bus as u32;
        self.reset_initiator();
        self.regs.write32(regs::DDMACR, 0);
        self.regs.write32(regs::WDMATLPA, bus);
        self.regs.write32(regs::WDMATLPS, RESET_WDMATLPS);
        self.regs.write32(regs::WDMATLPC, RESET_WDMATLPC);
        self.regs.write32(regs::WDMATLPP, RESET_WDMATLPP);
        self.regs.write32(regs::RDMATLPP, RESET_RDMATLPP);
        self.regs.write32(regs::RDMATLPA, bus);
        self.regs.write32(regs::RDMATLPS, RESET_RDMATLPS);
        self.regs.write32(regs::RDMATLPC, RESET_RDMATLPC);
    }

    fn drain_mappings(&self) {
        while let Some(mapping) = self.completion.mappings.pop() {
            self.platform.unmap_single(&mapping);
        }
    }

    /// Programs and starts one burst. The start write comes last.
    fn run_dma(&self, session: &Session, burst: Burst) -> Result<()> {
        let len = session.transfer_size();
        let mapping = self
            .platform
            .map_single(&self.buffer, burst.offset, len, burst.dir)?;
        if let Err(mapping) = self.completion.mappings.push(mapping) {
            self.platform.unmap_single(&mapping);
            return Err(Error::AllocationFailed);
        }

        let (count, size, pattern, addr, mut start, no_irq) = match burst.dir {
            DmaDirection::FromDevice => (
                regs::WDMATLPC,
                regs::WDMATLPS,
                regs::WDMATLPP,
                regs::WDMATLPA,
                Ddmacr::WDMA_START,
                Ddmacr::WDMA_INT_DISABLE,
            ),
            DmaDirection::ToDevice => (
                regs::RDMATLPC,
                regs::RDMATLPS,
                regs::RDMATLPP,
                regs::RDMATLPA,
                Ddmacr::RDMA_START,
                Ddmacr::RDMA_INT_DISABLE,
            ),
        };
        if !burst.interrupt {
            start |= no_irq;
        }

        self.reset_initiator();
        self.regs.write32(count, session.tlp_count);
        self.regs
            .write32(size, tlp_size_word(session.tlp_size, mapping.bus));
        self.regs.write32(pattern, burst.pattern);
        self.regs.write32(addr, mapping.bus as u32);
        self.regs.barrier();

        trace!(
            "fpga-pcie: {:?} burst at {:#x}, {} bytes, pattern {:#010x}",
            burst.dir,
            mapping.bus,
            len,
            burst.pattern
        );
        self.regs.write32(regs::DDMACR, start.bits());
        self.regs.barrier();
        self.stats.bursts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fills the half at `target` with a chain of bursts.
    ///
    /// On failure the completion flag is left set, so the caller's state
    /// still describes the last finished chain and the call can be retried.
    fn issue(&self, session: &Session, target: usize, pattern: u32) -> Result<()> {
        let size = session.transfer_size();
        self.completion.disarm();
        for i in 0..session.dma_count {
            let last = i + 1 == session.dma_count;
            if last {
                self.completion.arm();
            }
            let burst = Burst {
                dir: DmaDirection::FromDevice,
                offset: target + i as usize * size,
                pattern,
                interrupt: last,
            };
            if let Err(err) = self.run_dma(session, burst) {
                warn!("fpga-pcie: burst {} of {} not issued: {}", i + 1, session.dma_count, err);
                self.completion.abort();
                return Err(err);
            }
        }
        Ok(())
    }

    fn release(&self) {
        let mut session = self.session.lock();
        if session.state == StreamState::Streaming {
            warn!("fpga-pcie: closed with a stream running");
            session.state = StreamState::Ended;
        }
        self.open.store(false, Ordering::Release);
        debug!("fpga-pcie: released");
    }
}

impl<P: Platform> Drop for FpgaPcie<P> {
    fn drop(&mut self) {
        self.reset_initiator();
        self.regs.write32(regs::DDMACR, 0);
        self.platform.free_irq();
        self.drain_mappings();
        self.platform.free_coherent(&self.buffer);
        info!("fpga-pcie: removed");
    }
}

/// Exclusive access to a [`FpgaPcie`]; closing is dropping.
pub struct DeviceHandle<P: Platform> {
    device: Arc<FpgaPcie<P>>,
}

impl<P: Platform> DeviceHandle<P> {
    pub fn device(&self) -> &Arc<FpgaPcie<P>> {
        &self.device
    }

    /// Reloads the register defaults and forgets any stream.
    pub fn reset_card(&self) -> Result<()> {
        let dev = &*self.device;
        let mut session = dev.session.lock();
        dev.init_registers();
        dev.completion.disarm();
        dev.drain_mappings();
        session.state = StreamState::Reset;
        session.even = true;
        info!("fpga-pcie: card reset");
        Ok(())
    }

    pub fn start_stream(&self) -> Result<()> {
        let dev = &*self.device;
        let mut session = dev.session.lock();
        if session.state == StreamState::Streaming {
            return Err(Error::Busy);
        }

        session.even = true;
        dev.issue(&session, session.target(), START_PATTERN)?;
        session.state = StreamState::Streaming;
        dev.stats.streams.fetch_add(1, Ordering::Relaxed);
        debug!(
            "fpga-pcie: stream started, {} bursts of {} bytes",
            session.dma_count,
            session.transfer_size()
        );
        Ok(())
    }

    /// Waits for the half being filled and returns its offset; the other
    /// half is refilled right away.
    pub fn next_stream(&self) -> Result<usize> {
        let dev = &*self.device;
        let mut session = dev.session.lock();
        if session.state != StreamState::Streaming {
            return Err(Error::NotStreaming);
        }

        if !dev.completion.wait(Some(dev.config.stream_timeout)) {
            dev.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            warn!(
                "fpga-pcie: transfer timeout after {:?}",
                dev.config.stream_timeout
            );
            return Err(Error::TransferTimeout);
        }

        let (ready, next_target, pattern) = if session.even {
            (0, BUF_SIZE, EVEN_PATTERN)
        } else {
            (BUF_SIZE, 0, ODD_PATTERN)
        };
        dev.issue(&session, next_target, pattern)?;
        session.even = !session.even;
        trace!("fpga-pcie: half {:#x} ready", ready);
        Ok(ready)
    }

    /// Waits for the last chain and returns the offset of its half.
    ///
    /// One bounded wait is tried first, then the wait continues without a
    /// bound.
    pub fn end_stream(&self) -> Result<usize> {
        let dev = &*self.device;
        let mut session = dev.session.lock();
        if session.state != StreamState::Streaming {
            return Err(Error::NotStreaming);
        }

        if !dev.completion.wait(Some(dev.config.stream_timeout)) {
            debug!("fpga-pcie: final chain still running, blocking");
            dev.completion.wait(None);
        }

        let ready = session.target();
        session.even = !session.even;
        session.state = StreamState::Ended;
        debug!("fpga-pcie: stream ended, last half {:#x}", ready);
        Ok(ready)
    }

    /// Bursts per half; all of them must fit one half.
    pub fn set_dma_count(&self, count: i32) -> Result<()> {
        let mut session = self.device.session.lock();
        let count = u32::try_from(count).map_err(|_| Error::InvalidArgument)?;
        if !Session::fits(session.tlp_size, session.tlp_count, count) {
            error!(
                "fpga-pcie: DMA count {} rejected, bursts of {} TLPs of {} dwords overflow a {} byte half",
                count, session.tlp_count, session.tlp_size, BUF_SIZE
            );
            return Err(Error::InvalidArgument);
        }
        session.dma_count = count;
        Ok(())
    }

    pub fn set_tlp_size(&self, size: i32) -> Result<()> {
        let mut session = self.device.session.lock();
        let size = u32::try_from(size).map_err(|_| Error::InvalidArgument)?;
        if !(1..=MAX_TLP_SIZE).contains(&size) {
            error!(
                "fpga-pcie: TLP size {} rejected, the design takes 1 to {} dwords",
                size, MAX_TLP_SIZE
            );
            return Err(Error::InvalidArgument);
        }
        if !Session::fits(size, session.tlp_count, session.dma_count) {
            error!(
                "fpga-pcie: TLP size {} rejected, {} bursts of {} TLPs overflow a {} byte half",
                size, session.dma_count, session.tlp_count, BUF_SIZE
            );
            return Err(Error::InvalidArgument);
        }
        session.tlp_size = size;
        Ok(())
    }

    pub fn set_tlp_count(&self, count: i32) -> Result<()> {
        let mut session = self.device.session.lock();
        let count = u32::try_from(count).map_err(|_| Error::InvalidArgument)?;
        if !(1..=MAX_TLP_COUNT).contains(&count) {
            error!(
                "fpga-pcie: TLP count {} rejected, the design takes 1 to {} TLPs",
                count, MAX_TLP_COUNT
            );
            return Err(Error::InvalidArgument);
        }
        if !Session::fits(session.tlp_size, count, session.dma_count) {
            error!(
                "fpga-pcie: TLP count {} rejected, {} bursts of {} dword TLPs overflow a {} byte half",
                count, session.dma_count, session.tlp_size, BUF_SIZE
            );
            return Err(Error::InvalidArgument);
        }
        session.tlp_count = count;
        Ok(())
    }

    /// Fills both halves with `value`.
    pub fn memset_write_buffer(&self, value: u8) -> Result<()> {
        let dev = &*self.device;
        let _session = dev.session.lock();
        unsafe { ptr::write_bytes(dev.buffer.virt.as_ptr(), value, 2 * BUF_SIZE) };
        dev.regs.barrier();
        Ok(())
    }

    /// Runs a raw ioctl and returns 0 or a negated errno.
    pub fn ioctl(&self, cmd: u32, arg: Option<&mut i32>) -> i32 {
        match self.dispatch(cmd, arg) {
            Ok(()) => 0,
            Err(err) => {
                debug!("fpga-pcie: ioctl {:#x} failed: {}", cmd, err);
                -err.errno()
            }
        }
    }

    fn dispatch(&self, cmd: u32, arg: Option<&mut i32>) -> Result<()> {
        let request = Request::decode(cmd)?;
        trace!("fpga-pcie: ioctl {:?}", request);
        if !request.takes_arg() {
            return match request {
                Request::ResetCard => self.reset_card(),
                _ => self.start_stream(),
            };
        }

        let arg = arg.ok_or(Error::Fault)?;
        match request {
            Request::NextStream => {
                *arg = self.next_stream()? as i32;
                Ok(())
            }
            Request::EndStream => {
                *arg = self.end_stream()? as i32;
                Ok(())
            }
            Request::SetDmaCount => self.set_dma_count(*arg),
            Request::SetTlpSize => self.set_tlp_size(*arg),
            Request::SetTlpCount => self.set_tlp_count(*arg),
            Request::MemsetWriteBuffer => self.memset_write_buffer(*arg as u8),
            Request::ResetCard | Request::StartStream => Err(Error::NotTty),
        }
    }

    /// Single write DMA burst into the even half, copied out to `out`.
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        let dev = &*self.device;
        let session = dev.session.lock();
        if session.state == StreamState::Streaming {
            return Err(Error::Busy);
        }

        let len = out.len().min(session.transfer_size());
        dev.completion.arm();
        dev.run_dma(
            &session,
            Burst {
                dir: DmaDirection::FromDevice,
                offset: 0,
                pattern: SINGLE_SHOT_PATTERN,
                interrupt: true,
            },
        )?;
        self.wait_single_shot()?;

        let src = dev.buffer.virt.as_ptr();
        for (i, byte) in out[..len].iter_mut().enumerate() {
            *byte = unsafe { ptr::read_volatile(src.add(i)) };
        }
        Ok(len)
    }

    /// Copies `data` into the even half and sends it with one read DMA burst.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        let dev = &*self.device;
        let session = dev.session.lock();
        if session.state == StreamState::Streaming {
            return Err(Error::Busy);
        }

        let len = data.len().min(session.transfer_size());
        let dst = dev.buffer.virt.as_ptr();
        for (i, byte) in data[..len].iter().enumerate() {
            unsafe { ptr::write_volatile(dst.add(i), *byte) };
        }

        dev.completion.arm();
        dev.run_dma(
            &session,
            Burst {
                dir: DmaDirection::ToDevice,
                offset: 0,
                pattern: SINGLE_SHOT_PATTERN,
                interrupt: true,
            },
        )?;
        self.wait_single_shot()?;

        let status = Ddmacr::from_bits_retain(dev.regs.read32(regs::DDMACR));
        if status.contains(Ddmacr::RDMA_DATA_ERROR) {
            error!("fpga-pcie: read DMA data error");
            return Err(Error::DataError);
        }
        Ok(len)
    }

    fn wait_single_shot(&self) -> Result<()> {
        let dev = &*self.device;
        dev.stats.single_shots.fetch_add(1, Ordering::Relaxed);
        if dev.completion.wait(Some(dev.config.transfer_timeout)) {
            Ok(())
        } else {
            dev.stats.timeouts.fetch_add(1, Ordering::Relaxed);
            warn!(
                "fpga-pcie: single transfer timeout after {:?}",
                dev.config.transfer_timeout
            );
            Err(Error::TransferTimeout)
        }
    }

    /// Read-only view of the first `len` bytes of the stream buffer.
    pub fn mmap(&self, len: usize) -> Result<BufferView<'_>> {
        if len == 0 || len > 2 * BUF_SIZE {
            return Err(Error::InvalidArgument);
        }
        Ok(BufferView {
            ptr: self.device.buffer.virt,
            len,
            bus: self.device.buffer.bus,
            _handle: PhantomData,
        })
    }
}

impl<P: Platform> Drop for DeviceHandle<P> {
    fn drop(&mut self) {
        self.device.release();
    }
}

/// Mapped stream buffer. The device may write it at any time, so every
/// access is volatile.
pub struct BufferView<'a> {
    ptr: NonNull<u8>,
    len: usize,
    bus: u64,
    _handle: PhantomData<&'a ()>,
}

impl BufferView<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mapping offset, the buffer's bus address.
    pub fn offset(&self) -> u64 {
        self.bus
    }

    /// Dword at byte `offset`; panics if unaligned or out of the view.
    pub fn read_u32(&self, offset: usize) -> u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "offset {:#x} outside view of {:#x} bytes",
            offset,
            self.len
        );
        let cell = unsafe { &*(self.ptr.as_ptr().add(offset) as *const Mmio<u32>) };
        cell.read()
    }

    /// Copies `out.len()` bytes starting at `offset`.
    pub fn copy_to(&self, offset: usize, out: &mut [u8]) {
        assert!(offset + out.len() <= self.len, "copy outside view");
        let src = unsafe { self.ptr.as_ptr().add(offset) };
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = unsafe { ptr::read_volatile(src.add(i)) };
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::{IrqMode, SimPlatform};

    fn device() -> (Arc<SimPlatform>, Arc<FpgaPcie<SimPlatform>>) {
        let platform = SimPlatform::new();
        let device = FpgaPcie::probe(Arc::clone(&platform), StreamConfig::default()).unwrap();
        (platform, device)
    }

    #[test]
    fn test_probe_loads_defaults() {
        let (platform, device) = device();
        assert_eq!(platform.reg(regs::WDMATLPS), 0x32);
        assert_eq!(platform.reg(regs::WDMATLPC), 0x128);
        assert_eq!(platform.reg(regs::WDMATLPP), 0x1e2e_3e4e);
        assert_eq!(platform.reg(regs::RDMATLPP), 0xfeed_beef);
        assert_eq!(platform.reg(regs::RDMATLPS), 0x20);
        assert_eq!(platform.reg(regs::RDMATLPC), 0x2000);
        assert_eq!(platform.reg(regs::WDMATLPA), device.buffer_bus() as u32);
        assert_eq!(platform.reg(regs::DDMACR), 0);
        assert_eq!(device.state(), StreamState::Reset);
    }

    #[test]
    fn test_probe_rejects_bad_geometry() {
        let platform = SimPlatform::new();
        let config = StreamConfig {
            dma_count: 2,
            ..StreamConfig::default()
        };
        assert!(matches!(
            FpgaPcie::probe(Arc::clone(&platform), config),
            Err(Error::InvalidArgument)
        ));
        assert_eq!(platform.coherent_allocations(), 0);
    }

    #[test]
    fn test_chain_interrupts_only_on_last_burst() {
        let (platform, device) = device();
        let handle = device.open().unwrap();
        handle.set_tlp_count(32).unwrap();
        handle.set_dma_count(4).unwrap();

        handle.start_stream().unwrap();
        assert_eq!(platform.write_bursts(), 4);
        assert_eq!(platform.interrupts(), 1);
        // last burst lands at the end of the even half
        assert_eq!(platform.reg(regs::WDMATLPA) as u64, device.buffer_bus() + 3 * 4096);
        assert_eq!(platform.live_mappings(), 0);
    }

    #[test]
    fn test_timeout_keeps_state() {
        let (platform, device) = device();
        let handle = device.open().unwrap();
        platform.set_irq_mode(IrqMode::Never);
        handle.start_stream().unwrap();

        assert_eq!(handle.next_stream(), Err(Error::TransferTimeout));
        assert_eq!(device.state(), StreamState::Streaming);
        assert_eq!(device.stats().timeouts, 1);
        assert_eq!(platform.live_mappings(), 1);

        // a late interrupt lets the stream continue
        platform.raise_irq();
        assert_eq!(handle.next_stream(), Ok(0));
    }

    #[test]
    fn test_reset_card_forgets_stream() {
        let (platform, device) = device();
        let handle = device.open().unwrap();
        platform.set_irq_mode(IrqMode::Never);
        handle.start_stream().unwrap();

        handle.reset_card().unwrap();
        assert_eq!(device.state(), StreamState::Reset);
        assert_eq!(platform.live_mappings(), 0);
        assert_eq!(handle.next_stream(), Err(Error::NotStreaming));
    }

    #[test]
    fn test_close_ends_stream() {
        let (_, device) = device();
        let handle = device.open().unwrap();
        handle.start_stream().unwrap();
        drop(handle);

        assert!(!device.is_open());
        assert_eq!(device.state(), StreamState::Ended);
        device.open().unwrap().start_stream().unwrap();
    }

    #[test]
    fn test_mmap_bounds() {
        let (_, device) = device();
        let handle = device.open().unwrap();
        assert!(matches!(handle.mmap(0), Err(Error::InvalidArgument)));
        assert!(matches!(handle.mmap(2 * BUF_SIZE + 1), Err(Error::InvalidArgument)));

        handle.memset_write_buffer(0x5a).unwrap();
        let view = handle.mmap(2 * BUF_SIZE).unwrap();
        assert_eq!(view.offset(), device.buffer_bus());
        assert_eq!(view.read_u32(2 * BUF_SIZE - 4), 0x5a5a_5a5a);
    }

    #[test]
    fn test_single_shot_read() {
        let (_, device) = device();
        let handle = device.open().unwrap();
        let mut out = vec![0u8; 2 * BUF_SIZE];
        assert_eq!(handle.read(&mut out).unwrap(), BUF_SIZE);
        assert!(out[..BUF_SIZE]
            .chunks(4)
            .all(|word| u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) == SINGLE_SHOT_PATTERN));
        assert!(out[BUF_SIZE..].iter().all(|byte| *byte == 0));
    }
}
