// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Scatter/gather DMA engine (WG design)
//!
//! The engine has two independent channels: download (host to board) and
//! upload (board to host). A transfer selects the descriptors of a buffer's
//! list that cover the requested range, patches the boundary descriptors to
//! the sub-range, writes the first descriptor to the channel's head registers
//! and starts the channel by writing the control word. Completion is detected
//! by polling the status register or by waiting for the channel interrupt.
//!
//! Every descriptor touched by a transfer is saved before it is patched and
//! restored exactly once afterwards, so a buffer's list can be reused for any
//! later range. For a locked transfer the restore happens before the call
//! returns, on success and on timeout alike. An unlocked transfer leaves the
//! restore pending on its channel until [`DmaEngineWg::wait`], the next
//! locked transfer, [`DmaEngineWg::reset`] or the buffer's release.
//!
//! # Channel protocol
//!
//! ```text
//!   Idle ──write head──▶ Armed ──write CTRL──▶ Running ──┬──▶ Done
//!    ▲                                                   ├──▶ TimedOut
//!    └──────────────────── reset ◀───────────────────────┴──▶ Error
//! ```
//!
//! A timed out channel is marked stale and reset before its next transfer,
//! since the hardware may still be working through the old chain.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use parking_lot::Mutex;
use spin::Mutex as SpinMutex;

use common::io::RegisterSpace;

use crate::alloc::KernelAllocator;
use crate::buffer::DmaBuffer;
use crate::config::EngineConfig;
use crate::descriptor::{Control, NativeDescriptor, Status};
use crate::descriptor_list::DescriptorList;
use crate::driver::{Driver, SyncDir};
use crate::error::{Error, Result};
use crate::stats::{ChannelStats, ChannelStatsSnapshot};

/// Eight descriptor words followed by the status word
const CHANNEL_BLOCK: usize = 9 * 4;
/// Index of the control word among the head registers
const CTRL_WORD: usize = 7;
const STATUS_OFFSET: usize = 8 * 4;
const POLLS_PER_YIELD: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Host to board
    Download,
    /// Board to host
    Upload,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Download, Channel::Upload];

    pub fn index(self) -> usize {
        match self {
            Channel::Download => 0,
            Channel::Upload => 1,
        }
    }
}

/// Decoded channel status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Idle,
    Busy,
    Done,
    TimedOut,
}

impl From<Status> for ChannelStatus {
    fn from(status: Status) -> Self {
        if status.contains(Status::TOUT) {
            ChannelStatus::TimedOut
        } else if status.contains(Status::DONE) {
            ChannelStatus::Done
        } else if status.contains(Status::BUSY) {
            ChannelStatus::Busy
        } else {
            ChannelStatus::Idle
        }
    }
}

/// Where the engine believes a channel is in its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelPhase {
    Idle = 0,
    /// Head registers written, control word not yet
    Armed = 1,
    Running = 2,
    Done = 3,
    TimedOut = 4,
    Error = 5,
}

impl From<u8> for ChannelPhase {
    fn from(value: u8) -> Self {
        match value {
            1 => ChannelPhase::Armed,
            2 => ChannelPhase::Running,
            3 => ChannelPhase::Done,
            4 => ChannelPhase::TimedOut,
            5 => ChannelPhase::Error,
            _ => ChannelPhase::Idle,
        }
    }
}

/// Register placement of one channel, byte offsets into the register window.
#[derive(Debug, Clone, Copy)]
pub struct ChannelLayout {
    /// First head register; control at +0x1c, status at +0x20
    pub base: usize,
    /// Bit of this channel in the interrupt enable/status registers
    pub irq_mask: u32,
    /// Interrupt source passed to the driver
    pub irq_source: u32,
    /// Transferred byte counter, if the design has one
    pub transferred: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineLayout {
    pub download: ChannelLayout,
    pub upload: ChannelLayout,
    pub irq_enable: usize,
    pub irq_status: usize,
}

impl EngineLayout {
    pub fn channel(&self, channel: Channel) -> &ChannelLayout {
        match channel {
            Channel::Download => &self.download,
            Channel::Upload => &self.upload,
        }
    }
}

/// Per-call transfer settings.
///
/// `offset` is in dwords from the start of the buffer. The default is a
/// locked, incrementing transfer from offset zero bounded by the engine's
/// poll limit or interrupt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    pub offset: u32,
    pub inc: bool,
    pub lock: bool,
    pub timeout: Option<Duration>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            inc: true,
            lock: true,
            timeout: None,
        }
    }
}

impl TransferOptions {
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn inc(mut self, inc: bool) -> Self {
        self.inc = inc;
        self
    }

    /// Return right after the start; the channel keeps the restore pending.
    pub fn unlocked(mut self) -> Self {
        self.lock = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Descriptors patched by an issued transfer, with their original values.
struct PendingTransfer<D: Driver> {
    list: Arc<DescriptorList<D>>,
    first: usize,
    saved: Vec<NativeDescriptor>,
    bytes: u64,
}

struct ChannelState<D: Driver> {
    pending: Option<PendingTransfer<D>>,
    /// Hardware may still be running a timed out chain
    stale: bool,
}

struct Request {
    channel: Channel,
    bar: u32,
    per_addr: u64,
    byte_offset: u64,
    bytes: u64,
    inc: bool,
}

pub struct DmaEngineWg<D: Driver> {
    driver: Arc<D>,
    regs: Arc<dyn RegisterSpace>,
    layout: EngineLayout,
    allocator: Arc<KernelAllocator<D>>,
    channels: [Mutex<ChannelState<D>>; 2],
    phases: [AtomicU8; 2],
    stats: [ChannelStats; 2],
    /// Serializes read-modify-write of the shared interrupt enable register
    irq_enable_lock: SpinMutex<()>,
    use_interrupts: AtomicBool,
    loop_limit: AtomicU32,
    irq_timeout: Duration,
}

impl<D: Driver> DmaEngineWg<D> {
    pub fn new(
        driver: Arc<D>,
        regs: Arc<dyn RegisterSpace>,
        layout: EngineLayout,
        config: &EngineConfig,
    ) -> Result<Arc<Self>> {
        for channel in Channel::ALL {
            let ch = layout.channel(channel);
            if !regs.contains(ch.base, CHANNEL_BLOCK) {
                return Err(Error::AddressOutOfRange);
            }
            if let Some(offset) = ch.transferred {
                if !regs.contains(offset, 4) {
                    return Err(Error::AddressOutOfRange);
                }
            }
        }
        if !regs.contains(layout.irq_enable, 4) || !regs.contains(layout.irq_status, 4) {
            return Err(Error::AddressOutOfRange);
        }

        let allocator = Arc::new(KernelAllocator::new(
            Arc::clone(&driver),
            config.max_alloc_retries,
            config.alloc_retry_sleep,
        ));

        let engine = Self {
            driver,
            regs,
            layout,
            allocator,
            channels: [
                Mutex::new(ChannelState {
                    pending: None,
                    stale: false,
                }),
                Mutex::new(ChannelState {
                    pending: None,
                    stale: false,
                }),
            ],
            phases: [
                AtomicU8::new(ChannelPhase::Idle as u8),
                AtomicU8::new(ChannelPhase::Idle as u8),
            ],
            stats: [ChannelStats::default(), ChannelStats::default()],
            irq_enable_lock: SpinMutex::new(()),
            use_interrupts: AtomicBool::new(config.use_interrupts),
            loop_limit: AtomicU32::new(config.loop_limit.max(1)),
            irq_timeout: config.irq_timeout,
        };

        for channel in Channel::ALL {
            let mut state = engine.channels[channel.index()].lock();
            engine.reset_locked(channel, &mut state);
        }
        // construction resets are not worth counting
        for stats in &engine.stats {
            stats.resets.store(0, Ordering::Relaxed);
        }

        debug!(
            "dma: engine ready, download at {:#x}, upload at {:#x}, interrupts {}",
            layout.download.base,
            layout.upload.base,
            if config.use_interrupts { "on" } else { "off" }
        );
        Ok(Arc::new(engine))
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn allocator(&self) -> &Arc<KernelAllocator<D>> {
        &self.allocator
    }

    /// Switches between interrupt and polled completion.
    ///
    /// Must not be changed while any channel has a transfer in flight; the
    /// engine does not check this.
    pub fn set_use_interrupts(&self, enabled: bool) {
        self.use_interrupts.store(enabled, Ordering::Release);
    }

    pub fn use_interrupts(&self) -> bool {
        self.use_interrupts.load(Ordering::Acquire)
    }

    /// Maximum status polls per wait.
    pub fn set_loop_limit(&self, limit: u32) {
        self.loop_limit.store(limit.max(1), Ordering::Relaxed);
    }

    pub fn loop_limit(&self) -> u32 {
        self.loop_limit.load(Ordering::Relaxed)
    }

    /// Copies `count` dwords from `buf` to board address `addr` (in dwords)
    /// behind window `bar`.
    pub fn host2board(
        &self,
        bar: u32,
        addr: u32,
        buf: &DmaBuffer<D>,
        count: u32,
        opts: TransferOptions,
    ) -> Result<()> {
        self.send(Channel::Download, bar, addr, buf, count, opts)
    }

    /// Copies `count` dwords from board address `addr` (in dwords) behind
    /// window `bar` into `buf`.
    ///
    /// After an unlocked transfer, call [`wait`](Self::wait) and then
    /// [`DmaBuffer::sync`] before reading the data.
    pub fn board2host(
        &self,
        bar: u32,
        addr: u32,
        buf: &mut DmaBuffer<D>,
        count: u32,
        opts: TransferOptions,
    ) -> Result<()> {
        self.send(Channel::Upload, bar, addr, buf, count, opts)?;
        if opts.lock {
            buf.sync(SyncDir::FromDevice)?;
        }
        Ok(())
    }

    fn send(
        &self,
        channel: Channel,
        bar: u32,
        addr: u32,
        buf: &DmaBuffer<D>,
        count: u32,
        opts: TransferOptions,
    ) -> Result<()> {
        if count == 0 {
            return Err(Error::EmptyTransfer);
        }
        let list = self.descriptor_list(buf)?;
        let byte_offset = u64::from(opts.offset) * 4;
        let bytes = u64::from(count) * 4;
        let covered = list.total_len().min(buf.size() as u64);
        if byte_offset + bytes > covered {
            return Err(Error::OversizedTransfer);
        }
        if channel == Channel::Download {
            buf.sync(SyncDir::ToDevice)?;
        }

        let mut state = self.channels[channel.index()].lock();
        if state.pending.is_some() {
            if !opts.lock {
                self.stats[channel.index()]
                    .busy_rejections
                    .fetch_add(1, Ordering::Relaxed);
                return Err(Error::ChannelBusy);
            }
            debug!("dma: {:?} finishing previous transfer first", channel);
            self.finish(channel, &mut state, None, false)?;
        }
        if state.stale {
            warn!("dma: {:?} was left running by a timed out transfer, resetting", channel);
            self.reset_locked(channel, &mut state);
        }

        list.claim()?;
        let request = Request {
            channel,
            bar,
            per_addr: u64::from(addr) * 4,
            byte_offset,
            bytes,
            inc: opts.inc,
        };
        let pending = match self.patch_chain(&list, &request) {
            Ok(pending) => pending,
            Err(err) => {
                list.unclaim();
                return Err(err);
            }
        };
        if let Err(err) = list.sync() {
            self.restore(&pending);
            return Err(err);
        }

        self.start(channel, &list, pending.first);
        state.pending = Some(pending);

        if opts.lock {
            self.finish(channel, &mut state, opts.timeout, false)
        } else {
            Ok(())
        }
    }

    /// Index of the descriptor holding byte `byte_offset`, and the offset
    /// into it.
    fn locate(list: &DescriptorList<D>, byte_offset: u64) -> Option<(usize, u64)> {
        let mut start = 0u64;
        for (index, desc) in list.iter().enumerate() {
            let end = start + u64::from(desc.length());
            if byte_offset < end {
                return Some((index, byte_offset - start));
            }
            start = end;
        }
        None
    }

    /// Rewrites the descriptors covering the request into a standalone chain.
    fn patch_chain(&self, list: &Arc<DescriptorList<D>>, req: &Request) -> Result<PendingTransfer<D>> {
        let (first, skip) = Self::locate(list, req.byte_offset).ok_or(Error::OversizedTransfer)?;

        let mut control = Control::V | Control::bar(req.bar);
        if req.inc {
            control |= Control::INC;
        }
        if req.channel == Channel::Upload {
            control |= Control::UPA;
        }
        let mut last_control = control | Control::LAST;
        if self.use_interrupts() {
            last_control |= Control::ESEI | Control::EEI;
        }

        let mut saved = Vec::new();
        let mut index = first;
        let mut skip = skip;
        let mut remaining = req.bytes;
        let mut per_addr = req.per_addr;

        loop {
            let original = list.get(index);
            saved.push(original);

            let segment = (u64::from(original.length()) - skip).min(remaining);
            remaining -= segment;

            let mut desc = original;
            desc.set_host_addr(original.host_addr() + skip);
            desc.set_length(segment as u32);
            desc.set_per_addr(per_addr);
            if remaining == 0 {
                desc.set_control(last_control);
                list.set(index, desc);
                break;
            }
            desc.set_control(control);
            list.set(index, desc);

            if req.inc {
                per_addr += segment;
            }
            skip = 0;
            index += 1;
        }

        trace!(
            "dma: {:?} chain of {} descriptors from #{} for {} bytes",
            req.channel,
            saved.len(),
            first,
            req.bytes
        );

        Ok(PendingTransfer {
            list: Arc::clone(list),
            first,
            saved,
            bytes: req.bytes,
        })
    }

    /// Writes the head descriptor and then, last, the control word.
    fn start(&self, channel: Channel, list: &DescriptorList<D>, first: usize) {
        let ch = self.layout.channel(channel);
        let words = list.get(first).words();

        if self.use_interrupts() {
            self.ack_irq(channel);
            self.enable_irq(channel, true);
        }

        for (i, word) in words.iter().enumerate().take(CTRL_WORD) {
            self.regs.write32(ch.base + i * 4, *word);
        }
        self.set_phase(channel, ChannelPhase::Armed);
        trace!("dma: {:?} head {:08x?}", channel, words);

        self.regs.barrier();
        self.regs.write32(ch.base + CTRL_WORD * 4, words[CTRL_WORD]);
        self.set_phase(channel, ChannelPhase::Running);
    }

    /// Puts back every descriptor a transfer patched and frees the list for
    /// other channels.
    fn restore(&self, pending: &PendingTransfer<D>) {
        for (i, desc) in pending.saved.iter().enumerate() {
            pending.list.set(pending.first + i, *desc);
        }
        if let Err(err) = pending.list.sync() {
            warn!("dma: descriptor sync after restore failed: {}", err);
        }
        pending.list.unclaim();
    }

    /// Waits for the pending transfer of `channel`, if any, and restores it.
    fn finish(
        &self,
        channel: Channel,
        state: &mut ChannelState<D>,
        timeout: Option<Duration>,
        unbounded: bool,
    ) -> Result<()> {
        let Some(pending) = state.pending.take() else {
            return Ok(());
        };

        let result = self.wait_done(channel, timeout, unbounded);
        self.restore(&pending);
        if self.use_interrupts() {
            self.enable_irq(channel, false);
        }

        let stats = &self.stats[channel.index()];
        match result {
            Ok(()) => {
                self.set_phase(channel, ChannelPhase::Done);
                stats.record_transfer(pending.bytes);
            }
            Err(Error::DmaTimeout) => {
                warn!(
                    "dma: {:?} timed out after {} bytes requested, status {:?}",
                    channel,
                    pending.bytes,
                    self.read_status(channel)
                );
                self.set_phase(channel, ChannelPhase::TimedOut);
                stats.timeouts.fetch_add(1, Ordering::Relaxed);
                state.stale = true;
            }
            Err(err) => {
                warn!("dma: {:?} wait failed: {}", channel, err);
                self.set_phase(channel, ChannelPhase::Error);
                state.stale = true;
            }
        }
        result
    }

    fn wait_done(&self, channel: Channel, timeout: Option<Duration>, unbounded: bool) -> Result<()> {
        if self.use_interrupts() {
            let source = self.layout.channel(channel).irq_source;
            let bound = if unbounded {
                None
            } else {
                Some(timeout.unwrap_or(self.irq_timeout))
            };
            self.driver.wait_for_interrupt(source, bound)?;
            self.ack_irq(channel);
            return if self.read_status(channel).contains(Status::TOUT) {
                Err(Error::DmaTimeout)
            } else {
                Ok(())
            };
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let limit = self.loop_limit();
        let mut polls = 0u32;
        loop {
            let status = self.read_status(channel);
            if status.contains(Status::TOUT) {
                return Err(Error::DmaTimeout);
            }
            if status.contains(Status::DONE) {
                return Ok(());
            }

            polls = polls.wrapping_add(1);
            if !unbounded {
                if polls >= limit {
                    return Err(Error::DmaTimeout);
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(Error::DmaTimeout);
                }
            }
            if polls % POLLS_PER_YIELD == 0 {
                thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Waits for an unlocked transfer on `channel` and restores its
    /// descriptors. Returns immediately if nothing is outstanding.
    pub fn wait(&self, channel: Channel, timeout: Option<Duration>) -> Result<()> {
        let mut state = self.channels[channel.index()].lock();
        self.finish(channel, &mut state, timeout, false)
    }

    /// Like [`wait`](Self::wait) but without any bound.
    pub fn wait_unbounded(&self, channel: Channel) -> Result<()> {
        let mut state = self.channels[channel.index()].lock();
        self.finish(channel, &mut state, None, true)
    }

    /// Whether `channel` has an unlocked transfer whose descriptors are not
    /// yet restored.
    pub fn is_pending(&self, channel: Channel) -> bool {
        self.channels[channel.index()].lock().pending.is_some()
    }

    pub fn status(&self, channel: Channel) -> ChannelStatus {
        self.read_status(channel).into()
    }

    fn read_status(&self, channel: Channel) -> Status {
        let ch = self.layout.channel(channel);
        Status::from_bits_retain(self.regs.read32(ch.base + STATUS_OFFSET))
    }

    /// Stops `channel` and returns it to idle. Restores any pending
    /// transfer's descriptors.
    pub fn reset(&self, channel: Channel) {
        let mut state = self.channels[channel.index()].lock();
        self.reset_locked(channel, &mut state);
    }

    fn reset_locked(&self, channel: Channel, state: &mut ChannelState<D>) {
        let ch = self.layout.channel(channel);
        self.regs
            .write32(ch.base + CTRL_WORD * 4, Control::RESET.bits());
        if let Some(pending) = state.pending.take() {
            self.restore(&pending);
        }
        self.enable_irq(channel, false);
        self.ack_irq(channel);
        state.stale = false;
        self.set_phase(channel, ChannelPhase::Idle);
        self.stats[channel.index()]
            .resets
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn phase(&self, channel: Channel) -> ChannelPhase {
        self.phases[channel.index()].load(Ordering::Acquire).into()
    }

    fn set_phase(&self, channel: Channel, phase: ChannelPhase) {
        self.phases[channel.index()].store(phase as u8, Ordering::Release);
    }

    pub fn stats(&self, channel: Channel) -> ChannelStatsSnapshot {
        self.stats[channel.index()].snapshot()
    }

    /// Hardware byte counter of `channel`, if the design has one.
    pub fn transferred_bytes(&self, channel: Channel) -> Option<u32> {
        self.layout
            .channel(channel)
            .transferred
            .map(|offset| self.regs.read32(offset))
    }

    fn ack_irq(&self, channel: Channel) {
        let mask = self.layout.channel(channel).irq_mask;
        self.regs.write32(self.layout.irq_status, mask);
    }

    fn enable_irq(&self, channel: Channel, enabled: bool) {
        let mask = self.layout.channel(channel).irq_mask;
        let _guard = self.irq_enable_lock.lock();
        let value = self.regs.read32(self.layout.irq_enable);
        let value = if enabled { value | mask } else { value & !mask };
        self.regs.write32(self.layout.irq_enable, value);
    }

    /// Builds `buf`'s descriptor list unless it already exists.
    pub fn fill_descriptor_list(&self, buf: &DmaBuffer<D>) -> Result<()> {
        self.descriptor_list(buf).map(|_| ())
    }

    fn descriptor_list(&self, buf: &DmaBuffer<D>) -> Result<Arc<DescriptorList<D>>> {
        let mut slot = buf.descriptors.lock();
        if let Some(list) = slot.as_ref() {
            return Ok(Arc::clone(list));
        }
        let list = Arc::new(DescriptorList::build(&self.allocator, &buf.chunks()?)?);
        *slot = Some(Arc::clone(&list));
        Ok(list)
    }

    /// Drops `buf`'s descriptor list. A transfer still using it is waited for
    /// and, if it does not finish, its channel is reset. Releasing a buffer
    /// without a list does nothing.
    pub fn release_descriptor_list(&self, buf: &DmaBuffer<D>) {
        let Some(list) = buf.descriptors.lock().take() else {
            return;
        };

        for channel in Channel::ALL {
            let mut state = self.channels[channel.index()].lock();
            let in_use = state
                .pending
                .as_ref()
                .is_some_and(|pending| Arc::ptr_eq(&pending.list, &list));
            if in_use {
                if let Err(err) = self.finish(channel, &mut state, None, false) {
                    warn!(
                        "dma: {:?} still busy with a released buffer ({}), resetting",
                        channel, err
                    );
                    self.reset_locked(channel, &mut state);
                }
            }
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::abb::{BAR_MEM, DS_PAH, US_PAH};
    use crate::board::{Board, Ml605};
    use crate::buffer::MemType;
    use crate::sim::SimDriver;

    fn board(config: EngineConfig) -> (Arc<SimDriver>, Ml605<SimDriver>) {
        let driver = SimDriver::new();
        let board = Ml605::open(Arc::clone(&driver), config).unwrap();
        (driver, board)
    }

    #[test]
    fn test_locate_on_boundaries() {
        let (_, board) = board(EngineConfig::default());
        let buf = board.alloc_buffer(4 * 1024, MemType::KernelPieces(4)).unwrap();
        let list = buf.descriptor_list().unwrap();

        assert_eq!(DmaEngineWg::<SimDriver>::locate(&list, 0), Some((0, 0)));
        assert_eq!(DmaEngineWg::<SimDriver>::locate(&list, 1020), Some((0, 1020)));
        assert_eq!(DmaEngineWg::<SimDriver>::locate(&list, 1024), Some((1, 0)));
        assert_eq!(DmaEngineWg::<SimDriver>::locate(&list, 4092), Some((3, 1020)));
        assert_eq!(DmaEngineWg::<SimDriver>::locate(&list, 4096), None);
    }

    #[test]
    fn test_head_registers_programmed() {
        let (driver, board) = board(EngineConfig::default());
        let engine = board.dma_engine().unwrap();
        let buf = board.alloc_buffer(4096, MemType::Kernel).unwrap();
        let host = buf.descriptor_list().unwrap().get(0).host_addr();

        engine
            .host2board(BAR_MEM, 0x10, &buf, 16, TransferOptions::default().offset(4))
            .unwrap();

        let regs = driver.mmap_area(crate::abb::BAR_REGS).unwrap();
        let per = u64::from(regs.read32(DS_PAH)) << 32 | u64::from(regs.read32(DS_PAH + 4));
        let head = u64::from(regs.read32(DS_PAH + 8)) << 32 | u64::from(regs.read32(DS_PAH + 12));
        assert_eq!(per, 0x40);
        assert_eq!(head, host + 16);
        assert_eq!(regs.read32(DS_PAH + 24), 64);
        let control = Control::from_bits_retain(regs.read32(DS_PAH + 28));
        assert!(control.contains(Control::V | Control::LAST | Control::INC));
        assert_eq!(control.bar_index(), BAR_MEM);
        assert_eq!(engine.transferred_bytes(Channel::Download), Some(64));
        assert_eq!(engine.phase(Channel::Download), ChannelPhase::Done);
        // upload untouched
        assert_eq!(regs.read32(US_PAH + 28), Control::RESET.bits());
    }

    #[test]
    fn test_bounds_rejected_before_channel() {
        let (driver, board) = board(EngineConfig::default());
        let engine = board.dma_engine().unwrap();
        let mut buf = board.alloc_buffer(1024, MemType::User).unwrap();
        let starts = driver.board().starts();

        let opts = TransferOptions::default().offset(200);
        assert_eq!(
            engine.host2board(BAR_MEM, 0, &buf, 57, opts),
            Err(Error::OversizedTransfer)
        );
        assert_eq!(
            engine.board2host(BAR_MEM, 0, &mut buf, 0, opts),
            Err(Error::EmptyTransfer)
        );
        assert_eq!(driver.board().starts(), starts);
        assert_eq!(engine.status(Channel::Download), ChannelStatus::Idle);
        assert_eq!(engine.phase(Channel::Upload), ChannelPhase::Idle);

        engine.host2board(BAR_MEM, 0, &buf, 56, opts).unwrap();
    }

    #[test]
    fn test_second_unlocked_transfer_is_busy() {
        let (_, board) = board(EngineConfig::default());
        let engine = board.dma_engine().unwrap();
        let buf = board.alloc_buffer(8192, MemType::KernelPieces(2)).unwrap();
        let other = board.alloc_buffer(8192, MemType::User).unwrap();

        let opts = TransferOptions::default().unlocked();
        engine.host2board(BAR_MEM, 0, &buf, 1500, opts.offset(100)).unwrap();
        assert!(engine.is_pending(Channel::Download));
        assert_eq!(
            engine.host2board(BAR_MEM, 0, &other, 16, opts),
            Err(Error::ChannelBusy)
        );
        assert_eq!(engine.stats(Channel::Download).busy_rejections, 1);

        // a locked call finishes the outstanding one first
        engine
            .host2board(BAR_MEM, 0, &other, 16, TransferOptions::default())
            .unwrap();
        assert!(!engine.is_pending(Channel::Download));
        assert_eq!(engine.stats(Channel::Download).transfers, 2);
    }

    #[test]
    fn test_list_shared_between_channels_is_busy() {
        let (driver, board) = board(EngineConfig::default());
        let engine = board.dma_engine().unwrap();
        driver.board().stall_channel(0, true);
        let mut buf = board.alloc_buffer(4096, MemType::Kernel).unwrap();

        engine
            .host2board(BAR_MEM, 0, &buf, 16, TransferOptions::default().unlocked())
            .unwrap();
        assert_eq!(
            engine.board2host(BAR_MEM, 0, &mut buf, 16, TransferOptions::default()),
            Err(Error::ChannelBusy)
        );

        engine.reset(Channel::Download);
        assert!(!buf.descriptor_list().unwrap().is_claimed());
        driver.board().stall_channel(0, false);
        engine
            .board2host(BAR_MEM, 0, &mut buf, 16, TransferOptions::default())
            .unwrap();
    }

    #[test]
    fn test_timeout_marks_channel_stale() {
        let config = EngineConfig {
            loop_limit: 500,
            ..EngineConfig::default()
        };
        let (driver, board) = board(config);
        let engine = board.dma_engine().unwrap();
        let buf = board.alloc_buffer(4096, MemType::KernelPieces(4)).unwrap();
        let before = buf.descriptor_list().unwrap().snapshot();

        driver.board().stall_channel(0, true);
        let opts = TransferOptions::default().offset(3);
        assert_eq!(
            engine.host2board(BAR_MEM, 0, &buf, 700, opts),
            Err(Error::DmaTimeout)
        );
        assert_eq!(engine.phase(Channel::Download), ChannelPhase::TimedOut);
        assert_eq!(engine.status(Channel::Download), ChannelStatus::Busy);
        assert_eq!(buf.descriptor_list().unwrap().snapshot(), before);
        assert_eq!(engine.stats(Channel::Download).timeouts, 1);

        driver.board().stall_channel(0, false);
        engine.host2board(BAR_MEM, 0, &buf, 700, opts).unwrap();
        assert_eq!(engine.stats(Channel::Download).resets, 1);
        assert_eq!(engine.status(Channel::Download), ChannelStatus::Done);
    }

    #[test]
    fn test_timeout_bound_by_duration() {
        let config = EngineConfig {
            loop_limit: u32::MAX,
            ..EngineConfig::default()
        };
        let (driver, board) = board(config);
        let engine = board.dma_engine().unwrap();
        let buf = board.alloc_buffer(4096, MemType::User).unwrap();
        driver.board().stall_channel(0, true);

        let started = Instant::now();
        let opts = TransferOptions::default().timeout(Duration::from_millis(30));
        assert_eq!(
            engine.host2board(BAR_MEM, 0, &buf, 8, opts),
            Err(Error::DmaTimeout)
        );
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30));
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_interrupt_completion() {
        let config = EngineConfig {
            use_interrupts: true,
            ..EngineConfig::default()
        };
        let (driver, board) = board(config);
        let engine = board.dma_engine().unwrap();
        driver.board().set_latency(Duration::from_millis(5));

        let mut buf = board.alloc_buffer(8192, MemType::User).unwrap();
        for (i, word) in buf.as_mut_slice().iter_mut().enumerate() {
            *word = i as u32 ^ 0xa5a5_0000;
        }
        engine
            .host2board(BAR_MEM, 0, &buf, 2048, TransferOptions::default())
            .unwrap();
        buf.as_mut_slice().fill(0);
        engine
            .board2host(BAR_MEM, 0, &mut buf, 2048, TransferOptions::default())
            .unwrap();
        assert_eq!(buf[2047], 2047 ^ 0xa5a5_0000);

        // interrupt lines are masked again once idle
        let regs = driver.mmap_area(crate::abb::BAR_REGS).unwrap();
        assert_eq!(regs.read32(crate::abb::IRQ_ENABLE), 0);
    }

    #[test]
    fn test_interrupt_timeout() {
        let config = EngineConfig {
            use_interrupts: true,
            irq_timeout: Duration::from_millis(20),
            ..EngineConfig::default()
        };
        let (driver, board) = board(config);
        let engine = board.dma_engine().unwrap();
        let buf = board.alloc_buffer(4096, MemType::Kernel).unwrap();

        driver.board().stall_channel(0, true);
        assert_eq!(
            engine.host2board(BAR_MEM, 0, &buf, 4, TransferOptions::default()),
            Err(Error::DmaTimeout)
        );
        assert!(!engine.is_pending(Channel::Download));
    }

    #[test]
    fn test_release_waits_for_pending_transfer() {
        let (driver, board) = board(EngineConfig::default());
        let engine = Arc::clone(board.dma_engine().unwrap());
        driver.board().set_latency(Duration::from_millis(2));
        let live = driver.live_kernel_allocations();

        let buf = board.alloc_buffer(4096, MemType::KernelPieces(2)).unwrap();
        engine
            .host2board(BAR_MEM, 0, &buf, 1024, TransferOptions::default().unlocked())
            .unwrap();
        drop(buf);

        assert!(!engine.is_pending(Channel::Download));
        assert_eq!(engine.phase(Channel::Download), ChannelPhase::Done);
        assert_eq!(driver.live_kernel_allocations(), live);
    }

    #[test]
    fn test_release_is_idempotent_and_rebuilds_lazily() {
        let (_, board) = board(EngineConfig::default());
        let engine = board.dma_engine().unwrap();
        let buf = board.alloc_buffer(4096, MemType::User).unwrap();

        engine.release_descriptor_list(&buf);
        assert!(buf.descriptor_list().is_none());
        engine.release_descriptor_list(&buf);

        engine
            .host2board(BAR_MEM, 0, &buf, 1024, TransferOptions::default())
            .unwrap();
        assert!(buf.descriptor_list().is_some());
    }
}
