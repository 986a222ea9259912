// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Simulated ML605 board
//!
//! Models the register window, block RAM, FIFO and both WG DMA channels.
//! Writing a valid control word to a channel runs its descriptor chain
//! against simulated physical memory, immediately or after a configured
//! latency, then sets DONE, counts the bytes and raises the channel
//! interrupt when it is enabled.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use log::trace;
use parking_lot::{Condvar, Mutex};

use common::io::{RegisterSpace, WordRegion};

use crate::abb;
use crate::descriptor::{Control, NativeDescriptor, Status};
use crate::error::{Error, Result};
use crate::sim::memory::PhysMemory;

pub const REGS_SIZE: usize = 0x1000;
pub const BRAM_SIZE: usize = 64 * 1024;
pub const FIFO_WINDOW_SIZE: usize = 0x10;
/// FIFO depth in dwords
pub const FIFO_DEPTH: usize = 4096;
/// Value of the version register
pub const SIM_VERSION: u32 = 0x0605_0001;

const IRQ_LINES: usize = 2;

/// Counting interrupt lines.
pub struct IrqLines {
    pending: Mutex<[u64; IRQ_LINES]>,
    cond: Condvar,
}

impl IrqLines {
    fn new() -> Self {
        Self {
            pending: Mutex::new([0; IRQ_LINES]),
            cond: Condvar::new(),
        }
    }

    pub fn raise(&self, source: u32) {
        let mut pending = self.pending.lock();
        pending[source as usize] += 1;
        self.cond.notify_all();
    }

    pub fn clear(&self, source: u32) {
        self.pending.lock()[source as usize] = 0;
    }

    pub fn wait(&self, source: u32, timeout: Option<Duration>) -> Result<()> {
        let source = source as usize;
        if source >= IRQ_LINES {
            return Err(Error::InterruptFailed);
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut pending = self.pending.lock();
        while pending[source] == 0 {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut pending, deadline).timed_out()
                        && pending[source] == 0
                    {
                        return Err(Error::DmaTimeout);
                    }
                }
                None => self.cond.wait(&mut pending),
            }
        }
        pending[source] -= 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToBoard,
    ToHost,
}

struct ChannelModel {
    base: usize,
    trans: usize,
    inte: u32,
    source: u32,
    direction: Direction,
    stalled: AtomicBool,
    /// Bumped on reset so a delayed run started earlier is dropped
    generation: AtomicU64,
}

pub struct SimBoard {
    regs: WordRegion,
    bram: Arc<WordRegion>,
    fifo: ArrayQueue<u32>,
    memory: Arc<PhysMemory>,
    irq: Arc<IrqLines>,
    channels: [ChannelModel; 2],
    latency_us: AtomicU64,
    starts: AtomicU32,
}

impl SimBoard {
    pub(crate) fn new(memory: Arc<PhysMemory>) -> Arc<Self> {
        let regs = WordRegion::new(REGS_SIZE);
        regs.write32(abb::VERSION, SIM_VERSION);

        Arc::new(Self {
            regs,
            bram: Arc::new(WordRegion::new(BRAM_SIZE)),
            fifo: ArrayQueue::new(FIFO_DEPTH),
            memory,
            irq: Arc::new(IrqLines::new()),
            channels: [
                ChannelModel {
                    base: abb::DS_PAH,
                    trans: abb::DMA_TRANS0,
                    inte: abb::INTE_CH0,
                    source: abb::IRQ_SRC_CH0,
                    direction: Direction::ToBoard,
                    stalled: AtomicBool::new(false),
                    generation: AtomicU64::new(0),
                },
                ChannelModel {
                    base: abb::US_PAH,
                    trans: abb::DMA_TRANS1,
                    inte: abb::INTE_CH1,
                    source: abb::IRQ_SRC_CH1,
                    direction: Direction::ToHost,
                    stalled: AtomicBool::new(false),
                    generation: AtomicU64::new(0),
                },
            ],
            latency_us: AtomicU64::new(0),
            starts: AtomicU32::new(0),
        })
    }

    pub fn irq(&self) -> &Arc<IrqLines> {
        &self.irq
    }

    pub fn bram(&self) -> &Arc<WordRegion> {
        &self.bram
    }

    /// Channel `index` accepts starts but never finishes.
    pub fn stall_channel(&self, index: usize, stalled: bool) {
        self.channels[index].stalled.store(stalled, Ordering::Release);
    }

    /// Delay between a start and the transfer running.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// Number of channel starts seen so far.
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn fifo_level(&self) -> usize {
        self.fifo.len()
    }

    fn channel_at(&self, offset: usize) -> Option<usize> {
        self.channels
            .iter()
            .position(|ch| offset == ch.base + abb::CHANNEL_CTRL)
    }

    fn status(&self, index: usize, status: Status) {
        let ch = &self.channels[index];
        self.regs.write32(ch.base + abb::CHANNEL_STA, status.bits());
    }

    fn control_written(self: &Arc<Self>, index: usize, value: u32) {
        let ch = &self.channels[index];
        if value == Control::RESET.bits() {
            ch.generation.fetch_add(1, Ordering::AcqRel);
            self.status(index, Status::empty());
            self.regs.clear_bits(abb::IRQ_STAT, ch.inte);
            self.irq.clear(ch.source);
            return;
        }
        if !Control::from_bits_retain(value).contains(Control::V) {
            return;
        }

        self.starts.fetch_add(1, Ordering::Relaxed);
        self.status(index, Status::BUSY);
        if ch.stalled.load(Ordering::Acquire) {
            return;
        }

        let head = self.head_descriptor(index);
        let latency = self.latency_us.load(Ordering::Relaxed);
        if latency == 0 {
            self.run(index, head);
        } else {
            let generation = ch.generation.load(Ordering::Acquire);
            let board = Arc::clone(self);
            thread::spawn(move || {
                thread::sleep(Duration::from_micros(latency));
                if board.channels[index].generation.load(Ordering::Acquire) == generation {
                    board.run(index, head);
                }
            });
        }
    }

    fn head_descriptor(&self, index: usize) -> NativeDescriptor {
        let base = self.channels[index].base;
        let mut words = [0u32; 8];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.regs.read32(base + i * 4);
        }
        NativeDescriptor::from_words(words)
    }

    fn run(&self, index: usize, head: NativeDescriptor) {
        let ch = &self.channels[index];
        let mut desc = head;
        let mut moved = 0u64;

        loop {
            match self.segment(ch.direction, &desc) {
                Ok(bytes) => moved += bytes as u64,
                Err(()) => {
                    self.status(index, Status::TOUT);
                    return;
                }
            }
            if desc.is_last() {
                break;
            }
            let Some(next) = self.memory.translate(desc.next(), 64) else {
                self.status(index, Status::TOUT);
                return;
            };
            desc = unsafe { std::ptr::read_volatile(next as *const NativeDescriptor) };
        }

        let total = self.regs.read32(ch.trans).wrapping_add(moved as u32);
        self.regs.write32(ch.trans, total);
        self.status(index, Status::DONE);
        trace!("sim: channel {} moved {} bytes", index, moved);

        if self.regs.read32(abb::IRQ_ENABLE) & ch.inte != 0 {
            self.regs.set_bits(abb::IRQ_STAT, ch.inte);
            self.irq.raise(ch.source);
        }
    }

    /// Moves one descriptor's worth of data.
    fn segment(&self, direction: Direction, desc: &NativeDescriptor) -> Result<usize, ()> {
        let len = desc.length() as usize;
        if len % 4 != 0 {
            return Err(());
        }
        let host = self.memory.translate(desc.host_addr(), len).ok_or(())? as *mut u32;
        let control = desc.control();
        let inc = control.contains(Control::INC);
        let per = desc.per_addr() as usize;

        for i in 0..len / 4 {
            let host_word = unsafe { host.add(i) };
            match control.bar_index() {
                abb::BAR_MEM => {
                    let addr = if inc { per + i * 4 } else { per };
                    if !self.bram.contains(addr, 4) {
                        return Err(());
                    }
                    match direction {
                        Direction::ToBoard => {
                            let value = unsafe { host_word.read_unaligned() };
                            self.bram.write32(addr, value);
                        }
                        Direction::ToHost => {
                            let value = self.bram.read32(addr);
                            unsafe { host_word.write_unaligned(value) };
                        }
                    }
                }
                abb::BAR_FIFO => match direction {
                    Direction::ToBoard => {
                        let value = unsafe { host_word.read_unaligned() };
                        self.fifo.push(value).map_err(|_| ())?;
                    }
                    Direction::ToHost => {
                        let value = self.fifo.pop().ok_or(())?;
                        unsafe { host_word.write_unaligned(value) };
                    }
                },
                _ => return Err(()),
            }
        }
        Ok(len)
    }
}

/// Register window of a [`SimBoard`].
pub struct SimRegisters(pub(crate) Arc<SimBoard>);

impl RegisterSpace for SimRegisters {
    fn len(&self) -> usize {
        REGS_SIZE
    }

    fn read32(&self, offset: usize) -> u32 {
        self.0.regs.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        if offset == abb::IRQ_STAT {
            self.0.regs.clear_bits(offset, value);
            return;
        }
        self.0.regs.write32(offset, value);
        if let Some(index) = self.0.channel_at(offset) {
            self.0.control_written(index, value);
        }
    }
}

/// FIFO window of a [`SimBoard`].
pub struct SimFifo(pub(crate) Arc<SimBoard>);

impl RegisterSpace for SimFifo {
    fn len(&self) -> usize {
        FIFO_WINDOW_SIZE
    }

    fn read32(&self, offset: usize) -> u32 {
        match offset {
            abb::FIFO_DATA => self.0.fifo.pop().unwrap_or(0),
            abb::FIFO_LEVEL => self.0.fifo.len() as u32,
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        if offset == abb::FIFO_DATA {
            // a full FIFO drops the word, as the hardware does
            let _ = self.0.fifo.push(value);
        }
    }
}
