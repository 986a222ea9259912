// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Xilinx ML605 board with the ABB design
//!
//! Register window on BAR 0, block RAM on BAR 1, FIFO on BAR 2, and a WG
//! scatter/gather engine whose download channel writes block RAM or FIFO
//! and whose upload channel reads them.

use std::sync::Arc;

use log::{info, trace, warn};

use common::io::RegisterSpace;

use crate::abb;
use crate::board::Board;
use crate::buffer::DmaBuffer;
use crate::config::EngineConfig;
use crate::driver::Driver;
use crate::engine::{ChannelLayout, DmaEngineWg, EngineLayout, TransferOptions};
use crate::error::{Error, Result};

pub struct Ml605<D: Driver> {
    driver: Arc<D>,
    regs: Arc<dyn RegisterSpace>,
    mem: Arc<dyn RegisterSpace>,
    fifo: Arc<dyn RegisterSpace>,
    engine: Arc<DmaEngineWg<D>>,
}

impl<D: Driver> Ml605<D> {
    /// Engine register placement of the ABB design.
    pub fn engine_layout() -> EngineLayout {
        EngineLayout {
            download: ChannelLayout {
                base: abb::DS_PAH,
                irq_mask: abb::INTE_CH0,
                irq_source: abb::IRQ_SRC_CH0,
                transferred: Some(abb::DMA_TRANS0),
            },
            upload: ChannelLayout {
                base: abb::US_PAH,
                irq_mask: abb::INTE_CH1,
                irq_source: abb::IRQ_SRC_CH1,
                transferred: Some(abb::DMA_TRANS1),
            },
            irq_enable: abb::IRQ_ENABLE,
            irq_status: abb::IRQ_STAT,
        }
    }

    /// Opens the device, maps its windows and resets both DMA channels.
    pub fn open(driver: Arc<D>, config: EngineConfig) -> Result<Self> {
        driver.open()?;
        match Self::map(&driver, &config) {
            Ok(board) => {
                info!(
                    "ml605: design {:#010x}, {} KiB block RAM, interrupts {}",
                    board.version(),
                    board.mem.len() / 1024,
                    if config.use_interrupts { "on" } else { "off" }
                );
                Ok(board)
            }
            Err(err) => {
                if let Err(close_err) = driver.close() {
                    warn!("ml605: close after failed open: {}", close_err);
                }
                Err(err)
            }
        }
    }

    fn map(driver: &Arc<D>, config: &EngineConfig) -> Result<Self> {
        let regs = driver.mmap_area(abb::BAR_REGS)?;
        let mem = driver.mmap_area(abb::BAR_MEM)?;
        let fifo = driver.mmap_area(abb::BAR_FIFO)?;
        let engine = DmaEngineWg::new(
            Arc::clone(driver),
            Arc::clone(&regs),
            Self::engine_layout(),
            config,
        )?;

        Ok(Self {
            driver: Arc::clone(driver),
            regs,
            mem,
            fifo,
            engine,
        })
    }

    pub fn version(&self) -> u32 {
        self.regs.read32(abb::VERSION)
    }

    /// Byte offset of dword `addr` in `window` if `words` dwords fit there.
    fn check(window: &dyn RegisterSpace, addr: u32, words: usize, inc: bool) -> Result<usize> {
        let offset = addr as usize * 4;
        let span = if inc { words.max(1) * 4 } else { 4 };
        if window.contains(offset, span) {
            Ok(offset)
        } else {
            Err(Error::AddressOutOfRange)
        }
    }
}

impl<D: Driver> Board for Ml605<D> {
    type Driver = D;

    fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    fn set_reg(&self, addr: u32, value: u32) -> Result<()> {
        let offset = Self::check(&*self.regs, addr, 1, true)?;
        trace!("ml605: reg write {:#x} = {:#010x}", addr, value);
        self.regs.write32(offset, value);
        Ok(())
    }

    fn get_reg(&self, addr: u32) -> Result<u32> {
        let offset = Self::check(&*self.regs, addr, 1, true)?;
        let value = self.regs.read32(offset);
        trace!("ml605: reg read {:#x} = {:#010x}", addr, value);
        Ok(value)
    }

    fn write(&self, addr: u32, value: u32) -> Result<()> {
        let offset = Self::check(&*self.mem, addr, 1, true)?;
        trace!("ml605: single write {:#x} = {:#010x}", addr, value);
        self.mem.write32(offset, value);
        Ok(())
    }

    fn read(&self, addr: u32) -> Result<u32> {
        let offset = Self::check(&*self.mem, addr, 1, true)?;
        let value = self.mem.read32(offset);
        trace!("ml605: single read {:#x} = {:#010x}", addr, value);
        Ok(value)
    }

    fn write_block(&self, addr: u32, data: &[u32], inc: bool) -> Result<()> {
        let offset = Self::check(&*self.mem, addr, data.len(), inc)?;
        trace!("ml605: block write {:#x}, {} dwords, inc {}", addr, data.len(), inc);
        for (i, value) in data.iter().enumerate() {
            let target = if inc { offset + i * 4 } else { offset };
            self.mem.write32(target, *value);
        }
        Ok(())
    }

    fn read_block(&self, addr: u32, data: &mut [u32], inc: bool) -> Result<()> {
        let offset = Self::check(&*self.mem, addr, data.len(), inc)?;
        trace!("ml605: block read {:#x}, {} dwords, inc {}", addr, data.len(), inc);
        for (i, value) in data.iter_mut().enumerate() {
            let source = if inc { offset + i * 4 } else { offset };
            *value = self.mem.read32(source);
        }
        Ok(())
    }

    fn write_fifo(&self, value: u32) -> Result<()> {
        trace!("ml605: fifo write {:#010x}", value);
        self.fifo.write32(abb::FIFO_DATA, value);
        Ok(())
    }

    fn read_fifo(&self) -> Result<u32> {
        let value = self.fifo.read32(abb::FIFO_DATA);
        trace!("ml605: fifo read {:#010x}", value);
        Ok(value)
    }

    fn dma_engine(&self) -> Result<&Arc<DmaEngineWg<D>>> {
        Ok(&self.engine)
    }

    fn write_dma(&self, addr: u32, buf: &DmaBuffer<D>, count: u32, opts: TransferOptions) -> Result<()> {
        Self::check(&*self.mem, addr, count as usize, opts.inc)?;
        self.engine.host2board(abb::BAR_MEM, addr, buf, count, opts)
    }

    fn read_dma(
        &self,
        addr: u32,
        buf: &mut DmaBuffer<D>,
        count: u32,
        opts: TransferOptions,
    ) -> Result<()> {
        Self::check(&*self.mem, addr, count as usize, opts.inc)?;
        self.engine.board2host(abb::BAR_MEM, addr, buf, count, opts)
    }

    fn write_dma_fifo(&self, buf: &DmaBuffer<D>, count: u32, opts: TransferOptions) -> Result<()> {
        self.engine
            .host2board(abb::BAR_FIFO, 0, buf, count, opts.inc(false))
    }

    fn read_dma_fifo(&self, buf: &mut DmaBuffer<D>, count: u32, opts: TransferOptions) -> Result<()> {
        self.engine
            .board2host(abb::BAR_FIFO, 0, buf, count, opts.inc(false))
    }
}

impl<D: Driver> Drop for Ml605<D> {
    fn drop(&mut self) {
        for area in [abb::BAR_FIFO, abb::BAR_MEM, abb::BAR_REGS] {
            if let Err(err) = self.driver.unmap_area(area) {
                warn!("ml605: unmap of area {}: {}", area, err);
            }
        }
        if let Err(err) = self.driver.close() {
            warn!("ml605: close: {}", err);
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::buffer::MemType;
    use crate::sim::{SimDriver, BRAM_SIZE, SIM_VERSION};

    fn board() -> (Arc<SimDriver>, Ml605<SimDriver>) {
        let driver = SimDriver::new();
        let board = Ml605::open(Arc::clone(&driver), EngineConfig::default()).unwrap();
        (driver, board)
    }

    #[test]
    fn test_version_and_registers() {
        let (_, board) = board();
        assert_eq!(board.version(), SIM_VERSION);
        assert_eq!(board.get_reg(0).unwrap(), SIM_VERSION);

        board.set_reg(0x20, 0x1234).unwrap();
        assert_eq!(board.get_reg(0x20).unwrap(), 0x1234);
        assert_eq!(board.set_reg(1024, 0), Err(Error::AddressOutOfRange));
        assert_eq!(board.get_reg(u32::MAX), Err(Error::AddressOutOfRange));
    }

    #[test]
    fn test_memory_bounds() {
        let (_, board) = board();
        let last = (BRAM_SIZE / 4 - 1) as u32;
        board.write(last, 7).unwrap();
        assert_eq!(board.read(last).unwrap(), 7);
        assert_eq!(board.write(last + 1, 7), Err(Error::AddressOutOfRange));

        let data: Vec<u32> = (0..16).collect();
        assert_eq!(
            board.write_block(last - 8, &data, true),
            Err(Error::AddressOutOfRange)
        );
        // without increment only the first address matters
        board.write_block(last, &data, false).unwrap();
        assert_eq!(board.read(last).unwrap(), 15);
    }

    #[test]
    fn test_block_round_trip() {
        let (_, board) = board();
        let data: Vec<u32> = (0..256).map(|i| i * 3 + 1).collect();
        board.write_block(0x100, &data, true).unwrap();

        let mut back = vec![0; 256];
        board.read_block(0x100, &mut back, true).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn test_fifo_programmed_io() {
        let (_, board) = board();
        for value in [1, 2, 3] {
            board.write_fifo(value).unwrap();
        }
        assert_eq!(board.read_fifo().unwrap(), 1);
        assert_eq!(board.read_fifo().unwrap(), 2);
        assert_eq!(board.read_fifo().unwrap(), 3);
    }

    #[test]
    fn test_dma_address_checked() {
        let (driver, board) = board();
        let buf = board.alloc_buffer(4096, MemType::Kernel).unwrap();
        let last = (BRAM_SIZE / 4 - 1) as u32;
        let starts = driver.board().starts();

        assert_eq!(
            board.write_dma(last, &buf, 2, TransferOptions::default()),
            Err(Error::AddressOutOfRange)
        );
        assert_eq!(driver.board().starts(), starts);
        board
            .write_dma(last, &buf, 2, TransferOptions::default().inc(false))
            .unwrap();
    }

    #[test]
    fn test_closed_after_drop() {
        let (driver, board) = board();
        drop(board);
        assert_eq!(driver.wait_for_interrupt(0, None), Err(Error::DeviceNotOpen));
    }
}
