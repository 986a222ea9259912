// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Board abstraction
//!
//! Every board family implements [`Board`]. Operations a board does not
//! provide keep the default implementation, which reports the missing
//! capability.

use std::sync::Arc;
use std::time::Duration;

use crate::bitstream::Bitstream;
use crate::buffer::{DmaBuffer, MemType};
use crate::driver::Driver;
use crate::engine::{DmaEngineWg, TransferOptions};
use crate::error::{Error, Result};

pub use crate::ml605::Ml605;

pub trait Board {
    type Driver: Driver;

    fn driver(&self) -> &Arc<Self::Driver>;

    /// Writes register `addr` (dword index).
    fn set_reg(&self, addr: u32, value: u32) -> Result<()>;

    /// Reads register `addr` (dword index).
    fn get_reg(&self, addr: u32) -> Result<u32>;

    /// Writes one dword of board memory.
    fn write(&self, addr: u32, value: u32) -> Result<()>;

    /// Reads one dword of board memory.
    fn read(&self, addr: u32) -> Result<u32>;

    /// Programmed-I/O block write starting at dword `addr`; without `inc`
    /// every word goes to `addr`.
    fn write_block(&self, addr: u32, data: &[u32], inc: bool) -> Result<()>;

    fn read_block(&self, addr: u32, data: &mut [u32], inc: bool) -> Result<()>;

    fn wait_for_interrupt(&self, source: u32, timeout: Option<Duration>) -> Result<()> {
        self.driver().wait_for_interrupt(source, timeout)
    }

    fn write_fifo(&self, _value: u32) -> Result<()> {
        Err(Error::FifoNotSupported)
    }

    fn read_fifo(&self) -> Result<u32> {
        Err(Error::FifoNotSupported)
    }

    fn dma_engine(&self) -> Result<&Arc<DmaEngineWg<Self::Driver>>> {
        Err(Error::DmaNotSupported)
    }

    /// Allocates a DMA buffer usable with this board's engine.
    fn alloc_buffer(&self, size: usize, kind: MemType) -> Result<DmaBuffer<Self::Driver>> {
        DmaBuffer::new(self.dma_engine()?, size, kind)
    }

    /// DMA of `count` dwords from `buf` to board memory at dword `addr`.
    fn write_dma(
        &self,
        _addr: u32,
        _buf: &DmaBuffer<Self::Driver>,
        _count: u32,
        _opts: TransferOptions,
    ) -> Result<()> {
        Err(Error::DmaNotSupported)
    }

    /// DMA of `count` dwords from board memory at dword `addr` into `buf`.
    fn read_dma(
        &self,
        _addr: u32,
        _buf: &mut DmaBuffer<Self::Driver>,
        _count: u32,
        _opts: TransferOptions,
    ) -> Result<()> {
        Err(Error::DmaNotSupported)
    }

    fn write_dma_fifo(
        &self,
        _buf: &DmaBuffer<Self::Driver>,
        _count: u32,
        _opts: TransferOptions,
    ) -> Result<()> {
        Err(Error::DmaNotSupported)
    }

    fn read_dma_fifo(
        &self,
        _buf: &mut DmaBuffer<Self::Driver>,
        _count: u32,
        _opts: TransferOptions,
    ) -> Result<()> {
        Err(Error::DmaNotSupported)
    }

    /// Loads a bitstream into the FPGA.
    fn configure(&self, _bitstream: &Bitstream) -> Result<()> {
        Err(Error::ConfigNotSupported)
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::SimDriver;
    use common::io::RegisterSpace;

    /// Register-only board, relying on every default.
    struct Minimal {
        driver: Arc<SimDriver>,
        regs: Arc<dyn RegisterSpace>,
    }

    impl Board for Minimal {
        type Driver = SimDriver;

        fn driver(&self) -> &Arc<SimDriver> {
            &self.driver
        }

        fn set_reg(&self, addr: u32, value: u32) -> Result<()> {
            self.regs.write32(addr as usize * 4, value);
            Ok(())
        }

        fn get_reg(&self, addr: u32) -> Result<u32> {
            Ok(self.regs.read32(addr as usize * 4))
        }

        fn write(&self, addr: u32, value: u32) -> Result<()> {
            self.set_reg(addr, value)
        }

        fn read(&self, addr: u32) -> Result<u32> {
            self.get_reg(addr)
        }

        fn write_block(&self, _addr: u32, _data: &[u32], _inc: bool) -> Result<()> {
            Ok(())
        }

        fn read_block(&self, _addr: u32, _data: &mut [u32], _inc: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_missing_capabilities() {
        let driver = SimDriver::new();
        driver.open().unwrap();
        let regs = driver.mmap_area(crate::abb::BAR_REGS).unwrap();
        let board = Minimal { driver, regs };

        assert_eq!(board.write_fifo(1), Err(Error::FifoNotSupported));
        assert_eq!(board.read_fifo(), Err(Error::FifoNotSupported));
        assert!(matches!(board.dma_engine(), Err(Error::DmaNotSupported)));
        assert!(matches!(
            board.alloc_buffer(64, MemType::Kernel),
            Err(Error::DmaNotSupported)
        ));
        let bitstream = Bitstream::from_bytes(vec![0; 16]);
        assert_eq!(board.configure(&bitstream), Err(Error::ConfigNotSupported));
    }
}
