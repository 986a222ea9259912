// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Software board
//!
//! A [`Driver`](crate::Driver) implementation with no hardware behind it.
//! Bus addresses are fabricated, user pages are scattered, and the DMA
//! channels execute real descriptor chains, so everything above the driver
//! boundary runs unchanged against it.

mod board;
mod driver;
mod memory;

pub use self::board::{
    IrqLines, SimBoard, BRAM_SIZE, FIFO_DEPTH, FIFO_WINDOW_SIZE, REGS_SIZE, SIM_VERSION,
};
pub use self::driver::SimDriver;
pub use self::memory::PhysMemory;
