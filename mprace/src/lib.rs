// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Userspace library for PCIe FPGA boards
//!
//! Boards are reached through a [`Driver`], the capability boundary to the
//! kernel module: register windows, pinned kernel memory, user page mapping
//! and interrupt waits. On top of it sit the [`Board`] operations (register,
//! memory and FIFO access) and the scatter/gather DMA engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Application                  │
//! └───────────────┬───────────────────┬──────────┘
//!                 │                   │
//! ┌───────────────▼───────┐  ┌────────▼──────────┐
//! │ Board (Ml605)         │  │ DmaBuffer         │
//! │  registers, memory,   │  │  host memory +    │
//! │  FIFO, bitstream      │  │  DescriptorList   │
//! └───────────────┬───────┘  └────────┬──────────┘
//!                 │                   │
//! ┌───────────────▼───────────────────▼──────────┐
//! │ DmaEngineWg: download / upload channels      │
//! └───────────────────────┬──────────────────────┘
//!                         │
//! ┌───────────────────────▼──────────────────────┐
//! │ Driver: kernel module or sim::SimDriver      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use mprace::{Board, EngineConfig, MemType, Ml605, TransferOptions};
//! use mprace::sim::SimDriver;
//!
//! let board = Ml605::open(SimDriver::new(), EngineConfig::default()).unwrap();
//! let mut out = board.alloc_buffer(4096, MemType::User).unwrap();
//! for i in 0..out.dwords() {
//!     out[i] = i as u32;
//! }
//! board.write_dma(0, &out, 1024, TransferOptions::default()).unwrap();
//!
//! let mut back = board.alloc_buffer(4096, MemType::Kernel).unwrap();
//! board.read_dma(0, &mut back, 1024, TransferOptions::default()).unwrap();
//! assert_eq!(back.as_slice(), out.as_slice());
//! ```

pub mod abb;
pub mod alloc;
pub mod bitstream;
pub mod board;
pub mod buffer;
pub mod config;
pub mod descriptor;
pub mod descriptor_list;
pub mod driver;
pub mod engine;
pub mod error;
pub mod ml605;
#[cfg(feature = "sim")]
pub mod sim;
pub mod stats;

pub use self::alloc::{KernelAllocator, RetryStats};
pub use self::bitstream::{Bitstream, BitstreamFormat};
pub use self::board::Board;
pub use self::buffer::{DmaBuffer, MemType};
pub use self::config::EngineConfig;
pub use self::descriptor::{Control, NativeDescriptor, Status};
pub use self::descriptor_list::DescriptorList;
pub use self::driver::{Driver, KernelMemory, SgEntry, SyncDir, UserMemory, PAGE_SIZE};
pub use self::engine::{
    Channel, ChannelLayout, ChannelPhase, ChannelStatus, DmaEngineWg, EngineLayout,
    TransferOptions,
};
pub use self::error::{Error, Result};
pub use self::ml605::Ml605;
pub use self::stats::ChannelStatsSnapshot;
