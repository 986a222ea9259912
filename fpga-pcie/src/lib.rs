// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Streaming driver core for XAPP1052-style PCIe DMA designs
//!
//! The device exposes one ping-pong buffer to a single user at a time.
//! Everything hardware or kernel specific goes through [`Platform`]; the
//! [`sim`] module provides a software device for tests.
//!
//! ```
//! use fpga_pcie::sim::SimPlatform;
//! use fpga_pcie::{ioctl, FpgaPcie, StreamConfig, BUF_SIZE};
//!
//! let device = FpgaPcie::probe(SimPlatform::new(), StreamConfig::default()).unwrap();
//! let handle = device.open().unwrap();
//! assert_eq!(handle.ioctl(ioctl::START_STREAM, None), 0);
//!
//! let mut offset = -1;
//! assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, Some(&mut offset)), 0);
//! assert_eq!(offset, 0);
//! assert_eq!(handle.ioctl(ioctl::NEXT_STREAM, Some(&mut offset)), 0);
//! assert_eq!(offset as usize, BUF_SIZE);
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod ioctl;
pub mod platform;
pub mod regs;
#[cfg(feature = "sim")]
pub mod sim;
pub mod stats;

pub use self::config::StreamConfig;
pub use self::device::{
    BufferView, DeviceHandle, FpgaPcie, StreamState, BUF_SIZE, EVEN_PATTERN, MAX_TLP_COUNT,
    MAX_TLP_SIZE, ODD_PATTERN, SINGLE_SHOT_PATTERN, START_PATTERN,
};
pub use self::error::{Error, Result};
pub use self::ioctl::Request;
pub use self::platform::{CoherentBuffer, DmaDirection, DmaMapping, IrqHandler, Platform};
pub use self::stats::DeviceStatsSnapshot;
