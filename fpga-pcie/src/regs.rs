// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! XAPP1052 bus-master DMA register map (BAR 0, byte offsets)

use bitflags::bitflags;

/// PCI vendor/device of the reference design
pub const VENDOR_ID: u16 = 0x10EE;
pub const DEVICE_ID: u16 = 0x0007;

// ========== Control ==========

/// Device control and status
pub const DCSR: usize = 0x000;
/// Device DMA control
pub const DDMACR: usize = 0x004;

// ========== Write DMA (device to host) ==========

/// Target bus address, low 32 bits
pub const WDMATLPA: usize = 0x008;
/// TLP size in dwords, plus upper address bits
pub const WDMATLPS: usize = 0x00c;
pub const WDMATLPC: usize = 0x010;
/// Data pattern written by the design
pub const WDMATLPP: usize = 0x014;

// ========== Read DMA (host to device) ==========

/// Pattern the design expects to read
pub const RDMATLPP: usize = 0x018;
pub const RDMATLPA: usize = 0x01c;
pub const RDMATLPS: usize = 0x020;
pub const RDMATLPC: usize = 0x024;

// ========== Performance and link status (read only) ==========

pub const WDMAPERF: usize = 0x028;
pub const RDMAPERF: usize = 0x02c;
pub const RDMASTAT: usize = 0x030;
pub const NRDCOMP: usize = 0x034;
pub const RCOMPDSIZW: usize = 0x038;
pub const DLWSTAT: usize = 0x03c;
pub const DLTRSSTAT: usize = 0x040;
pub const DMISCCONT: usize = 0x044;

/// Size of the register window
pub const WINDOW_SIZE: usize = 0x100;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dcsr: u32 {
        /// Initiator reset, held while set
        const INIT_RESET = 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ddmacr: u32 {
        const WDMA_START = 1;
        const WDMA_RELAXED_ORDER = 1 << 5;
        const WDMA_NO_SNOOP = 1 << 6;
        /// Suppresses the write DMA done interrupt
        const WDMA_INT_DISABLE = 1 << 7;
        const WDMA_DONE = 1 << 8;
        const RDMA_START = 1 << 16;
        const RDMA_RELAXED_ORDER = 1 << 21;
        const RDMA_NO_SNOOP = 1 << 22;
        /// Suppresses the read DMA done interrupt
        const RDMA_INT_DISABLE = 1 << 23;
        const RDMA_DONE = 1 << 24;
        const RDMA_DATA_ERROR = 1 << 31;
    }
}

/// TLP size bits of `WDMATLPS` / `RDMATLPS`
pub const TLPS_SIZE_MASK: u32 = 0x1fff;
/// Enables 64-bit addressing with the upper address byte below
pub const TLPS_64BIT_ENABLE: u32 = 1 << 19;
pub const TLPS_UPPER_ADDR_SHIFT: u32 = 24;

/// Size register value for `tlp_size` dwords targeting `bus`.
pub fn tlp_size_word(tlp_size: u32, bus: u64) -> u32 {
    let upper = (bus >> 32) as u32 & 0xff;
    let size = tlp_size & TLPS_SIZE_MASK;
    if upper == 0 {
        size
    } else {
        size | TLPS_64BIT_ENABLE | upper << TLPS_UPPER_ADDR_SHIFT
    }
}

/// Bus address programmed by a TLP address/size register pair.
pub fn tlp_target(addr: u32, size_word: u32) -> u64 {
    let upper = if size_word & TLPS_64BIT_ENABLE != 0 {
        u64::from(size_word >> TLPS_UPPER_ADDR_SHIFT)
    } else {
        0
    };
    upper << 32 | u64::from(addr)
}
