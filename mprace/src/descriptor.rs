// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Hardware DMA descriptor
//!
//! The DMA engine fetches descriptors from host memory by physical address.
//! Each one is eight little-endian 32-bit words on a 64-byte boundary; the
//! same eight words are written to a channel's head registers to start a
//! transfer.

use bitflags::bitflags;

/// Descriptor alignment required by the engine.
pub const DESCRIPTOR_ALIGN: usize = 64;

bitflags! {
    /// Channel/descriptor control word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Control: u32 {
        /// Channel reset
        const RESET = 0x0000_000A;
        /// Increment the peripheral address
        const INC = 0x0000_8000;
        /// Last descriptor of the chain
        const LAST = 0x0001_0000;
        /// Upstream (board to host) direction
        const UPA = 0x0010_0000;
        /// Interrupt on descriptor done
        const EDI = 0x0020_0000;
        /// Interrupt on error
        const EEI = 0x0040_0000;
        /// Interrupt on chain end
        const ESEI = 0x0080_0000;
        /// Descriptor valid, starts the channel when written to the control register
        const V = 0x0100_0000;

        const _ = !0;
    }
}

impl Control {
    const BAR_SHIFT: u32 = 4;
    const BAR_MASK: u32 = 0x7 << Self::BAR_SHIFT;

    /// BAR select field targeting `bar`.
    pub fn bar(bar: u32) -> Self {
        Self::from_bits_retain((bar << Self::BAR_SHIFT) & Self::BAR_MASK)
    }

    pub fn bar_index(self) -> u32 {
        (self.bits() & Self::BAR_MASK) >> Self::BAR_SHIFT
    }
}

bitflags! {
    /// Channel status word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Status: u32 {
        const DONE = 0x0000_0001;
        const BUSY = 0x0000_0002;
        const TOUT = 0x0000_0004;

        const _ = !0;
    }
}

#[inline]
pub const fn high(addr: u64) -> u32 {
    (addr >> 32) as u32
}

#[inline]
pub const fn low(addr: u64) -> u32 {
    (addr & 0xFFFF_FFFF) as u32
}

#[inline]
const fn join(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

/// One descriptor in its hardware layout.
#[repr(C, align(64))]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NativeDescriptor {
    per_addr_h: u32,
    per_addr_l: u32,
    host_addr_h: u32,
    host_addr_l: u32,
    next_bda_h: u32,
    next_bda_l: u32,
    length: u32,
    control: u32,
}

const _: () = assert!(core::mem::size_of::<NativeDescriptor>() == DESCRIPTOR_ALIGN);

impl NativeDescriptor {
    pub fn per_addr(&self) -> u64 {
        join(u32::from_le(self.per_addr_h), u32::from_le(self.per_addr_l))
    }

    pub fn set_per_addr(&mut self, addr: u64) {
        self.per_addr_h = high(addr).to_le();
        self.per_addr_l = low(addr).to_le();
    }

    pub fn host_addr(&self) -> u64 {
        join(u32::from_le(self.host_addr_h), u32::from_le(self.host_addr_l))
    }

    pub fn set_host_addr(&mut self, addr: u64) {
        self.host_addr_h = high(addr).to_le();
        self.host_addr_l = low(addr).to_le();
    }

    /// Physical address of the next descriptor.
    pub fn next(&self) -> u64 {
        join(u32::from_le(self.next_bda_h), u32::from_le(self.next_bda_l))
    }

    pub fn set_next(&mut self, addr: u64) {
        self.next_bda_h = high(addr).to_le();
        self.next_bda_l = low(addr).to_le();
    }

    /// Segment length in bytes.
    pub fn length(&self) -> u32 {
        u32::from_le(self.length)
    }

    pub fn set_length(&mut self, length: u32) {
        self.length = length.to_le();
    }

    pub fn control(&self) -> Control {
        Control::from_bits_retain(u32::from_le(self.control))
    }

    pub fn set_control(&mut self, control: Control) {
        self.control = control.bits().to_le();
    }

    pub fn is_last(&self) -> bool {
        self.control().contains(Control::LAST)
    }

    /// The eight words in register order, host endian.
    pub fn words(&self) -> [u32; 8] {
        [
            u32::from_le(self.per_addr_h),
            u32::from_le(self.per_addr_l),
            u32::from_le(self.host_addr_h),
            u32::from_le(self.host_addr_l),
            u32::from_le(self.next_bda_h),
            u32::from_le(self.next_bda_l),
            u32::from_le(self.length),
            u32::from_le(self.control),
        ]
    }

    /// Inverse of [`words`](Self::words).
    pub fn from_words(words: [u32; 8]) -> Self {
        Self {
            per_addr_h: words[0].to_le(),
            per_addr_l: words[1].to_le(),
            host_addr_h: words[2].to_le(),
            host_addr_l: words[3].to_le(),
            next_bda_h: words[4].to_le(),
            next_bda_l: words[5].to_le(),
            length: words[6].to_le(),
            control: words[7].to_le(),
        }
    }
}
