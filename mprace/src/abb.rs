// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! ABB register map (ML605 design)
//!
//! Byte offsets into the register window. Board-level dword addresses are
//! these divided by four.

// ==================== Windows ====================

/// Register window
pub const BAR_REGS: u32 = 0;
/// Block RAM window, also the DMA target for memory transfers
pub const BAR_MEM: u32 = 1;
/// FIFO window, also the DMA target for FIFO transfers
pub const BAR_FIFO: u32 = 2;

// ==================== General registers ====================

pub const VERSION: usize = 0x00;
/// Interrupt status, write one to clear
pub const IRQ_STAT: usize = 0x08;
/// Interrupt enable
pub const IRQ_ENABLE: usize = 0x10;

// ==================== Upstream channel (board -> host) ====================

pub const US_PAH: usize = 44;
pub const US_PAL: usize = 48;
pub const US_HAH: usize = 52;
pub const US_HAL: usize = 56;
pub const US_BDAH: usize = 60;
pub const US_BDAL: usize = 64;
pub const US_LENG: usize = 68;
pub const US_CTRL: usize = 72;
pub const US_STA: usize = 76;

// ==================== Downstream channel (host -> board) ====================

pub const DS_PAH: usize = 80;
pub const DS_PAL: usize = 84;
pub const DS_HAH: usize = 88;
pub const DS_HAL: usize = 92;
pub const DS_BDAH: usize = 96;
pub const DS_BDAL: usize = 100;
pub const DS_LENG: usize = 104;
pub const DS_CTRL: usize = 108;
pub const DS_STA: usize = 112;

/// Bytes moved by the downstream channel
pub const DMA_TRANS0: usize = 0x94;
/// Bytes moved by the upstream channel
pub const DMA_TRANS1: usize = 0x98;

// ==================== Interrupts ====================

pub const INTE_CH0: u32 = 0x0000_0001;
pub const INTE_CH1: u32 = 0x0000_0002;

pub const IRQ_SRC_CH0: u32 = 0;
pub const IRQ_SRC_CH1: u32 = 1;

// ==================== FIFO window ====================

/// Push on write, pop on read
pub const FIFO_DATA: usize = 0x0;
/// Words currently queued
pub const FIFO_LEVEL: usize = 0x4;

/// Control offset within a channel's register block
pub const CHANNEL_CTRL: usize = DS_CTRL - DS_PAH;
/// Status offset within a channel's register block
pub const CHANNEL_STA: usize = DS_STA - DS_PAH;
