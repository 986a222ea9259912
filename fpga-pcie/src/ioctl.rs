// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! ioctl command codes
//!
//! Codes use the Linux `_IOC` layout with magic `'K'`, so existing user
//! programs keep working unchanged.

use crate::error::{Error, Result};

pub const MAGIC: u8 = b'K';

const NR_BITS: u32 = 8;
const TYPE_BITS: u32 = 8;
const SIZE_BITS: u32 = 14;

const TYPE_SHIFT: u32 = NR_BITS;
const SIZE_SHIFT: u32 = TYPE_SHIFT + TYPE_BITS;
const DIR_SHIFT: u32 = SIZE_SHIFT + SIZE_BITS;

const DIR_NONE: u32 = 0;
const DIR_WRITE: u32 = 1;
const DIR_READ: u32 = 2;

const fn ioc(dir: u32, ty: u8, nr: u32, size: u32) -> u32 {
    dir << DIR_SHIFT | size << SIZE_SHIFT | (ty as u32) << TYPE_SHIFT | nr
}

const fn io(nr: u32) -> u32 {
    ioc(DIR_NONE, MAGIC, nr, 0)
}

const fn ior(nr: u32, size: u32) -> u32 {
    ioc(DIR_READ, MAGIC, nr, size)
}

const fn iow(nr: u32, size: u32) -> u32 {
    ioc(DIR_WRITE, MAGIC, nr, size)
}

const INT: u32 = core::mem::size_of::<i32>() as u32;

pub const RESET_CARD: u32 = io(0);
pub const START_STREAM: u32 = io(1);
/// Out: byte offset of the readable half
pub const NEXT_STREAM: u32 = ior(2, INT);
/// Out: byte offset of the last readable half
pub const END_STREAM: u32 = ior(3, INT);
pub const SET_DMACOUNT: u32 = iow(4, INT);
pub const SET_TLPSIZE: u32 = iow(5, INT);
pub const SET_TLPCOUNT: u32 = iow(6, INT);
/// In: fill byte
pub const MEMSET_WRITEBUFFER: u32 = iow(7, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ResetCard,
    StartStream,
    NextStream,
    EndStream,
    SetDmaCount,
    SetTlpSize,
    SetTlpCount,
    MemsetWriteBuffer,
}

impl Request {
    pub fn decode(cmd: u32) -> Result<Self> {
        match cmd {
            RESET_CARD => Ok(Self::ResetCard),
            START_STREAM => Ok(Self::StartStream),
            NEXT_STREAM => Ok(Self::NextStream),
            END_STREAM => Ok(Self::EndStream),
            SET_DMACOUNT => Ok(Self::SetDmaCount),
            SET_TLPSIZE => Ok(Self::SetTlpSize),
            SET_TLPCOUNT => Ok(Self::SetTlpCount),
            MEMSET_WRITEBUFFER => Ok(Self::MemsetWriteBuffer),
            _ => Err(Error::NotTty),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::ResetCard => RESET_CARD,
            Self::StartStream => START_STREAM,
            Self::NextStream => NEXT_STREAM,
            Self::EndStream => END_STREAM,
            Self::SetDmaCount => SET_DMACOUNT,
            Self::SetTlpSize => SET_TLPSIZE,
            Self::SetTlpCount => SET_TLPCOUNT,
            Self::MemsetWriteBuffer => MEMSET_WRITEBUFFER,
        }
    }

    /// Whether the command reads or writes its argument.
    pub fn takes_arg(self) -> bool {
        !matches!(self, Self::ResetCard | Self::StartStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_encoding() {
        assert_eq!(RESET_CARD, 0x4b00);
        assert_eq!(START_STREAM, 0x4b01);
        assert_eq!(NEXT_STREAM, 0x8004_4b02);
        assert_eq!(END_STREAM, 0x8004_4b03);
        assert_eq!(SET_DMACOUNT, 0x4004_4b04);
        assert_eq!(SET_TLPCOUNT, 0x4004_4b06);
        assert_eq!(MEMSET_WRITEBUFFER, 0x4001_4b07);
    }

    #[test]
    fn test_decode() {
        for request in [
            Request::ResetCard,
            Request::NextStream,
            Request::SetTlpSize,
            Request::MemsetWriteBuffer,
        ] {
            assert_eq!(Request::decode(request.code()), Ok(request));
        }
        assert_eq!(Request::decode(0x4b08), Err(Error::NotTty));
        // right number, wrong direction
        assert_eq!(Request::decode(io(2)), Err(Error::NotTty));
    }
}
