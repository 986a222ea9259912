// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Error types for board and DMA operations

use core::fmt;

/// Board library result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Board library error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Address outside the mapped window
    AddressOutOfRange,
    /// Kernel memory or descriptor storage could not be allocated
    AllocationFailed,
    /// A descriptor would straddle a host page
    AlignmentViolation,
    /// User memory could not be pinned and mapped
    UserMappingFailed,
    /// Waiting for an interrupt failed
    InterruptFailed,
    /// Device is not open
    DeviceNotOpen,
    /// Bitstream file not found
    FileNotFound,
    /// Bitstream file has an unknown format
    UnknownFileFormat,
    /// Board cannot be configured
    ConfigNotSupported,
    /// Board has no DMA engine
    DmaNotSupported,
    /// Board has no FIFO
    FifoNotSupported,
    /// DMA did not complete in time
    DmaTimeout,
    /// Transfer of zero dwords
    EmptyTransfer,
    /// Transfer exceeds the buffer
    OversizedTransfer,
    /// Channel or descriptor list has an unfinished transfer
    ChannelBusy,
    /// Invalid argument
    InvalidArgument,
    /// Unexpected lower-layer failure
    Unknown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AddressOutOfRange => write!(f, "Address out of range"),
            Error::AllocationFailed => write!(f, "Memory allocation failed"),
            Error::AlignmentViolation => write!(f, "Descriptor crosses a page boundary"),
            Error::UserMappingFailed => write!(f, "User memory mapping failed"),
            Error::InterruptFailed => write!(f, "Waiting for interrupt failed"),
            Error::DeviceNotOpen => write!(f, "Device not open"),
            Error::FileNotFound => write!(f, "File not found"),
            Error::UnknownFileFormat => write!(f, "Unknown file format"),
            Error::ConfigNotSupported => write!(f, "Configuration not supported"),
            Error::DmaNotSupported => write!(f, "DMA not supported"),
            Error::FifoNotSupported => write!(f, "FIFO not supported"),
            Error::DmaTimeout => write!(f, "DMA timeout"),
            Error::EmptyTransfer => write!(f, "Empty transfer"),
            Error::OversizedTransfer => write!(f, "Transfer exceeds buffer"),
            Error::ChannelBusy => write!(f, "DMA channel busy"),
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::Unknown => write!(f, "Unknown error"),
        }
    }
}

impl std::error::Error for Error {}
