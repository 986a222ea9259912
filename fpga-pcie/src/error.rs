// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! Streaming driver errors and their POSIX codes

use core::fmt;

pub const EIO: i32 = 5;
pub const ENOMEM: i32 = 12;
pub const EFAULT: i32 = 14;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
pub const ENOTTY: i32 = 25;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Device already open, or a stream is running
    Busy,
    /// The completion interrupt did not arrive in time
    TransferTimeout,
    /// Argument outside the accepted range
    InvalidArgument,
    /// Missing or unusable argument pointer
    Fault,
    /// Unknown ioctl command
    NotTty,
    /// Stream operation without a running stream
    NotStreaming,
    /// Coherent memory or a DMA mapping could not be set up
    AllocationFailed,
    /// Read DMA completed with a data error
    DataError,
}

impl Error {
    /// Positive errno value for this error.
    pub fn errno(self) -> i32 {
        match self {
            Error::Busy => EBUSY,
            Error::TransferTimeout | Error::DataError => EIO,
            Error::InvalidArgument | Error::NotStreaming => EINVAL,
            Error::Fault => EFAULT,
            Error::NotTty => ENOTTY,
            Error::AllocationFailed => ENOMEM,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Busy => write!(f, "Device busy"),
            Error::TransferTimeout => write!(f, "Transfer timeout"),
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::Fault => write!(f, "Bad address"),
            Error::NotTty => write!(f, "Inappropriate ioctl for device"),
            Error::NotStreaming => write!(f, "No stream running"),
            Error::AllocationFailed => write!(f, "Out of DMA memory"),
            Error::DataError => write!(f, "Read DMA data error"),
        }
    }
}

impl std::error::Error for Error {}
