// SPDX-FileCopyrightText: 2024 Redox OS Developers
// SPDX-License-Identifier: MIT

//! FPGA configuration files, carried as opaque bytes.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitstreamFormat {
    /// Xilinx `.bit` with header
    Bit,
    /// Raw `.bin`
    Bin,
    /// ASCII `.rbt`
    Rbt,
    /// Built in memory
    Raw,
}

impl BitstreamFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "bit" => Some(Self::Bit),
            "bin" => Some(Self::Bin),
            "rbt" => Some(Self::Rbt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bitstream {
    format: BitstreamFormat,
    data: Vec<u8>,
}

impl Bitstream {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            format: BitstreamFormat::Raw,
            data,
        }
    }

    /// Reads a configuration file, choosing the format by extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(BitstreamFormat::from_extension)
            .ok_or(Error::UnknownFileFormat)?;

        let data = fs::read(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => Error::FileNotFound,
            _ => Error::Unknown,
        })?;
        debug!("bitstream: {} ({:?}, {} bytes)", path.display(), format, data.len());

        Ok(Self { format, data })
    }

    pub fn format(&self) -> BitstreamFormat {
        self.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
