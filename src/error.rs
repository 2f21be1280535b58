// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Error types for the EEPROM programmer

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EepromError>;

/// Errors raised while talking to the programmer firmware
#[derive(Debug, Error)]
pub enum EepromError {
    /// Serial device could not be opened
    #[error("No serial device attached ({path}): {source}")]
    Connection {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// Acknowledgment retry bound exceeded
    #[error("Didn't receive OK back from programmer.")]
    NoAck,

    /// Read reply was not a data line
    #[error("Malformed reply from programmer: {0:?}")]
    MalformedReply(String),

    /// Version request timed out
    #[error("No reply from programmer")]
    NoReply,

    /// Write record longer than the record size
    #[error("Record of {0} bytes exceeds the 16 byte record size")]
    RecordTooLong(usize),

    #[error("Address 0x{0:X} is outside the 16-bit address space")]
    AddressOutOfRange(u32),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pre-flight checks, all raised before the device is touched
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Can't verify AND dump to file...choose one or other.")]
    VerifyAndDump,

    #[error("Must provide ROM file to verify against.")]
    MissingVerifyFile,

    #[error("Must provide ROM file name to dump to.")]
    MissingDumpFile,

    #[error("Must provide ROM file to write.")]
    MissingRomFile,

    #[error("Writing needs an address range, not a version probe.")]
    MissingRange,

    #[error("Address range is bigger than EEPROM size.")]
    RangeExceedsCapacity,

    #[error("Address range end 0x{0:X} is beyond the 16-bit address space.")]
    RangeBeyondAddressSpace(u32),

    #[error("{0} is not a valid ROMSIZE")]
    InvalidRomSize(u32),

    #[error("The ROM file {path:?} ({size} bytes) is smaller than the specified address range ({range} bytes).")]
    RomTooSmall {
        path: PathBuf,
        size: usize,
        range: u32,
    },
}
