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

//! Run configuration: serial settings, device size and job validation

use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::ValidationError;
use crate::protocol::RECSIZE;

pub const DEFAULT_PORT: &str = "/dev/tty.usbserial-1420";
pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRIES: usize = 5;

/// The programmer reboots when the port opens and needs at least a second
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

/// One past the highest address the wire format can express
pub const ADDRESS_SPACE: u32 = 0x1_0000;

// ============================================================================
// Serial Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: String,
    pub baud: u32,
    /// Per-read timeout of the transport
    pub read_timeout: Duration,
    /// Non-acknowledgment lines tolerated before giving up
    pub retries: usize,
    /// Delay between opening the port and the first command
    pub settle: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: DEFAULT_PORT.to_string(),
            baud: DEFAULT_BAUD,
            read_timeout: DEFAULT_READ_TIMEOUT,
            retries: DEFAULT_RETRIES,
            settle: DEFAULT_SETTLE,
        }
    }
}

// ============================================================================
// Device Size
// ============================================================================

/// Supported EEPROM capacities in KiB
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RomSize {
    Rom1K = 1,
    Rom2K = 2,
    Rom4K = 4,
    #[default]
    Rom8K = 8,
    Rom16K = 16,
    Rom32K = 32,
    Rom64K = 64,
}

impl RomSize {
    pub fn from_kib(kib: u32) -> Result<Self, ValidationError> {
        match kib {
            1 => Ok(RomSize::Rom1K),
            2 => Ok(RomSize::Rom2K),
            4 => Ok(RomSize::Rom4K),
            8 => Ok(RomSize::Rom8K),
            16 => Ok(RomSize::Rom16K),
            32 => Ok(RomSize::Rom32K),
            64 => Ok(RomSize::Rom64K),
            _ => Err(ValidationError::InvalidRomSize(kib)),
        }
    }

    pub fn bytes(self) -> u32 {
        self as u32 * 1024
    }
}

// ============================================================================
// Operation
// ============================================================================

/// Half-open address interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
}

impl AddressRange {
    pub fn new(start: u32, end: u32) -> Self {
        AddressRange { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Record addresses covered by the range, one per `RECSIZE` step
    pub fn addresses(&self) -> impl Iterator<Item = u32> {
        (self.start..self.end).step_by(RECSIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Ask the firmware for its version instead of scanning
    VersionProbe,
    RangeScan(AddressRange),
}

// ============================================================================
// Job
// ============================================================================

/// Everything the user asked for, checked before the device is touched
#[derive(Debug, Clone)]
pub struct Job {
    pub operation: Operation,
    pub writing: bool,
    pub verify: bool,
    pub dump: bool,
    /// ROM to write or verify against, or the dump destination
    pub rom_file: Option<PathBuf>,
    pub capacity: RomSize,
}

impl Job {
    pub fn read(operation: Operation) -> Self {
        Job {
            operation,
            writing: false,
            verify: false,
            dump: false,
            rom_file: None,
            capacity: RomSize::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.verify && self.dump {
            return Err(ValidationError::VerifyAndDump);
        }
        if self.verify && self.rom_file.is_none() {
            return Err(ValidationError::MissingVerifyFile);
        }
        if self.dump && self.rom_file.is_none() {
            return Err(ValidationError::MissingDumpFile);
        }
        if self.writing && self.rom_file.is_none() {
            return Err(ValidationError::MissingRomFile);
        }

        match self.operation {
            Operation::VersionProbe if self.writing => Err(ValidationError::MissingRange),
            Operation::VersionProbe => Ok(()),
            Operation::RangeScan(range) => {
                if range.end > ADDRESS_SPACE {
                    return Err(ValidationError::RangeBeyondAddressSpace(range.end));
                }
                if range.len() > self.capacity.bytes() {
                    return Err(ValidationError::RangeExceedsCapacity);
                }
                Ok(())
            }
        }
    }

    /// ROM image to load before the run, if any
    pub fn input_rom(&self) -> Option<&Path> {
        if self.writing || self.verify {
            self.rom_file.as_deref()
        } else {
            None
        }
    }

    pub fn dump_file(&self) -> Option<&Path> {
        if self.dump && !self.writing {
            self.rom_file.as_deref()
        } else {
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
