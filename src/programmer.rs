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

//! Address range scans: read, display, verify, dump and write

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use crate::config::Operation;
use crate::eeprom::Eeprom;
use crate::error::{EepromError, Result, ValidationError};
use crate::protocol::{DataLine, RECSIZE};
use crate::record::{self, RomImage};

/// Counters of one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub records: usize,
    /// Records whose read-back differed from the ROM file
    pub mismatches: usize,
    /// Bytes appended to the dump file
    pub bytes_written: usize,
}

/// Report lines go to `out`; the device is handed to each pass
pub struct Programmer<W: Write> {
    out: W,
    operation: Operation,
    verify: bool,
    rom: Option<RomImage>,
    dump: Option<BufWriter<File>>,
}

impl<W: Write> Programmer<W> {
    pub fn new(out: W, operation: Operation) -> Self {
        Programmer { out, operation, verify: false, rom: None, dump: None }
    }

    pub fn set_verify(&mut self, verify: bool) {
        self.verify = verify;
    }

    /// Attach the ROM to write or verify against. Fails when the file can't
    /// cover the address range.
    pub fn set_input_rom(&mut self, rom: RomImage) -> Result<()> {
        writeln!(self.out, "ROM file is {} bytes long.", rom.total_bytes)?;

        if let Operation::RangeScan(range) = self.operation {
            if rom.total_bytes < range.len() as usize {
                return Err(ValidationError::RomTooSmall {
                    path: rom.path.clone(),
                    size: rom.total_bytes,
                    range: range.len(),
                }
                .into());
            }
        }

        self.rom = Some(rom);
        Ok(())
    }

    pub fn set_dump_file(&mut self, path: &Path) -> Result<()> {
        writeln!(self.out, "Writing contents to  {}", path.display())?;
        self.dump = Some(BufWriter::new(File::create(path)?));
        Ok(())
    }

    pub fn read_eeprom(&mut self, eeprom: &mut Eeprom) -> Result<Summary> {
        let range = match self.operation {
            Operation::VersionProbe => {
                let version = eeprom.version()?;
                writeln!(self.out, "{}", version)?;
                return Ok(Summary::default());
            }
            Operation::RangeScan(range) => range,
        };

        writeln!(self.out, "Reading EEPROM from {} to {}", range.start, range.end)?;
        if self.verify {
            writeln!(self.out, "Verifying...")?;
        }
        if self.dump.is_some() {
            writeln!(self.out, "Dumping to file.")?;
        }

        let mut summary = Summary::default();
        for address in range.addresses() {
            let address = to_address(address)?;
            let line = eeprom.read(address)?;
            summary.records += 1;

            if self.verify {
                let index = (address as u32 - range.start) as usize / RECSIZE;
                let expected = self.rom.as_ref().and_then(|rom| rom.records.get(index));
                if report_diff(&mut self.out, address, &line, expected.map_or(&[][..], Vec::as_slice))? {
                    summary.mismatches += 1;
                }
            } else if let Some(dump) = self.dump.as_mut() {
                let bytes = record::extract_written_bytes(&line);
                dump.write_all(&bytes)?;
                summary.bytes_written += bytes.len();
            } else {
                writeln!(self.out, "{}", record::format_record(address, &line))?;
            }
        }

        if let Some(mut dump) = self.dump.take() {
            dump.flush()?;
            writeln!(self.out, "bytes written:{}", summary.bytes_written)?;
        }

        Ok(summary)
    }

    /// Write the ROM from the start of the range, one record per step,
    /// stopping at the end of the range even if records remain.
    pub fn write_eeprom(&mut self, eeprom: &mut Eeprom) -> Result<Summary> {
        let Operation::RangeScan(range) = self.operation else {
            return Err(ValidationError::MissingRange.into());
        };
        let rom = self.rom.as_ref().ok_or(ValidationError::MissingRomFile)?;

        writeln!(self.out, "Writing ROM {} to EEPROM.", rom.path.display())?;

        let mut summary = Summary::default();
        let mut address = range.start;
        for data in &rom.records {
            if address >= range.end {
                break;
            }
            let addr = to_address(address)?;
            eeprom.write(addr, data)?;
            summary.records += 1;

            if self.verify {
                let line = eeprom.read(addr)?;
                if report_diff(&mut self.out, addr, &line, data)? {
                    summary.mismatches += 1;
                }
            }
            address += RECSIZE as u32;
        }

        Ok(summary)
    }
}

fn to_address(address: u32) -> Result<u16> {
    u16::try_from(address).map_err(|_| EepromError::AddressOutOfRange(address))
}

/// Print the DIFF block, if any. Returns whether the records differed.
fn report_diff<W: Write>(out: &mut W, address: u16, device: &DataLine, file: &[u8]) -> Result<bool> {
    match record::check_diff(address, device, file) {
        Some(diff) => {
            log::debug!("Record {} differs from the ROM file", address);
            writeln!(out, "{}", diff)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

// ============================================================================
// Tests
// ============================================================================
