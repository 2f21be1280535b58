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

//! ROM images and record formatting

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use crate::protocol::{hex4, DataLine, RECSIZE};

/// ROM file split into `RECSIZE` records; only the last may be short
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomImage {
    pub path: PathBuf,
    pub total_bytes: usize,
    pub records: Vec<Vec<u8>>,
}

pub fn load_rom(path: &Path) -> io::Result<RomImage> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    let mut total_bytes = 0;

    loop {
        let mut record = Vec::with_capacity(RECSIZE);
        let bytes_read = (&mut reader).take(RECSIZE as u64).read_to_end(&mut record)?;
        if bytes_read == 0 {
            break;
        }
        total_bytes += bytes_read;
        records.push(record);
    }

    log::debug!("Loaded {} records ({} bytes) from {}", records.len(), total_bytes, path.display());

    Ok(RomImage { path: path.to_path_buf(), total_bytes, records })
}

// ============================================================================
// Byte Access
// ============================================================================

/// Indexed byte access over either side of a verify comparison
pub trait RecordBytes {
    fn byte_at(&self, index: usize) -> Option<u8>;
}

impl RecordBytes for DataLine {
    fn byte_at(&self, index: usize) -> Option<u8> {
        let pair = self.payload.get(index * 2..index * 2 + 2)?;
        u8::from_str_radix(pair, 16).ok()
    }
}

impl RecordBytes for [u8] {
    fn byte_at(&self, index: usize) -> Option<u8> {
        self.get(index).copied()
    }
}

/// Bytes carried by a read reply
pub fn extract_written_bytes(line: &DataLine) -> Vec<u8> {
    (0..RECSIZE).map_while(|i| line.byte_at(i)).collect()
}

/// `AAAA: XX XX ...`, one pair per byte present in the record
pub fn format_record<R: RecordBytes + ?Sized>(address: u16, record: &R) -> String {
    let mut output = format!("{}:", hex4(address));
    for byte in (0..RECSIZE).map_while(|i| record.byte_at(i)) {
        output.push_str(&format!(" {:02X}", byte));
    }
    output
}

/// Two-line DIFF block when the device record and the file record render
/// differently, `None` when they match
pub fn check_diff(address: u16, device: &DataLine, file: &[u8]) -> Option<String> {
    let actual = format_record(address, device);
    let expected = format_record(address, file);
    if actual == expected {
        return None;
    }
    Some(format!("DIFF:\n\tROM :{}\n\tFILE:{}\n", actual, expected))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{decode_line, ResponseLine};

    fn data_line(text: &[u8]) -> DataLine {
        match decode_line(text) {
            ResponseLine::Data(line) => line,
            other => panic!("Expected data line, got {:?}", other),
        }
    }

    #[test]
    fn test_load_rom_chunks() {
        let rom_file = std::env::temp_dir().join("record_load_rom.bin");
        let content: Vec<u8> = (0..40u8).collect();
        std::fs::write(&rom_file, &content).unwrap();

        let rom = load_rom(&rom_file).unwrap();
        assert_eq!(rom.total_bytes, 40);
        assert_eq!(rom.records.len(), 3);
        assert_eq!(rom.records[0], (0..16u8).collect::<Vec<_>>());
        assert_eq!(rom.records[1], (16..32u8).collect::<Vec<_>>());
        assert_eq!(rom.records[2], (32..40u8).collect::<Vec<_>>());

        std::fs::remove_file(&rom_file).ok();
    }

    #[test]
    fn test_load_empty_rom() {
        let rom_file = std::env::temp_dir().join("record_empty_rom.bin");
        std::fs::write(&rom_file, b"").unwrap();

        let rom = load_rom(&rom_file).unwrap();
        assert_eq!(rom.total_bytes, 0);
        assert!(rom.records.is_empty());

        std::fs::remove_file(&rom_file).ok();
    }

    #[test]
    fn test_load_missing_rom() {
        let missing = std::env::temp_dir().join("record_missing_rom.bin");
        std::fs::remove_file(&missing).ok();
        assert_eq!(load_rom(&missing).unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_extract_written_bytes() {
        let line = data_line(b"0000:000102030405060708090A0B0C0D0EFF,00\r\n");
        let mut expected: Vec<u8> = (0..15u8).collect();
        expected.push(0xFF);
        assert_eq!(extract_written_bytes(&line), expected);
    }

    #[test]
    fn test_format_record_both_sides() {
        let line = data_line(b"0010:41414141414141414141414141414141,00\r\n");
        let expected = "0010: 41 41 41 41 41 41 41 41 41 41 41 41 41 41 41 41";
        assert_eq!(format_record(0x10, &line), expected);
        assert_eq!(format_record(0x10, &[0x41u8; 16][..]), expected);

        // Short tail records only render what they hold
        assert_eq!(format_record(0x20, &[0xABu8, 0x01][..]), "0020: AB 01");
    }

    #[test]
    fn test_check_diff() {
        let line = data_line(b"0000:41414141414141414141414141414141,00\r\n");
        assert_eq!(check_diff(0, &line, &[0x41; 16]), None);

        let diff = check_diff(0, &line, &[0x42; 16]).unwrap();
        assert_eq!(
            diff,
            "DIFF:\n\
             \tROM :0000: 41 41 41 41 41 41 41 41 41 41 41 41 41 41 41 41\n\
             \tFILE:0000: 42 42 42 42 42 42 42 42 42 42 42 42 42 42 42 42\n"
        );

        // A short file record never matches a full device record
        assert!(check_diff(0, &line, &[0x41; 8]).is_some());
    }
}
