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

//! Programmer firmware line protocol: constants, command encoding and reply
//! decoding. Nothing in here touches the serial port.

use crate::error::{EepromError, Result};

/// Record size in bytes - unit of address stepping and file chunking
pub const RECSIZE: usize = 16;

/// Hex characters of a record payload on the wire
pub const PAYLOAD_HEX_LEN: usize = RECSIZE * 2;

/// Acknowledgment line sent after every reply or write
pub const ACK: &[u8] = b"OK\r\n";

/// Read command prefix
pub const READ: u8 = b'R';

/// Write command prefix
pub const WRITE: u8 = b'W';

/// Version command prefix
pub const VERSION: u8 = b'V';

/// Fill byte for the unused tail of a short write record
pub const FILL: u8 = 0xFF;

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Read(u16),
    Write(u16, &'a [u8]),
    Version,
}

impl Command<'_> {
    pub fn encode(&self) -> Result<Vec<u8>> {
        match *self {
            Command::Read(address) => Ok(encode_read(address)),
            Command::Write(address, data) => encode_write(address, data),
            Command::Version => Ok(encode_version()),
        }
    }
}

/// Render an address as exactly four uppercase hex digits
pub fn hex4(address: u16) -> String {
    format!("{:04X}", address)
}

/// XOR-fold of the supplied bytes, folded once more with 0xFF when the
/// byte count is odd. Padding bytes never take part.
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc ^ b);
    if data.len() % 2 == 1 { sum ^ 0xFF } else { sum }
}

pub fn encode_read(address: u16) -> Vec<u8> {
    format!("{}{}\n", READ as char, hex4(address)).into_bytes()
}

pub fn encode_write(address: u16, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() > RECSIZE {
        return Err(EepromError::RecordTooLong(data.len()));
    }

    let mut payload = String::with_capacity(PAYLOAD_HEX_LEN);
    for byte in data.iter().chain(std::iter::repeat_n(&FILL, RECSIZE - data.len())) {
        payload.push_str(&format!("{:02X}", byte));
    }

    Ok(format!(
        "{}{}:{},{:02X}\n",
        WRITE as char,
        hex4(address),
        payload,
        checksum(data)
    )
    .into_bytes())
}

pub fn encode_version() -> Vec<u8> {
    vec![VERSION, b'\n']
}

// ============================================================================
// Replies
// ============================================================================

/// Fields of a `AAAA:<32 hex>,CC` record line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLine {
    pub address: u16,
    /// Payload as 32 uppercase hex characters
    pub payload: String,
    pub checksum: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    Ack,
    Data(DataLine),
    /// Version banner, or anything the firmware said that isn't a record
    Text(String),
}

/// Classify one received line. Replies are uppercased before parsing, the
/// acknowledgment must match byte for byte.
pub fn decode_line(line: &[u8]) -> ResponseLine {
    if line == ACK {
        return ResponseLine::Ack;
    }

    let text = String::from_utf8_lossy(line).to_uppercase();
    match parse_data_line(&text) {
        Some(data) => ResponseLine::Data(data),
        None => ResponseLine::Text(text),
    }
}

fn parse_data_line(text: &str) -> Option<DataLine> {
    let body = text.strip_suffix('\n')?;
    let body = body.strip_suffix('\r').unwrap_or(body);

    let (address, rest) = body.split_once(':')?;
    let (payload, sum) = rest.split_once(',')?;

    if address.len() != 4 || payload.len() != PAYLOAD_HEX_LEN || sum.len() != 2 {
        return None;
    }
    let is_hex = |s: &str| s.bytes().all(|b| b.is_ascii_hexdigit());
    if !is_hex(address) || !is_hex(payload) || !is_hex(sum) {
        return None;
    }

    Some(DataLine {
        address: u16::from_str_radix(address, 16).ok()?,
        payload: payload.to_string(),
        checksum: u8::from_str_radix(sum, 16).ok()?,
    })
}

// ============================================================================
// Tests
// ============================================================================
