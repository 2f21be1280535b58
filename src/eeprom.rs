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

use std::io;
use crate::error::{EepromError, Result};
use crate::protocol::{self, Command, DataLine, ResponseLine, ACK};
use crate::record;
use crate::serial::SerialPort;

// ============================================================================
// Acknowledgment States
// ============================================================================

#[derive(Debug)]
enum AckState {
    /// Command written and flushed
    Sent,
    AwaitingAck { retries: usize },
    /// Line other than `OK` received
    Retry { retries: usize, line: Vec<u8> },
    Acked,
    Fatal,
}

// ============================================================================
// EEPROM Programmer Handle
// ============================================================================

/// Exclusive owner of the programmer connection. The port is closed when
/// the handle drops or the acknowledgment wait gives up.
pub struct Eeprom {
    serial: Box<dyn SerialPort>,
    retries: usize,
}

impl Eeprom {
    pub fn new(serial: Box<dyn SerialPort>, retries: usize) -> Self {
        Eeprom { serial, retries }
    }

    /// Read one record. The reply line is followed by an acknowledgment.
    pub fn read(&mut self, address: u16) -> Result<DataLine> {
        self.send(Command::Read(address))?;
        let reply = self.next_line()?;
        self.wait_okay()?;

        match protocol::decode_line(&reply) {
            ResponseLine::Data(line) => {
                if line.address != address {
                    log::warn!("Reply for {} echoed address {}", protocol::hex4(address), protocol::hex4(line.address));
                }
                let sum = protocol::checksum(&record::extract_written_bytes(&line));
                if sum != line.checksum {
                    log::warn!(
                        "Checksum mismatch at {}: got {:02X}, computed {:02X}",
                        protocol::hex4(address),
                        line.checksum,
                        sum
                    );
                }
                Ok(line)
            }
            _ => Err(EepromError::MalformedReply(String::from_utf8_lossy(&reply).into_owned())),
        }
    }

    pub fn write(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.send(Command::Write(address, data))?;
        self.wait_okay()
    }

    /// Firmware version banner, uppercased. Not followed by an acknowledgment.
    pub fn version(&mut self) -> Result<String> {
        self.send(Command::Version)?;
        let reply = match self.serial.read_line() {
            Ok(line) => line,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Err(EepromError::NoReply),
            Err(e) => return Err(e.into()),
        };
        log::debug!("Received: {:?}", String::from_utf8_lossy(&reply));

        let text = match protocol::decode_line(&reply) {
            ResponseLine::Text(text) => text,
            _ => String::from_utf8_lossy(&reply).to_uppercase(),
        };
        Ok(text.trim_end_matches(['\r', '\n']).to_string())
    }

    pub fn close(&mut self) {
        self.serial.close();
    }

    fn send(&mut self, command: Command) -> Result<()> {
        let bytes = command.encode()?;
        self.serial.write_bytes(&bytes)?;
        self.serial.flush()?;
        log::debug!("Sent: {:?}", String::from_utf8_lossy(&bytes));
        Ok(())
    }

    /// Next line from the port; a timeout reads as an empty line
    fn next_line(&mut self) -> Result<Vec<u8>> {
        match self.serial.read_line() {
            Ok(line) => {
                log::debug!("Received: {:?}", String::from_utf8_lossy(&line));
                Ok(line)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                log::debug!("Received: <timeout>");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for `OK`, tolerating up to `retries` other lines. With a retry
    /// bound of `n` at most `n + 1` lines are read.
    fn wait_okay(&mut self) -> Result<()> {
        let mut state = AckState::Sent;

        loop {
            state = match state {
                AckState::Sent => AckState::AwaitingAck { retries: 0 },
                AckState::AwaitingAck { retries } => {
                    let line = self.next_line()?;
                    if line == ACK {
                        AckState::Acked
                    } else {
                        AckState::Retry { retries, line }
                    }
                }
                AckState::Retry { retries, line } => {
                    log::warn!("RESP: {:?}", String::from_utf8_lossy(&line));
                    if retries + 1 > self.retries {
                        AckState::Fatal
                    } else {
                        AckState::AwaitingAck { retries: retries + 1 }
                    }
                }
                AckState::Acked => return Ok(()),
                AckState::Fatal => {
                    self.close();
                    return Err(EepromError::NoAck);
                }
            };
        }
    }
}

impl Drop for Eeprom {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;
    use std::sync::atomic::Ordering;

    fn reply(line: &[u8]) -> Option<Vec<u8>> {
        Some(line.to_vec())
    }

    #[test]
    fn test_version() {
        let mock = MockSerialPort::new(vec![reply(b"eeprom version=test\n")], b"V\n".to_vec());
        let mut eeprom = Eeprom::new(Box::new(mock), 5);
        assert_eq!(eeprom.version().unwrap(), "EEPROM VERSION=TEST");
    }

    #[test]
    fn test_version_timeout() {
        let mock = MockSerialPort::new(vec![None], b"V\n".to_vec());
        let mut eeprom = Eeprom::new(Box::new(mock), 5);
        assert!(matches!(eeprom.version(), Err(EepromError::NoReply)));
    }

    #[test]
    fn test_read() {
        let mock = MockSerialPort::new(
            vec![reply(b"0010:41414141414141414141414141414141,00\r\n"), reply(ACK)],
            b"R0010\n".to_vec(),
        );
        let mut eeprom = Eeprom::new(Box::new(mock), 5);

        let line = eeprom.read(0x10).unwrap();
        assert_eq!(line.address, 0x10);
        assert_eq!(line.payload, "41".repeat(16));
        assert_eq!(line.checksum, 0x00);
    }

    #[test]
    fn test_read_malformed_reply() {
        let mock = MockSerialPort::new(vec![reply(b"FFFF\n"), reply(ACK)], b"R0000\n".to_vec());
        let mut eeprom = Eeprom::new(Box::new(mock), 5);

        match eeprom.read(0) {
            Err(EepromError::MalformedReply(text)) => assert_eq!(text, "FFFF\n"),
            other => panic!("Expected MalformedReply, got {:?}", other),
        }
    }

    #[test]
    fn test_write_without_parity() {
        let mock = MockSerialPort::new(
            vec![reply(ACK)],
            b"W0000:FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF,00\n".to_vec(),
        );
        let mut eeprom = Eeprom::new(Box::new(mock), 5);
        eeprom.write(0, b"").unwrap();
    }

    #[test]
    fn test_write_with_parity() {
        let mock = MockSerialPort::new(
            vec![reply(ACK)],
            b"W0000:41FFFFFFFFFFFFFFFFFFFFFFFFFFFFFF,BE\n".to_vec(),
        );
        let mut eeprom = Eeprom::new(Box::new(mock), 5);
        eeprom.write(0, b"A").unwrap();
    }

    #[test]
    fn test_write_rejects_long_record_before_sending() {
        let mock = MockSerialPort::new(Vec::new(), Vec::new());
        let mut eeprom = Eeprom::new(Box::new(mock), 5);
        assert!(matches!(eeprom.write(0, &[0u8; 17]), Err(EepromError::RecordTooLong(17))));
    }

    #[test]
    fn test_ack_after_noise() {
        let mut responses = vec![reply(b"BUSY\r\n"), None, reply(b"ok\r\n"), None, reply(b"\r\n")];
        responses.push(reply(ACK));

        let mock = MockSerialPort::new(responses, b"W0000:48454C4C4F0AFFFFFFFFFFFFFFFFFFFF,48\n".to_vec());
        let closed = mock.closed_flag();
        let mut eeprom = Eeprom::new(Box::new(mock), 5);

        eeprom.write(0, b"HELLO\n").unwrap();
        assert!(!closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_write_fails_when_no_ok() {
        // One initial read plus five retries, nothing more
        let mock = MockSerialPort::new(vec![None; 6], b"W0000:48454C4C4F0AFFFFFFFFFFFFFFFFFFFF,48\n".to_vec());
        let closed = mock.closed_flag();
        let mut eeprom = Eeprom::new(Box::new(mock), 5);

        match eeprom.write(0, b"HELLO\n") {
            Err(EepromError::NoAck) => {}
            other => panic!("Expected NoAck, got {:?}", other),
        }
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_retry_bound_is_configurable() {
        let responses = vec![reply(b"FFFF\n"), reply(b"FFFF\n"), reply(b"FFFF\n")];
        let mock = MockSerialPort::new(responses, b"R0000\n".to_vec());
        let closed = mock.closed_flag();
        let mut eeprom = Eeprom::new(Box::new(mock), 1);

        // Reply line, then the initial ack read and one retry
        assert!(matches!(eeprom.read(0), Err(EepromError::NoAck)));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_closes_port() {
        let mock = MockSerialPort::new(Vec::new(), Vec::new());
        let closed = mock.closed_flag();
        let eeprom = Eeprom::new(Box::new(mock), 5);
        drop(eeprom);
        assert!(closed.load(Ordering::SeqCst));
    }
}
