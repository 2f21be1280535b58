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

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};
use crate::config::Settings;
use crate::protocol::{self, ACK, FILL, RECSIZE};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Line-oriented transport to the programmer firmware
pub trait SerialPort: Send {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Read up to and including the next `\n`. A read that times out with
    /// nothing buffered returns `ErrorKind::TimedOut`; a partial line is
    /// returned as is.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;

    fn close(&mut self);
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "serial port is closed")
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Option<Box<dyn SerialPortTrait>>,
    pending: Vec<u8>,
}

impl RealSerialPort {
    pub fn open(settings: &Settings) -> Result<Self, serialport::Error> {
        let mut port = serialport::new(&settings.port, settings.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(settings.read_timeout)
            .open()?;

        // The Arduino resets on DTR; the settle delay covers the reboot
        if let Err(e) = port.write_data_terminal_ready(true) {
            log::warn!("Failed to assert DTR on {}: {}", settings.port, e);
        }

        Ok(RealSerialPort { port: Some(port), pending: Vec::new() })
    }
}

impl SerialPort for RealSerialPort {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(closed_error)?;
        port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(closed_error)?;
        port.flush()
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or_else(closed_error)?;

        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                return Ok(self.pending.drain(..=pos).collect());
            }

            let mut buf = [0u8; 64];
            match port.read(&mut buf) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port returned no data"));
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut && !self.pending.is_empty() => {
                    return Ok(std::mem::take(&mut self.pending));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("Serial port closed");
        }
        self.pending.clear();
    }
}

// ============================================================================
// Dry Run Port
// ============================================================================

/// Records every command in a file and answers like a blank EEPROM
pub struct DryRunPort {
    log: Option<File>,
    replies: VecDeque<Vec<u8>>,
}

/// Version banner reported by the dry run device
pub const DRY_RUN_VERSION: &str = "EEPROM DRY RUN";

impl DryRunPort {
    pub fn create(path: &Path) -> io::Result<Self> {
        Ok(DryRunPort { log: Some(File::create(path)?), replies: VecDeque::new() })
    }
}

impl SerialPort for DryRunPort {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.log.as_mut().ok_or_else(closed_error)?.write_all(buf)?;

        match buf.first() {
            Some(&protocol::READ) => {
                let address = String::from_utf8_lossy(buf.get(1..5).unwrap_or_default()).into_owned();
                let payload = format!("{:02X}", FILL).repeat(RECSIZE);
                self.replies.push_back(format!("{}:{},00\r\n", address, payload).into_bytes());
                self.replies.push_back(ACK.to_vec());
            }
            Some(&protocol::WRITE) => self.replies.push_back(ACK.to_vec()),
            Some(&protocol::VERSION) => {
                self.replies.push_back(format!("{}\r\n", DRY_RUN_VERSION).into_bytes());
            }
            _ => {}
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.log.as_mut().ok_or_else(closed_error)?.flush()
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        self.replies
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "dry run: no reply pending"))
    }

    fn close(&mut self) {
        if let Some(mut file) = self.log.take() {
            if let Err(e) = file.flush() {
                log::warn!("Failed to flush dry run log: {}", e);
            }
        }
        self.replies.clear();
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(test)]
pub struct MockSerialPort {
    // Lines to return on reads (None = timeout)
    read_buffer: Vec<Option<Vec<u8>>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    closed: Arc<AtomicBool>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that flips once `close` has been called
    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error());
        }

        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        let response = self.read_buffer[self.read_pos].clone();
        self.read_pos += 1;
        response.ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} lines)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            String::from_utf8_lossy(&self.write_log),
            String::from_utf8_lossy(&self.expected_writes),
            "MockSerialPort write log mismatch!"
        );
    }
}
