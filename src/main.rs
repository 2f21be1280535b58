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

// EEPROM programmer client for the Arduino line-protocol firmware
mod config;
mod eeprom;
mod error;
mod programmer;
mod protocol;
mod record;
mod serial;

use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use config::{AddressRange, Job, Operation, RomSize, Settings, DEFAULT_PORT};
use eeprom::Eeprom;
use error::{EepromError, Result};
use programmer::{Programmer, Summary};
use serial::{DryRunPort, RealSerialPort, SerialPort};

#[derive(Parser)]
#[command(name = "eepromer")]
#[command(about = "Read, write, verify and dump parallel EEPROMs over a serial programmer", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port the programmer is attached to
    #[arg(short, long, default_value = DEFAULT_PORT)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// EEPROM size in KiB (1, 2, 4, 8, 16, 32 or 64)
    #[arg(short = 'S', long, default_value = "8", value_name = "KIB")]
    size: u32,

    /// Start address (decimal or 0x-prefixed hex)
    #[arg(short, long, default_value = "0", value_parser = parse_address)]
    start: u32,

    /// End address, exclusive
    #[arg(short, long, default_value = "0", value_parser = parse_address)]
    end: u32,

    /// Lines other than OK tolerated before giving up on a command
    #[arg(long, default_value = "5")]
    retries: usize,

    /// Delay after opening the port while the programmer resets
    #[arg(long, default_value = "1000", value_name = "MS")]
    settle_ms: u64,

    /// Timeout of a single serial read
    #[arg(long, default_value = "100", value_name = "MS")]
    timeout_ms: u64,

    /// Log commands to FILE against a simulated blank EEPROM instead of a serial port
    #[arg(long, value_name = "FILE")]
    dry_run: Option<PathBuf>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read EEPROM contents and print them as hex
    Read,
    /// Write a ROM file to the EEPROM
    Write {
        /// ROM file to write
        rom: PathBuf,
        /// Read every record back and compare it with the ROM file
        #[arg(short, long)]
        verify: bool,
    },
    /// Compare EEPROM contents with a ROM file
    Verify {
        /// ROM file to verify against
        rom: PathBuf,
    },
    /// Dump EEPROM contents to a file
    Dump {
        /// Output file
        output: PathBuf,
    },
    /// Print the programmer firmware version
    Version,
}

fn parse_address(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|e| format!("Invalid address: {}. {}", s, e))
}

fn build_job(cli: &Cli) -> std::result::Result<Job, EepromError> {
    let range = Operation::RangeScan(AddressRange::new(cli.start, cli.end));
    let mut job = Job::read(range);
    job.capacity = RomSize::from_kib(cli.size)?;

    match &cli.command {
        Commands::Read => {}
        Commands::Write { rom, verify } => {
            job.writing = true;
            job.verify = *verify;
            job.rom_file = Some(rom.clone());
        }
        Commands::Verify { rom } => {
            job.verify = true;
            job.rom_file = Some(rom.clone());
        }
        Commands::Dump { output } => {
            job.dump = true;
            job.rom_file = Some(output.clone());
        }
        Commands::Version => job.operation = Operation::VersionProbe,
    }

    Ok(job)
}

fn exit_code(err: &EepromError) -> i32 {
    match err {
        EepromError::Connection { .. } => 2,
        _ => 1,
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let job = match build_job(&cli) {
        Ok(job) => job,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let settings = Settings {
        port: cli.port.clone(),
        baud: cli.baud,
        read_timeout: Duration::from_millis(cli.timeout_ms),
        retries: cli.retries,
        settle: Duration::from_millis(cli.settle_ms),
    };

    let stdout = std::io::stdout();
    match run(&job, &settings, cli.dry_run.as_deref(), stdout.lock()) {
        Ok(summary) => {
            log::info!(
                "{} records processed, {} mismatched, {} bytes dumped",
                summary.records,
                summary.mismatches,
                summary.bytes_written
            );
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

/// Validate, load the ROM, then open the device and run the pass
fn run<W: Write>(job: &Job, settings: &Settings, dry_run: Option<&Path>, out: W) -> Result<Summary> {
    job.validate()?;

    let mut programmer = Programmer::new(out, job.operation);
    programmer.set_verify(job.verify);
    if let Some(path) = job.input_rom() {
        programmer.set_input_rom(record::load_rom(path)?)?;
    }

    let mut eeprom = open_eeprom(settings, dry_run)?;

    if let Some(path) = job.dump_file() {
        programmer.set_dump_file(path)?;
    }

    if job.writing {
        programmer.write_eeprom(&mut eeprom)
    } else {
        programmer.read_eeprom(&mut eeprom)
    }
}

fn open_eeprom(settings: &Settings, dry_run: Option<&Path>) -> Result<Eeprom> {
    let port: Box<dyn SerialPort> = match dry_run {
        Some(path) => {
            log::info!("Dry run, logging commands to {}", path.display());
            Box::new(DryRunPort::create(path)?)
        }
        None => {
            log::info!("Opening serial port: {}", settings.port);
            log::info!("Settings: {} baud, read timeout {:?}", settings.baud, settings.read_timeout);
            let port = RealSerialPort::open(settings).map_err(|source| EepromError::Connection {
                path: settings.port.clone(),
                source,
            })?;
            std::thread::sleep(settings.settle);
            Box::new(port)
        }
    };

    Ok(Eeprom::new(port, settings.retries))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["eepromer"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("31"), Ok(31));
        assert_eq!(parse_address("0x1F"), Ok(31));
        assert_eq!(parse_address("0XFFFF"), Ok(0xFFFF));
        assert!(parse_address("-1").is_err());
        assert!(parse_address("0xZZ").is_err());
    }

    #[test]
    fn test_unknown_option_rejected() {
        assert!(Cli::try_parse_from(["eepromer", "-?", "read"]).is_err());
    }

    #[test]
    fn test_invalid_rom_size() {
        match build_job(&cli(&["-S", "33", "read"])) {
            Err(EepromError::Validation(ValidationError::InvalidRomSize(33))) => {}
            other => panic!("Expected InvalidRomSize, got {:?}", other.map(|j| j.operation)),
        }
    }

    #[test]
    fn test_version_command() {
        let job = build_job(&cli(&["version"])).unwrap();
        assert_eq!(job.operation, Operation::VersionProbe);
        assert!(!job.writing);
    }

    #[test]
    fn test_range_bigger_than_eeprom() {
        let job = build_job(&cli(&["-S", "1", "-s", "0", "-e", "2048", "read"])).unwrap();
        let settings = Settings::default();
        let mut out = Vec::new();

        match run(&job, &settings, None, &mut out) {
            Err(EepromError::Validation(ValidationError::RangeExceedsCapacity)) => {}
            other => panic!("Expected RangeExceedsCapacity, got {:?}", other),
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_no_serial_device_attached() {
        let job = build_job(&cli(&["version"])).unwrap();
        let settings = Settings {
            port: "/dev/eepromer-no-such-port".to_string(),
            settle: Duration::ZERO,
            ..Settings::default()
        };
        let mut out = Vec::new();

        let err = run(&job, &settings, None, &mut out).unwrap_err();
        assert!(matches!(err, EepromError::Connection { .. }));
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_rom_too_small_before_any_io() {
        let rom_file = std::env::temp_dir().join("main_small.rom");
        std::fs::write(&rom_file, [0x41u8; 16]).unwrap();
        let serial_log = std::env::temp_dir().join("main_small.serial");
        std::fs::remove_file(&serial_log).ok();

        let job = build_job(&cli(&["-s", "0", "-e", "32", "verify", rom_file.to_str().unwrap()])).unwrap();
        let mut out = Vec::new();

        let err = run(&job, &Settings::default(), Some(&serial_log), &mut out).unwrap_err();
        assert!(matches!(err, EepromError::Validation(ValidationError::RomTooSmall { .. })));
        assert_eq!(exit_code(&err), 1);
        assert!(!serial_log.exists());

        std::fs::remove_file(&rom_file).ok();
    }

    #[test]
    fn test_dry_run_write() {
        let rom_file = std::env::temp_dir().join("main_dry_run_write.rom");
        std::fs::write(&rom_file, [0x42u8; 32]).unwrap();
        let serial_log = std::env::temp_dir().join("main_dry_run_write.serial");

        let job = build_job(&cli(&["-s", "0", "-e", "16", "write", rom_file.to_str().unwrap()])).unwrap();
        let mut out = Vec::new();

        let summary = run(&job, &Settings::default(), Some(&serial_log), &mut out).unwrap();

        assert_eq!(summary.records, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("ROM file is 32 bytes long.\nWriting ROM {} to EEPROM.\n", rom_file.display())
        );
        assert_eq!(
            std::fs::read(&serial_log).unwrap(),
            b"W0000:42424242424242424242424242424242,00\n"
        );

        std::fs::remove_file(&rom_file).ok();
        std::fs::remove_file(&serial_log).ok();
    }

    #[test]
    fn test_dry_run_dump() {
        let dump_file = std::env::temp_dir().join("main_dry_run_dump.bin");
        let serial_log = std::env::temp_dir().join("main_dry_run_dump.serial");

        let job = build_job(&cli(&["-s", "0", "-e", "15", "dump", dump_file.to_str().unwrap()])).unwrap();
        let mut out = Vec::new();

        let summary = run(&job, &Settings::default(), Some(&serial_log), &mut out).unwrap();

        assert_eq!(summary.bytes_written, 16);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!(
                "Writing contents to  {}\nReading EEPROM from 0 to 15\nDumping to file.\nbytes written:16\n",
                dump_file.display()
            )
        );
        assert_eq!(std::fs::read(&serial_log).unwrap(), b"R0000\n");
        assert_eq!(std::fs::read(&dump_file).unwrap(), vec![0xFF; 16]);

        std::fs::remove_file(&dump_file).ok();
        std::fs::remove_file(&serial_log).ok();
    }

    #[test]
    fn test_dry_run_version() {
        let serial_log = std::env::temp_dir().join("main_dry_run_version.serial");
        let job = build_job(&cli(&["version"])).unwrap();
        let mut out = Vec::new();

        run(&job, &Settings::default(), Some(&serial_log), &mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n", serial::DRY_RUN_VERSION));
        std::fs::remove_file(&serial_log).ok();
    }
}
