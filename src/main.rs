//! Thin CLI front-end over [`wd_rom_tool`].
//!
//! Argument parsing, `/dev` scanning, privilege checks, and top-level
//! progress logging. The core logic lives entirely in the library;
//! this binary just wires [`clap`] and [`tracing`] around
//! [`wd_rom_tool::Driver`].

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nix::unistd::Uid;
use tracing::error;
use tracing_subscriber::EnvFilter;

use wd_rom_tool::Driver;

/// Forensic read/write/inspect/rebuild tool for the external SPI
/// firmware ROM of the targeted Western Digital hard disk drive family.
#[derive(Parser, Debug)]
#[command(name = "wd_rom_tool", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump the ROM image from a drive to a file.
    Dump {
        /// Device node, e.g. /dev/sda
        device: PathBuf,
        /// Output file to write the 256 KiB image to
        out_file: PathBuf,
    },
    /// Upload a ROM image from a file to a drive.
    Load {
        /// Device node, e.g. /dev/sda
        device: PathBuf,
        /// Input file holding the 256 KiB image
        in_file: PathBuf,
    },
    /// Print the header table and checksum verdicts for a ROM image.
    Info {
        /// Path to a 256 KiB ROM image
        rom_file: PathBuf,
    },
    /// Unpack a ROM image into a directory of block files.
    Unpack {
        /// Path to a 256 KiB ROM image
        rom_file: PathBuf,
    },
    /// Pack a directory of block files and a formatted_header back into
    /// a ROM image.
    Pack {
        /// Path to the formatted_header file
        header_file: PathBuf,
        /// Output file to write the packed image to
        out_file: PathBuf,
    },
    /// Patch a single instruction in a ROM image in place.
    Modify {
        /// Path to a ROM image
        rom_file: PathBuf,
        /// Byte offset to patch, in hex (e.g. 100 for 0x100)
        #[arg(value_parser = hex_u64)]
        address: u64,
        /// New instruction value, in hex
        #[arg(value_parser = hex_u32)]
        instruction: u32,
        /// Instruction width in bytes (1-4)
        #[arg(default_value_t = 4)]
        width: u8,
    },
    /// Scan /dev for SCSI disks and identify each one.
    Scan,
    /// Read a single 512-byte LBA from a drive and print it as hex.
    Read {
        /// Device node, e.g. /dev/sda
        device: PathBuf,
        /// LBA number, decimal or 0x-prefixed hex
        #[arg(value_parser = flexible_u32)]
        lba: u32,
    },
    /// Write a single 512-byte LBA on a drive.
    Write {
        /// Device node, e.g. /dev/sda
        device: PathBuf,
        /// LBA number, decimal or 0x-prefixed hex
        #[arg(value_parser = flexible_u32)]
        lba: u32,
        /// Data to write; must be at most 512 bytes, zero-padded
        data: String,
    },
}

fn hex_u64(s: &str) -> Result<u64, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn hex_u32(s: &str) -> Result<u32, String> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn flexible_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x") {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

/// Device-touching commands require administrative privilege; the rest
/// do not, matching the original tool's per-flag `getuid() == 0` checks.
fn requires_root(command: &Command) -> bool {
    matches!(
        command,
        Command::Dump { .. }
            | Command::Load { .. }
            | Command::Scan
            | Command::Read { .. }
            | Command::Write { .. }
    )
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if requires_root(&cli.command) && !Uid::effective().is_root() {
        error!("this operation requires administrative privilege");
        return ExitCode::FAILURE;
    }

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), String> {
    let driver = Driver;

    match command {
        Command::Dump { device, out_file } => {
            driver.dump(&device, &out_file).map_err(|e| e.to_string())?;
            println!("Finished dumping rom from {}", device.display());
        }
        Command::Load { device, in_file } => {
            driver.upload(&device, &in_file).map_err(|e| e.to_string())?;
            println!("Finished uploading rom to {}", device.display());
        }
        Command::Info { rom_file } => {
            driver.display_info(&rom_file).map_err(|e| e.to_string())?;
        }
        Command::Unpack { rom_file } => {
            driver.unpack(&rom_file).map_err(|e| e.to_string())?;
            println!("Finished extracting {}", rom_file.display());
        }
        Command::Pack {
            header_file,
            out_file,
        } => {
            driver
                .pack(&header_file, &out_file)
                .map_err(|e| e.to_string())?;
            println!(
                "Successfully packed rom image {} using the {} header file",
                out_file.display(),
                header_file.display()
            );
        }
        Command::Modify {
            rom_file,
            address,
            instruction,
            width,
        } => {
            driver
                .modify(&rom_file, address, instruction, width)
                .map_err(|e| e.to_string())?;
            println!("Successfully modified an instruction in {}", rom_file.display());
        }
        Command::Scan => {
            driver.scan().map_err(|e| e.to_string())?;
        }
        Command::Read { device, lba } => {
            let data = driver.read_lba(&device, lba).map_err(|e| e.to_string())?;
            println!("Read the following from LBA block {lba}:");
            print_hex_grid(&data);
        }
        Command::Write { device, lba, data } => {
            if data.len() > 512 {
                return Err("LBA input must be equal to or shorter than 512 bytes".into());
            }
            let mut buf = [0u8; 512];
            buf[..data.len()].copy_from_slice(data.as_bytes());
            println!("Writing the following to LBA block {lba}:");
            print_hex_grid(&buf);
            driver
                .write_lba(&device, lba, buf)
                .map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

fn print_hex_grid(data: &[u8]) {
    for (i, byte) in data.iter().enumerate() {
        if i > 0 && i % 16 == 0 {
            println!();
        }
        print!("{byte:#04x} ");
    }
    println!();
}
