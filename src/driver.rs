//! Driver facade: the user-level operations the CLI invokes.
//!
//! A thin composition layer over [`crate::platform::linux`] and
//! [`crate::rom`]; it owns no state beyond the transient buffers each
//! operation needs.

use std::fs;
use std::path::Path;

use tracing::{info, instrument};

use crate::error::ToolError;
use crate::platform::linux::{DriveHandle, DriveSession};
use crate::rom::codec;
use crate::rom::layout::IMAGE_SIZE;

/// Composition layer over [`DriveSession`] and [`codec`]. Stateless
/// beyond the device path it is constructed with; every call opens its
/// own [`DriveHandle`] so that `Driver` itself carries no lifetime.
pub struct Driver;

impl Driver {
    /// Dumps the 256 KiB ROM image from `device` and writes it to
    /// `out_file`.
    #[instrument(skip(self))]
    pub fn dump(&self, device: &Path, out_file: &Path) -> Result<(), ToolError> {
        let handle = DriveHandle::open(device)?;
        let session = DriveSession::new(&handle);
        let image = session.dump_rom()?;
        fs::write(out_file, image).map_err(|e| ToolError::Rom(e.into()))?;
        info!(out_file = %out_file.display(), "dumped rom image");
        Ok(())
    }

    /// Reads the ROM image from `in_file` and uploads it to `device`.
    #[instrument(skip(self))]
    pub fn upload(&self, device: &Path, in_file: &Path) -> Result<(), ToolError> {
        let bytes = fs::read(in_file).map_err(|e| ToolError::Rom(e.into()))?;
        let mut image: [u8; IMAGE_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            ToolError::Rom(crate::error::RomError::MalformedHeaderFile(format!(
                "{} is not exactly {IMAGE_SIZE} bytes",
                in_file.display()
            )))
        })?;

        let handle = DriveHandle::open(device)?;
        let session = DriveSession::new(&handle);
        session.upload_rom(&mut image)?;
        info!(in_file = %in_file.display(), "uploaded rom image");
        Ok(())
    }

    /// Prints each header's fields and checksum verdicts for `image`.
    #[instrument(skip(self))]
    pub fn display_info(&self, image: &Path) -> Result<(), ToolError> {
        let bytes = fs::read(image).map_err(|e| ToolError::Rom(e.into()))?;
        let buf: [u8; IMAGE_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            ToolError::Rom(crate::error::RomError::MalformedHeaderFile(format!(
                "{} is not exactly {IMAGE_SIZE} bytes",
                image.display()
            )))
        })?;

        for report in codec::display_rom_info(&buf) {
            let header = report.header;
            println!(
                "block {:#04x}: flag={:#04x} start={:#08x} size={:#08x} load={:#08x} exec={:#08x}",
                header.block_nr,
                header.flag,
                header.start_address,
                header.size,
                header.load_address,
                header.execution_address,
            );
            if report.line_checksum_ok {
                println!("  Header line checksum OK: {:#04x}", header.checksum);
            } else {
                println!(
                    "  Header line checksum MISMATCH: stored {:#04x}, computed {:#04x}",
                    header.checksum,
                    header.computed_line_checksum()
                );
            }
            match report.body_checksum {
                Some(verdict) if verdict.matches => {
                    println!("  Rom block contents checksum OK: {:#06x}", verdict.stored)
                }
                Some(verdict) => println!(
                    "  Rom block contents checksum MISMATCH: stored {:#06x}, computed {:#06x}",
                    verdict.stored, verdict.computed
                ),
                None => println!("  Rom block contents checksum: unavailable"),
            }
        }
        Ok(())
    }

    /// Explodes `image` into a directory of per-block files plus
    /// `formatted_header`.
    #[instrument(skip(self))]
    pub fn unpack(&self, image: &Path) -> Result<(), ToolError> {
        codec::unpack(image)?;
        Ok(())
    }

    /// Rebuilds a ROM image from `header_file` and its sibling `block_XX`
    /// files, writing the result to `out_file`.
    #[instrument(skip(self))]
    pub fn pack(&self, header_file: &Path, out_file: &Path) -> Result<(), ToolError> {
        codec::pack(header_file, out_file)?;
        Ok(())
    }

    /// Patches `width` bytes of `instruction` (little-endian) into
    /// `image` at `address`.
    #[instrument(skip(self))]
    pub fn modify(&self, image: &Path, address: u64, instruction: u32, width: u8) -> Result<(), ToolError> {
        codec::modify_instruction(image, address, instruction, width)?;
        Ok(())
    }

    /// Enumerates `/dev/sX` block-device nodes (two-letter suffix only,
    /// excluding partitions) and runs IDENTIFY against each, the way
    /// the original tool's `scan_hard_disk_drives` does.
    #[instrument(skip(self))]
    pub fn scan(&self) -> Result<(), ToolError> {
        let entries = fs::read_dir("/dev").map_err(|e| ToolError::Rom(e.into()))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.len() != 3 || !name.starts_with("sd") {
                continue;
            }
            let path = entry.path();
            println!("{}:", path.display());
            match DriveHandle::open(&path).and_then(|h| DriveSession::new(&h).identify()) {
                Ok(identity) => println!(
                    "  model={} firmware={} serial={}",
                    identity.model_number(),
                    identity.firmware_revision(),
                    identity.serial_number()
                ),
                Err(e) => println!("  could not identify: {e}"),
            }
        }
        Ok(())
    }

    /// Reads one 512-byte LBA from `device` and prints it as hex.
    #[instrument(skip(self))]
    pub fn read_lba(&self, device: &Path, lba: u32) -> Result<[u8; 512], ToolError> {
        let handle = DriveHandle::open(device)?;
        let session = DriveSession::new(&handle);
        Ok(session.read_lba(lba)?)
    }

    /// Writes `data` to one 512-byte LBA on `device`.
    #[instrument(skip(self, data))]
    pub fn write_lba(&self, device: &Path, lba: u32, data: [u8; 512]) -> Result<(), ToolError> {
        let handle = DriveHandle::open(device)?;
        let session = DriveSession::new(&handle);
        session.write_lba(lba, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::layout::{RomBlockHeader, FLAG_UNENCRYPTED, HEADER_RECORD_SIZE};

    fn fixture_image() -> Vec<u8> {
        let mut image = vec![0u8; IMAGE_SIZE];
        let mut header = RomBlockHeader {
            block_nr: 0,
            flag: FLAG_UNENCRYPTED,
            reserved0: 0,
            reserved1: 0,
            length_plus_cs: 17,
            size: 16,
            start_address: 0x40,
            load_address: 0x1000,
            execution_address: 0x1000,
            reserved2: 0,
            fstw: 0,
            checksum: 0,
        };
        header.checksum = header.computed_line_checksum();
        image[0..HEADER_RECORD_SIZE].copy_from_slice(&header.to_bytes());
        image[HEADER_RECORD_SIZE] = 0xff;
        for b in image[0x40..0x40 + 16].iter_mut() {
            *b = 0x01;
        }
        image[0x40 + 16] = 0x10;
        image
    }

    #[test]
    fn display_info_accepts_a_well_formed_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.bin");
        fs::write(&path, fixture_image()).unwrap();
        assert!(Driver.display_info(&path).is_ok());
    }

    #[test]
    fn display_info_rejects_a_mis_sized_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        fs::write(&path, vec![0u8; 16]).unwrap();
        assert!(Driver.display_info(&path).is_err());
    }

    #[test]
    fn modify_delegates_to_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.bin");
        fs::write(&path, vec![0u8; IMAGE_SIZE]).unwrap();
        Driver.modify(&path, 0x10, 0xAABBCCDD, 4).unwrap();
        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[0x10..0x14], &[0xDD, 0xCC, 0xBB, 0xAA]);
    }
}
