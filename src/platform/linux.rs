//! Linux SCSI generic pass-through (`SG_IO`) access to a block device.

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::addr_of_mut;

use nix::errno::Errno;
use nix::{ioctl_readwrite_bad, libc};
use tracing::{debug, warn};

use crate::ata::{self, RomKeyDirection};
use crate::error::{DriveError, SenseDiagnostic};
use crate::rom::layout::{IMAGE_SIZE, TRANSPORT_BLOCK_SIZE};
use crate::structures::{
    AtaCdb, Direction, DriveIdentity, SenseBuffer, SgIoHdr, ATA_STATUS_DRQ, ATA_STATUS_ERR,
    SG_CHECK_CONDITION, SG_DRIVER_SENSE,
};

/// `SG_IO` from `<scsi/sg.h>`.
const SG_IO_IOCTL: u16 = 0x2285;
ioctl_readwrite_bad!(sg_io, SG_IO_IOCTL, SgIoHdr);

const SENSE_BUFFER_LEN: u8 = 32;
const CDB_LEN: u8 = 16;
const PASSTHROUGH_TIMEOUT_MS: u32 = 20_000;

/// An owned, exclusive handle to an opened block-device node.
///
/// Only paths beginning with the "SCSI-disk" prefix (`/dev/s…`) are
/// accepted; the handle closes the underlying file descriptor on drop.
pub struct DriveHandle {
    file: File,
}

impl DriveHandle {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DriveError> {
        let path = path.as_ref();
        if !path.to_string_lossy().starts_with("/dev/s") {
            return Err(DriveError::InvalidDevicePath);
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| DriveError::OpenError(Errno::from_raw(e.raw_os_error().unwrap_or(0))))?;

        debug!(path = %path.display(), "opened drive handle");
        Ok(DriveHandle { file })
    }

    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

/// Stateless builder/executor for one ATA-in-SCSI command at a time.
pub struct PassThrough;

struct TransportSummary {
    host_status: u16,
    driver_status: u16,
    status: u8,
}

impl PassThrough {
    /// Validates host/driver/status against the kernel's SCSI generic
    /// pass-through contract. Step 2 of the result-validation algorithm.
    fn validate_transport(summary: &TransportSummary) -> Result<(), DriveError> {
        let has_sense_bit = summary.driver_status & SG_DRIVER_SENSE != 0;
        let status_ok = summary.status == 0 || summary.status == SG_CHECK_CONDITION;

        if summary.host_status != 0 || !has_sense_bit || !status_ok {
            return Err(DriveError::TransportError {
                host_status: summary.host_status,
                driver_status: summary.driver_status,
                status: summary.status,
            });
        }
        Ok(())
    }

    /// Validates the sense buffer's descriptor-format ATA-return shape.
    /// Step 3. Must run, and must fail, before ATA status is trusted.
    fn validate_sense(sense: &SenseBuffer) -> Result<(), DriveError> {
        if !sense.is_well_formed() {
            return Err(DriveError::MalformedSense(SenseDiagnostic {
                response_code: sense.response_code(),
                additional_length: sense.additional_length(),
                descriptor_type: sense.descriptor_type(),
                descriptor_length: sense.descriptor_length(),
            }));
        }
        Ok(())
    }

    /// Step 4: ERR or DRQ in the ATA status register is a command failure.
    fn validate_ata_status(sense: &SenseBuffer, cmd: u8) -> Result<(), DriveError> {
        let status = sense.ata_status();
        if status & ATA_STATUS_ERR != 0 || status & ATA_STATUS_DRQ != 0 {
            return Err(DriveError::AtaError {
                cmd,
                status,
                error: sense.ata_error(),
            });
        }
        Ok(())
    }

    /// Issues `cdb` against `handle`, transferring `buf` in `direction`
    /// if given, and validates the kernel's response in the fixed order:
    /// submission error, transport status, sense shape, ATA status.
    pub fn execute(
        cdb: &AtaCdb,
        handle: &DriveHandle,
        buf: Option<&mut [u8]>,
        direction: Direction,
    ) -> Result<SenseBuffer, DriveError> {
        let mut cdb_bytes = cdb.to_bytes();
        let mut sense_bytes = [0u8; SENSE_BUFFER_LEN as usize];

        let (dxfer_len, dxferp) = match buf {
            Some(b) => (b.len() as u32, b.as_mut_ptr() as *mut c_void),
            None => (0, std::ptr::null_mut()),
        };

        let mut hdr = SgIoHdr {
            interface_id: 'S' as i32,
            dxfer_direction: direction.as_dxfer(),
            cmd_len: CDB_LEN,
            mx_sb_len: SENSE_BUFFER_LEN,
            iovec_count: 0,
            dxfer_len,
            dxferp,
            cmdp: cdb_bytes.as_mut_ptr(),
            sbp: sense_bytes.as_mut_ptr(),
            timeout: PASSTHROUGH_TIMEOUT_MS,
            pack_id: ata::pack_id(cdb) as i32,
            ..SgIoHdr::default()
        };

        if let Err(errno) = unsafe { sg_io(handle.as_raw_fd(), addr_of_mut!(hdr)) } {
            return Err(DriveError::IoError(std::io::Error::from_raw_os_error(
                errno as i32,
            )));
        }

        Self::validate_transport(&TransportSummary {
            host_status: hdr.host_status,
            driver_status: hdr.driver_status,
            status: hdr.status,
        })?;

        let sense = SenseBuffer(sense_bytes);
        Self::validate_sense(&sense)?;
        Self::validate_ata_status(&sense, cdb.command)?;

        Ok(sense)
    }
}

/// Holds an open [`DriveHandle`] and offers the higher-level drive
/// operations. Every operation is built atop [`PassThrough`].
pub struct DriveSession<'a> {
    handle: &'a DriveHandle,
}

impl<'a> DriveSession<'a> {
    pub fn new(handle: &'a DriveHandle) -> Self {
        DriveSession { handle }
    }

    /// Issues ATA IDENTIFY and checks the `'D','W','C'` support
    /// signature.
    pub fn identify(&self) -> Result<DriveIdentity, DriveError> {
        let cdb = ata::identify();
        let mut buf = [0u8; 512];
        PassThrough::execute(&cdb, self.handle, Some(&mut buf), Direction::FromDevice)?;

        let identity = DriveIdentity::new(buf);
        if !identity.is_supported() {
            return Err(DriveError::UnsupportedDrive);
        }
        Ok(identity)
    }

    pub fn enable_vsc(&self) -> Result<(), DriveError> {
        PassThrough::execute(&ata::enable_vsc(), self.handle, None, Direction::None)?;
        Ok(())
    }

    /// Best-effort cleanup call; any successful `enable_vsc` obliges the
    /// caller to attempt this before returning, even on an error path.
    pub fn disable_vsc(&self) -> Result<(), DriveError> {
        PassThrough::execute(&ata::disable_vsc(), self.handle, None, Direction::None)?;
        Ok(())
    }

    pub fn acquire_rom_key(&self, direction: RomKeyDirection) -> Result<(), DriveError> {
        let mut buf = [0u8; 512];
        buf[0] = 0x24;
        buf[2] = direction as u8;
        PassThrough::execute(
            &ata::acquire_rom_key(),
            self.handle,
            Some(&mut buf),
            Direction::ToDevice,
        )?;
        Ok(())
    }

    pub fn read_rom_block(&self, buf: &mut [u8; TRANSPORT_BLOCK_SIZE]) -> Result<(), DriveError> {
        PassThrough::execute(
            &ata::read_rom_block_cdb(),
            self.handle,
            Some(buf.as_mut_slice()),
            Direction::FromDevice,
        )?;
        Ok(())
    }

    pub fn write_rom_block(&self, buf: &mut [u8; TRANSPORT_BLOCK_SIZE]) -> Result<(), DriveError> {
        PassThrough::execute(
            &ata::write_rom_block_cdb(),
            self.handle,
            Some(buf.as_mut_slice()),
            Direction::ToDevice,
        )?;
        Ok(())
    }

    pub fn read_dma_ext(&self, lba: u32, buf: &mut [u8; 512]) -> Result<(), DriveError> {
        PassThrough::execute(
            &ata::read_dma_ext(lba),
            self.handle,
            Some(buf.as_mut_slice()),
            Direction::FromDevice,
        )?;
        Ok(())
    }

    pub fn write_dma_ext(&self, lba: u32, buf: &mut [u8; 512]) -> Result<(), DriveError> {
        PassThrough::execute(
            &ata::write_dma_ext(lba),
            self.handle,
            Some(buf.as_mut_slice()),
            Direction::ToDevice,
        )?;
        Ok(())
    }

    /// Convenience wrapper for a single 512-byte LBA read.
    pub fn read_lba(&self, lba: u32) -> Result<[u8; 512], DriveError> {
        let mut buf = [0u8; 512];
        self.read_dma_ext(lba, &mut buf)?;
        Ok(buf)
    }

    /// Convenience wrapper for a single 512-byte LBA write.
    pub fn write_lba(&self, lba: u32, mut data: [u8; 512]) -> Result<(), DriveError> {
        self.write_dma_ext(lba, &mut data)
    }

    /// Reads the full 256 KiB ROM image in its four transport blocks,
    /// following the `identify → enable_vsc → acquire_rom_key(read) →
    /// read_rom_block × 4 → disable_vsc` protocol. Attempts
    /// `disable_vsc` even if a step after `enable_vsc` fails.
    pub fn dump_rom(&self) -> Result<[u8; IMAGE_SIZE], DriveError> {
        self.identify()?;
        self.enable_vsc()?;

        let result = (|| {
            self.acquire_rom_key(RomKeyDirection::Read)?;
            let mut image = [0u8; IMAGE_SIZE];
            for block in image.chunks_mut(TRANSPORT_BLOCK_SIZE) {
                let block: &mut [u8; TRANSPORT_BLOCK_SIZE] = block.try_into().unwrap();
                self.read_rom_block(block)?;
            }
            Ok(image)
        })();

        if let Err(e) = self.disable_vsc() {
            warn!(error = %e, "disable_vsc failed during cleanup after dump");
        }
        result
    }

    /// Writes the full 256 KiB ROM image, following the
    /// `identify → enable_vsc → acquire_rom_key(erase) →
    /// acquire_rom_key(write) → write_rom_block × 4 → disable_vsc`
    /// protocol.
    pub fn upload_rom(&self, image: &mut [u8; IMAGE_SIZE]) -> Result<(), DriveError> {
        self.identify()?;
        self.enable_vsc()?;

        let result = (|| {
            self.acquire_rom_key(RomKeyDirection::Erase)?;
            self.acquire_rom_key(RomKeyDirection::Write)?;
            for block in image.chunks_mut(TRANSPORT_BLOCK_SIZE) {
                let block: &mut [u8; TRANSPORT_BLOCK_SIZE] = block.try_into().unwrap();
                self.write_rom_block(block)?;
            }
            Ok(())
        })();

        if let Err(e) = self.disable_vsc() {
            warn!(error = %e, "disable_vsc failed during cleanup after upload");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well_formed_sense(ata_status: u8, ata_error: u8) -> SenseBuffer {
        let mut raw = [0u8; 32];
        raw[0] = 0x72;
        raw[7] = 14;
        raw[8] = 0x09;
        raw[9] = 0x0c;
        raw[11] = ata_error;
        raw[21] = ata_status;
        SenseBuffer(raw)
    }

    #[test]
    fn transport_ok_requires_sense_bit() {
        let summary = TransportSummary {
            host_status: 0,
            driver_status: 0,
            status: 0,
        };
        assert!(PassThrough::validate_transport(&summary).is_err());

        let summary = TransportSummary {
            host_status: 0,
            driver_status: SG_DRIVER_SENSE,
            status: SG_CHECK_CONDITION,
        };
        assert!(PassThrough::validate_transport(&summary).is_ok());
    }

    #[test]
    fn malformed_sense_takes_priority_over_ata_status() {
        let mut raw = [0u8; 32];
        raw[0] = 0x72;
        raw[7] = 13; // below the required 14
        raw[8] = 0x09;
        raw[9] = 0x0c;
        raw[21] = ATA_STATUS_ERR;
        let sense = SenseBuffer(raw);

        assert!(matches!(
            PassThrough::validate_sense(&sense),
            Err(DriveError::MalformedSense(_))
        ));
    }

    #[test]
    fn ata_status_err_bit_is_reported() {
        let sense = well_formed_sense(ATA_STATUS_ERR, 0x04);
        assert!(PassThrough::validate_sense(&sense).is_ok());
        assert!(matches!(
            PassThrough::validate_ata_status(&sense, 0xEC),
            Err(DriveError::AtaError {
                cmd: 0xEC,
                status: ATA_STATUS_ERR,
                error: 0x04
            })
        ));
    }

    #[test]
    fn clean_status_succeeds() {
        let sense = well_formed_sense(0x50, 0x00);
        assert!(PassThrough::validate_sense(&sense).is_ok());
        assert!(PassThrough::validate_ata_status(&sense, 0xEC).is_ok());
    }

    #[test]
    fn drive_handle_rejects_non_scsi_path() {
        assert!(matches!(
            DriveHandle::open("/dev/xda"),
            Err(DriveError::InvalidDevicePath)
        ));
    }

    #[test]
    fn drive_handle_reports_open_error_for_missing_node() {
        assert!(matches!(
            DriveHandle::open("/dev/sd-this-does-not-exist"),
            Err(DriveError::OpenError(_))
        ));
    }
}
