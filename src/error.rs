//! Error taxonomy for the drive-communication and ROM-codec layers.
//!
//! Kept as two separate sum types: one for everything that touches a
//! drive handle, one for everything that touches a ROM image on disk.
//! The driver facade unifies both behind [`ToolError`].

use thiserror::Error;

/// Diagnostic payload carried by [`DriveError::MalformedSense`].
///
/// The sense buffer did not conform to the expected ATA-return descriptor
/// shape. This is reported so a caller can decide whether to treat it as
/// fatal; it is deliberately distinct from [`DriveError::AtaError`] since
/// ATA status cannot be trusted once the sense shape itself is wrong.
#[derive(Debug, Clone, Copy)]
pub struct SenseDiagnostic {
    pub response_code: u8,
    pub additional_length: u8,
    pub descriptor_type: u8,
    pub descriptor_length: u8,
}

#[derive(Error, Debug)]
pub enum DriveError {
    #[error("device path does not start with /dev/s")]
    InvalidDevicePath,

    #[error("could not open device: {0}")]
    OpenError(#[source] nix::errno::Errno),

    #[error("SCSI pass-through transport failure: host_status={host_status:#x} driver_status={driver_status:#x} status={status:#x}")]
    TransportError {
        host_status: u16,
        driver_status: u16,
        status: u8,
    },

    #[error("malformed sense buffer: {0:?}")]
    MalformedSense(SenseDiagnostic),

    #[error("ATA command {cmd:#04x} failed: status={status:#04x} error={error:#04x}")]
    AtaError { cmd: u8, status: u8, error: u8 },

    #[error("drive does not carry the expected 'DWC' support signature")]
    UnsupportedDrive,

    #[error("I/O error: {0}")]
    IoError(#[source] std::io::Error),
}

impl From<std::io::Error> for DriveError {
    fn from(value: std::io::Error) -> Self {
        DriveError::IoError(value)
    }
}

impl From<nix::errno::Errno> for DriveError {
    fn from(value: nix::errno::Errno) -> Self {
        DriveError::OpenError(value)
    }
}

#[derive(Error, Debug)]
pub enum RomError {
    #[error("header-line checksum mismatch: computed {computed:#04x}, stored {stored:#04x}")]
    HeaderChecksumMismatch { computed: u8, stored: u8 },

    #[error("body checksum mismatch for block {block_nr:#04x}: computed {computed:#06x}, stored {stored:#06x}")]
    BodyChecksumMismatch {
        block_nr: u8,
        computed: u32,
        stored: u32,
    },

    #[error("block {block_nr:#04x}: start_address + length_plus_cs ({end:#x}) exceeds image size")]
    OversizeBlock { block_nr: u8, end: u32 },

    #[error("block {block_nr:#04x}: body/checksum width {width} bytes is unsupported")]
    IrregularChecksumWidth { block_nr: u8, width: u32 },

    #[error("block {block_nr:#04x}: file shorter than the declared length ({declared} bytes)")]
    TruncatedBlockFile { block_nr: u8, declared: u32 },

    #[error("formatted header file is malformed: {0}")]
    MalformedHeaderFile(String),

    #[error("instruction width {0} is out of the supported {{1,2,3,4}} range")]
    InvalidInstructionWidth(u8),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error(transparent)]
    Drive(#[from] DriveError),

    #[error(transparent)]
    Rom(#[from] RomError),
}
