//! Forensic read/write/inspect/rebuild tool for the external SPI
//! firmware ROM carried by a family of Western Digital hard disk
//! drives.
//!
//! Layered bottom-up: a thin wire-structures layer ([`structures`]), a
//! command-opcode layer ([`ata`]), a platform layer that talks to the
//! kernel ([`platform::linux`]), and a domain layer that understands
//! the on-disk ROM image format ([`rom`]). [`driver`] composes the
//! platform and ROM layers into the five user-level operations.

pub mod ata;
pub mod driver;
pub mod error;
pub mod platform;
pub mod rom;
pub mod structures;

pub use driver::Driver;
pub use error::{DriveError, RomError, ToolError};
pub use platform::linux::{DriveHandle, DriveSession, PassThrough};
