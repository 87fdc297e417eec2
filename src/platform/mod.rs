//! Platform-specific drive access.
//!
//! Only Linux's SCSI generic pass-through (`SG_IO`) is implemented;
//! this tool's device protocol is Linux-specific by construction.

pub mod linux;
