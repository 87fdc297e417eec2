//! The firmware ROM image format: layout/invariants and the codec that
//! unpacks, packs, inspects, and patches it. Pure data; never touches a
//! drive.

pub mod codec;
pub mod layout;
