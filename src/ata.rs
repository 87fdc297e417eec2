//! ATA command opcodes and CDB builders.

use crate::structures::AtaCdb;

/// SCSI opcode for ATA PASS-THROUGH (16).
pub const SG_ATA_16: u8 = 0x85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtaCommand {
    Identify = 0xEC,
    VendorSpecific = 0x80,
    Smart = 0xB0,
    ReadDmaExt = 0x25,
    WriteDmaExt = 0x35,
}

/// Which way a ROM key request should open the EEPROM.
///
/// `Erase` is not present in the surviving `wd_info.h` header (see
/// DESIGN.md); `0x03` is this crate's best-effort continuation of the
/// `0x01`/`0x02` token space and should be confirmed against target
/// firmware before a real upload is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomKeyDirection {
    Read = 0x01,
    Write = 0x02,
    Erase = 0x03,
}

/// `ATA IDENTIFY DEVICE` via a PIO-data-in CDB.
///
/// Byte-exact with `85 08 2e 00 00 00 00 00 00 00 00 00 00 40 EC 00`.
pub fn identify() -> AtaCdb {
    AtaCdb {
        opcode: SG_ATA_16,
        protocol: 0x08,
        flags: 0x2e,
        features_high: 0x00,
        features_low: 0x00,
        sector_count_high: 0x00,
        sector_count_low: 0x00,
        lba_low_high: 0x00,
        lba_low_low: 0x00,
        lba_mid_high: 0x00,
        lba_mid_low: 0x00,
        lba_high_high: 0x00,
        lba_high_low: 0x00,
        device: 0x40,
        command: AtaCommand::Identify as u8,
        control: 0x00,
    }
}

/// Vendor-specific command CDB shared by enable/disable, differing only
/// in the low features byte (`0x45` enable, `0x44` disable).
fn vsc_cdb(features_low: u8) -> AtaCdb {
    AtaCdb {
        opcode: SG_ATA_16,
        protocol: 0x06,
        flags: 0x20,
        features_high: 0x00,
        features_low,
        sector_count_high: 0x00,
        sector_count_low: 0x00,
        lba_low_high: 0x00,
        lba_low_low: 0x00,
        lba_mid_high: 0x00,
        lba_mid_low: 0x44, // 'D'
        lba_high_high: 0x00,
        lba_high_low: 0x57, // 'W'
        device: 0xa0,
        command: AtaCommand::VendorSpecific as u8,
        control: 0x00,
    }
}

pub fn enable_vsc() -> AtaCdb {
    vsc_cdb(0x45)
}

pub fn disable_vsc() -> AtaCdb {
    vsc_cdb(0x44)
}

/// Vendor-specific SMART subcommand CDB shared by acquire-key,
/// read-rom-block and write-rom-block, differing only in the low
/// features byte.
fn smart_cdb(protocol: u8, flags: u8, features_low: u8) -> AtaCdb {
    AtaCdb {
        opcode: SG_ATA_16,
        protocol,
        flags,
        features_high: 0x00,
        features_low,
        sector_count_high: 0x00,
        sector_count_low: 0x80,
        lba_low_high: 0x00,
        lba_low_low: 0xbf,
        lba_mid_high: 0x00,
        lba_mid_low: 0x4f,
        lba_high_high: 0x00,
        lba_high_low: 0xc2,
        device: 0xa0,
        command: AtaCommand::Smart as u8,
        control: 0x00,
    }
}

/// `85 0a 26 00 d6 00 80 00 bf 00 4f 00 c2 a0 b0 00` for features `0xd6`.
pub fn acquire_rom_key() -> AtaCdb {
    smart_cdb(0x0a, 0x26, 0xd6)
}

pub fn read_rom_block_cdb() -> AtaCdb {
    smart_cdb(0x08, 0x2e, 0xd5)
}

pub fn write_rom_block_cdb() -> AtaCdb {
    smart_cdb(0x08, 0x2e, 0xd6)
}

/// `ATA READ DMA EXT` CDB for a single 512-byte LBA.
///
/// The 28-bit LBA is split across the CDB as: bits 0..7 and 8..15 go
/// to the LBA-low pair, bits 16..23 go to the LBA-mid *low* byte, and
/// bits 24..31 go to the LBA-mid *high* byte (see DESIGN.md).
pub fn read_dma_ext(lba: u32) -> AtaCdb {
    AtaCdb {
        opcode: SG_ATA_16,
        protocol: 0x0D,
        flags: 0x2e,
        features_high: 0x00,
        features_low: 0x00,
        sector_count_high: 0x00,
        sector_count_low: 0x01,
        lba_low_high: (lba >> 8) as u8,
        lba_low_low: lba as u8,
        lba_mid_high: (lba >> 24) as u8,
        lba_mid_low: (lba >> 16) as u8,
        lba_high_high: 0x00,
        lba_high_low: 0x00,
        device: 0x40,
        command: AtaCommand::ReadDmaExt as u8,
        control: 0x00,
    }
}

pub fn write_dma_ext(lba: u32) -> AtaCdb {
    AtaCdb {
        opcode: SG_ATA_16,
        protocol: 0x0D,
        flags: 0x26,
        features_high: 0x00,
        features_low: 0x00,
        sector_count_high: 0x00,
        sector_count_low: 0x01,
        lba_low_high: (lba >> 8) as u8,
        lba_low_low: lba as u8,
        lba_mid_high: (lba >> 24) as u8,
        lba_mid_low: (lba >> 16) as u8,
        lba_high_high: 0x00,
        lba_high_low: 0x00,
        device: 0x40,
        command: AtaCommand::WriteDmaExt as u8,
        control: 0x00,
    }
}

/// `pack_id = ((cdb[13] & 0x0F) << 24) | (cdb[12] << 16) | (cdb[10] << 8) | cdb[8]`.
pub fn pack_id(cdb: &AtaCdb) -> u32 {
    ((cdb.device as u32 & 0x0F) << 24)
        | ((cdb.lba_high_low as u32) << 16)
        | ((cdb.lba_mid_low as u32) << 8)
        | (cdb.lba_low_low as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identify_cdb_is_byte_exact() {
        let expected: [u8; 16] = [
            0x85, 0x08, 0x2e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40,
            0xEC, 0x00,
        ];
        assert_eq!(identify().to_bytes(), expected);
    }

    #[test]
    fn acquire_rom_key_cdb_is_byte_exact() {
        let expected: [u8; 16] = [
            0x85, 0x0a, 0x26, 0x00, 0xd6, 0x00, 0x80, 0x00, 0xbf, 0x00, 0x4f, 0x00, 0xc2, 0xa0,
            0xb0, 0x00,
        ];
        assert_eq!(acquire_rom_key().to_bytes(), expected);
    }

    #[test]
    fn enable_and_disable_vsc_differ_only_in_features_low() {
        let enable = enable_vsc().to_bytes();
        let disable = disable_vsc().to_bytes();
        assert_eq!(enable[4], 0x45);
        assert_eq!(disable[4], 0x44);
        let mut enable_masked = enable;
        let mut disable_masked = disable;
        enable_masked[4] = 0;
        disable_masked[4] = 0;
        assert_eq!(enable_masked, disable_masked);
    }

    #[test]
    fn pack_id_matches_formula() {
        let cdb = acquire_rom_key();
        let bytes = cdb.to_bytes();
        let expected = ((bytes[13] as u32 & 0x0F) << 24)
            | ((bytes[12] as u32) << 16)
            | ((bytes[10] as u32) << 8)
            | (bytes[8] as u32);
        assert_eq!(pack_id(&cdb), expected);
    }
}
