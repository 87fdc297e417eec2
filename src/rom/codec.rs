//! Unpack/pack/inspect/patch of ROM images. Uses [`crate::rom::layout`];
//! never touches a drive.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write as _};
use std::path::Path;

use tracing::warn;

use crate::error::RomError;
use crate::rom::layout::{self, RomBlockHeader, HEADER_RECORD_SIZE, IMAGE_SIZE};

/// One header's checksum verdicts, as produced by [`display_rom_info`].
#[derive(Debug, Clone, Copy)]
pub struct BlockChecksumReport {
    pub header: RomBlockHeader,
    pub line_checksum_ok: bool,
    pub body_checksum: Option<BodyChecksumVerdict>,
}

#[derive(Debug, Clone, Copy)]
pub struct BodyChecksumVerdict {
    pub computed: u32,
    pub stored: u32,
    pub matches: bool,
}

fn read_stored_checksum(bytes: &[u8]) -> u32 {
    match bytes.len() {
        1 => bytes[0] as u32,
        2 => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
        _ => 0,
    }
}

/// Walks the header table, verifying both header-line and body
/// checksums. Failures are reported in the returned verdicts but never
/// abort the walk, matching the inspect operation's forgiving contract.
pub fn display_rom_info(image: &[u8; IMAGE_SIZE]) -> Vec<BlockChecksumReport> {
    layout::read_header_table(image)
        .into_iter()
        .map(|header| {
            let line_checksum_ok = header.line_checksum_ok();
            let body_checksum = header.cs_width().ok().and_then(|width| {
                let start = header.start_address as usize;
                let size = header.size as usize;
                let width = width as usize;
                if start + size + width > image.len() {
                    return None;
                }
                let body = &image[start..start + size];
                let stored = read_stored_checksum(&image[start + size..start + size + width]);
                let computed = match width {
                    1 => layout::body_checksum_8(body) as u32,
                    2 => layout::body_checksum_16(body)? as u32,
                    _ => return None,
                };
                Some(BodyChecksumVerdict {
                    computed,
                    stored,
                    matches: computed == stored,
                })
            });
            BlockChecksumReport {
                header,
                line_checksum_ok,
                body_checksum,
            }
        })
        .collect()
}

fn write_formatted_header(out: &mut String, header: &RomBlockHeader) {
    writeln!(out, "block_nr: {:#04x}", header.block_nr).unwrap();
    writeln!(out, "flag: {:#04x}", header.flag).unwrap();
    writeln!(out, "reserved0: {:#04x}", header.reserved0).unwrap();
    writeln!(out, "reserved1: {:#04x}", header.reserved1).unwrap();
    writeln!(
        out,
        "length_plus_cs: {:#010x}",
        header.length_plus_cs.swap_bytes()
    )
    .unwrap();
    writeln!(out, "size: {:#010x}", header.size.swap_bytes()).unwrap();
    writeln!(
        out,
        "start_address: {:#010x}",
        header.start_address.swap_bytes()
    )
    .unwrap();
    writeln!(
        out,
        "load_address: {:#010x}",
        header.load_address.swap_bytes()
    )
    .unwrap();
    writeln!(
        out,
        "execution_address: {:#010x}",
        header.execution_address.swap_bytes()
    )
    .unwrap();
    writeln!(out, "reserved2: {:#010x}", header.reserved2.swap_bytes()).unwrap();
    writeln!(out, "fstw: {:#010x}", header.fstw.swap_bytes()).unwrap();
    writeln!(out, "checksum: {:#04x}", header.checksum).unwrap();
}

/// The header table's terminator record and any padding between the
/// last recognized header and the first block body, captured verbatim
/// so `pack` can restore it byte-for-byte (see [`write_header_gap`]).
struct HeaderGap {
    offset: usize,
    bytes: Vec<u8>,
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().fold(String::new(), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

fn hex_decode(s: &str) -> Result<Vec<u8>, RomError> {
    if s.len() % 2 != 0 {
        return Err(RomError::MalformedHeaderFile(format!(
            "odd-length hex string {s:?}"
        )));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| RomError::MalformedHeaderFile(format!("not hex in {s:?}")))
        })
        .collect()
}

fn write_header_gap(out: &mut String, gap: &HeaderGap) {
    writeln!(out, "header_gap_offset: {:#010x}", gap.offset).unwrap();
    writeln!(out, "header_gap: {}", hex_encode(&gap.bytes)).unwrap();
}

/// Every well-formed image's header table ends at an unrecognized
/// `block_nr`, so the bytes right after the last recognized record —
/// the terminator and any padding before the first block body — are
/// part of the on-disk image but never reconstructed from a
/// [`RomBlockHeader`]. Captured here so `unpack`/`pack` round-trip them
/// verbatim instead of silently zeroing them out.
fn compute_header_gap(image: &[u8; IMAGE_SIZE], headers: &[RomBlockHeader]) -> Option<HeaderGap> {
    let table_end = headers.len() * HEADER_RECORD_SIZE;
    let body_start = headers.iter().map(|h| h.start_address as usize).min();
    let gap_end = match body_start {
        Some(s) if s > table_end => s,
        _ => table_end + HEADER_RECORD_SIZE,
    }
    .min(IMAGE_SIZE);

    if gap_end > table_end {
        Some(HeaderGap {
            offset: table_end,
            bytes: image[table_end..gap_end].to_vec(),
        })
    } else {
        None
    }
}

/// Whitespace-tolerant reader for `formatted_header`: `label: 0xvalue`
/// lines, records separated by blank lines, with an optional trailing
/// `header_gap_offset`/`header_gap` pair restoring the table terminator.
fn parse_formatted_header(text: &str) -> Result<(Vec<RomBlockHeader>, Option<HeaderGap>), RomError> {
    let mut headers = Vec::new();
    let mut header = RomBlockHeader::default();
    let mut dirty = false;
    let mut gap_offset: Option<usize> = None;
    let mut gap_bytes: Option<Vec<u8>> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if dirty {
                headers.push(header);
                header = RomBlockHeader::default();
                dirty = false;
            }
            continue;
        }

        let (label, value) = line
            .split_once(':')
            .ok_or_else(|| RomError::MalformedHeaderFile(format!("missing ':' in {line:?}")))?;
        let label = label.trim();
        let value = value.trim();

        if label == "header_gap_offset" {
            let value = value
                .strip_prefix("0x")
                .or_else(|| value.strip_prefix("0X"))
                .unwrap_or(value);
            let offset = usize::from_str_radix(value, 16)
                .map_err(|_| RomError::MalformedHeaderFile(format!("not hex in {line:?}")))?;
            gap_offset = Some(offset);
            continue;
        }
        if label == "header_gap" {
            gap_bytes = Some(hex_decode(value)?);
            continue;
        }

        let value = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        let parsed = u32::from_str_radix(value, 16)
            .map_err(|_| RomError::MalformedHeaderFile(format!("not hex in {line:?}")))?;

        match label {
            "block_nr" => header.block_nr = parsed as u8,
            "flag" => header.flag = parsed as u8,
            "reserved0" => header.reserved0 = parsed as u8,
            "reserved1" => header.reserved1 = parsed as u8,
            "length_plus_cs" => header.length_plus_cs = parsed.swap_bytes(),
            "size" => header.size = parsed.swap_bytes(),
            "start_address" => header.start_address = parsed.swap_bytes(),
            "load_address" => header.load_address = parsed.swap_bytes(),
            "execution_address" => header.execution_address = parsed.swap_bytes(),
            "reserved2" => header.reserved2 = parsed.swap_bytes(),
            "fstw" => header.fstw = parsed.swap_bytes(),
            "checksum" => header.checksum = parsed as u8,
            other => {
                return Err(RomError::MalformedHeaderFile(format!(
                    "unknown field {other:?}"
                )))
            }
        }
        dirty = true;
    }
    if dirty {
        headers.push(header);
    }

    let gap = match (gap_offset, gap_bytes) {
        (Some(offset), Some(bytes)) => Some(HeaderGap { offset, bytes }),
        (None, None) => None,
        _ => {
            return Err(RomError::MalformedHeaderFile(
                "header_gap_offset and header_gap must be set together".into(),
            ))
        }
    };

    Ok((headers, gap))
}

/// Explodes a ROM image into a directory of per-block files plus
/// `formatted_header` and `<basename>_block_header`.
pub fn unpack(image_path: &Path) -> Result<(), RomError> {
    let bytes = fs::read(image_path)?;
    let image: [u8; IMAGE_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        RomError::MalformedHeaderFile(format!(
            "{} is not exactly {IMAGE_SIZE} bytes",
            image_path.display()
        ))
    })?;

    let headers = layout::read_header_table(&image);
    let basename = image_path
        .file_stem()
        .ok_or_else(|| RomError::MalformedHeaderFile("image path has no file name".into()))?
        .to_string_lossy()
        .into_owned();

    let dir = Path::new(&basename);
    fs::create_dir_all(dir)?;

    if let Some(original_name) = image_path.file_name() {
        fs::copy(image_path, dir.join(original_name))?;
    }

    let mut formatted = String::new();
    for header in &headers {
        write_formatted_header(&mut formatted, header);
        formatted.push('\n');
    }
    if let Some(gap) = compute_header_gap(&image, &headers) {
        write_header_gap(&mut formatted, &gap);
    }
    fs::write(dir.join("formatted_header"), formatted)?;

    let mut raw_headers = Vec::with_capacity(headers.len() * HEADER_RECORD_SIZE);
    for header in &headers {
        raw_headers.extend_from_slice(&header.to_bytes());
    }
    fs::write(dir.join(format!("{basename}_block_header")), raw_headers)?;

    for header in &headers {
        let start = header.start_address as usize;
        let size = header.size as usize;
        if start + size > image.len() {
            warn!(block_nr = header.block_nr, "block payload runs past image end, skipping");
            continue;
        }
        let payload = &image[start..start + size];
        fs::write(dir.join(format!("block_{:02x}", header.block_nr)), payload)?;
    }

    Ok(())
}

/// Rebuilds a ROM image from a `formatted_header` file and the sibling
/// `block_XX` payload files, recomputing both header-line and body
/// checksums as it goes.
pub fn pack(header_file: &Path, out_file: &Path) -> Result<(), RomError> {
    let text = fs::read_to_string(header_file)?;
    let (mut headers, gap) = parse_formatted_header(&text)?;
    let dir = header_file.parent().unwrap_or_else(|| Path::new("."));

    let mut image = vec![0u8; IMAGE_SIZE];

    for header in headers.iter_mut() {
        header.end_offset()?;

        let block_path = dir.join(format!("block_{:02x}", header.block_nr));
        let data = fs::read(&block_path)?;
        if (data.len() as u32) < header.size {
            return Err(RomError::TruncatedBlockFile {
                block_nr: header.block_nr,
                declared: header.size,
            });
        }

        let start = header.start_address as usize;
        let size = header.size as usize;
        let width = header.cs_width()? as usize;
        let body = &data[..size];

        let checksum = match width {
            1 => layout::body_checksum_8(body) as u32,
            2 => layout::body_checksum_16(body).ok_or(RomError::IrregularChecksumWidth {
                block_nr: header.block_nr,
                width: width as u32,
            })? as u32,
            _ => unreachable!("cs_width only returns 1 or 2"),
        };

        image[start..start + size].copy_from_slice(body);
        match width {
            1 => image[start + size] = checksum as u8,
            2 => image[start + size..start + size + 2]
                .copy_from_slice(&(checksum as u16).to_le_bytes()),
            _ => unreachable!("cs_width only returns 1 or 2"),
        }

        header.checksum = header.computed_line_checksum();
    }

    let mut offset = 0;
    for header in &headers {
        image[offset..offset + HEADER_RECORD_SIZE].copy_from_slice(&header.to_bytes());
        offset += HEADER_RECORD_SIZE;
    }

    if let Some(gap) = gap {
        let end = gap
            .offset
            .checked_add(gap.bytes.len())
            .ok_or_else(|| RomError::MalformedHeaderFile("header_gap overflows image".into()))?;
        if end > IMAGE_SIZE {
            return Err(RomError::MalformedHeaderFile(
                "header_gap runs past the end of the image".into(),
            ));
        }
        image[gap.offset..end].copy_from_slice(&gap.bytes);
    }

    fs::write(out_file, &image)?;
    Ok(())
}

/// Bounded to `instruction_byte_size ∈ {1,2,3,4}`. Overwrites bytes in
/// place at `memory_address` with the little-endian encoding of
/// `new_instruction`.
pub fn modify_instruction(
    image_path: &Path,
    memory_address: u64,
    new_instruction: u32,
    instruction_byte_size: u8,
) -> Result<(), RomError> {
    let width = instruction_byte_size as usize;
    if !(1..=4).contains(&width) {
        return Err(RomError::InvalidInstructionWidth(instruction_byte_size));
    }

    let mut file = OpenOptions::new().read(true).write(true).open(image_path)?;
    file.seek(SeekFrom::Start(memory_address))?;
    file.write_all(&new_instruction.to_le_bytes()[..width])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::layout::FLAG_UNENCRYPTED;
    use std::io::Read;

    fn fixture_image() -> Vec<u8> {
        let mut image = vec![0u8; IMAGE_SIZE];
        let header = RomBlockHeader {
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
        let mut header = header;
        header.checksum = header.computed_line_checksum();
        image[0..HEADER_RECORD_SIZE].copy_from_slice(&header.to_bytes());
        // Terminate the header table: next record's block_nr = 0xff.
        image[HEADER_RECORD_SIZE] = 0xff;

        for b in image[0x40..0x40 + 16].iter_mut() {
            *b = 0x01;
        }
        image[0x40 + 16] = 0x10;
        image
    }

    #[test]
    fn inspect_reports_checksum_ok_for_fixture() {
        let image: [u8; IMAGE_SIZE] = fixture_image().try_into().unwrap();
        let reports = display_rom_info(&image);
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert!(report.line_checksum_ok);
        let body = report.body_checksum.unwrap();
        assert_eq!(body.computed, 0x10);
        assert_eq!(body.stored, 0x10);
        assert!(body.matches);
    }

    #[test]
    fn unpack_then_pack_round_trips_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("rom.bin");
        fs::write(&image_path, fixture_image()).unwrap();

        let original_dir = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let result = (|| -> Result<(), RomError> {
            unpack(Path::new("rom.bin"))?;
            pack(Path::new("rom/formatted_header"), Path::new("repacked.bin"))?;
            Ok(())
        })();
        std::env::set_current_dir(original_dir).unwrap();
        result.unwrap();

        let original = fs::read(&image_path).unwrap();
        let repacked = fs::read(dir.path().join("repacked.bin")).unwrap();
        assert_eq!(original, repacked);
    }

    #[test]
    fn modify_instruction_is_a_pure_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.bin");
        fs::write(&path, vec![0u8; IMAGE_SIZE]).unwrap();

        modify_instruction(&path, 0x100, 0xDEADBEEF, 4).unwrap();

        let mut file = std::fs::File::open(&path).unwrap();
        let mut buf = [0u8; 4];
        file.seek(SeekFrom::Start(0x100)).unwrap();
        file.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xEF, 0xBE, 0xAD, 0xDE]);
    }

    #[test]
    fn modify_instruction_rejects_invalid_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.bin");
        fs::write(&path, vec![0u8; 16]).unwrap();
        assert!(matches!(
            modify_instruction(&path, 0, 0, 5),
            Err(RomError::InvalidInstructionWidth(5))
        ));
    }
}
