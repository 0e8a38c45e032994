//! Checksum handling.
//!
//! Two unrelated checksums live in a container: the location checksum table
//! right after the header, which ties each dex file to the archive it was
//! compiled from, and each dex file's own Adler-32 over its contents.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::dex::DexHeader;
use crate::error::{Error, Result};
use crate::util::read_u32_le;
use crate::vdex::VdexContext;

use super::{OutputKind, OutputSink};

// =============================================================================
// Dex Checksum
// =============================================================================

/// Adler-32 of a dex file, covering everything after the checksum field.
pub fn dex_checksum(data: &[u8]) -> u32 {
    adler::adler32_slice(&data[DexHeader::CHECKSUM_START.min(data.len())..])
}

/// Recomputes and stores the checksum of the dex file in `data`.
pub fn repair_dex_checksum(data: &mut [u8]) -> Result<()> {
    if data.len() < DexHeader::SIZE {
        return Err(Error::buffer_too_small(DexHeader::SIZE, data.len()));
    }
    let checksum = dex_checksum(data);
    let at = DexHeader::CHECKSUM_OFFSET;
    data[at..at + 4].copy_from_slice(&checksum.to_le_bytes());
    Ok(())
}

// =============================================================================
// Location Checksums
// =============================================================================

/// Returns a copy of the container with its location checksum table
/// replaced by `values`.
///
/// The container must validate and `values` must hold exactly one entry per
/// dex file. The input is never modified.
pub fn patch_checksums(data: &[u8], values: &[u32]) -> Result<Vec<u8>> {
    let vdex = VdexContext::new(data)?;
    let expected = vdex.dex_count();
    if values.len() != expected as usize {
        return Err(Error::ChecksumCountMismatch {
            expected,
            actual: values.len(),
        });
    }

    let mut out = data.to_vec();
    let start = vdex.header.checksums_offset() as usize;
    for (slot, value) in out[start..].chunks_exact_mut(4).zip(values) {
        debug!("location checksum {:#010x} -> {value:#010x}", read_u32_le(slot));
        slot.copy_from_slice(&value.to_le_bytes());
    }
    Ok(out)
}

/// Patches the location checksums of the container at `source` and hands
/// the result to `sink`.
pub fn update_checksums(
    source: &Path,
    data: &[u8],
    values: &[u32],
    sink: &dyn OutputSink,
) -> Result<PathBuf> {
    let patched = patch_checksums(data, values)?;
    let path = sink.write(source, OutputKind::Vdex, &patched)?;
    info!("{} location checksums updated", values.len());
    Ok(path)
}

/// Parses a checksum list: one decimal or `0x`-prefixed hex value per
/// non-empty line.
pub fn parse_checksum_list(text: &str) -> Result<Vec<u32>> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .map(|(line, value)| {
            let parsed = match value
                .strip_prefix("0x")
                .or_else(|| value.strip_prefix("0X"))
            {
                Some(hex) => u32::from_str_radix(hex, 16),
                None => value.parse::<u32>(),
            };
            parsed.map_err(|_| Error::InvalidChecksumList {
                line,
                text: value.to_string(),
            })
        })
        .collect()
}
