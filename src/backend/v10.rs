//! Revision 010 backend.
//!
//! Quickening info is indexed:
//!
//! ```text
//! u8[]            quickening data blobs, each [u32 length][length bytes]
//! u32[2][]        (code_item_offset, blob offset) pairs
//! u32[D]          per dex file, offset of its first pair
//! ```
//!
//! All offsets are relative to the start of the section. A dex file's pairs
//! run up to the next file's first pair, or to the per-file index for the
//! last file. Blobs end where the lowest pair table starts.

use std::collections::HashMap;

use super::deps::{self, DepsLayout};
use super::{DependencyInfo, QuickeningSource, VdexBackend};
use crate::error::{Error, Result};
use crate::util::read_u32_le;
use crate::vdex::{VdexContext, VdexVersion};

const LAYOUT: DepsLayout = DepsLayout {
    method_groups: &[None],
};

/// Backend for revision 010 containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct V10Backend;

impl VdexBackend for V10Backend {
    fn version(&self) -> VdexVersion {
        VdexVersion::V010
    }

    fn init_deps_info(&self, vdex: &VdexContext<'_>) -> Result<Option<DependencyInfo>> {
        deps::decode(vdex, &LAYOUT)
    }

    fn quickening_source<'a>(
        &self,
        vdex: &VdexContext<'a>,
    ) -> Result<Box<dyn QuickeningSource<'a> + 'a>> {
        Ok(Box::new(TableQuickening::new(
            vdex.quickening_info(),
            vdex.dex_count(),
        )))
    }
}

/// Indexed quickening lookup for one dex file at a time.
#[derive(Debug)]
pub struct TableQuickening<'a> {
    data: &'a [u8],
    dex_count: u32,
    /// Unconsumed `code_item_offset -> blob offset` pairs of the current file
    pending: HashMap<u32, u32>,
    /// End of the blob area, known once a file has begun
    blob_end: usize,
}

impl<'a> TableQuickening<'a> {
    /// Wraps a quickening section for a container of `dex_count` files.
    pub fn new(data: &'a [u8], dex_count: u32) -> Self {
        Self {
            data,
            dex_count,
            pending: HashMap::new(),
            blob_end: 0,
        }
    }

    /// Offset of the per-file index at the end of the section.
    fn index_offset(&self) -> Result<usize> {
        let index_size = self.dex_count as usize * 4;
        self.data.len().checked_sub(index_size).ok_or_else(|| {
            Error::quickening(
                0,
                format!(
                    "section of {} bytes cannot hold {} dex start offsets",
                    self.data.len(),
                    self.dex_count
                ),
            )
        })
    }

    /// Lowest first-pair offset of any dex file.
    fn pair_tables_start(&self) -> Result<usize> {
        let index_off = self.index_offset()?;
        let lowest = self.data[index_off..]
            .chunks_exact(4)
            .map(|start| read_u32_le(start) as usize)
            .min()
            .unwrap_or(index_off);
        Ok(lowest.min(index_off))
    }

    /// Byte range of the pair table of dex file `index`.
    fn pair_range(&self, index: u32) -> Result<(usize, usize)> {
        let index_off = self.index_offset()?;
        let start_of = |i: u32| read_u32_le(&self.data[index_off + i as usize * 4..]) as usize;

        let start = start_of(index);
        let end = if index + 1 < self.dex_count {
            start_of(index + 1)
        } else {
            index_off
        };

        if start > end || end > index_off || (end - start) % 8 != 0 {
            return Err(Error::quickening(
                0,
                format!("bad pair table {start:#x}..{end:#x} for dex [{index}]"),
            ));
        }
        Ok((start, end))
    }
}

impl<'a> QuickeningSource<'a> for TableQuickening<'a> {
    fn begin_dex(&mut self, index: u32) -> Result<()> {
        self.pending.clear();
        if index >= self.dex_count {
            return Err(Error::quickening(
                0,
                format!("dex [{index}] has no entry in the quickening index"),
            ));
        }

        let (start, end) = self.pair_range(index)?;
        self.blob_end = self.pair_tables_start()?;
        for pair in self.data[start..end].chunks_exact(8) {
            let code_off = read_u32_le(pair);
            let data_off = read_u32_le(&pair[4..]);
            if self.pending.insert(code_off, data_off).is_some() {
                return Err(Error::quickening(
                    0,
                    format!("duplicate quickening entry for code item {code_off:#x}"),
                ));
            }
        }
        Ok(())
    }

    fn method(&mut self, code_off: u32) -> Result<&'a [u8]> {
        let Some(data_off) = self.pending.remove(&code_off) else {
            return Ok(&[]);
        };

        let limit = self.blob_end;
        let start = data_off as usize;
        let len = self
            .data
            .get(start..limit)
            .filter(|blob| blob.len() >= 4)
            .map(|blob| read_u32_le(blob) as usize)
            .ok_or_else(|| {
                Error::quickening(0, format!("blob offset {start:#x} for code item {code_off:#x} out of range"))
            })?;
        if len > limit - start - 4 {
            return Err(Error::quickening(
                0,
                format!("blob at {start:#x} claims {len} bytes past the data area"),
            ));
        }
        Ok(&self.data[start + 4..start + 4 + len])
    }

    fn end_dex(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut orphans: Vec<_> = self.pending.keys().copied().collect();
        orphans.sort_unstable();
        self.pending.clear();
        Err(Error::quickening(
            0,
            format!("quickening entries for unknown code items {orphans:x?}"),
        ))
    }
}
