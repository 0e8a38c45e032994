//! Revision 006 backend.
//!
//! Quickening info is a flat run of `[u32 length][length bytes]` records, one
//! per method with code, across all dex files in container order. There is
//! no index, so the only way to find a method's record is to walk every
//! earlier method in the same order the runtime wrote them.

use super::deps::{self, DepsLayout, MethodGroup};
use super::{DependencyInfo, QuickeningSource, VdexBackend};
use crate::error::{Error, Result};
use crate::util::read_u32_le;
use crate::vdex::{VdexContext, VdexVersion};

const LAYOUT: DepsLayout = DepsLayout {
    method_groups: &[
        Some(MethodGroup::Direct),
        Some(MethodGroup::Virtual),
        Some(MethodGroup::Interface),
    ],
};

/// Backend for revision 006 containers.
#[derive(Debug, Clone, Copy, Default)]
pub struct V6Backend;

impl VdexBackend for V6Backend {
    fn version(&self) -> VdexVersion {
        VdexVersion::V006
    }

    fn init_deps_info(&self, vdex: &VdexContext<'_>) -> Result<Option<DependencyInfo>> {
        deps::decode(vdex, &LAYOUT)
    }

    fn quickening_source<'a>(
        &self,
        vdex: &VdexContext<'a>,
    ) -> Result<Box<dyn QuickeningSource<'a> + 'a>> {
        Ok(Box::new(SequentialQuickening::new(vdex.quickening_info())))
    }
}

/// Cursor over sequential quickening records.
///
/// The cursor is shared by every dex file of the container and is never
/// rewound, so it must see every method even when a file's rewrite fails.
#[derive(Debug)]
pub struct SequentialQuickening<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SequentialQuickening<'a> {
    /// Starts at the beginning of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> QuickeningSource<'a> for SequentialQuickening<'a> {
    fn begin_dex(&mut self, _index: u32) -> Result<()> {
        Ok(())
    }

    fn method(&mut self, _code_off: u32) -> Result<&'a [u8]> {
        let remaining = self.data.len() - self.pos;
        if remaining < 4 {
            return Err(Error::quickening(
                0,
                format!("quickening info exhausted at offset {:#x}", self.pos),
            ));
        }
        let len = read_u32_le(&self.data[self.pos..]) as usize;
        if len > remaining - 4 {
            return Err(Error::quickening(
                0,
                format!(
                    "record at offset {:#x} claims {len} bytes, {} left",
                    self.pos,
                    remaining - 4
                ),
            ));
        }
        let start = self.pos + 4;
        self.pos = start + len;
        Ok(&self.data[start..start + len])
    }

    fn end_dex(&mut self) -> Result<()> {
        Ok(())
    }
}
