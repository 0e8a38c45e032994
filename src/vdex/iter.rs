//! Iteration over the dex files embedded in a container.

use tracing::debug;

use super::structs::VdexHeader;
use crate::dex::DexHeader;
use crate::error::{Error, Result};
use crate::util::read_u32_le;

/// One embedded dex file.
#[derive(Debug, Clone, Copy)]
pub struct DexEntry<'a> {
    /// Position in the container, starting at 0
    pub index: u32,
    /// Absolute offset of the file in the container
    pub offset: usize,
    /// The file's bytes, exactly `file_size` long
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Nothing emitted yet
    Start,
    /// Offset of the next file to emit
    At(u64),
    /// The last file has been emitted, or the section is empty
    Done,
    /// A boundary violation was reported
    Failed,
}

/// Stateful cursor over the dex section.
///
/// Each step trusts the current file's declared size only after its header
/// has been sanity checked, and never emits a file that would cross the end
/// of the dex section. After an error the iterator is fused: it yields the
/// error once and then `None`, and [`DexIter::failed`] reports it so callers
/// can tell a corrupt section from an empty one.
#[derive(Debug, Clone)]
pub struct DexIter<'a> {
    data: &'a [u8],
    begin: u64,
    end: u64,
    cursor: Cursor,
    index: u32,
}

impl<'a> DexIter<'a> {
    /// `header` must already be validated against `data`.
    pub(crate) fn new(data: &'a [u8], header: &VdexHeader) -> Self {
        let cursor = if header.has_dex_section() {
            Cursor::Start
        } else {
            Cursor::Done
        };
        Self {
            data,
            begin: header.dex_begin(),
            end: header.dex_end(),
            cursor,
            index: 0,
        }
    }

    /// Returns true if iteration stopped on a corrupt dex section.
    pub fn failed(&self) -> bool {
        self.cursor == Cursor::Failed
    }

    fn fail(&mut self, err: Error) -> Option<Result<DexEntry<'a>>> {
        self.cursor = Cursor::Failed;
        Some(Err(err))
    }
}

impl<'a> Iterator for DexIter<'a> {
    type Item = Result<DexEntry<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = match self.cursor {
            Cursor::Start => self.begin,
            Cursor::At(offset) => offset,
            Cursor::Done | Cursor::Failed => return None,
        };

        let header_end = offset + DexHeader::SIZE as u64;
        if header_end > self.end {
            return self.fail(Error::RegionBoundaryViolation {
                offset: offset as usize,
                end: header_end,
                region_end: self.end,
            });
        }

        let start = offset as usize;
        let head = &self.data[start..header_end as usize];
        if let Err(err) = DexHeader::check_magic(head) {
            return self.fail(err);
        }

        let file_size = read_u32_le(&head[DexHeader::FILE_SIZE_OFFSET..]) as u64;
        if file_size < DexHeader::SIZE as u64 {
            return self.fail(Error::parse(
                start,
                format!("dex file_size {file_size:#x} is smaller than its header"),
            ));
        }

        let file_end = offset + file_size;
        if file_end > self.end {
            debug!(
                "dex [{}] at {:#x} overruns the dex section ({:#x} > {:#x})",
                self.index, start, file_end, self.end
            );
            return self.fail(Error::RegionBoundaryViolation {
                offset: start,
                end: file_end,
                region_end: self.end,
            });
        }

        self.cursor = if file_end == self.end {
            Cursor::Done
        } else {
            Cursor::At(file_end)
        };

        let entry = DexEntry {
            index: self.index,
            offset: start,
            data: &self.data[start..file_end as usize],
        };
        self.index += 1;
        Some(Ok(entry))
    }
}

impl std::iter::FusedIterator for DexIter<'_> {}
