//! Vdex container context and file handling.
//!
//! [`VdexContext`] is a validated, read-only view over a container's bytes.
//! Every section accessor hands out a slice that has already been checked
//! against the buffer length, so nothing downstream has to redo the layout
//! math. [`VdexFile`] owns the memory mapping the view is usually built on.

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::debug;

use super::iter::DexIter;
use super::structs::*;
use crate::error::{Error, Result};
use crate::util::read_u32_le;

// =============================================================================
// Vdex Context
// =============================================================================

/// A validated view over a Vdex container.
#[derive(Debug, Clone, Copy)]
pub struct VdexContext<'a> {
    data: &'a [u8],
    /// Parsed header
    pub header: VdexHeader,
    /// Schema revision, guaranteed supported
    pub version: VdexVersion,
}

impl<'a> VdexContext<'a> {
    /// Validates `data` as a Vdex container.
    ///
    /// Checks the magic, the version and that every declared section lies
    /// inside the buffer.
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let header = VdexHeader::parse(data).ok_or(Error::TruncatedBuffer {
            needed: VdexHeader::SIZE as u64,
            available: data.len(),
        })?;

        if !header.is_magic_valid() {
            return Err(Error::InvalidMagic(header.magic));
        }

        let version =
            VdexVersion::from_bytes(&header.version).ok_or(Error::UnsupportedVersion(header.version))?;

        let needed = header.quickening_info_end();
        if needed > data.len() as u64 {
            return Err(Error::TruncatedBuffer {
                needed,
                available: data.len(),
            });
        }

        Ok(Self {
            data,
            header,
            version,
        })
    }

    /// The whole container.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Number of embedded dex files.
    #[inline]
    pub fn dex_count(&self) -> u32 {
        self.header.number_of_dex_files
    }

    // Offsets below are bounded by `quickening_info_end`, which `new` checked
    // against the buffer length, so the casts and slices cannot fail.

    fn section(&self, start: u64, end: u64) -> &'a [u8] {
        &self.data[start as usize..end as usize]
    }

    /// The raw checksum table.
    pub fn checksums_section(&self) -> &'a [u8] {
        self.section(self.header.checksums_offset(), self.header.dex_begin())
    }

    /// The location checksum of dex file `index`.
    pub fn location_checksum(&self, index: u32) -> Option<u32> {
        if index >= self.dex_count() {
            return None;
        }
        let offset = index as usize * 4;
        Some(read_u32_le(&self.checksums_section()[offset..]))
    }

    /// Iterates over the checksum table in file order.
    pub fn location_checksums(&self) -> impl Iterator<Item = u32> + 'a {
        self.checksums_section().chunks_exact(4).map(read_u32_le)
    }

    /// The dex section.
    pub fn dex_section(&self) -> &'a [u8] {
        self.section(self.header.dex_begin(), self.header.dex_end())
    }

    /// The verifier dependencies section.
    pub fn verifier_deps(&self) -> &'a [u8] {
        self.section(
            self.header.verifier_deps_offset(),
            self.header.verifier_deps_end(),
        )
    }

    /// The quickening info section.
    pub fn quickening_info(&self) -> &'a [u8] {
        self.section(
            self.header.quickening_info_offset(),
            self.header.quickening_info_end(),
        )
    }

    /// Returns an iterator over the embedded dex files.
    pub fn dex_files(&self) -> DexIter<'a> {
        DexIter::new(self.data, &self.header)
    }

    /// Logs the header and section layout at debug level.
    pub fn log_header_info(&self) {
        let h = &self.header;
        debug!("------ Vdex Header Info ------");
        debug!("magic header & version      : vdex-{}", self.version);
        debug!("number of dex files         : {:x} ({})", h.number_of_dex_files, h.number_of_dex_files);
        debug!("dex size (overall)          : {:x} ({})", h.dex_size, h.dex_size);
        debug!("verifier dependencies size  : {:x} ({})", h.verifier_deps_size, h.verifier_deps_size);
        debug!("verifier dependencies offset: {:x}", h.verifier_deps_offset());
        debug!("quickening info size        : {:x} ({})", h.quickening_info_size, h.quickening_info_size);
        debug!("quickening info offset      : {:x}", h.quickening_info_offset());
        debug!("dex files info              :");
        for (i, checksum) in self.location_checksums().enumerate() {
            debug!("  [{}] location checksum : {:x} ({})", i, checksum, checksum);
        }
        debug!("------------------------------");
    }
}

// =============================================================================
// Vdex File
// =============================================================================

/// A memory-mapped Vdex file.
///
/// The mapping is released when the value is dropped.
#[derive(Debug)]
pub struct VdexFile {
    /// Memory-mapped file data
    pub mmap: Mmap,
    /// Path to the file
    pub path: PathBuf,
}

impl VdexFile {
    /// Maps the file at `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|e| Error::FileOpen {
            path: path.clone(),
            source: e,
        })?;

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::MemoryMap {
            path: path.clone(),
            source: e,
        })?;

        Ok(Self { mmap, path })
    }

    /// The mapped bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.mmap
    }

    /// File name used for logging and output naming.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// Validates the mapping as a container.
    pub fn context(&self) -> Result<VdexContext<'_>> {
        VdexContext::new(&self.mmap)
    }
}
