//! Vdex container binary structures.
//!
//! The header is a packed run of little-endian fields with no padding, so it
//! maps directly onto a `#[repr(C)]` struct of byte arrays and `u32`s and is
//! parsed with `zerocopy`.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The magic bytes at the start of every Vdex container.
pub const VDEX_MAGIC: &[u8; 4] = b"vdex";

/// Sentinel operand meaning "the runtime could not resolve this reference".
pub const UNRESOLVED_MARKER: u16 = 0xFFFF;

// =============================================================================
// Version
// =============================================================================

/// Supported container schema revisions.
///
/// Validation and backend dispatch both go through [`VdexVersion::ALL`], so a
/// version that validates always has a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VdexVersion {
    /// Revision 006 (API 26).
    V006,
    /// Revision 010 (API 27).
    V010,
}

impl VdexVersion {
    /// Every supported revision, oldest first.
    pub const ALL: [VdexVersion; 2] = [VdexVersion::V006, VdexVersion::V010];

    /// The on-disk version string.
    pub const fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            VdexVersion::V006 => b"006\0",
            VdexVersion::V010 => b"010\0",
        }
    }

    /// Maps an on-disk version string to a supported revision.
    pub fn from_bytes(bytes: &[u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_bytes() == bytes)
    }

    /// Numeric revision (6 or 10).
    pub const fn number(self) -> u32 {
        match self {
            VdexVersion::V006 => 6,
            VdexVersion::V010 => 10,
        }
    }
}

impl fmt::Display for VdexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.number())
    }
}

// =============================================================================
// Header
// =============================================================================

/// The fixed-size Vdex container header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct VdexHeader {
    /// Magic, always "vdex"
    pub magic: [u8; 4],
    /// NUL-padded ASCII version, e.g. "006\0"
    pub version: [u8; 4],
    /// Number of embedded dex files
    pub number_of_dex_files: u32,
    /// Total byte size of the dex section
    pub dex_size: u32,
    /// Byte size of the verifier dependencies section
    pub verifier_deps_size: u32,
    /// Byte size of the quickening info section
    pub quickening_info_size: u32,
}

impl VdexHeader {
    /// Size of the header on disk.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Parses the header from the start of `data`.
    ///
    /// Returns `None` if `data` is shorter than the header.
    pub fn parse(data: &[u8]) -> Option<Self> {
        Self::read_from_prefix(data).ok().map(|(header, _)| header)
    }

    /// Returns true if the magic matches.
    #[inline]
    pub fn is_magic_valid(&self) -> bool {
        &self.magic == VDEX_MAGIC
    }

    /// Returns true if the version is one of the supported revisions.
    #[inline]
    pub fn is_version_valid(&self) -> bool {
        VdexVersion::from_bytes(&self.version).is_some()
    }

    /// Returns true if both magic and version are valid.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.is_magic_valid() && self.is_version_valid()
    }

    /// The supported revision, if any.
    #[inline]
    pub fn version(&self) -> Option<VdexVersion> {
        VdexVersion::from_bytes(&self.version)
    }

    /// Returns true if the container declares a non-empty dex section.
    #[inline]
    pub fn has_dex_section(&self) -> bool {
        self.dex_size != 0
    }

    // ==================== Layout ====================
    //
    // Offsets are u64 so that attacker-chosen sizes cannot overflow; callers
    // compare them against the buffer length before slicing.

    /// Size of the checksum table.
    #[inline]
    pub fn checksums_size(&self) -> u64 {
        4 * self.number_of_dex_files as u64
    }

    /// Offset of the checksum table.
    #[inline]
    pub fn checksums_offset(&self) -> u64 {
        Self::SIZE as u64
    }

    /// Offset of the first dex file.
    #[inline]
    pub fn dex_begin(&self) -> u64 {
        self.checksums_offset() + self.checksums_size()
    }

    /// Offset one past the last dex file.
    #[inline]
    pub fn dex_end(&self) -> u64 {
        self.dex_begin() + self.dex_size as u64
    }

    /// Offset of the verifier dependencies section.
    #[inline]
    pub fn verifier_deps_offset(&self) -> u64 {
        self.dex_end()
    }

    /// Offset one past the verifier dependencies section.
    #[inline]
    pub fn verifier_deps_end(&self) -> u64 {
        self.verifier_deps_offset() + self.verifier_deps_size as u64
    }

    /// Offset of the quickening info section.
    #[inline]
    pub fn quickening_info_offset(&self) -> u64 {
        self.verifier_deps_end()
    }

    /// Offset one past the quickening info section, i.e. the container size.
    #[inline]
    pub fn quickening_info_end(&self) -> u64 {
        self.quickening_info_offset() + self.quickening_info_size as u64
    }
}
