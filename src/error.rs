//! Error types for the Vdex extractor.
//!
//! Covers container validation, region bounds, verifier-dependency decoding,
//! quickening synchronization, checksum patching and output handling.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for Vdex processing operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write output file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output file '{path}' already exists (overwrite not allowed)")]
    OutputExists { path: PathBuf },

    // ==================== Container Errors ====================
    #[error("invalid vdex magic: expected 'vdex', got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported vdex version: {}", String::from_utf8_lossy(.0).trim_end_matches('\0'))]
    UnsupportedVersion([u8; 4]),

    #[error("truncated container: declared sections need {needed} bytes, have {available}")]
    TruncatedBuffer { needed: u64, available: usize },

    #[error("dex file at {offset:#x} ends at {end:#x}, past the dex section end {region_end:#x}")]
    RegionBoundaryViolation {
        offset: usize,
        end: u64,
        region_end: u64,
    },

    #[error("no backend available for vdex version {0:?}")]
    BackendUnavailable([u8; 4]),

    // ==================== Metadata Errors ====================
    #[error("verifier deps record overrun at offset {offset:#x}: {reason}")]
    DependencyRecordOverrun { offset: usize, reason: String },

    #[error("quickening info out of sync at dex pc {dex_pc:#x}: {reason}")]
    QuickeningSyncMismatch { dex_pc: u32, reason: String },

    // ==================== Checksum Errors ====================
    #[error("checksum count mismatch: container has {expected} dex files, got {actual} values")]
    ChecksumCountMismatch { expected: u32, actual: usize },

    #[error("invalid checksum list at line {line}: '{text}'")]
    InvalidChecksumList { line: usize, text: String },

    // ==================== Dex Errors ====================
    #[error("invalid dex magic: {0:02x?}")]
    InvalidDexMagic([u8; 8]),

    #[error("invalid ULEB128 at offset {offset:#x}")]
    InvalidUleb128 { offset: usize },

    // ==================== Parse Errors ====================
    #[error("parse error at offset {offset:#x}: {reason}")]
    Parse { offset: usize, reason: String },

    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// A specialized Result type for Vdex operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns true if this error is handled below the container level.
    ///
    /// A quickening mismatch only costs the affected dex file its rewrite:
    /// the original bytes are emitted instead.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::QuickeningSyncMismatch { .. })
    }

    /// Returns true if this error reflects an internal inconsistency rather
    /// than bad input, and must stop the whole run.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::BackendUnavailable(_))
    }

    /// Creates a parse error with a formatted message.
    #[inline]
    pub fn parse(offset: usize, reason: impl Into<String>) -> Self {
        Error::Parse {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a buffer too small error.
    #[inline]
    pub fn buffer_too_small(needed: usize, available: usize) -> Self {
        Error::BufferTooSmall { needed, available }
    }

    /// Creates a verifier deps overrun error.
    #[inline]
    pub fn deps_overrun(offset: usize, reason: impl Into<String>) -> Self {
        Error::DependencyRecordOverrun {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a quickening synchronization error.
    #[inline]
    pub fn quickening(dex_pc: u32, reason: impl Into<String>) -> Self {
        Error::QuickeningSyncMismatch {
            dex_pc,
            reason: reason.into(),
        }
    }
}
