//! Utility functions for binary data processing.
//!
//! This module provides the primitives shared by the container, dex and
//! metadata parsers:
//! - Unaligned little-endian reads (using byteorder)
//! - Bounds-checked reads that report the failing offset
//! - ULEB128 decoding as used throughout the dex format
//! - NUL-terminated string scanning (via memchr)

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

// =============================================================================
// Fast Unaligned Reads
// =============================================================================

/// Reads a little-endian u32 from an unaligned byte slice.
///
/// # Panics
///
/// Panics if `data.len() < 4`.
#[inline(always)]
pub fn read_u32_le(data: &[u8]) -> u32 {
    LittleEndian::read_u32(data)
}

/// Reads a little-endian u16 from an unaligned byte slice.
///
/// # Panics
///
/// Panics if `data.len() < 2`.
#[inline(always)]
pub fn read_u16_le(data: &[u8]) -> u16 {
    LittleEndian::read_u16(data)
}

/// Writes a little-endian u16 into an unaligned byte slice.
#[inline(always)]
pub fn write_u16_le(data: &mut [u8], value: u16) {
    LittleEndian::write_u16(data, value)
}

// =============================================================================
// Checked Reads
// =============================================================================

/// Reads a little-endian u32 at `offset`, failing if it runs past the slice.
#[inline]
pub fn read_u32_at(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..)
        .filter(|rest| rest.len() >= 4)
        .map(read_u32_le)
        .ok_or_else(|| Error::buffer_too_small(offset.saturating_add(4), data.len()))
}

/// Reads a little-endian u16 at `offset`, failing if it runs past the slice.
#[inline]
pub fn read_u16_at(data: &[u8], offset: usize) -> Result<u16> {
    data.get(offset..)
        .filter(|rest| rest.len() >= 2)
        .map(read_u16_le)
        .ok_or_else(|| Error::buffer_too_small(offset.saturating_add(2), data.len()))
}

/// Returns `data[offset..offset + len]`, failing instead of panicking.
#[inline]
pub fn slice_at(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| Error::buffer_too_small(offset.saturating_add(len), data.len()))
}

// =============================================================================
// NUL-terminated Strings
// =============================================================================

/// Finds the position of the first null byte, or `None` if unterminated.
#[inline(always)]
pub fn find_null(data: &[u8]) -> Option<usize> {
    memchr::memchr(0, data)
}

// =============================================================================
// ULEB128
// =============================================================================

/// Reads an unsigned LEB128 value of at most 32 bits.
///
/// The dex format never encodes more than five bytes per value; anything
/// longer, or a fifth byte carrying more than four bits, is rejected.
///
/// # Returns
///
/// `(value, bytes_consumed)` or `None` if truncated or malformed.
#[inline(always)]
pub fn read_uleb128(data: &[u8]) -> Option<(u32, usize)> {
    let b0 = *data.first()?;

    // Fast path: single byte (0-127)
    if b0 < 0x80 {
        return Some((b0 as u32, 1));
    }

    let mut result: u32 = 0;
    for (i, &byte) in data.iter().take(5).enumerate() {
        if i == 4 && byte > 0x0F {
            return None;
        }
        result |= ((byte & 0x7F) as u32) << (7 * i);
        if byte < 0x80 {
            return Some((result, i + 1));
        }
    }

    None
}

/// Cursor over a byte slice that decodes ULEB128 values in sequence.
#[derive(Debug, Clone)]
pub struct UlebReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> UlebReader<'a> {
    /// Creates a reader positioned at `pos`.
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    /// Current offset into the underlying slice.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns true once every byte has been consumed.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Decodes the next value.
    pub fn read(&mut self) -> Result<u32> {
        let rest = self.data.get(self.pos..).unwrap_or(&[]);
        let (value, len) =
            read_uleb128(rest).ok_or(Error::InvalidUleb128 { offset: self.pos })?;
        self.pos += len;
        Ok(value)
    }
}
