//! Dex file binary structures.
//!
//! Only the structures the extractor touches are modelled: the header, class
//! definitions, code item headers and the id tables used to render verifier
//! dependencies.

use bitflags::bitflags;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// The first four magic bytes of every dex file.
pub const DEX_MAGIC: &[u8; 4] = b"dex\n";

/// Dex format versions accepted inside a container.
pub const DEX_MAGIC_VERSIONS: [&[u8; 4]; 4] = [b"035\0", b"037\0", b"038\0", b"039\0"];

// =============================================================================
// Header
// =============================================================================

/// The 0x70-byte dex header.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DexHeader {
    /// "dex\n" followed by a three digit version and NUL
    pub magic: [u8; 8],
    /// Adler-32 of everything after this field
    pub checksum: u32,
    /// SHA-1 of everything after this field
    pub signature: [u8; 20],
    /// Size of the whole file
    pub file_size: u32,
    /// Size of this header (0x70)
    pub header_size: u32,
    /// Endianness tag
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
}

impl DexHeader {
    /// Size of the header on disk.
    pub const SIZE: usize = 0x70;
    /// Offset of the `checksum` field.
    pub const CHECKSUM_OFFSET: usize = 8;
    /// First byte covered by the checksum.
    pub const CHECKSUM_START: usize = 12;
    /// Offset of the `file_size` field.
    pub const FILE_SIZE_OFFSET: usize = 0x20;

    /// Checks that `data` starts with a supported dex magic.
    pub fn check_magic(data: &[u8]) -> Result<()> {
        let magic: [u8; 8] = data
            .get(..8)
            .and_then(|m| m.try_into().ok())
            .ok_or_else(|| Error::buffer_too_small(8, data.len()))?;

        let version_ok = DEX_MAGIC_VERSIONS.iter().any(|v| magic[4..] == v[..]);
        if &magic[..4] != DEX_MAGIC || !version_ok {
            return Err(Error::InvalidDexMagic(magic));
        }
        Ok(())
    }

    /// Three digit format version, e.g. "035".
    pub fn version_str(&self) -> String {
        String::from_utf8_lossy(&self.magic[4..7]).into_owned()
    }
}

// =============================================================================
// Class Definitions
// =============================================================================

/// A `class_def_item`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ClassDef {
    pub class_idx: u32,
    pub access_flags: u32,
    pub superclass_idx: u32,
    pub interfaces_off: u32,
    pub source_file_idx: u32,
    pub annotations_off: u32,
    pub class_data_off: u32,
    pub static_values_off: u32,
}

impl ClassDef {
    /// Size on disk.
    pub const SIZE: usize = 32;
}

// =============================================================================
// Code Items
// =============================================================================

/// The fixed part of a `code_item`; the instructions follow it directly.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct CodeItemHeader {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    pub tries_size: u16,
    pub debug_info_off: u32,
    /// Instruction count in 16-bit code units
    pub insns_size: u32,
}

impl CodeItemHeader {
    /// Size on disk.
    pub const SIZE: usize = 16;
}

// =============================================================================
// Id Items
// =============================================================================

/// A `field_id_item`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FieldId {
    pub class_idx: u16,
    pub type_idx: u16,
    pub name_idx: u32,
}

/// A `method_id_item`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MethodId {
    pub class_idx: u16,
    pub proto_idx: u16,
    pub name_idx: u32,
}

/// A `proto_id_item`.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ProtoId {
    pub shorty_idx: u32,
    pub return_type_idx: u32,
    pub parameters_off: u32,
}

// =============================================================================
// Access Flags
// =============================================================================

bitflags! {
    /// Class, field and method access flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x1;
        const PRIVATE = 0x2;
        const PROTECTED = 0x4;
        const STATIC = 0x8;
        const FINAL = 0x10;
        const SYNCHRONIZED = 0x20;
        /// Also `BRIDGE` on methods
        const VOLATILE = 0x40;
        /// Also `VARARGS` on methods
        const TRANSIENT = 0x80;
        const NATIVE = 0x100;
        const INTERFACE = 0x200;
        const ABSTRACT = 0x400;
        const STRICT = 0x800;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x10000;
        const DECLARED_SYNCHRONIZED = 0x20000;
    }
}

impl AccessFlags {
    /// Renders the flags as Java-style modifiers, e.g. "public static".
    pub fn modifiers(self) -> String {
        const NAMES: [(AccessFlags, &str); 8] = [
            (AccessFlags::PUBLIC, "public"),
            (AccessFlags::PRIVATE, "private"),
            (AccessFlags::PROTECTED, "protected"),
            (AccessFlags::STATIC, "static"),
            (AccessFlags::FINAL, "final"),
            (AccessFlags::INTERFACE, "interface"),
            (AccessFlags::ABSTRACT, "abstract"),
            (AccessFlags::SYNTHETIC, "synthetic"),
        ];
        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(" ")
    }
}
