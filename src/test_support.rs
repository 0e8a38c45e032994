//! Byte-level fixtures for unit tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::converter::{OutputKind, OutputSink};
use crate::dex::DexHeader;
use crate::error::Result;
use crate::vdex::VdexHeader;

/// Index value meaning "none" in class definitions.
const NO_INDEX: u32 = 0xFFFF_FFFF;

/// Appends `value` as ULEB128.
pub fn uleb(out: &mut Vec<u8>, mut value: u32) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Encodes a list of values as consecutive ULEB128s.
pub fn ulebs(values: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    for &v in values {
        uleb(&mut out, v);
    }
    out
}

/// Flattens 16-bit code units into little-endian bytes.
pub fn code_units(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Builds a container with location checksums `0x1000 + i`.
pub fn build_vdex(version: &[u8; 4], dexes: &[&[u8]], deps: &[u8], quickening: &[u8]) -> Vec<u8> {
    let dex_size: usize = dexes.iter().map(|d| d.len()).sum();
    let mut out = Vec::new();
    out.extend_from_slice(b"vdex");
    out.extend_from_slice(version);
    out.extend_from_slice(&(dexes.len() as u32).to_le_bytes());
    out.extend_from_slice(&(dex_size as u32).to_le_bytes());
    out.extend_from_slice(&(deps.len() as u32).to_le_bytes());
    out.extend_from_slice(&(quickening.len() as u32).to_le_bytes());
    assert_eq!(out.len(), VdexHeader::SIZE);
    for i in 0..dexes.len() {
        out.extend_from_slice(&(0x1000 + i as u32).to_le_bytes());
    }
    for dex in dexes {
        out.extend_from_slice(dex);
    }
    out.extend_from_slice(deps);
    out.extend_from_slice(quickening);
    out
}

/// A dex file with no classes, padded with `seed` so files differ.
pub fn minimal_dex(seed: u8) -> Vec<u8> {
    let mut data = DexBuilder::new().build();
    data.extend_from_slice(&[seed; 16]);
    let size = data.len() as u32;
    data[DexHeader::FILE_SIZE_OFFSET..DexHeader::FILE_SIZE_OFFSET + 4]
        .copy_from_slice(&size.to_le_bytes());
    data
}

/// Sequential (revision 006) quickening record for one method.
pub fn v6_record(entries: &[(u32, u32)]) -> Vec<u8> {
    let payload = quickening_entries(entries);
    let mut out = (payload.len() as u32).to_le_bytes().to_vec();
    out.extend_from_slice(&payload);
    out
}

/// ULEB128 `(dex_pc, value)` pairs.
pub fn quickening_entries(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut out = Vec::new();
    for &(pc, value) in entries {
        uleb(&mut out, pc);
        uleb(&mut out, value);
    }
    out
}

/// Table-based (revision 010) quickening region.
///
/// `per_dex[i]` lists `(code_item_offset, entries)` for dex file `i`.
pub fn v10_region(per_dex: &[Vec<(u32, Vec<(u32, u32)>)>]) -> Vec<u8> {
    let mut blobs = Vec::new();
    let mut pairs: Vec<Vec<(u32, u32)>> = Vec::new();
    for methods in per_dex {
        let mut dex_pairs = Vec::new();
        for (code_off, entries) in methods {
            let payload = quickening_entries(entries);
            dex_pairs.push((*code_off, blobs.len() as u32));
            blobs.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            blobs.extend_from_slice(&payload);
        }
        pairs.push(dex_pairs);
    }

    let mut out = blobs;
    let mut starts = Vec::new();
    for dex_pairs in &pairs {
        starts.push(out.len() as u32);
        for (code_off, data_off) in dex_pairs {
            out.extend_from_slice(&code_off.to_le_bytes());
            out.extend_from_slice(&data_off.to_le_bytes());
        }
    }
    for start in starts {
        out.extend_from_slice(&start.to_le_bytes());
    }
    out
}

/// Collects output in memory.
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<Vec<(OutputKind, Vec<u8>)>>,
}

impl MemorySink {
    /// Drains everything written so far.
    pub fn take(&self) -> Vec<(OutputKind, Vec<u8>)> {
        std::mem::take(&mut *self.files.lock().unwrap())
    }
}

impl OutputSink for MemorySink {
    fn write(&self, _source: &Path, kind: OutputKind, data: &[u8]) -> Result<PathBuf> {
        self.files.lock().unwrap().push((kind, data.to_vec()));
        Ok(PathBuf::from(format!("{kind:?}")))
    }
}

// =============================================================================
// Dex Builder
// =============================================================================

struct Method {
    method_idx: u32,
    flags: u32,
    insns: Option<Vec<u16>>,
}

struct Class {
    type_idx: u32,
    fields: Vec<u32>,
    direct: Vec<Method>,
    virtuals: Vec<Method>,
}

/// Builds small but structurally valid dex files.
///
/// Every method has prototype `()V`. Strings and types are interned in
/// insertion order.
pub struct DexBuilder {
    strings: Vec<String>,
    types: Vec<u32>,
    fields: Vec<(u16, u16, u32)>,
    methods: Vec<(u16, u32)>,
    classes: Vec<Class>,
    /// Code item offset of every method with code, in build order
    pub code_offsets: Vec<u32>,
}

impl DexBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            strings: Vec::new(),
            types: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            classes: Vec::new(),
            code_offsets: Vec::new(),
        };
        builder.type_idx("V");
        builder
    }

    pub fn string_idx(&mut self, s: &str) -> u32 {
        if let Some(i) = self.strings.iter().position(|x| x == s) {
            return i as u32;
        }
        self.strings.push(s.to_string());
        (self.strings.len() - 1) as u32
    }

    pub fn type_idx(&mut self, descriptor: &str) -> u32 {
        let string = self.string_idx(descriptor);
        if let Some(i) = self.types.iter().position(|&x| x == string) {
            return i as u32;
        }
        self.types.push(string);
        (self.types.len() - 1) as u32
    }

    /// Adds a class and returns its handle.
    pub fn class(&mut self, descriptor: &str) -> usize {
        let type_idx = self.type_idx(descriptor);
        self.classes.push(Class {
            type_idx,
            fields: Vec::new(),
            direct: Vec::new(),
            virtuals: Vec::new(),
        });
        self.classes.len() - 1
    }

    /// Adds an instance field and returns its field index.
    pub fn field(&mut self, class: usize, name: &str, ty: &str) -> u32 {
        let class_type = self.classes[class].type_idx as u16;
        let type_idx = self.type_idx(ty) as u16;
        let name_idx = self.string_idx(name);
        self.fields.push((class_type, type_idx, name_idx));
        let idx = (self.fields.len() - 1) as u32;
        self.classes[class].fields.push(idx);
        idx
    }

    fn method(&mut self, class: usize, name: &str) -> u32 {
        let class_type = self.classes[class].type_idx as u16;
        let name_idx = self.string_idx(name);
        self.methods.push((class_type, name_idx));
        (self.methods.len() - 1) as u32
    }

    pub fn direct_method(&mut self, class: usize, name: &str, insns: &[u16]) -> u32 {
        let method_idx = self.method(class, name);
        self.classes[class].direct.push(Method {
            method_idx,
            flags: 0x10001,
            insns: Some(insns.to_vec()),
        });
        method_idx
    }

    pub fn virtual_method(&mut self, class: usize, name: &str, insns: &[u16]) -> u32 {
        let method_idx = self.method(class, name);
        self.classes[class].virtuals.push(Method {
            method_idx,
            flags: 0x1,
            insns: Some(insns.to_vec()),
        });
        method_idx
    }

    pub fn abstract_method(&mut self, class: usize, name: &str) -> u32 {
        let method_idx = self.method(class, name);
        self.classes[class].virtuals.push(Method {
            method_idx,
            flags: 0x401,
            insns: None,
        });
        method_idx
    }

    pub fn build(&mut self) -> Vec<u8> {
        let shorty = self.string_idx("V");
        let string_ids_off = DexHeader::SIZE;
        let type_ids_off = string_ids_off + 4 * self.strings.len();
        let proto_ids_off = type_ids_off + 4 * self.types.len();
        let field_ids_off = proto_ids_off + 12;
        let method_ids_off = field_ids_off + 8 * self.fields.len();
        let class_defs_off = method_ids_off + 8 * self.methods.len();
        let data_off = class_defs_off + 32 * self.classes.len();

        let mut out = vec![0u8; data_off];
        let put32 = |out: &mut Vec<u8>, at: usize, v: u32| {
            out[at..at + 4].copy_from_slice(&v.to_le_bytes())
        };
        let put16 = |out: &mut Vec<u8>, at: usize, v: u16| {
            out[at..at + 2].copy_from_slice(&v.to_le_bytes())
        };

        for (i, s) in self.strings.iter().enumerate() {
            let at = out.len() as u32;
            put32(&mut out, string_ids_off + 4 * i, at);
            uleb(&mut out, s.len() as u32);
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        for (i, &string) in self.types.iter().enumerate() {
            put32(&mut out, type_ids_off + 4 * i, string);
        }
        // ()V
        put32(&mut out, proto_ids_off, shorty);
        put32(&mut out, proto_ids_off + 4, 0);
        put32(&mut out, proto_ids_off + 8, 0);
        for (i, &(class, ty, name)) in self.fields.iter().enumerate() {
            put16(&mut out, field_ids_off + 8 * i, class);
            put16(&mut out, field_ids_off + 8 * i + 2, ty);
            put32(&mut out, field_ids_off + 8 * i + 4, name);
        }
        for (i, &(class, name)) in self.methods.iter().enumerate() {
            put16(&mut out, method_ids_off + 8 * i, class);
            put16(&mut out, method_ids_off + 8 * i + 2, 0);
            put32(&mut out, method_ids_off + 8 * i + 4, name);
        }

        // Code items, then class data
        self.code_offsets.clear();
        let mut code_offs: Vec<Vec<u32>> = Vec::new();
        for class in &self.classes {
            let mut offs = Vec::new();
            for method in class.direct.iter().chain(&class.virtuals) {
                let Some(insns) = &method.insns else {
                    offs.push(0);
                    continue;
                };
                while out.len() % 4 != 0 {
                    out.push(0);
                }
                let off = out.len() as u32;
                offs.push(off);
                self.code_offsets.push(off);
                out.extend_from_slice(&1u16.to_le_bytes()); // registers
                out.extend_from_slice(&1u16.to_le_bytes()); // ins
                out.extend_from_slice(&0u16.to_le_bytes()); // outs
                out.extend_from_slice(&0u16.to_le_bytes()); // tries
                out.extend_from_slice(&0u32.to_le_bytes()); // debug info
                out.extend_from_slice(&(insns.len() as u32).to_le_bytes());
                out.extend_from_slice(&code_units(insns));
            }
            code_offs.push(offs);
        }

        for (ci, class) in self.classes.iter().enumerate() {
            let def = class_defs_off + 32 * ci;
            put32(&mut out, def, class.type_idx);
            put32(&mut out, def + 4, 0x1);
            put32(&mut out, def + 8, NO_INDEX);
            put32(&mut out, def + 16, NO_INDEX);

            let class_data = out.len() as u32;
            put32(&mut out, def + 24, class_data);
            uleb(&mut out, 0);
            uleb(&mut out, class.fields.len() as u32);
            uleb(&mut out, class.direct.len() as u32);
            uleb(&mut out, class.virtuals.len() as u32);
            let mut prev = 0;
            for &field in &class.fields {
                uleb(&mut out, field - prev);
                uleb(&mut out, 0x1);
                prev = field;
            }
            let mut code = code_offs[ci].iter();
            for list in [&class.direct, &class.virtuals] {
                let mut prev = 0;
                for method in list.iter() {
                    uleb(&mut out, method.method_idx - prev);
                    uleb(&mut out, method.flags);
                    uleb(&mut out, code.next().copied().unwrap_or(0));
                    prev = method.method_idx;
                }
            }
        }

        let file_size = out.len() as u32;
        let data_size = out.len() - data_off;
        out[..8].copy_from_slice(b"dex\n035\0");
        put32(&mut out, 0x20, file_size);
        put32(&mut out, 0x24, DexHeader::SIZE as u32);
        put32(&mut out, 0x28, 0x12345678);
        let tables = [
            (self.strings.len(), string_ids_off),
            (self.types.len(), type_ids_off),
            (1, proto_ids_off),
            (self.fields.len(), field_ids_off),
            (self.methods.len(), method_ids_off),
            (self.classes.len(), class_defs_off),
            (data_size, data_off),
        ];
        for (i, (size, off)) in tables.iter().enumerate() {
            put32(&mut out, 0x38 + 8 * i, *size as u32);
            put32(&mut out, 0x3c + 8 * i, *off as u32);
        }
        let checksum = adler::adler32_slice(&out[DexHeader::CHECKSUM_START..]);
        put32(&mut out, DexHeader::CHECKSUM_OFFSET, checksum);
        out
    }
}
