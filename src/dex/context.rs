//! Read-only view over an embedded dex file.

use zerocopy::FromBytes;

use super::structs::*;
use crate::error::{Error, Result};
use crate::util::{find_null, read_u16_at, read_u32_at, slice_at, UlebReader};

// =============================================================================
// Class Data
// =============================================================================

/// Which method list of a class a method was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Static, private or constructor
    Direct,
    /// Overridable
    Virtual,
}

/// A method entry decoded from `class_data_item`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassMethod {
    /// Absolute `method_ids` index
    pub method_idx: u32,
    /// Raw access flags
    pub access_flags: u32,
    /// Offset of the code item, 0 for abstract and native methods
    pub code_off: u32,
    /// Declaring list
    pub kind: MethodKind,
}

/// A located code item.
#[derive(Debug, Clone, Copy)]
pub struct CodeItem {
    /// Offset of the code item in the dex file
    pub offset: usize,
    /// Parsed fixed header
    pub header: CodeItemHeader,
}

impl CodeItem {
    /// Offset of the first instruction.
    #[inline]
    pub fn insns_offset(&self) -> usize {
        self.offset + CodeItemHeader::SIZE
    }

    /// Length of the instruction stream in bytes.
    #[inline]
    pub fn insns_len(&self) -> usize {
        self.header.insns_size as usize * 2
    }

    /// Byte range of the instruction stream within the dex file.
    #[inline]
    pub fn insns_range(&self) -> std::ops::Range<usize> {
        self.insns_offset()..self.insns_offset() + self.insns_len()
    }
}

/// A method together with its code.
#[derive(Debug, Clone, Copy)]
pub struct MethodCode {
    /// The class data entry
    pub method: ClassMethod,
    /// Its code item
    pub code: CodeItem,
}

// =============================================================================
// Dex File
// =============================================================================

/// A parsed dex file borrowing its bytes.
#[derive(Debug, Clone, Copy)]
pub struct DexFile<'a> {
    data: &'a [u8],
    /// Parsed header
    pub header: DexHeader,
}

impl<'a> DexFile<'a> {
    /// Parses the header of the dex file at the start of `data`.
    ///
    /// The view is truncated to the declared `file_size`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if data.len() < DexHeader::SIZE {
            return Err(Error::buffer_too_small(DexHeader::SIZE, data.len()));
        }
        DexHeader::check_magic(data)?;

        let header = DexHeader::read_from_prefix(data)
            .map_err(|_| Error::parse(0, "failed to parse dex header"))?
            .0;

        let file_size = header.file_size as usize;
        if file_size < DexHeader::SIZE || file_size > data.len() {
            return Err(Error::parse(
                DexHeader::FILE_SIZE_OFFSET,
                format!("dex file_size {file_size:#x} out of range"),
            ));
        }

        Ok(Self {
            data: &data[..file_size],
            header,
        })
    }

    /// The file bytes.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    fn read_item<T: FromBytes>(&self, offset: usize, what: &str) -> Result<T> {
        let bytes = slice_at(self.data, offset, std::mem::size_of::<T>())?;
        T::read_from_bytes(bytes).map_err(|_| Error::parse(offset, format!("failed to parse {what}")))
    }

    fn table_offset(base: u32, index: u32, size: u32, entry: usize, what: &str) -> Result<usize> {
        if index >= size {
            return Err(Error::parse(
                base as usize,
                format!("{what} index {index} out of bounds (size: {size})"),
            ));
        }
        Ok(base as usize + index as usize * entry)
    }

    // ==================== Classes ====================

    /// Number of class definitions.
    #[inline]
    pub fn class_count(&self) -> u32 {
        self.header.class_defs_size
    }

    /// Returns class definition `index`.
    pub fn class_def(&self, index: u32) -> Result<ClassDef> {
        let h = &self.header;
        let offset =
            Self::table_offset(h.class_defs_off, index, h.class_defs_size, ClassDef::SIZE, "class_def")?;
        self.read_item(offset, "class_def")
    }

    /// Decodes the method lists of a class, direct methods first.
    pub fn class_methods(&self, class: &ClassDef) -> Result<Vec<ClassMethod>> {
        if class.class_data_off == 0 {
            return Ok(Vec::new());
        }

        let mut reader = UlebReader::new(self.data, class.class_data_off as usize);
        let static_fields = reader.read()?;
        let instance_fields = reader.read()?;
        let direct_methods = reader.read()?;
        let virtual_methods = reader.read()?;

        for _ in 0..static_fields as u64 + instance_fields as u64 {
            reader.read()?;
            reader.read()?;
        }

        let mut methods = Vec::new();
        for (count, kind) in [
            (direct_methods, MethodKind::Direct),
            (virtual_methods, MethodKind::Virtual),
        ] {
            let mut method_idx = 0u32;
            for _ in 0..count {
                let diff = reader.read()?;
                method_idx = method_idx.wrapping_add(diff);
                let access_flags = reader.read()?;
                let code_off = reader.read()?;
                methods.push(ClassMethod {
                    method_idx,
                    access_flags,
                    code_off,
                    kind,
                });
            }
        }

        Ok(methods)
    }

    /// Locates and bounds checks the code item at `code_off`.
    pub fn code_item(&self, code_off: u32) -> Result<CodeItem> {
        let offset = code_off as usize;
        let header: CodeItemHeader = self.read_item(offset, "code_item")?;
        let item = CodeItem { offset, header };
        slice_at(self.data, item.insns_offset(), item.insns_len())?;
        Ok(item)
    }

    /// Every method with code, in class definition order with direct methods
    /// before virtual ones.
    ///
    /// This is the order the runtime walks methods when it lays out
    /// sequential quickening info.
    pub fn methods_with_code(&self) -> Result<Vec<MethodCode>> {
        let mut out = Vec::new();
        for i in 0..self.class_count() {
            let class = self.class_def(i)?;
            for method in self.class_methods(&class)? {
                if method.code_off == 0 {
                    continue;
                }
                out.push(MethodCode {
                    method,
                    code: self.code_item(method.code_off)?,
                });
            }
        }
        Ok(out)
    }

    // ==================== Symbols ====================

    /// Number of entries in `string_ids`.
    #[inline]
    pub fn string_count(&self) -> u32 {
        self.header.string_ids_size
    }

    /// Returns string `index`, decoded lossily from MUTF-8.
    pub fn string(&self, index: u32) -> Result<String> {
        let h = &self.header;
        let id_off = Self::table_offset(h.string_ids_off, index, h.string_ids_size, 4, "string_id")?;
        let data_off = read_u32_at(self.data, id_off)? as usize;

        // Skip the utf16 length prefix
        let mut reader = UlebReader::new(self.data, data_off);
        reader.read()?;
        let start = reader.position();

        let rest = &self.data[start..];
        let len = find_null(rest).ok_or_else(|| Error::parse(start, "unterminated string"))?;
        Ok(String::from_utf8_lossy(&rest[..len]).into_owned())
    }

    /// Returns the descriptor of type `index`, e.g. "Ljava/lang/Object;".
    pub fn type_descriptor(&self, index: u32) -> Result<String> {
        let h = &self.header;
        let offset = Self::table_offset(h.type_ids_off, index, h.type_ids_size, 4, "type_id")?;
        self.string(read_u32_at(self.data, offset)?)
    }

    /// Returns field id `index`.
    pub fn field_id(&self, index: u32) -> Result<FieldId> {
        let h = &self.header;
        let offset = Self::table_offset(h.field_ids_off, index, h.field_ids_size, 8, "field_id")?;
        self.read_item(offset, "field_id")
    }

    /// Returns method id `index`.
    pub fn method_id(&self, index: u32) -> Result<MethodId> {
        let h = &self.header;
        let offset = Self::table_offset(h.method_ids_off, index, h.method_ids_size, 8, "method_id")?;
        self.read_item(offset, "method_id")
    }

    /// Renders field `index` as `Lcls;->name:Ltype;`.
    pub fn field_name(&self, index: u32) -> Result<String> {
        let field = self.field_id(index)?;
        Ok(format!(
            "{}->{}:{}",
            self.type_descriptor(field.class_idx as u32)?,
            self.string(field.name_idx)?,
            self.type_descriptor(field.type_idx as u32)?
        ))
    }

    /// Renders method `index` as `Lcls;->name(params)ret`.
    pub fn method_name(&self, index: u32) -> Result<String> {
        let method = self.method_id(index)?;
        Ok(format!(
            "{}->{}{}",
            self.type_descriptor(method.class_idx as u32)?,
            self.string(method.name_idx)?,
            self.proto_signature(method.proto_idx as u32)?
        ))
    }

    /// Renders prototype `index` as `(params)ret`.
    pub fn proto_signature(&self, index: u32) -> Result<String> {
        let h = &self.header;
        let offset = Self::table_offset(h.proto_ids_off, index, h.proto_ids_size, 12, "proto_id")?;
        let proto: ProtoId = self.read_item(offset, "proto_id")?;

        let mut sig = String::from("(");
        if proto.parameters_off != 0 {
            let list = proto.parameters_off as usize;
            let size = read_u32_at(self.data, list)?;
            for i in 0..size as usize {
                let type_idx = read_u16_at(self.data, list + 4 + i * 2)?;
                sig.push_str(&self.type_descriptor(type_idx as u32)?);
            }
        }
        sig.push(')');
        sig.push_str(&self.type_descriptor(proto.return_type_idx)?);
        Ok(sig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{minimal_dex, DexBuilder};

    #[test]
    fn test_parse_minimal() {
        let data = minimal_dex(0);
        let dex = DexFile::parse(&data).unwrap();
        assert_eq!(dex.header.file_size as usize, data.len());
        assert_eq!(dex.class_count(), 0);
        assert!(dex.methods_with_code().unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_bad_size() {
        let mut data = minimal_dex(0);
        let too_big = (data.len() + 1) as u32;
        data[0x20..0x24].copy_from_slice(&too_big.to_le_bytes());
        assert!(matches!(DexFile::parse(&data), Err(Error::Parse { .. })));
        assert!(matches!(
            DexFile::parse(&data[..0x20]),
            Err(Error::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_methods_with_code_order() {
        let mut builder = DexBuilder::new();
        let a = builder.class("LA;");
        builder.direct_method(a, "<init>", &[0x000e]);
        builder.abstract_method(a, "skip");
        builder.virtual_method(a, "run", &[0x0000, 0x000e]);
        let b = builder.class("LB;");
        builder.virtual_method(b, "go", &[0x000e]);
        let data = builder.build();

        let dex = DexFile::parse(&data).unwrap();
        let methods = dex.methods_with_code().unwrap();
        let names: Vec<_> = methods
            .iter()
            .map(|m| dex.method_name(m.method.method_idx).unwrap())
            .collect();
        assert_eq!(names, ["LA;-><init>()V", "LA;->run()V", "LB;->go()V"]);
        assert_eq!(methods[0].method.kind, MethodKind::Direct);
        assert_eq!(methods[1].method.kind, MethodKind::Virtual);
        assert_eq!(methods[1].code.header.insns_size, 2);
        assert_eq!(
            &data[methods[1].code.insns_range()],
            &[0x00, 0x00, 0x0e, 0x00]
        );
    }

    #[test]
    fn test_symbols() {
        let mut builder = DexBuilder::new();
        let a = builder.class("LA;");
        builder.field(a, "count", "I");
        let data = builder.build();

        let dex = DexFile::parse(&data).unwrap();
        assert_eq!(dex.field_name(0).unwrap(), "LA;->count:I");
        assert!(dex.string(dex.string_count()).is_err());
        assert!(dex.field_id(1).is_err());
    }
}
