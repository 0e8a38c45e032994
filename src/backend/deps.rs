//! Verifier dependency decoding and dumping.
//!
//! Both revisions store one record block per dex file, in container order,
//! with every integer ULEB128 encoded:
//!
//! ```text
//! extra strings        count, NUL-terminated strings
//! assignable types     count, (destination, source) string indices
//! unassignable types   count, (destination, source) string indices
//! classes              count, (type index, access flags)
//! fields               count, (field index, access flags, declaring class)
//! methods              one or more groups, each count + (method index,
//!                      access flags, declaring class)
//! unverified classes   count, type indices
//! ```
//!
//! String indices below the dex file's `string_ids_size` refer to its own
//! string table; anything above refers to the block's extra strings. The
//! method grouping is the only layout difference between revisions and is
//! supplied by the backend as a [`DepsLayout`].

use std::io::Write;

use crate::dex::{AccessFlags, DexFile};
use crate::error::{Error, Result};
use crate::util::{find_null, read_uleb128};
use crate::vdex::VdexContext;

/// Access flags recorded for symbols the runtime could not resolve.
pub const UNRESOLVED_ACCESS_FLAGS: u16 = 0xFFFF;

// =============================================================================
// Decoded Model
// =============================================================================

/// An assignability fact between two types, both given as string indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeAssignability {
    pub destination: u32,
    pub source: u32,
}

/// Resolution of a class reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassResolution {
    pub type_idx: u16,
    pub access_flags: u16,
}

/// Resolution of a field reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldResolution {
    pub field_idx: u32,
    pub access_flags: u16,
    /// String index of the declaring class descriptor
    pub declaring_class: u32,
}

/// Method resolution kind, for revisions that record them separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodGroup {
    Direct,
    Virtual,
    Interface,
}

impl MethodGroup {
    fn label(self) -> &'static str {
        match self {
            MethodGroup::Direct => "direct",
            MethodGroup::Virtual => "virtual",
            MethodGroup::Interface => "interface",
        }
    }
}

/// Resolution of a method reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodResolution {
    pub method_idx: u32,
    pub access_flags: u16,
    /// String index of the declaring class descriptor
    pub declaring_class: u32,
    /// `None` when the revision keeps a single method set
    pub group: Option<MethodGroup>,
}

/// Verifier dependencies of one dex file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DexDeps {
    pub extra_strings: Vec<String>,
    pub assignable: Vec<TypeAssignability>,
    pub unassignable: Vec<TypeAssignability>,
    pub classes: Vec<ClassResolution>,
    pub fields: Vec<FieldResolution>,
    pub methods: Vec<MethodResolution>,
    pub unverified_classes: Vec<u16>,
}

/// Decoded verifier dependencies of a whole container.
///
/// Owned by whoever asked the backend for it and released through the
/// backend's `destroy_deps_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyInfo {
    /// One entry per dex file, in container order
    pub dex_files: Vec<DexDeps>,
}

// =============================================================================
// Decoder
// =============================================================================

/// Revision-specific record layout.
#[derive(Debug, Clone, Copy)]
pub struct DepsLayout {
    /// Method sets in encoding order
    pub method_groups: &'static [Option<MethodGroup>],
}

/// Bounded cursor over the verifier deps section.
struct DepsReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DepsReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn uleb(&mut self, what: &str) -> Result<u32> {
        let (value, len) = read_uleb128(&self.data[self.pos..])
            .ok_or_else(|| Error::deps_overrun(self.pos, format!("truncated {what}")))?;
        self.pos += len;
        Ok(value)
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let at = self.pos;
        let value = self.uleb(what)?;
        u16::try_from(value)
            .map_err(|_| Error::deps_overrun(at, format!("{what} {value:#x} exceeds 16 bits")))
    }

    /// Reads a record count, rejecting counts the rest of the section cannot
    /// possibly hold.
    fn count(&mut self, what: &str, min_record: usize) -> Result<usize> {
        let at = self.pos;
        let count = self.uleb(what)? as usize;
        if count.saturating_mul(min_record) > self.remaining() {
            return Err(Error::deps_overrun(
                at,
                format!("{count} {what} do not fit in the remaining {} bytes", self.remaining()),
            ));
        }
        Ok(count)
    }

    fn string(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let len = find_null(rest)
            .ok_or_else(|| Error::deps_overrun(self.pos, "unterminated extra string"))?;
        let s = String::from_utf8_lossy(&rest[..len]).into_owned();
        self.pos += len + 1;
        Ok(s)
    }

    fn type_set(&mut self, what: &str) -> Result<Vec<TypeAssignability>> {
        let count = self.count(what, 2)?;
        let mut set = Vec::with_capacity(count);
        for _ in 0..count {
            set.push(TypeAssignability {
                destination: self.uleb("destination type")?,
                source: self.uleb("source type")?,
            });
        }
        Ok(set)
    }

    fn dex_deps(&mut self, layout: &DepsLayout) -> Result<DexDeps> {
        let mut deps = DexDeps::default();

        let count = self.count("extra strings", 1)?;
        deps.extra_strings.reserve(count);
        for _ in 0..count {
            deps.extra_strings.push(self.string()?);
        }

        deps.assignable = self.type_set("assignable type pairs")?;
        deps.unassignable = self.type_set("unassignable type pairs")?;

        let count = self.count("class resolutions", 2)?;
        deps.classes.reserve(count);
        for _ in 0..count {
            deps.classes.push(ClassResolution {
                type_idx: self.u16("class type index")?,
                access_flags: self.u16("class access flags")?,
            });
        }

        let count = self.count("field resolutions", 3)?;
        deps.fields.reserve(count);
        for _ in 0..count {
            deps.fields.push(FieldResolution {
                field_idx: self.uleb("field index")?,
                access_flags: self.u16("field access flags")?,
                declaring_class: self.uleb("field declaring class")?,
            });
        }

        for &group in layout.method_groups {
            let count = self.count("method resolutions", 3)?;
            deps.methods.reserve(count);
            for _ in 0..count {
                deps.methods.push(MethodResolution {
                    method_idx: self.uleb("method index")?,
                    access_flags: self.u16("method access flags")?,
                    declaring_class: self.uleb("method declaring class")?,
                    group,
                });
            }
        }

        let count = self.count("unverified classes", 1)?;
        deps.unverified_classes.reserve(count);
        for _ in 0..count {
            deps.unverified_classes.push(self.u16("unverified class type index")?);
        }

        Ok(deps)
    }
}

/// Decodes the verifier deps section of `vdex`.
///
/// Returns `Ok(None)` when the section is empty.
pub fn decode(vdex: &VdexContext<'_>, layout: &DepsLayout) -> Result<Option<DependencyInfo>> {
    let section = vdex.verifier_deps();
    if section.is_empty() {
        return Ok(None);
    }

    let mut reader = DepsReader::new(section);
    let mut info = DependencyInfo {
        dex_files: Vec::with_capacity(vdex.dex_count().min(section.len() as u32) as usize),
    };
    for _ in 0..vdex.dex_count() {
        info.dex_files.push(reader.dex_deps(layout)?);
    }
    Ok(Some(info))
}

// =============================================================================
// Dump
// =============================================================================

/// Resolves string indices the way the verifier recorded them.
struct Symbols<'a, 'd> {
    dex: Option<&'a DexFile<'d>>,
    deps: &'a DexDeps,
}

impl Symbols<'_, '_> {
    fn string(&self, idx: u32) -> String {
        let dex_strings = self.dex.map_or(0, |d| d.string_count());
        if idx < dex_strings {
            if let Some(Ok(s)) = self.dex.map(|d| d.string(idx)) {
                return s;
            }
        } else if let Some(s) = self.deps.extra_strings.get((idx - dex_strings) as usize) {
            return s.clone();
        }
        format!("string@{idx}")
    }

    fn type_descriptor(&self, idx: u16) -> String {
        self.dex
            .and_then(|d| d.type_descriptor(idx as u32).ok())
            .unwrap_or_else(|| format!("type@{idx}"))
    }

    fn field(&self, idx: u32) -> String {
        self.dex
            .and_then(|d| d.field_name(idx).ok())
            .unwrap_or_else(|| format!("field@{idx}"))
    }

    fn method(&self, idx: u32) -> String {
        self.dex
            .and_then(|d| d.method_name(idx).ok())
            .unwrap_or_else(|| format!("method@{idx}"))
    }
}

fn access(flags: u16) -> String {
    if flags == UNRESOLVED_ACCESS_FLAGS {
        "unresolved".to_string()
    } else {
        format!("'{}'", AccessFlags::from_bits_retain(flags as u32).modifiers())
    }
}

/// Writes a human-readable listing of `info`.
///
/// Symbols are resolved against the container's dex files where possible;
/// indices that cannot be resolved are printed raw.
pub fn dump(vdex: &VdexContext<'_>, info: &DependencyInfo, out: &mut dyn Write) -> Result<()> {
    let dex_files: Vec<Option<DexFile<'_>>> = vdex
        .dex_files()
        .map(|entry| entry.ok().and_then(|e| DexFile::parse(e.data).ok()))
        .collect();

    writeln!(out, "------- Vdex Deps Info -------")?;
    for (i, deps) in info.dex_files.iter().enumerate() {
        let sym = Symbols {
            dex: dex_files.get(i).and_then(Option::as_ref),
            deps,
        };

        writeln!(out, "dex file #{i}")?;

        writeln!(out, " extra strings: {}", deps.extra_strings.len())?;
        for (j, s) in deps.extra_strings.iter().enumerate() {
            writeln!(out, "  {j:04}: '{s}'")?;
        }

        for (set, verb, label) in [
            (&deps.assignable, "must", "assignable type sets"),
            (&deps.unassignable, "must not", "unassignable type sets"),
        ] {
            writeln!(out, " {label}: {}", set.len())?;
            for pair in set {
                writeln!(
                    out,
                    "  type '{}' {verb} be assignable to '{}'",
                    sym.string(pair.destination),
                    sym.string(pair.source)
                )?;
            }
        }

        writeln!(out, " class dependencies: {}", deps.classes.len())?;
        for class in &deps.classes {
            writeln!(
                out,
                "  '{}' {}",
                sym.type_descriptor(class.type_idx),
                access(class.access_flags)
            )?;
        }

        writeln!(out, " field dependencies: {}", deps.fields.len())?;
        for field in &deps.fields {
            if field.access_flags == UNRESOLVED_ACCESS_FLAGS {
                writeln!(out, "  {} is expected to be unresolved", sym.field(field.field_idx))?;
            } else {
                writeln!(
                    out,
                    "  {} is expected to be in class '{}' with access flags {}",
                    sym.field(field.field_idx),
                    sym.string(field.declaring_class),
                    access(field.access_flags)
                )?;
            }
        }

        writeln!(out, " method dependencies: {}", deps.methods.len())?;
        for method in &deps.methods {
            let group = method
                .group
                .map(|g| format!(" ({})", g.label()))
                .unwrap_or_default();
            if method.access_flags == UNRESOLVED_ACCESS_FLAGS {
                writeln!(
                    out,
                    "  {}{group} is expected to be unresolved",
                    sym.method(method.method_idx)
                )?;
            } else {
                writeln!(
                    out,
                    "  {}{group} is expected to be in class '{}' with access flags {}",
                    sym.method(method.method_idx),
                    sym.string(method.declaring_class),
                    access(method.access_flags)
                )?;
            }
        }

        writeln!(out, " unverified classes: {}", deps.unverified_classes.len())?;
        for &type_idx in &deps.unverified_classes {
            writeln!(out, "  '{}'", sym.type_descriptor(type_idx))?;
        }
    }
    writeln!(out, "------------------------------")?;
    Ok(())
}
