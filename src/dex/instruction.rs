//! Dalvik instruction encoding.
//!
//! Only what the unquickener needs: opcode values, instruction formats (and
//! therefore widths), payload pseudo-instructions and mnemonic names for the
//! disassembly listing. Instructions are addressed in 16-bit code units; the
//! low byte of the first unit is the opcode.

use crate::error::{Error, Result};
use crate::util::read_u16_le;

// =============================================================================
// Opcodes
// =============================================================================

pub const NOP: u8 = 0x00;
pub const RETURN_VOID: u8 = 0x0e;
pub const CHECK_CAST: u8 = 0x1f;

pub const IGET: u8 = 0x52;
pub const IGET_WIDE: u8 = 0x53;
pub const IGET_OBJECT: u8 = 0x54;
pub const IGET_BOOLEAN: u8 = 0x55;
pub const IGET_BYTE: u8 = 0x56;
pub const IGET_CHAR: u8 = 0x57;
pub const IGET_SHORT: u8 = 0x58;
pub const IPUT: u8 = 0x59;
pub const IPUT_WIDE: u8 = 0x5a;
pub const IPUT_OBJECT: u8 = 0x5b;
pub const IPUT_BOOLEAN: u8 = 0x5c;
pub const IPUT_BYTE: u8 = 0x5d;
pub const IPUT_CHAR: u8 = 0x5e;
pub const IPUT_SHORT: u8 = 0x5f;
pub const INVOKE_VIRTUAL: u8 = 0x6e;
pub const RETURN_VOID_NO_BARRIER: u8 = 0x73;
pub const INVOKE_VIRTUAL_RANGE: u8 = 0x74;

pub const IGET_QUICK: u8 = 0xe3;
pub const IGET_WIDE_QUICK: u8 = 0xe4;
pub const IGET_OBJECT_QUICK: u8 = 0xe5;
pub const IPUT_QUICK: u8 = 0xe6;
pub const IPUT_WIDE_QUICK: u8 = 0xe7;
pub const IPUT_OBJECT_QUICK: u8 = 0xe8;
pub const INVOKE_VIRTUAL_QUICK: u8 = 0xe9;
pub const INVOKE_VIRTUAL_RANGE_QUICK: u8 = 0xea;
pub const IPUT_BOOLEAN_QUICK: u8 = 0xeb;
pub const IPUT_BYTE_QUICK: u8 = 0xec;
pub const IPUT_CHAR_QUICK: u8 = 0xed;
pub const IPUT_SHORT_QUICK: u8 = 0xee;
pub const IGET_BOOLEAN_QUICK: u8 = 0xef;
pub const IGET_BYTE_QUICK: u8 = 0xf0;
pub const IGET_CHAR_QUICK: u8 = 0xf1;
pub const IGET_SHORT_QUICK: u8 = 0xf2;

/// Payload identifiers carried in a NOP unit.
pub const PACKED_SWITCH_PAYLOAD: u16 = 0x0100;
pub const SPARSE_SWITCH_PAYLOAD: u16 = 0x0200;
pub const FILL_ARRAY_DATA_PAYLOAD: u16 = 0x0300;

/// Returns the standard opcode a quickened opcode was specialized from.
///
/// The operand slot is unit 1 in every case, so the rewrite never changes the
/// instruction width.
pub const fn dequickened(op: u8) -> Option<u8> {
    Some(match op {
        IGET_QUICK => IGET,
        IGET_WIDE_QUICK => IGET_WIDE,
        IGET_OBJECT_QUICK => IGET_OBJECT,
        IGET_BOOLEAN_QUICK => IGET_BOOLEAN,
        IGET_BYTE_QUICK => IGET_BYTE,
        IGET_CHAR_QUICK => IGET_CHAR,
        IGET_SHORT_QUICK => IGET_SHORT,
        IPUT_QUICK => IPUT,
        IPUT_WIDE_QUICK => IPUT_WIDE,
        IPUT_OBJECT_QUICK => IPUT_OBJECT,
        IPUT_BOOLEAN_QUICK => IPUT_BOOLEAN,
        IPUT_BYTE_QUICK => IPUT_BYTE,
        IPUT_CHAR_QUICK => IPUT_CHAR,
        IPUT_SHORT_QUICK => IPUT_SHORT,
        INVOKE_VIRTUAL_QUICK => INVOKE_VIRTUAL,
        INVOKE_VIRTUAL_RANGE_QUICK => INVOKE_VIRTUAL_RANGE,
        _ => return None,
    })
}

// =============================================================================
// Formats
// =============================================================================

/// Instruction formats, named as in the Dalvik bytecode reference.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    F10x,
    F12x,
    F11n,
    F11x,
    F10t,
    F20t,
    F22x,
    F21t,
    F21s,
    F21h,
    F21c,
    F23x,
    F22b,
    F22t,
    F22s,
    F22c,
    F30t,
    F32x,
    F31i,
    F31t,
    F31c,
    F35c,
    F3rc,
    F45cc,
    F4rcc,
    F51l,
}

impl Format {
    /// Width in 16-bit code units.
    pub const fn units(self) -> usize {
        match self {
            Format::F10x | Format::F12x | Format::F11n | Format::F11x | Format::F10t => 1,
            Format::F20t
            | Format::F22x
            | Format::F21t
            | Format::F21s
            | Format::F21h
            | Format::F21c
            | Format::F23x
            | Format::F22b
            | Format::F22t
            | Format::F22s
            | Format::F22c => 2,
            Format::F30t
            | Format::F32x
            | Format::F31i
            | Format::F31t
            | Format::F31c
            | Format::F35c
            | Format::F3rc => 3,
            Format::F45cc | Format::F4rcc => 4,
            Format::F51l => 5,
        }
    }
}

/// Returns the format of `op`. Unused opcodes decode as `10x`.
pub const fn format(op: u8) -> Format {
    match op {
        0x00 | 0x0e | 0x3e..=0x43 | 0x73 | 0x79 | 0x7a | 0xf3..=0xf9 => Format::F10x,
        0x01 | 0x04 | 0x07 | 0x21 | 0x7b..=0x8f | 0xb0..=0xcf => Format::F12x,
        0x02 | 0x05 | 0x08 => Format::F22x,
        0x03 | 0x06 | 0x09 => Format::F32x,
        0x0a..=0x0d | 0x0f..=0x11 | 0x1d | 0x1e | 0x27 => Format::F11x,
        0x12 => Format::F11n,
        0x13 | 0x16 => Format::F21s,
        0x14 | 0x17 => Format::F31i,
        0x15 | 0x19 => Format::F21h,
        0x18 => Format::F51l,
        0x1a | 0x1c | 0x1f | 0x22 | 0x60..=0x6d | 0xfe | 0xff => Format::F21c,
        0x1b => Format::F31c,
        0x20 | 0x23 | 0x52..=0x5f | 0xe3..=0xe8 | 0xeb..=0xf2 => Format::F22c,
        0x24 | 0x6e..=0x72 | 0xe9 | 0xfc => Format::F35c,
        0x25 | 0x74..=0x78 | 0xea | 0xfd => Format::F3rc,
        0x26 | 0x2b | 0x2c => Format::F31t,
        0x28 => Format::F10t,
        0x29 => Format::F20t,
        0x2a => Format::F30t,
        0x2d..=0x31 | 0x44..=0x51 | 0x90..=0xaf => Format::F23x,
        0x32..=0x37 => Format::F22t,
        0x38..=0x3d => Format::F21t,
        0xd0..=0xd7 => Format::F22s,
        0xd8..=0xe2 => Format::F22b,
        0xfa => Format::F45cc,
        0xfb => Format::F4rcc,
    }
}

/// Width in code units of the instruction starting at unit `pc`.
///
/// `insns` is the whole instruction stream of a method. Payload
/// pseudo-instructions are sized from their headers. Fails if the
/// instruction would run past the end of the stream.
pub fn width_at(insns: &[u8], pc: usize) -> Result<usize> {
    let units = insns.len() / 2;
    let unit = |i: usize| -> Result<u16> {
        if pc + i >= units {
            return Err(Error::parse(
                (pc + i) * 2,
                format!("instruction at pc {pc:#x} runs past the method end"),
            ));
        }
        Ok(read_u16_le(&insns[(pc + i) * 2..]))
    };

    let first = unit(0)?;
    let width = match (first & 0xff) as u8 {
        NOP => match first {
            PACKED_SWITCH_PAYLOAD => 4 + unit(1)? as usize * 2,
            SPARSE_SWITCH_PAYLOAD => 2 + unit(1)? as usize * 4,
            FILL_ARRAY_DATA_PAYLOAD => {
                let element_width = unit(1)? as u64;
                let count = (unit(2)? as u32 | (unit(3)? as u32) << 16) as u64;
                4 + ((element_width * count + 1) / 2) as usize
            }
            _ => 1,
        },
        op => format(op).units(),
    };

    if pc + width > units {
        return Err(Error::parse(
            pc * 2,
            format!("instruction at pc {pc:#x} ({width} units) runs past the method end"),
        ));
    }
    Ok(width)
}

// =============================================================================
// Names
// =============================================================================

#[rustfmt::skip]
static OPCODE_NAMES: [&str; 256] = [
    // 0x00
    "nop", "move", "move/from16", "move/16", "move-wide", "move-wide/from16", "move-wide/16", "move-object",
    "move-object/from16", "move-object/16", "move-result", "move-result-wide", "move-result-object", "move-exception", "return-void", "return",
    // 0x10
    "return-wide", "return-object", "const/4", "const/16", "const", "const/high16", "const-wide/16", "const-wide/32",
    "const-wide", "const-wide/high16", "const-string", "const-string/jumbo", "const-class", "monitor-enter", "monitor-exit", "check-cast",
    // 0x20
    "instance-of", "array-length", "new-instance", "new-array", "filled-new-array", "filled-new-array/range", "fill-array-data", "throw",
    "goto", "goto/16", "goto/32", "packed-switch", "sparse-switch", "cmpl-float", "cmpg-float", "cmpl-double",
    // 0x30
    "cmpg-double", "cmp-long", "if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le",
    "if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez", "unused-3e", "unused-3f",
    // 0x40
    "unused-40", "unused-41", "unused-42", "unused-43", "aget", "aget-wide", "aget-object", "aget-boolean",
    "aget-byte", "aget-char", "aget-short", "aput", "aput-wide", "aput-object", "aput-boolean", "aput-byte",
    // 0x50
    "aput-char", "aput-short", "iget", "iget-wide", "iget-object", "iget-boolean", "iget-byte", "iget-char",
    "iget-short", "iput", "iput-wide", "iput-object", "iput-boolean", "iput-byte", "iput-char", "iput-short",
    // 0x60
    "sget", "sget-wide", "sget-object", "sget-boolean", "sget-byte", "sget-char", "sget-short", "sput",
    "sput-wide", "sput-object", "sput-boolean", "sput-byte", "sput-char", "sput-short", "invoke-virtual", "invoke-super",
    // 0x70
    "invoke-direct", "invoke-static", "invoke-interface", "return-void-no-barrier", "invoke-virtual/range", "invoke-super/range", "invoke-direct/range", "invoke-static/range",
    "invoke-interface/range", "unused-79", "unused-7a", "neg-int", "not-int", "neg-long", "not-long", "neg-float",
    // 0x80
    "neg-double", "int-to-long", "int-to-float", "int-to-double", "long-to-int", "long-to-float", "long-to-double", "float-to-int",
    "float-to-long", "float-to-double", "double-to-int", "double-to-long", "double-to-float", "int-to-byte", "int-to-char", "int-to-short",
    // 0x90
    "add-int", "sub-int", "mul-int", "div-int", "rem-int", "and-int", "or-int", "xor-int",
    "shl-int", "shr-int", "ushr-int", "add-long", "sub-long", "mul-long", "div-long", "rem-long",
    // 0xa0
    "and-long", "or-long", "xor-long", "shl-long", "shr-long", "ushr-long", "add-float", "sub-float",
    "mul-float", "div-float", "rem-float", "add-double", "sub-double", "mul-double", "div-double", "rem-double",
    // 0xb0
    "add-int/2addr", "sub-int/2addr", "mul-int/2addr", "div-int/2addr", "rem-int/2addr", "and-int/2addr", "or-int/2addr", "xor-int/2addr",
    "shl-int/2addr", "shr-int/2addr", "ushr-int/2addr", "add-long/2addr", "sub-long/2addr", "mul-long/2addr", "div-long/2addr", "rem-long/2addr",
    // 0xc0
    "and-long/2addr", "or-long/2addr", "xor-long/2addr", "shl-long/2addr", "shr-long/2addr", "ushr-long/2addr", "add-float/2addr", "sub-float/2addr",
    "mul-float/2addr", "div-float/2addr", "rem-float/2addr", "add-double/2addr", "sub-double/2addr", "mul-double/2addr", "div-double/2addr", "rem-double/2addr",
    // 0xd0
    "add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16", "and-int/lit16", "or-int/lit16", "xor-int/lit16",
    "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8", "and-int/lit8", "or-int/lit8", "xor-int/lit8",
    // 0xe0
    "shl-int/lit8", "shr-int/lit8", "ushr-int/lit8", "iget-quick", "iget-wide-quick", "iget-object-quick", "iput-quick", "iput-wide-quick",
    "iput-object-quick", "invoke-virtual-quick", "invoke-virtual/range-quick", "iput-boolean-quick", "iput-byte-quick", "iput-char-quick", "iput-short-quick", "iget-boolean-quick",
    // 0xf0
    "iget-byte-quick", "iget-char-quick", "iget-short-quick", "unused-f3", "unused-f4", "unused-f5", "unused-f6", "unused-f7",
    "unused-f8", "unused-f9", "invoke-polymorphic", "invoke-polymorphic/range", "invoke-custom", "invoke-custom/range", "const-method-handle", "const-method-type",
];

/// Mnemonic of `op`.
#[inline]
pub fn opcode_name(op: u8) -> &'static str {
    OPCODE_NAMES[op as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_widths() {
        assert_eq!(format(RETURN_VOID).units(), 1);
        assert_eq!(format(IGET_QUICK).units(), 2);
        assert_eq!(format(INVOKE_VIRTUAL_QUICK).units(), 3);
        assert_eq!(format(0x18).units(), 5);
        assert_eq!(format(0xfa).units(), 4);
    }

    #[test]
    fn test_dequickened_preserves_width() {
        for op in 0..=255u8 {
            if let Some(standard) = dequickened(op) {
                assert_eq!(format(op).units(), format(standard).units(), "{op:#x}");
                assert!(opcode_name(op).ends_with("-quick"));
                assert!(!opcode_name(standard).ends_with("-quick"));
            }
        }
        assert_eq!(dequickened(IGET), None);
    }

    #[test]
    fn test_payload_widths() {
        // packed-switch with 3 targets
        let packed = units(&[0x0100, 3, 0, 0, 1, 0, 2, 0, 3, 0]);
        assert_eq!(width_at(&packed, 0).unwrap(), 10);

        // sparse-switch with 2 entries
        let sparse = units(&[0x0200, 2, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(width_at(&sparse, 0).unwrap(), 10);

        // fill-array-data: 3 one-byte elements
        let fill = units(&[0x0300, 1, 3, 0, 0x0201, 0x0003]);
        assert_eq!(width_at(&fill, 0).unwrap(), 6);
    }

    #[test]
    fn test_width_overrun() {
        // iget-quick cut after its first unit
        let insns = units(&[0x000e, 0x10e3]);
        assert_eq!(width_at(&insns, 0).unwrap(), 1);
        assert!(width_at(&insns, 1).is_err());
        assert!(width_at(&insns, 2).is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(opcode_name(CHECK_CAST), "check-cast");
        assert_eq!(opcode_name(RETURN_VOID_NO_BARRIER), "return-void-no-barrier");
        assert_eq!(opcode_name(INVOKE_VIRTUAL_RANGE), "invoke-virtual/range");
        assert_eq!(opcode_name(0xff), "const-method-type");
    }
}
