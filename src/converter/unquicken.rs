//! Reverses runtime instruction quickening.
//!
//! The runtime replaces symbolic operands of field accesses and virtual
//! invokes with resolved offsets and vtable slots, swaps `return-void` for a
//! barrier-free variant, and turns provably-succeeding `check-cast`s into two
//! NOPs. The side table it leaves behind lists, for each rewritten
//! instruction in pc order, the original operand. Walking the instructions
//! and the side table in lockstep restores the standard encoding in place.

use crate::dex::instruction::*;
use crate::error::{Error, Result};
use crate::util::{read_u16_le, read_uleb128, write_u16_le};
use crate::vdex::UNRESOLVED_MARKER;

// =============================================================================
// Side Table
// =============================================================================

/// Cursor over a method's `(dex_pc, value)` quickening entries.
#[derive(Debug, Clone)]
pub struct QuickeningReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> QuickeningReader<'a> {
    /// Wraps the encoded entries of one method.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Returns true once every entry has been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn uleb(&mut self, at_pc: u32) -> Result<u32> {
        let (value, len) = read_uleb128(&self.data[self.pos..]).ok_or_else(|| {
            Error::quickening(at_pc, format!("malformed entry at offset {}", self.pos))
        })?;
        self.pos += len;
        Ok(value)
    }

    /// The dex pc of the next entry, without consuming it.
    pub fn peek_pc(&self) -> Option<u32> {
        read_uleb128(&self.data[self.pos..]).map(|(pc, _)| pc)
    }

    /// Consumes the next entry, which must belong to `dex_pc`.
    pub fn next_at(&mut self, dex_pc: u32) -> Result<u16> {
        if self.is_empty() {
            return Err(Error::quickening(dex_pc, "no quickening entry left"));
        }
        let pc = self.uleb(dex_pc)?;
        if pc != dex_pc {
            return Err(Error::quickening(
                dex_pc,
                format!("next quickening entry is for pc {pc:#x}"),
            ));
        }
        let value = self.uleb(dex_pc)?;
        u16::try_from(value)
            .map_err(|_| Error::quickening(dex_pc, format!("operand {value:#x} exceeds 16 bits")))
    }
}

// =============================================================================
// Rewriting
// =============================================================================

/// What changed in one method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodRewrite {
    /// Dex pcs of rewritten instructions
    pub changed_pcs: Vec<u32>,
    /// Operands restored as the unresolved marker
    pub unresolved: usize,
}

impl MethodRewrite {
    /// Returns true if nothing was rewritten.
    pub fn is_empty(&self) -> bool {
        self.changed_pcs.is_empty()
    }
}

/// Restores the standard encoding of one method's instructions in place.
///
/// `insns` is the method's instruction stream and `quickening` its encoded
/// side table (empty for methods the runtime left alone). Every side-table
/// entry must be consumed by the instruction at its pc; any disagreement is
/// a [`Error::QuickeningSyncMismatch`]. On error `insns` may be partially
/// rewritten and must be discarded.
pub fn unquicken_method(insns: &mut [u8], quickening: &[u8]) -> Result<MethodRewrite> {
    let mut reader = QuickeningReader::new(quickening);
    let mut rewrite = MethodRewrite::default();
    let units = insns.len() / 2;
    let mut pc = 0usize;

    while pc < units {
        let dex_pc = pc as u32;
        let at = pc * 2;
        let op = insns[at];

        match op {
            RETURN_VOID_NO_BARRIER => {
                insns[at] = RETURN_VOID;
                rewrite.changed_pcs.push(dex_pc);
            }
            NOP if read_u16_le(&insns[at..]) == 0 && reader.peek_pc() == Some(dex_pc) => {
                let reg = reader.next_at(dex_pc)?;
                if reg != UNRESOLVED_MARKER {
                    let type_idx = reader.next_at(dex_pc)?;
                    if pc + 1 >= units || read_u16_le(&insns[at + 2..]) != 0 {
                        return Err(Error::quickening(
                            dex_pc,
                            "elided check-cast is not followed by a second nop",
                        ));
                    }
                    let reg = u8::try_from(reg).map_err(|_| {
                        Error::quickening(dex_pc, format!("check-cast register v{reg} out of range"))
                    })?;
                    insns[at] = CHECK_CAST;
                    insns[at + 1] = reg;
                    write_u16_le(&mut insns[at + 2..], type_idx);
                    if type_idx == UNRESOLVED_MARKER {
                        rewrite.unresolved += 1;
                    }
                    rewrite.changed_pcs.push(dex_pc);
                }
            }
            _ => {
                if let Some(standard) = dequickened(op) {
                    if pc + 1 >= units {
                        return Err(Error::quickening(dex_pc, "truncated quickened instruction"));
                    }
                    let index = reader.next_at(dex_pc)?;
                    insns[at] = standard;
                    write_u16_le(&mut insns[at + 2..], index);
                    if index == UNRESOLVED_MARKER {
                        rewrite.unresolved += 1;
                    }
                    rewrite.changed_pcs.push(dex_pc);
                }
            }
        }

        pc += width_at(insns, pc)?;
    }

    if !reader.is_empty() {
        let next = reader.peek_pc().unwrap_or(units as u32);
        return Err(Error::quickening(
            next,
            "quickening entries left after the last instruction",
        ));
    }

    Ok(rewrite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{code_units, quickening_entries};

    #[test]
    fn test_plain_method_is_untouched() {
        // const/4 v0, 1; if-eqz v0, +2; goto +0; return-void
        let original = code_units(&[0x1012, 0x0038, 0x0002, 0x0028, 0x000e]);
        let mut insns = original.clone();
        let rewrite = unquicken_method(&mut insns, &[]).unwrap();
        assert!(rewrite.is_empty());
        assert_eq!(insns, original);
    }

    #[test]
    fn test_iget_quick_restored() {
        // iget-quick v1, v2, [obj+0x10]; return-void
        let mut insns = code_units(&[0x21e3, 0x0010, 0x000e]);
        let table = quickening_entries(&[(0, 0x2a)]);
        let before = insns.len();

        let rewrite = unquicken_method(&mut insns, &table).unwrap();
        assert_eq!(insns, code_units(&[0x2152, 0x002a, 0x000e]));
        assert_eq!(insns.len(), before);
        assert_eq!(rewrite.changed_pcs, [0]);
        assert_eq!(rewrite.unresolved, 0);
    }

    #[test]
    fn test_invoke_and_iput_restored() {
        // const/4 v0, 0; invoke-virtual-quick {v1}, vtable@3; iput-object-quick v0, v1, [obj+8]
        let mut insns = code_units(&[0x0012, 0x10e9, 0x0003, 0x0001, 0x10e8, 0x0008, 0x000e]);
        let table = quickening_entries(&[(1, 0x77), (4, 0x5)]);
        let rewrite = unquicken_method(&mut insns, &table).unwrap();
        assert_eq!(
            insns,
            code_units(&[0x0012, 0x106e, 0x0077, 0x0001, 0x105b, 0x0005, 0x000e])
        );
        assert_eq!(rewrite.changed_pcs, [1, 4]);
    }

    #[test]
    fn test_return_void_no_barrier() {
        let mut insns = code_units(&[0x0073]);
        let rewrite = unquicken_method(&mut insns, &[]).unwrap();
        assert_eq!(insns, code_units(&[0x000e]));
        assert_eq!(rewrite.changed_pcs, [0]);
    }

    #[test]
    fn test_elided_check_cast() {
        // nop; nop; nop; return-void
        let mut insns = code_units(&[0x0000, 0x0000, 0x0000, 0x000e]);
        let table = quickening_entries(&[(0, 3), (0, 0x44), (2, 0xFFFF)]);
        let rewrite = unquicken_method(&mut insns, &table).unwrap();
        // check-cast v3, type@0x44; nop (genuine); return-void
        assert_eq!(insns, code_units(&[0x031f, 0x0044, 0x0000, 0x000e]));
        assert_eq!(rewrite.changed_pcs, [0]);
    }

    #[test]
    fn test_unresolved_marker_kept() {
        let mut insns = code_units(&[0x10e3, 0x0008, 0x000e]);
        let table = quickening_entries(&[(0, 0xFFFF)]);
        let rewrite = unquicken_method(&mut insns, &table).unwrap();
        assert_eq!(insns, code_units(&[0x1052, 0xFFFF, 0x000e]));
        assert_eq!(rewrite.unresolved, 1);
    }

    #[test]
    fn test_missing_entry() {
        let mut insns = code_units(&[0x10e3, 0x0008, 0x000e]);
        let err = unquicken_method(&mut insns, &[]).unwrap_err();
        assert!(matches!(err, Error::QuickeningSyncMismatch { dex_pc: 0, .. }));
    }

    #[test]
    fn test_leftover_entry() {
        let mut insns = code_units(&[0x10e3, 0x0008, 0x000e]);
        let table = quickening_entries(&[(0, 1), (2, 9)]);
        let err = unquicken_method(&mut insns, &table).unwrap_err();
        assert!(matches!(err, Error::QuickeningSyncMismatch { dex_pc: 2, .. }));
    }

    #[test]
    fn test_pc_mismatch() {
        let mut insns = code_units(&[0x000e, 0x10e3, 0x0008]);
        let table = quickening_entries(&[(0, 1)]);
        let err = unquicken_method(&mut insns, &table).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_payload_skipped() {
        // packed-switch payload with one target after the code; the payload
        // keys must not be mistaken for quickened opcodes
        let mut insns = code_units(&[0x000e, 0x0000, 0x0100, 0x0001, 0x00e3, 0x0000, 0x00e3, 0x0000]);
        let original = insns.clone();
        unquicken_method(&mut insns, &[]).unwrap();
        assert_eq!(insns, original);
    }
}
