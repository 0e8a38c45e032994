//! Disassembly listing of method bodies.
//!
//! Output goes through `tracing` under the `disasm` target, so it can be
//! filtered independently of the rest of the log. Instructions rewritten by
//! the unquickener are marked `[new]`.

use tracing::info;

use crate::dex::instruction::{
    format, opcode_name, width_at, Format, FILL_ARRAY_DATA_PAYLOAD, NOP, PACKED_SWITCH_PAYLOAD,
    SPARSE_SWITCH_PAYLOAD,
};
use crate::dex::{AccessFlags, DexFile, MethodCode, MethodKind};
use crate::error::Result;
use crate::util::read_u16_le;

/// Raw code units shown per instruction before eliding.
const MAX_RAW_UNITS: usize = 7;

/// Logs the listing of one method.
pub fn log_method(dex: &DexFile<'_>, method: &MethodCode, insns: &[u8], changed: &[u32]) {
    match render_method(dex, method, insns, changed) {
        Ok(lines) => {
            for line in lines {
                info!(target: "disasm", "{line}");
            }
        }
        Err(e) => info!(target: "disasm", "    <undecodable: {e}>"),
    }
}

/// Renders the listing of one method, one line per entry.
pub fn render_method(
    dex: &DexFile<'_>,
    method: &MethodCode,
    insns: &[u8],
    changed: &[u32],
) -> Result<Vec<String>> {
    let m = &method.method;
    let kind = match m.kind {
        MethodKind::Direct => "direct",
        MethodKind::Virtual => "virtual",
    };
    let name = dex
        .method_name(m.method_idx)
        .unwrap_or_else(|_| format!("method@{:04x}", m.method_idx));
    let flags = AccessFlags::from_bits_truncate(m.access_flags);

    let mut lines = vec![
        format!("  {kind} method #{}: {name}", m.method_idx),
        format!("    access={:04x} ({})", m.access_flags, flags.modifiers()),
        format!("    codeOff={:#x}", m.code_off),
    ];

    let base = method.code.insns_offset();
    let units = insns.len() / 2;
    let mut pc = 0;
    while pc < units {
        let width = width_at(insns, pc)?;
        let mark = if changed.contains(&(pc as u32)) {
            "[new] "
        } else {
            "      "
        };

        let mut raw = String::new();
        for i in 0..MAX_RAW_UNITS.min(width) {
            let at = (pc + i) * 2;
            raw.push_str(&format!(" {:02x}{:02x}", insns[at], insns[at + 1]));
        }
        if width > MAX_RAW_UNITS {
            raw.push_str(" ...");
        }

        lines.push(format!(
            "{mark}{:06x}:{raw:<36}|{pc:04x}: {}",
            base + pc * 2,
            describe(dex, &insns[pc * 2..(pc + width) * 2], width)
        ));
        pc += width;
    }

    Ok(lines)
}

/// Mnemonic and operands of one instruction.
fn describe(dex: &DexFile<'_>, insn: &[u8], width: usize) -> String {
    let unit0 = read_u16_le(insn);
    let op = insn[0];
    let aa = insn[1];
    let unit = |i: usize| read_u16_le(&insn[i * 2..]);

    if op == NOP {
        return match unit0 {
            PACKED_SWITCH_PAYLOAD => format!("packed-switch-data ({width} units)"),
            SPARSE_SWITCH_PAYLOAD => format!("sparse-switch-data ({width} units)"),
            FILL_ARRAY_DATA_PAYLOAD => format!("array-data ({width} units)"),
            _ => "nop // spacer".to_string(),
        };
    }

    let name = opcode_name(op);
    match format(op) {
        Format::F21c if op == 0x1f || op == 0x22 || op == 0x1c => {
            let idx = unit(1) as u32;
            let ty = dex
                .type_descriptor(idx)
                .unwrap_or_else(|_| "<unresolved>".to_string());
            format!("{name} v{aa}, {ty} // type@{idx:04x}")
        }
        Format::F22c => {
            let (a, b) = (aa & 0xf, aa >> 4);
            let idx = unit(1) as u32;
            if (0x52..=0x5f).contains(&op) {
                let field = dex
                    .field_name(idx)
                    .unwrap_or_else(|_| "<unresolved>".to_string());
                format!("{name} v{a}, v{b}, {field} // field@{idx:04x}")
            } else if op >= 0xe3 {
                format!("{name} v{a}, v{b}, [obj+{idx:04x}]")
            } else {
                format!("{name} v{a}, v{b}, type@{idx:04x}")
            }
        }
        Format::F35c | Format::F3rc if (0x6e..=0x78).contains(&op) => {
            let idx = unit(1) as u32;
            let target = dex
                .method_name(idx)
                .unwrap_or_else(|_| "<unresolved>".to_string());
            format!("{name} {}, {target} // method@{idx:04x}", registers(op, insn))
        }
        Format::F35c | Format::F3rc if op == 0xe9 || op == 0xea => {
            format!("{name} {}, vtable@{:04x}", registers(op, insn), unit(1))
        }
        _ => name.to_string(),
    }
}

/// Register list of a 35c or 3rc instruction.
fn registers(op: u8, insn: &[u8]) -> String {
    let aa = insn[1];
    let unit2 = read_u16_le(&insn[4..]);
    if format(op) == Format::F3rc {
        let first = unit2 as u32;
        let last = first + aa as u32;
        return match aa {
            0 => "{}".to_string(),
            1 => format!("{{v{first}}}"),
            _ => format!("{{v{first} .. v{}}}", last - 1),
        };
    }

    let count = (aa >> 4) as usize;
    let g = (aa & 0xf) as u16;
    let regs = [unit2 & 0xf, (unit2 >> 4) & 0xf, (unit2 >> 8) & 0xf, unit2 >> 12, g];
    let list: Vec<String> = regs[..count.min(5)].iter().map(|r| format!("v{r}")).collect();
    format!("{{{}}}", list.join(", "))
}
