//! Renders a decoded [`Opcode`] into NASM-compatible text, used by both the
//! `decompile` command and the per-instruction trace line.

use std::fmt;

use crate::types::{MemAccess, Offset, OpcodeArg, Register, RegAccess, Size};

pub(crate) fn register_name(access: RegAccess) -> &'static str {
    use Offset::*;
    use Register::*;
    match (access.reg, access.size, access.offset) {
        (Ax, Size::Byte, Low) => "al",
        (Ax, Size::Byte, High) => "ah",
        (Bx, Size::Byte, Low) => "bl",
        (Bx, Size::Byte, High) => "bh",
        (Cx, Size::Byte, Low) => "cl",
        (Cx, Size::Byte, High) => "ch",
        (Dx, Size::Byte, Low) => "dl",
        (Dx, Size::Byte, High) => "dh",
        (Ax, Size::Word, None) => "ax",
        (Bx, Size::Word, None) => "bx",
        (Cx, Size::Word, None) => "cx",
        (Dx, Size::Word, None) => "dx",
        (Sp, Size::Word, None) => "sp",
        (Bp, Size::Word, None) => "bp",
        (Si, Size::Word, None) => "si",
        (Di, Size::Word, None) => "di",
        (Es, Size::Word, None) => "es",
        (Cs, Size::Word, None) => "cs",
        (Ss, Size::Word, None) => "ss",
        (Ds, Size::Word, None) => "ds",
        (Ip, Size::Word, None) => "ip",
        _ => unreachable!("byte access only valid for AX/BX/CX/DX"),
    }
}

fn term_name(reg: Register) -> &'static str {
    match reg {
        Register::Bx => "bx",
        Register::Bp => "bp",
        Register::Si => "si",
        Register::Di => "di",
        _ => unreachable!("address terms are limited to bx/bp/si/di"),
    }
}

pub(crate) fn format_memory(mem: MemAccess) -> String {
    let mut parts = Vec::new();
    for t in mem.terms.iter() {
        if t.present {
            parts.push(term_name(t.reg).to_string());
        }
    }
    if parts.is_empty() {
        // Direct address: the number is mandatory, there is nothing else
        // inside the brackets.
        return format!("[{}]", mem.displacement);
    }
    let mut s = parts.join(" + ");
    if mem.displacement > 0 {
        s = format!("{} + {}", s, mem.displacement);
    } else if mem.displacement < 0 {
        s = format!("{} - {}", s, -(mem.displacement as i32));
    }
    format!("[{}]", s)
}

fn format_ipinc(value: i16) -> String {
    let target = value as i32 + 2;
    if target >= 0 {
        format!("$+{}", target)
    } else {
        format!("${}", target)
    }
}

/// Whether `dst`/`src` need an explicit `byte`/`word` size keyword: only
/// when one side is memory and the other an immediate, since a register
/// operand already pins the size.
fn needs_explicit_size(dst: &OpcodeArg, src: &OpcodeArg) -> bool {
    let is_mem = |a: &OpcodeArg| matches!(a, OpcodeArg::Memory(_));
    let is_imm = |a: &OpcodeArg| matches!(a, OpcodeArg::Immediate(_));
    (is_mem(dst) && is_imm(src)) || (is_mem(src) && is_imm(dst))
}

fn format_arg(arg: &OpcodeArg, explicit_size: bool) -> String {
    match arg {
        OpcodeArg::None => String::new(),
        OpcodeArg::Register(r) => register_name(*r).to_string(),
        OpcodeArg::Memory(m) => format_memory(*m),
        OpcodeArg::Immediate(imm) => {
            if explicit_size {
                let kw = match imm.size {
                    Size::Byte => "byte",
                    Size::Word => "word",
                };
                format!("{} {}", kw, imm.value)
            } else {
                format!("{}", imm.value)
            }
        }
        OpcodeArg::IpInc(imm) => format_ipinc(imm.value),
    }
}

/// Renders `op` in NASM syntax, with no trailing newline.
pub fn format_opcode(op: &crate::types::Opcode) -> String {
    let explicit = needs_explicit_size(&op.dst, &op.src);
    let dst = format_arg(&op.dst, explicit);
    let src = format_arg(&op.src, explicit);

    match (op.dst, op.src) {
        (OpcodeArg::None, OpcodeArg::None) => op.ty.mnemonic().to_string(),
        (_, OpcodeArg::None) => format!("{} {}", op.ty.mnemonic(), dst),
        _ => format!("{} {}, {}", op.ty.mnemonic(), dst, src),
    }
}

impl fmt::Display for crate::types::Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_opcode(self))
    }
}
