//! Executes a decoded [`Opcode`] against [`Memory`], with full 8086 flag
//! semantics. Cycle counts and anything involving interrupts, I/O ports,
//! or segment override prefixes beyond the implicit `[bp]`-selects-`ss`
//! rule are out of scope.

use log::trace;

use crate::memory::Memory;
use crate::types::{MemAccess, Opcode, OpcodeArg, OpcodeType, Register, Size};

/// A memory write made by the instruction just executed, reported so the
/// trace formatter can print a delta without diffing the whole 1 MiB RAM
/// image.
#[derive(Debug, Clone, Copy)]
pub struct MemEffect {
    pub access: MemAccess,
    pub old: u16,
    pub new: u16,
}

fn mask(bits: u32) -> u32 {
    if bits == 16 {
        0xFFFF
    } else {
        0xFF
    }
}

fn sign_bit(value: u32, bits: u32) -> bool {
    (value >> (bits - 1)) & 1 != 0
}

fn zero_sign_parity(result: u32, bits: u32) -> (bool, bool, bool) {
    let m = mask(bits);
    let r = result & m;
    let zero = r == 0;
    let sign = sign_bit(r, bits);
    let parity = (r as u8).count_ones() % 2 == 0;
    (zero, sign, parity)
}

struct AluResult {
    result: u16,
    carry: bool,
    aux_carry: bool,
    overflow: bool,
}

fn add_flags(a: u16, b: u16, carry_in: bool, bits: u32) -> AluResult {
    let m = mask(bits);
    let (a, b, c) = (a as u32 & m, b as u32 & m, carry_in as u32);
    let sum = a + b + c;
    let result = sum & m;
    let carry = sum > m;
    let aux_carry = (a & 0xF) + (b & 0xF) + c > 0xF;
    let overflow = (sign_bit(a, bits) == sign_bit(b, bits)) && (sign_bit(result, bits) != sign_bit(a, bits));
    AluResult {
        result: result as u16,
        carry,
        aux_carry,
        overflow,
    }
}

fn sub_flags(a: u16, b: u16, borrow_in: bool, bits: u32) -> AluResult {
    let m = mask(bits);
    let (a, b, c) = (a as u32 & m, b as u32 & m, borrow_in as u32);
    let rhs = b + c;
    let carry = a < rhs;
    let result = a.wrapping_sub(rhs) & m;
    let aux_carry = (a & 0xF) < (b & 0xF) + c;
    let overflow = (sign_bit(a, bits) != sign_bit(b, bits)) && (sign_bit(result, bits) != sign_bit(a, bits));
    AluResult {
        result: result as u16,
        carry,
        aux_carry,
        overflow,
    }
}

fn bitwise_flags(op: OpcodeType, a: u16, b: u16, bits: u32) -> AluResult {
    let m = mask(bits);
    let (a, b) = (a as u32 & m, b as u32 & m);
    let result = match op {
        OpcodeType::And => a & b,
        OpcodeType::Or => a | b,
        OpcodeType::Xor => a ^ b,
        _ => unreachable!("bitwise_flags only handles AND/OR/XOR"),
    };
    AluResult {
        result: result as u16,
        carry: false,
        aux_carry: false,
        overflow: false,
    }
}

fn read_arg(mem: &Memory, arg: &OpcodeArg) -> u16 {
    match arg {
        OpcodeArg::Register(r) => mem.get_register(*r),
        OpcodeArg::Memory(m) => mem.mem_read(m),
        OpcodeArg::Immediate(i) => i.value as u16,
        OpcodeArg::IpInc(i) => i.value as u16,
        OpcodeArg::None => panic!("sim86: simulator invariant violated: read of a NONE operand"),
    }
}

fn arg_size(arg: &OpcodeArg) -> Size {
    match arg {
        OpcodeArg::Register(r) => r.size,
        OpcodeArg::Memory(m) => m.size,
        OpcodeArg::Immediate(i) => i.size,
        OpcodeArg::IpInc(i) => i.size,
        OpcodeArg::None => panic!("sim86: simulator invariant violated: sized a NONE operand"),
    }
}

fn write_arg(mem: &mut Memory, arg: &OpcodeArg, value: u16) -> Option<MemEffect> {
    match arg {
        OpcodeArg::Register(r) => {
            mem.set_register(*r, value);
            None
        }
        OpcodeArg::Memory(m) => {
            let old = mem.mem_read(m);
            mem.mem_write(m, value);
            Some(MemEffect {
                access: *m,
                old,
                new: value,
            })
        }
        _ => panic!("sim86: simulator invariant violated: write to a non-writable operand"),
    }
}

fn ipinc_value(arg: &OpcodeArg) -> i16 {
    match arg {
        OpcodeArg::IpInc(i) => i.value,
        _ => panic!("sim86: simulator invariant violated: jump with no ipinc operand"),
    }
}

fn jump_by(mem: &mut Memory, delta: i16) {
    let ip = mem.reg_word(Register::Ip) as i32;
    mem.set_reg_word(Register::Ip, (ip + delta as i32) as u16);
}

fn condition_holds(ty: OpcodeType, mem: &Memory) -> bool {
    use OpcodeType::*;
    let f = &mem.flags;
    match ty {
        Je => f.zero,
        Jne => !f.zero,
        Jl => f.sign != f.overflow,
        Jnl => f.sign == f.overflow,
        Jle => (f.sign != f.overflow) || f.zero,
        Jnle => (f.sign == f.overflow) && !f.zero,
        Jb => f.carry,
        Jnb => !f.carry,
        Jbe => f.carry || f.zero,
        Jnbe => !f.carry && !f.zero,
        Jp => f.parity,
        Jnp => !f.parity,
        Jo => f.overflow,
        Jno => !f.overflow,
        Js => f.sign,
        Jns => !f.sign,
        _ => unreachable!("condition_holds only handles conditional jumps"),
    }
}

/// Advances `IP` past the instruction, then executes its semantics.
/// Mirrors the original driver's ordering: IP is updated *before* the
/// handler runs, since relative jumps are measured from the end of the
/// jump instruction.
pub fn step(op: &Opcode, mem: &mut Memory) -> Option<MemEffect> {
    let ip = mem.reg_word(Register::Ip);
    mem.set_reg_word(Register::Ip, ip.wrapping_add(op.len as u16));
    trace!("executing {:?} at ip=0x{:04x}", op.ty, ip);
    execute(op, mem)
}

fn execute(op: &Opcode, mem: &mut Memory) -> Option<MemEffect> {
    use OpcodeType::*;
    match op.ty {
        Mov => {
            let v = read_arg(mem, &op.src);
            write_arg(mem, &op.dst, v)
        }
        Add | Adc | Sub | Sbb | Cmp | And | Or | Xor => {
            let bits = arg_size(&op.dst).bits();
            let dst_val = read_arg(mem, &op.dst);
            let src_val = read_arg(mem, &op.src);
            let carry_in = mem.flags.carry;

            let alu = match op.ty {
                Add => add_flags(dst_val, src_val, false, bits),
                Adc => add_flags(dst_val, src_val, carry_in, bits),
                Sub | Cmp => sub_flags(dst_val, src_val, false, bits),
                Sbb => sub_flags(dst_val, src_val, carry_in, bits),
                And | Or | Xor => bitwise_flags(op.ty, dst_val, src_val, bits),
                _ => unreachable!(),
            };

            let (zero, sign, parity) = zero_sign_parity(alu.result as u32, bits);
            mem.flags.carry = alu.carry;
            mem.flags.overflow = alu.overflow;
            mem.flags.aux_carry = alu.aux_carry;
            mem.flags.zero = zero;
            mem.flags.sign = sign;
            mem.flags.parity = parity;

            if op.ty == Cmp {
                None
            } else {
                write_arg(mem, &op.dst, alu.result)
            }
        }
        Je | Jne | Jl | Jnl | Jle | Jnle | Jb | Jnb | Jbe | Jnbe | Jp | Jnp | Jo | Jno | Js
        | Jns => {
            if condition_holds(op.ty, mem) {
                jump_by(mem, ipinc_value(&op.dst));
            }
            None
        }
        Loop | Loope | Loopne => {
            let cx = mem.reg_word(Register::Cx).wrapping_sub(1);
            mem.set_reg_word(Register::Cx, cx);
            let take = match op.ty {
                Loop => cx != 0,
                Loope => cx != 0 && mem.flags.zero,
                Loopne => cx != 0 && !mem.flags.zero,
                _ => unreachable!(),
            };
            if take {
                jump_by(mem, ipinc_value(&op.dst));
            }
            None
        }
        Jcxz => {
            if mem.reg_word(Register::Cx) == 0 {
                jump_by(mem, ipinc_value(&op.dst));
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;
    use crate::encoding;

    fn run(code: &[u8], mem: &mut Memory) {
        mem.load_code(code);
        while !mem.code_ended() {
            let enc = encoding::find(mem.code_ptr()).unwrap().expect("known opcode");
            let (op, _) = decode::decode(enc, mem.code_ptr()).unwrap();
            step(&op, mem);
        }
    }

    #[test]
    fn mov_reg_reg_copies_value() {
        let mut mem = Memory::new();
        mem.set_reg_word(Register::Bx, 0x1234);
        run(&[0x89, 0xD9], &mut mem); // mov cx, bx
        assert_eq!(mem.reg_word(Register::Cx), 0x1234);
        assert_eq!(mem.reg_word(Register::Ip), 2);
    }

    #[test]
    fn add_immediate_sign_extended() {
        let mut mem = Memory::new();
        mem.set_reg_word(Register::Ax, 10);
        run(&[0x83, 0xC0, 0xFB], &mut mem); // add ax, -5
        assert_eq!(mem.reg_word(Register::Ax), 5);
        // A sign-extended negative immediate is still added as its raw
        // unsigned bit pattern, so the 16-bit addition carries out of bit
        // 15 here; see DESIGN.md for why this differs from a naive
        // reading of "AX=10 plus -5".
        assert!(mem.flags.carry);
        assert!(!mem.flags.zero);
        assert!(!mem.flags.sign);
    }

    #[test]
    fn sub_self_zeroes_and_sets_zf() {
        let mut mem = Memory::new();
        mem.set_reg_word(Register::Ax, 7);
        run(&[0x29, 0xC0], &mut mem); // sub ax, ax
        assert_eq!(mem.reg_word(Register::Ax), 0);
        assert!(mem.flags.zero);
        assert!(!mem.flags.sign);
        assert!(!mem.flags.carry);
        assert!(mem.flags.parity);
        assert!(!mem.flags.overflow);
    }

    #[test]
    fn conditional_jump_taken_skips_next_instruction() {
        let mut mem = Memory::new();
        // mov al,5; cmp al,5; je +2; mov al,0
        run(&[0xB0, 0x05, 0x3C, 0x05, 0x74, 0x02, 0xB0, 0x00], &mut mem);
        assert_eq!(mem.reg_byte(Register::Ax, crate::types::Offset::Low), 5);
        assert_eq!(mem.reg_word(Register::Ip), 8);
    }

    #[test]
    fn adc_includes_carry_in() {
        let mut mem = Memory::new();
        mem.flags.carry = true;
        mem.set_reg_word(Register::Ax, 1);
        run(&[0x15, 0x01, 0x00], &mut mem); // adc ax, 1
        assert_eq!(mem.reg_word(Register::Ax), 3);
    }

    #[test]
    fn sbb_includes_borrow_in() {
        let mut mem = Memory::new();
        mem.flags.carry = true;
        mem.set_reg_word(Register::Ax, 5);
        run(&[0x1D, 0x01, 0x00], &mut mem); // sbb ax, 1
        assert_eq!(mem.reg_word(Register::Ax), 3);
    }

    #[test]
    fn loop_counts_down_exactly_n_times() {
        let mut mem = Memory::new();
        mem.set_reg_word(Register::Cx, 3);
        // loop -2 (jumps back onto itself until cx hits 0)
        run(&[0xE2, 0xFE], &mut mem);
        assert_eq!(mem.reg_word(Register::Cx), 0);
    }
}
