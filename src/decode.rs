//! Turns a matched [`crate::encoding::Encoding`] plus a code buffer into a
//! fully resolved [`Opcode`].

use crate::encoding::{Encoding, FieldType};
use crate::error::DecodeError;
use crate::reader::BitReader;
use crate::types::{AddrTerm, ImmAccess, MemAccess, Offset, OpcodeArg, RegAccess, Register, Size};

/// The result of reading an encoding's bit-stream fields: each field type
/// present in the encoding is recorded here, either as the value read from
/// the stream or the value a zero-length "set" slot assigned directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParsedFields {
    pub dir: Option<u8>,
    pub sign: Option<u8>,
    pub wide: Option<u8>,
    pub modd: Option<u8>,
    pub reg: Option<u8>,
    pub rm: Option<u8>,
    pub sr: Option<u8>,
    pub has_disp: bool,
    pub has_data: bool,
    pub has_data_if_w: bool,
    pub has_ipinc8: bool,
    pub has_ipinc16: bool,
}

/// Parses every bit-stream field of `encoding` against `reader`, without
/// touching tail bytes (displacement/data/ipinc). Shared verbatim between
/// the matcher's dry run and the decoder's real pass, so there is exactly
/// one place that understands the field grammar.
pub fn parse_fields(
    encoding: &Encoding,
    reader: &mut BitReader<'_>,
) -> Result<ParsedFields, DecodeError> {
    let mut fields = ParsedFields::default();

    for field in encoding.fields {
        match field.ty {
            FieldType::Literal => {
                let got = reader.bits(field.bits)?;
                if got != field.value {
                    return Err(DecodeError::NotCompat);
                }
            }
            FieldType::Sign | FieldType::Wide | FieldType::Dir | FieldType::Mod
            | FieldType::Reg | FieldType::Rm | FieldType::Sr => {
                let value = if field.bits > 0 {
                    reader.bits(field.bits)?
                } else {
                    field.value
                };
                match field.ty {
                    FieldType::Sign => fields.sign = Some(value),
                    FieldType::Wide => fields.wide = Some(value),
                    FieldType::Dir => fields.dir = Some(value),
                    FieldType::Mod => fields.modd = Some(value),
                    FieldType::Reg => fields.reg = Some(value),
                    FieldType::Rm => fields.rm = Some(value),
                    FieldType::Sr => fields.sr = Some(value),
                    _ => unreachable!(),
                }
            }
            FieldType::Disp => fields.has_disp = true,
            FieldType::Data => fields.has_data = true,
            FieldType::DataIfW => fields.has_data_if_w = true,
            FieldType::Ipinc8 => fields.has_ipinc8 = true,
            FieldType::Ipinc16 => fields.has_ipinc16 = true,
        }
    }

    if !reader.is_byte_aligned() {
        return Err(DecodeError::Invalid);
    }

    Ok(fields)
}

fn resolve_reg(index: u8, wide: bool) -> RegAccess {
    if wide {
        let reg = match index {
            0 => Register::Ax,
            1 => Register::Cx,
            2 => Register::Dx,
            3 => Register::Bx,
            4 => Register::Sp,
            5 => Register::Bp,
            6 => Register::Si,
            7 => Register::Di,
            _ => unreachable!("3-bit field"),
        };
        RegAccess::word(reg)
    } else {
        let (reg, offset) = match index {
            0 => (Register::Ax, Offset::Low),
            1 => (Register::Cx, Offset::Low),
            2 => (Register::Dx, Offset::Low),
            3 => (Register::Bx, Offset::Low),
            4 => (Register::Ax, Offset::High),
            5 => (Register::Cx, Offset::High),
            6 => (Register::Dx, Offset::High),
            7 => (Register::Bx, Offset::High),
            _ => unreachable!("3-bit field"),
        };
        RegAccess::byte(reg, offset)
    }
}

fn term(reg: Option<Register>) -> AddrTerm {
    match reg {
        Some(reg) => AddrTerm { reg, present: true },
        None => AddrTerm::absent(),
    }
}

fn resolve_mem(modd: u8, rm: u8, displacement: i16, size: Size) -> MemAccess {
    if modd == 0b00 && rm == 0b110 {
        return MemAccess {
            terms: [AddrTerm::absent(), AddrTerm::absent()],
            displacement,
            size,
        };
    }
    let (t0, t1) = match rm {
        0b000 => (Some(Register::Bx), Some(Register::Si)),
        0b001 => (Some(Register::Bx), Some(Register::Di)),
        0b010 => (Some(Register::Bp), Some(Register::Si)),
        0b011 => (Some(Register::Bp), Some(Register::Di)),
        0b100 => (Some(Register::Si), None),
        0b101 => (Some(Register::Di), None),
        0b110 => (Some(Register::Bp), None),
        0b111 => (Some(Register::Bx), None),
        _ => unreachable!("3-bit field"),
    };
    let displacement = if modd == 0b00 { 0 } else { displacement };
    MemAccess {
        terms: [term(t0), term(t1)],
        displacement,
        size,
    }
}

/// Places an immediate/ipinc operand into whichever of `dst`/`src` is
/// still empty, or `dst` if both are empty (the jump/loop family, which
/// carries no register or memory operand at all).
fn place(dst: &mut OpcodeArg, src: &mut OpcodeArg, arg: OpcodeArg) {
    if *dst == OpcodeArg::None && *src == OpcodeArg::None {
        *dst = arg;
    } else if *src == OpcodeArg::None {
        *src = arg;
    } else if *dst == OpcodeArg::None {
        *dst = arg;
    } else {
        panic!("sim86: decoder invariant violated: no free operand slot for immediate/ipinc");
    }
}

/// Decodes one instruction from `code` against an already-matched
/// `encoding`, returning the built [`crate::types::Opcode`] and the number
/// of bytes it occupied.
pub fn decode(
    encoding: &Encoding,
    code: &[u8],
) -> Result<(crate::types::Opcode, u8), DecodeError> {
    let mut reader = BitReader::new(code);
    let fields = parse_fields(encoding, &mut reader)?;

    let wide = fields.wide.unwrap_or(0) == 1;
    let sign = fields.sign.unwrap_or(0) == 1;
    let dir = fields.dir.unwrap_or(0) == 1;
    let size = if wide { Size::Word } else { Size::Byte };

    let disp_len: u32 = if fields.has_disp {
        match (fields.modd, fields.rm) {
            (Some(0b00), Some(0b110)) => 2,
            (Some(0b10), _) => 2,
            (Some(0b01), _) => 1,
            _ => 0,
        }
    } else {
        0
    };
    let data_len: u32 = if fields.has_data_if_w && wide && !sign {
        2
    } else if fields.has_data || fields.has_data_if_w {
        1
    } else {
        0
    };
    let ipinc_len: u32 = if fields.has_ipinc16 {
        2
    } else if fields.has_ipinc8 {
        1
    } else {
        0
    };

    // Displacement and ipinc bytes are always signed; a lone displacement
    // byte is sign-extended the same way a lone ipinc byte is.
    let disp_raw = reader.bytes(disp_len)?;
    let disp = if disp_len == 1 {
        (disp_raw as i8) as i16
    } else {
        disp_raw
    };

    let data_raw = reader.bytes(data_len)?;
    // A plain byte immediate (w=0) is never sign-extended; only the
    // `s=1, w=1` combination asks for 8->16 sign extension.
    let (data, data_size) = if data_len == 2 {
        (data_raw, Size::Word)
    } else if data_len == 1 && sign && wide {
        (((data_raw as i8) as i16), Size::Word)
    } else {
        (data_raw, size)
    };

    let ipinc_raw = reader.bytes(ipinc_len)?;
    let ipinc = if ipinc_len == 1 {
        (ipinc_raw as i8) as i16
    } else {
        ipinc_raw
    };

    let mut dst = OpcodeArg::None;
    let mut src = OpcodeArg::None;

    match (fields.reg, fields.rm) {
        (Some(regv), Some(rmv)) => {
            let reg_op = OpcodeArg::Register(resolve_reg(regv, wide));
            let rm_op = match fields.modd {
                Some(0b11) => OpcodeArg::Register(resolve_reg(rmv, wide)),
                Some(modd) => OpcodeArg::Memory(resolve_mem(modd, rmv, disp, size)),
                None => unreachable!("rm present implies mod present"),
            };
            if dir {
                dst = reg_op;
                src = rm_op;
            } else {
                dst = rm_op;
                src = reg_op;
            }
        }
        (None, Some(rmv)) => {
            dst = match fields.modd {
                Some(0b11) => OpcodeArg::Register(resolve_reg(rmv, wide)),
                Some(modd) => OpcodeArg::Memory(resolve_mem(modd, rmv, disp, size)),
                None => unreachable!("rm present implies mod present"),
            };
        }
        (Some(regv), None) => {
            dst = OpcodeArg::Register(resolve_reg(regv, wide));
        }
        (None, None) => {}
    }

    if data_len > 0 {
        place(
            &mut dst,
            &mut src,
            OpcodeArg::Immediate(ImmAccess {
                value: data,
                size: data_size,
            }),
        );
    }

    if ipinc_len > 0 {
        let ipinc_size = if ipinc_len == 2 { Size::Word } else { Size::Byte };
        place(
            &mut dst,
            &mut src,
            OpcodeArg::IpInc(ImmAccess {
                value: ipinc,
                size: ipinc_size,
            }),
        );
    }

    let len = reader.byte_pos() as u8;
    Ok((
        crate::types::Opcode {
            ty: encoding.ty,
            dst,
            src,
            len,
        },
        len,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding;
    use crate::types::OpcodeType;

    fn decode_bytes(code: &[u8]) -> crate::types::Opcode {
        let enc = encoding::find(code).unwrap().expect("known opcode");
        decode(enc, code).unwrap().0
    }

    #[test]
    fn mov_reg_reg() {
        let op = decode_bytes(&[0x89, 0xD9]);
        assert_eq!(op.ty, OpcodeType::Mov);
        assert_eq!(op.len, 2);
        assert_eq!(op.dst, OpcodeArg::Register(RegAccess::word(Register::Cx)));
        assert_eq!(op.src, OpcodeArg::Register(RegAccess::word(Register::Bx)));
    }

    #[test]
    fn mov_immediate_to_memory_word() {
        // mov [bp - 10084], word 521
        let code = [0xC7, 0x86, 0x9C, 0xD8, 0x09, 0x02];
        let op = decode_bytes(&code);
        assert_eq!(op.ty, OpcodeType::Mov);
        assert_eq!(op.len, 6);
        match op.dst {
            OpcodeArg::Memory(m) => {
                assert_eq!(m.terms[0].reg, Register::Bp);
                assert!(!m.terms[1].present);
                assert_eq!(m.displacement, -10084);
            }
            _ => panic!("expected memory dst"),
        }
        assert_eq!(
            op.src,
            OpcodeArg::Immediate(ImmAccess {
                value: 521,
                size: Size::Word
            })
        );
    }

    #[test]
    fn add_immediate_sign_extended() {
        let op = decode_bytes(&[0x83, 0xC0, 0xFB]);
        assert_eq!(op.ty, OpcodeType::Add);
        assert_eq!(
            op.src,
            OpcodeArg::Immediate(ImmAccess {
                value: -5,
                size: Size::Word
            })
        );
    }

    #[test]
    fn direct_address_mov_to_accumulator() {
        // mov ax, [1234]  -> A1 D2 04
        let op = decode_bytes(&[0xA1, 0xD2, 0x04]);
        assert_eq!(op.ty, OpcodeType::Mov);
        assert_eq!(op.dst, OpcodeArg::Register(RegAccess::word(Register::Ax)));
        match op.src {
            OpcodeArg::Memory(m) => {
                assert!(!m.terms[0].present && !m.terms[1].present);
                assert_eq!(m.displacement, 0x04D2);
            }
            _ => panic!("expected memory src"),
        }
    }

    #[test]
    fn conditional_jump_carries_ipinc_in_dst() {
        let op = decode_bytes(&[0x74, 0x02]);
        assert_eq!(op.ty, OpcodeType::Je);
        assert_eq!(
            op.dst,
            OpcodeArg::IpInc(ImmAccess {
                value: 2,
                size: Size::Byte
            })
        );
        assert_eq!(op.src, OpcodeArg::None);
    }
}
