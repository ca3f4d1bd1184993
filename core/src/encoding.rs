//! Fixed-width word encoding.
//!
//! Each instruction is one `u32`. The opcode byte lives in bits 0..8 and the
//! operands fill bits 8..32 according to the opcode's [`Format`]. Operand
//! packing is checked: a value that does not fit its field is rejected with
//! [`AsmError::EncodingRange`], never truncated.

use serde::Serialize;
use std::fmt;

use crate::error::{AsmError, AsmResult};
use crate::opcode::{Format, Opcode};

pub const OPCODE_MASK: u32 = 0xFF;
pub const A_SHIFT: u32 = 8;
pub const B_SHIFT: u32 = 16;
pub const C_SHIFT: u32 = 24;
pub const D_SHIFT: u32 = 16;
pub const T_SHIFT: u32 = 8;
pub const T_BITS: u32 = 24;

/// Largest forward displacement a `T` word can carry.
pub const MAX_JUMP_DISPLACEMENT: i64 = (1 << (T_BITS - 1)) - 1;
/// Largest backward displacement a `T` word can carry.
pub const MIN_JUMP_DISPLACEMENT: i64 = -(1 << (T_BITS - 1));

#[inline]
fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

/// Check that `value` fits an unsigned `bits`-wide field and return the raw
/// field bits.
pub(crate) fn unsigned_field(opcode: Opcode, field: &'static str, value: i64, bits: u32) -> AsmResult<u32> {
    if value < 0 || (value as u64) & !mask(bits) != 0 {
        return Err(AsmError::EncodingRange {
            opcode,
            field,
            value,
            bits,
            signed: false,
        });
    }
    Ok(value as u32)
}

/// Check that `value` survives a round trip through a signed `bits`-wide
/// field (two's complement) and return the raw field bits.
pub(crate) fn signed_field(opcode: Opcode, field: &'static str, value: i64, bits: u32) -> AsmResult<u32> {
    let shift = 64 - bits;
    let extended = value.wrapping_shl(shift).wrapping_shr(shift);
    if extended != value {
        return Err(AsmError::EncodingRange {
            opcode,
            field,
            value,
            bits,
            signed: true,
        });
    }
    Ok(((value as u64) & mask(bits)) as u32)
}

#[inline]
fn sign_extend(raw: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((raw << shift) as i32) >> shift
}

#[inline]
fn head(opcode: Opcode, expected: Format) -> u32 {
    debug_assert_eq!(opcode.format(), expected, "{} encoded with wrong format", opcode);
    opcode.as_u8() as u32
}

pub fn encode_zero(opcode: Opcode) -> u32 {
    head(opcode, Format::Zero)
}

pub fn encode_a(opcode: Opcode, a: i64) -> AsmResult<u32> {
    let a = unsigned_field(opcode, "a", a, 8)?;
    Ok(head(opcode, Format::A) | (a << A_SHIFT))
}

pub fn encode_ad(opcode: Opcode, a: i64, d: i64) -> AsmResult<u32> {
    let a = unsigned_field(opcode, "a", a, 8)?;
    let d = unsigned_field(opcode, "d", d, 16)?;
    Ok(head(opcode, Format::AD) | (a << A_SHIFT) | (d << D_SHIFT))
}

pub fn encode_ax(opcode: Opcode, a: i64, x: i64) -> AsmResult<u32> {
    let a = unsigned_field(opcode, "a", a, 8)?;
    let x = signed_field(opcode, "x", x, 16)?;
    Ok(head(opcode, Format::AX) | (a << A_SHIFT) | (x << D_SHIFT))
}

pub fn encode_d(opcode: Opcode, d: i64) -> AsmResult<u32> {
    let d = unsigned_field(opcode, "d", d, 16)?;
    Ok(head(opcode, Format::D) | (d << D_SHIFT))
}

pub fn encode_x(opcode: Opcode, x: i64) -> AsmResult<u32> {
    let x = signed_field(opcode, "x", x, 16)?;
    Ok(head(opcode, Format::X) | (x << D_SHIFT))
}

pub fn encode_abc(opcode: Opcode, a: i64, b: i64, c: i64) -> AsmResult<u32> {
    let a = unsigned_field(opcode, "a", a, 8)?;
    let b = unsigned_field(opcode, "b", b, 8)?;
    let c = unsigned_field(opcode, "c", c, 8)?;
    Ok(head(opcode, Format::ABC) | (a << A_SHIFT) | (b << B_SHIFT) | (c << C_SHIFT))
}

pub fn encode_t(opcode: Opcode, t: i64) -> AsmResult<u32> {
    let t = signed_field(opcode, "t", t, T_BITS)?;
    Ok(head(opcode, Format::T) | (t << T_SHIFT))
}

/// Extract the opcode of an encoded word.
pub fn opcode_of(word: u32) -> AsmResult<Opcode> {
    let byte = (word & OPCODE_MASK) as u8;
    Opcode::from_u8(byte).ok_or(AsmError::UnknownOpcode { byte })
}

/// Operands of a decoded word, one variant per [`Format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum Operands {
    Zero,
    A { a: u8 },
    AD { a: u8, d: u16 },
    AX { a: u8, x: i16 },
    D { d: u16 },
    X { x: i16 },
    ABC { a: u8, b: u8, c: u8 },
    T { t: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Instr {
    pub opcode: Opcode,
    pub operands: Operands,
}

impl Instr {
    /// Jump displacement in words, relative to the jump's own offset.
    pub fn jump_displacement(&self) -> Option<i32> {
        match self.operands {
            Operands::T { t } => Some(t),
            _ => None,
        }
    }

    /// Re-encode through the same checked path the assembler uses.
    pub fn encode(&self) -> AsmResult<u32> {
        let op = self.opcode;
        match self.operands {
            Operands::Zero => Ok(encode_zero(op)),
            Operands::A { a } => encode_a(op, a as i64),
            Operands::AD { a, d } => encode_ad(op, a as i64, d as i64),
            Operands::AX { a, x } => encode_ax(op, a as i64, x as i64),
            Operands::D { d } => encode_d(op, d as i64),
            Operands::X { x } => encode_x(op, x as i64),
            Operands::ABC { a, b, c } => encode_abc(op, a as i64, b as i64, c as i64),
            Operands::T { t } => encode_t(op, t as i64),
        }
    }
}

/// Decode a single word. This is the inverse of the `encode_*` family and
/// defines the layout contract the VM reads.
pub fn decode_word(word: u32) -> AsmResult<Instr> {
    let opcode = opcode_of(word)?;
    let a = ((word >> A_SHIFT) & 0xFF) as u8;
    let b = ((word >> B_SHIFT) & 0xFF) as u8;
    let c = ((word >> C_SHIFT) & 0xFF) as u8;
    let d = (word >> D_SHIFT) as u16;
    let operands = match opcode.format() {
        Format::Zero => {
            if word >> A_SHIFT != 0 {
                return Err(AsmError::MalformedWord {
                    word,
                    detail: "operand bits set on a zero-operand opcode",
                });
            }
            Operands::Zero
        }
        Format::A => {
            if d != 0 {
                return Err(AsmError::MalformedWord {
                    word,
                    detail: "padding bits set after register operand",
                });
            }
            Operands::A { a }
        }
        Format::AD => Operands::AD { a, d },
        Format::AX => Operands::AX { a, x: d as i16 },
        Format::D | Format::X => {
            if a != 0 {
                return Err(AsmError::MalformedWord {
                    word,
                    detail: "padding byte set before 16-bit operand",
                });
            }
            if opcode.format() == Format::D {
                Operands::D { d }
            } else {
                Operands::X { x: d as i16 }
            }
        }
        Format::ABC => Operands::ABC { a, b, c },
        Format::T => Operands::T {
            t: sign_extend(word >> T_SHIFT, T_BITS),
        },
    };
    Ok(Instr { opcode, operands })
}

/// Rewrite the displacement of an already-encoded jump word in place.
pub(crate) fn repatch_jump(site: usize, word: u32, displacement: i64) -> AsmResult<u32> {
    let opcode = opcode_of(word).map_err(|_| AsmError::CorruptPatchSite { site, word })?;
    if !opcode.is_jump() {
        return Err(AsmError::CorruptPatchSite { site, word });
    }
    encode_t(opcode, displacement)
}

impl fmt::Display for Operands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Operands::Zero => Ok(()),
            Operands::A { a } => write!(f, "{}", a),
            Operands::AD { a, d } => write!(f, "{}, {}", a, d),
            Operands::AX { a, x } => write!(f, "{}, {}", a, x),
            Operands::D { d } => write!(f, "{}", d),
            Operands::X { x } => write!(f, "{}", x),
            Operands::ABC { a, b, c } => write!(f, "{}, {}, {}", a, b, c),
            Operands::T { t } => write!(f, "{:+}", t),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if matches!(self.operands, Operands::Zero) {
            write!(f, "{}", self.opcode)
        } else {
            write!(f, "{} {}", self.opcode, self.operands)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range_err(result: AsmResult<u32>) -> bool {
        matches!(result, Err(AsmError::EncodingRange { .. }))
    }

    #[test]
    fn opcode_sits_in_low_byte() {
        let w = encode_ad(Opcode::DirectCall, 0x12, 0xBEEF).expect("encodable");
        assert_eq!(w & 0xFF, Opcode::DirectCall as u32);
        assert_eq!((w >> 8) & 0xFF, 0x12);
        assert_eq!(w >> 16, 0xBEEF);
        assert_eq!(w.to_le_bytes()[0], Opcode::DirectCall as u8);
    }

    #[test]
    fn unsigned_8bit_edges() {
        assert!(encode_a(Opcode::DropN, 0).is_ok());
        assert!(encode_a(Opcode::DropN, 255).is_ok());
        assert!(range_err(encode_a(Opcode::DropN, 256)));
        assert!(range_err(encode_a(Opcode::DropN, -1)));
        let ok = decode_word(encode_a(Opcode::DropN, 255).unwrap()).unwrap();
        assert_eq!(ok.operands, Operands::A { a: 255 });
    }

    #[test]
    fn unsigned_16bit_edges() {
        let w = encode_d(Opcode::PushConstant, 65535).expect("max d");
        assert_eq!(decode_word(w).unwrap().operands, Operands::D { d: 65535 });
        assert!(range_err(encode_d(Opcode::PushConstant, 65536)));
        assert!(range_err(encode_d(Opcode::PushConstant, -1)));
        assert!(range_err(encode_ad(Opcode::InstanceCall, 1, 65536)));
    }

    #[test]
    fn signed_16bit_edges() {
        for x in [-32768i64, -1, 0, 1, 32767] {
            let w = encode_x(Opcode::PushInt, x).expect("in range");
            assert_eq!(decode_word(w).unwrap().operands, Operands::X { x: x as i16 });
            let w = encode_ax(Opcode::LoadIntImm, 3, x).expect("in range");
            assert_eq!(
                decode_word(w).unwrap().operands,
                Operands::AX { a: 3, x: x as i16 }
            );
        }
        assert!(range_err(encode_x(Opcode::PushInt, 32768)));
        assert!(range_err(encode_x(Opcode::PushInt, -32769)));
        assert!(range_err(encode_ax(Opcode::AddIntImm, 0, 32768)));
    }

    #[test]
    fn signed_24bit_edges() {
        for t in [MIN_JUMP_DISPLACEMENT, -1, 0, 1, MAX_JUMP_DISPLACEMENT] {
            let w = encode_t(Opcode::Jump, t).expect("in range");
            assert_eq!(decode_word(w).unwrap().jump_displacement(), Some(t as i32));
        }
        assert!(range_err(encode_t(Opcode::Jump, MAX_JUMP_DISPLACEMENT + 1)));
        assert!(range_err(encode_t(Opcode::Jump, MIN_JUMP_DISPLACEMENT - 1)));
    }

    #[test]
    fn abc_fields_are_independent() {
        let w = encode_abc(Opcode::AddRegs, 1, 2, 255).expect("encodable");
        assert_eq!(
            decode_word(w).unwrap().operands,
            Operands::ABC { a: 1, b: 2, c: 255 }
        );
        assert!(range_err(encode_abc(Opcode::AddRegs, 1, 256, 3)));
    }

    #[test]
    fn decode_rejects_unknown_and_padded_words() {
        assert_eq!(decode_word(0xFF), Err(AsmError::UnknownOpcode { byte: 0xFF }));
        let padded = encode_zero(Opcode::PushNull) | (1 << 9);
        assert!(matches!(decode_word(padded), Err(AsmError::MalformedWord { .. })));
        let padded_d = encode_d(Opcode::Entry, 4).unwrap() | (7 << A_SHIFT);
        assert!(matches!(decode_word(padded_d), Err(AsmError::MalformedWord { .. })));
    }

    #[test]
    fn instr_encode_matches_original_word() {
        let words = [
            encode_zero(Opcode::ReturnTos),
            encode_a(Opcode::Throw, 1).unwrap(),
            encode_ad(Opcode::AssertAssignable, 0, 9).unwrap(),
            encode_ax(Opcode::AddIntImm, 4, -7).unwrap(),
            encode_d(Opcode::StoreStaticTos, 300).unwrap(),
            encode_x(Opcode::Push, -2).unwrap(),
            encode_abc(Opcode::LoadIndexed, 7, 8, 9).unwrap(),
            encode_t(Opcode::JumpIfFalse, -12).unwrap(),
        ];
        for w in words {
            let instr = decode_word(w).expect("decodable");
            assert_eq!(instr.encode().expect("re-encodable"), w);
        }
    }

    #[test]
    fn repatch_rejects_non_jump_words() {
        let word = encode_zero(Opcode::PushNull);
        assert_eq!(
            repatch_jump(3, word, 1),
            Err(AsmError::CorruptPatchSite { site: 3, word })
        );
        let jump = encode_t(Opcode::JumpIfNull, 0).unwrap();
        let patched = repatch_jump(0, jump, 5).unwrap();
        assert_eq!(decode_word(patched).unwrap().jump_displacement(), Some(5));
        assert_eq!(opcode_of(patched).unwrap(), Opcode::JumpIfNull);
    }

    #[test]
    fn instr_display() {
        let call = decode_word(encode_ad(Opcode::DirectCall, 2, 17).unwrap()).unwrap();
        assert_eq!(call.to_string(), "DirectCall 2, 17");
        let jump = decode_word(encode_t(Opcode::Jump, -3).unwrap()).unwrap();
        assert_eq!(jump.to_string(), "Jump -3");
        let ret = decode_word(encode_zero(Opcode::ReturnTos)).unwrap();
        assert_eq!(ret.to_string(), "ReturnTOS");
    }
}
