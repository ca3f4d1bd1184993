use std::fmt;

use crate::opcode::Opcode;

pub type AsmResult<T> = Result<T, AsmError>;

/// Failures raised while encoding, patching or decoding bytecode words.
///
/// Every variant is a local invariant violation detected at the point of
/// emission or bind. An assembler that returned one of these must be
/// discarded; its buffer is not guaranteed to be consistent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// An operand does not fit the bit field reserved for it.
    EncodingRange {
        opcode: Opcode,
        field: &'static str,
        value: i64,
        bits: u32,
        signed: bool,
    },
    /// A jump at `site` targets a forward-only label bound at or before it.
    PolicyViolation { site: usize, target: usize },
    /// `bind` was called on a label that already has an offset.
    DoubleBind { offset: usize },
    /// `finish` was called while jumps still reference unbound labels.
    UnresolvedJumps { count: usize },
    /// A pending patch site no longer holds a jump instruction.
    CorruptPatchSite { site: usize, word: u32 },
    /// A non-jump opcode was handed to the jump emitter.
    NotAJump { opcode: Opcode },
    /// Every try index below the reserved `u16::MAX` is already taken.
    TooManyTryBlocks { limit: usize },
    UnknownOpcode { byte: u8 },
    MalformedWord { word: u32, detail: &'static str },
    Verify { pc: usize, detail: String },
}

impl AsmError {
    /// Short machine-friendly key, handy for logging fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AsmError::EncodingRange { .. } => "encoding_range",
            AsmError::PolicyViolation { .. } => "policy_violation",
            AsmError::DoubleBind { .. } => "double_bind",
            AsmError::UnresolvedJumps { .. } => "unresolved_jumps",
            AsmError::CorruptPatchSite { .. } => "corrupt_patch_site",
            AsmError::NotAJump { .. } => "not_a_jump",
            AsmError::TooManyTryBlocks { .. } => "too_many_try_blocks",
            AsmError::UnknownOpcode { .. } => "unknown_opcode",
            AsmError::MalformedWord { .. } => "malformed_word",
            AsmError::Verify { .. } => "verify",
        }
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsmError::EncodingRange {
                opcode,
                field,
                value,
                bits,
                signed,
            } => {
                let kind = if *signed { "signed" } else { "unsigned" };
                write!(
                    f,
                    "operand {} of {} does not fit {} {}-bit field: {}",
                    field,
                    opcode.name(),
                    kind,
                    bits,
                    value
                )
            }
            AsmError::PolicyViolation { site, target } => write!(
                f,
                "backward jump from {} to {} targets a label that only allows forward jumps",
                site, target
            ),
            AsmError::DoubleBind { offset } => write!(f, "label already bound at offset {}", offset),
            AsmError::UnresolvedJumps { count } => {
                write!(f, "{} jump(s) still reference unbound labels", count)
            }
            AsmError::CorruptPatchSite { site, word } => {
                write!(f, "patch site {} holds non-jump word {:#010x}", site, word)
            }
            AsmError::NotAJump { opcode } => write!(f, "{} is not a jump opcode", opcode.name()),
            AsmError::TooManyTryBlocks { limit } => write!(f, "more than {} try blocks in one code object", limit),
            AsmError::UnknownOpcode { byte } => write!(f, "unknown opcode byte {:#04x}", byte),
            AsmError::MalformedWord { word, detail } => write!(f, "malformed word {:#010x}: {}", word, detail),
            AsmError::Verify { pc, detail } => write!(f, "verification failed at {}: {}", pc, detail),
        }
    }
}

impl std::error::Error for AsmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_range_display() {
        let err = AsmError::EncodingRange {
            opcode: Opcode::PushInt,
            field: "x",
            value: 40000,
            bits: 16,
            signed: true,
        };
        assert_eq!(
            err.to_string(),
            "operand x of PushInt does not fit signed 16-bit field: 40000"
        );
        assert_eq!(err.kind(), "encoding_range");
    }

    #[test]
    fn test_policy_violation_display() {
        let err = AsmError::PolicyViolation { site: 7, target: 3 };
        assert!(err.to_string().contains("from 7 to 3"));
    }

    #[test]
    fn errors_convert_into_anyhow() {
        let err: anyhow::Error = AsmError::DoubleBind { offset: 4 }.into();
        assert_eq!(err.to_string(), "label already bound at offset 4");
    }
}
