//! Opcode catalogue.
//!
//! Every opcode occupies exactly one 32-bit word and is bound to exactly one
//! operand [`Format`]. The opcode byte is always stored in bits 0..8 of the
//! word; the format decides how bits 8..32 are carved up.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operand layout of a single instruction word.
///
/// Layout (bit ranges, low bit first):
/// - `Zero`: `[op:8 | 0:24]`
/// - `A`:    `[op:8 | a:8 | 0:16]`
/// - `AD`:   `[op:8 | a:8 | d:16]`
/// - `AX`:   `[op:8 | a:8 | x:16 signed]`
/// - `D`:    `[op:8 | 0:8 | d:16]`
/// - `X`:    `[op:8 | 0:8 | x:16 signed]`
/// - `ABC`:  `[op:8 | a:8 | b:8 | c:8]`
/// - `T`:    `[op:8 | t:24 signed]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    Zero,
    A,
    AD,
    AX,
    D,
    X,
    ABC,
    T,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    // Format::Zero
    Trap = 0,
    Nop,
    PushNull,
    PushTrue,
    PushFalse,
    Drop1,
    ReturnTos,
    EqualsNull,
    BooleanNegateTos,
    NegateInt,
    AddInt,
    SubInt,
    MulInt,
    CompareIntEq,
    CompareIntLt,
    StoreIndexedTos,
    // Format::A
    Throw,
    CheckStack,
    AssertBoolean,
    DropN,
    // Format::AD
    InstanceCall,
    DirectCall,
    InterfaceCall,
    AllocateContext,
    AssertAssignable,
    // Format::AX
    LoadIntImm,
    AddIntImm,
    // Format::D
    Entry,
    PushConstant,
    PushStatic,
    StoreStaticTos,
    LoadFieldTos,
    StoreFieldTos,
    NativeCall,
    Allocate,
    // Format::X
    PushInt,
    Push,
    StoreLocal,
    PopLocal,
    // Format::ABC
    AddRegs,
    SubRegs,
    MulRegs,
    LoadIndexed,
    StoreIndexed,
    // Format::T
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    JumpIfNull,
    JumpIfNotNull,
    JumpIfEqStrict,
    JumpIfNeStrict,
}

impl Opcode {
    /// All opcodes, indexed by their byte value.
    pub const ALL: [Opcode; 51] = [
        Opcode::Trap,
        Opcode::Nop,
        Opcode::PushNull,
        Opcode::PushTrue,
        Opcode::PushFalse,
        Opcode::Drop1,
        Opcode::ReturnTos,
        Opcode::EqualsNull,
        Opcode::BooleanNegateTos,
        Opcode::NegateInt,
        Opcode::AddInt,
        Opcode::SubInt,
        Opcode::MulInt,
        Opcode::CompareIntEq,
        Opcode::CompareIntLt,
        Opcode::StoreIndexedTos,
        Opcode::Throw,
        Opcode::CheckStack,
        Opcode::AssertBoolean,
        Opcode::DropN,
        Opcode::InstanceCall,
        Opcode::DirectCall,
        Opcode::InterfaceCall,
        Opcode::AllocateContext,
        Opcode::AssertAssignable,
        Opcode::LoadIntImm,
        Opcode::AddIntImm,
        Opcode::Entry,
        Opcode::PushConstant,
        Opcode::PushStatic,
        Opcode::StoreStaticTos,
        Opcode::LoadFieldTos,
        Opcode::StoreFieldTos,
        Opcode::NativeCall,
        Opcode::Allocate,
        Opcode::PushInt,
        Opcode::Push,
        Opcode::StoreLocal,
        Opcode::PopLocal,
        Opcode::AddRegs,
        Opcode::SubRegs,
        Opcode::MulRegs,
        Opcode::LoadIndexed,
        Opcode::StoreIndexed,
        Opcode::Jump,
        Opcode::JumpIfTrue,
        Opcode::JumpIfFalse,
        Opcode::JumpIfNull,
        Opcode::JumpIfNotNull,
        Opcode::JumpIfEqStrict,
        Opcode::JumpIfNeStrict,
    ];

    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        Self::ALL.get(byte as usize).copied()
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn format(self) -> Format {
        use Opcode::*;
        match self {
            Trap | Nop | PushNull | PushTrue | PushFalse | Drop1 | ReturnTos | EqualsNull | BooleanNegateTos
            | NegateInt | AddInt | SubInt | MulInt | CompareIntEq | CompareIntLt | StoreIndexedTos => Format::Zero,
            Throw | CheckStack | AssertBoolean | DropN => Format::A,
            InstanceCall | DirectCall | InterfaceCall | AllocateContext | AssertAssignable => Format::AD,
            LoadIntImm | AddIntImm => Format::AX,
            Entry | PushConstant | PushStatic | StoreStaticTos | LoadFieldTos | StoreFieldTos | NativeCall
            | Allocate => Format::D,
            PushInt | Push | StoreLocal | PopLocal => Format::X,
            AddRegs | SubRegs | MulRegs | LoadIndexed | StoreIndexed => Format::ABC,
            Jump | JumpIfTrue | JumpIfFalse | JumpIfNull | JumpIfNotNull | JumpIfEqStrict | JumpIfNeStrict => {
                Format::T
            }
        }
    }

    /// Jump-family opcodes carry a label-relative displacement and are the
    /// only words the patcher is allowed to rewrite.
    #[inline]
    pub const fn is_jump(self) -> bool {
        matches!(self.format(), Format::T)
    }

    /// Unconditional control transfers: nothing after them is reachable by
    /// fallthrough.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::ReturnTos | Opcode::Throw | Opcode::Trap)
    }

    /// Opcodes that may observe or raise at runtime and therefore record the
    /// current source position before being emitted.
    pub const fn stamps_source_position(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            InstanceCall
                | DirectCall
                | InterfaceCall
                | NativeCall
                | Throw
                | StoreStaticTos
                | StoreFieldTos
                | StoreIndexed
                | StoreIndexedTos
                | AssertAssignable
                | AssertBoolean
                | Allocate
                | AllocateContext
                | CheckStack
        )
    }

    pub const fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            Trap => "Trap",
            Nop => "Nop",
            PushNull => "PushNull",
            PushTrue => "PushTrue",
            PushFalse => "PushFalse",
            Drop1 => "Drop1",
            ReturnTos => "ReturnTOS",
            EqualsNull => "EqualsNull",
            BooleanNegateTos => "BooleanNegateTOS",
            NegateInt => "NegateInt",
            AddInt => "AddInt",
            SubInt => "SubInt",
            MulInt => "MulInt",
            CompareIntEq => "CompareIntEq",
            CompareIntLt => "CompareIntLt",
            StoreIndexedTos => "StoreIndexedTOS",
            Throw => "Throw",
            CheckStack => "CheckStack",
            AssertBoolean => "AssertBoolean",
            DropN => "DropN",
            InstanceCall => "InstanceCall",
            DirectCall => "DirectCall",
            InterfaceCall => "InterfaceCall",
            AllocateContext => "AllocateContext",
            AssertAssignable => "AssertAssignable",
            LoadIntImm => "LoadIntImm",
            AddIntImm => "AddIntImm",
            Entry => "Entry",
            PushConstant => "PushConstant",
            PushStatic => "PushStatic",
            StoreStaticTos => "StoreStaticTOS",
            LoadFieldTos => "LoadFieldTOS",
            StoreFieldTos => "StoreFieldTOS",
            NativeCall => "NativeCall",
            Allocate => "Allocate",
            PushInt => "PushInt",
            Push => "Push",
            StoreLocal => "StoreLocal",
            PopLocal => "PopLocal",
            AddRegs => "AddRegs",
            SubRegs => "SubRegs",
            MulRegs => "MulRegs",
            LoadIndexed => "LoadIndexed",
            StoreIndexed => "StoreIndexed",
            Jump => "Jump",
            JumpIfTrue => "JumpIfTrue",
            JumpIfFalse => "JumpIfFalse",
            JumpIfNull => "JumpIfNull",
            JumpIfNotNull => "JumpIfNotNull",
            JumpIfEqStrict => "JumpIfEqStrict",
            JumpIfNeStrict => "JumpIfNeStrict",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_dense_and_indexed_by_byte() {
        for (idx, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.as_u8() as usize, idx, "{} out of place", op);
            assert_eq!(Opcode::from_u8(idx as u8), Some(*op));
        }
        assert_eq!(Opcode::from_u8(Opcode::ALL.len() as u8), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn jumps_are_exactly_the_t_format() {
        let jumps: Vec<Opcode> = Opcode::ALL.iter().copied().filter(|op| op.is_jump()).collect();
        assert_eq!(jumps.len(), 7);
        assert!(jumps.iter().all(|op| op.format() == Format::T));
        assert!(!Opcode::ReturnTos.is_jump());
    }

    #[test]
    fn terminal_set() {
        let terminals: Vec<Opcode> = Opcode::ALL.iter().copied().filter(|op| op.is_terminal()).collect();
        assert_eq!(
            terminals,
            vec![Opcode::Trap, Opcode::ReturnTos, Opcode::Throw, Opcode::Jump]
        );
        assert!(!Opcode::JumpIfTrue.is_terminal());
    }

    #[test]
    fn stack_shuffles_do_not_stamp_positions() {
        for op in [Opcode::PushNull, Opcode::Drop1, Opcode::Push, Opcode::PopLocal, Opcode::Jump] {
            assert!(!op.stamps_source_position(), "{} should not stamp", op);
        }
        for op in [Opcode::DirectCall, Opcode::Throw, Opcode::StoreFieldTos, Opcode::AssertAssignable] {
            assert!(op.stamps_source_position(), "{} should stamp", op);
        }
    }
}
