pub mod asm;
pub mod disasm;
pub mod encoding;
pub mod error;
pub mod lkbc;
pub mod opcode;
pub mod options;

pub use asm::{AssembledCode, AssemblerStats, BytecodeAssembler, Label, SourcePosition};
pub use error::{AsmError, AsmResult};
pub use opcode::{Format, Opcode};
pub use options::AssemblerOptions;
