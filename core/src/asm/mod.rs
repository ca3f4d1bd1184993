//! Bytecode assembler subsystem
//!
//! Turns a stream of `emit_*` / `bind` calls into a fixed-width word buffer
//! plus the source-position and exception tables that index into it.

mod assembler;
mod label;
mod tables;

pub use assembler::*;
pub use label::*;
pub use tables::*;
