//! Single-pass bytecode assembler.
//!
//! All emission funnels through [`BytecodeAssembler::emit_word`], which drops
//! words while the current point is statically unreachable (after `Jump`,
//! `ReturnTOS`, `Throw` or `Trap`, until a live label is bound). Forward jumps
//! are emitted with a placeholder displacement and rewritten in place when
//! their label is bound.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::label::Label;
use super::tables::{ExceptionsTable, SourcePosition, SourcePositions, TryBlock};
use crate::encoding::{
    encode_a, encode_abc, encode_ad, encode_ax, encode_d, encode_t, encode_x, encode_zero, repatch_jump,
};
use crate::error::{AsmError, AsmResult};
use crate::opcode::Opcode;
use crate::options::AssemblerOptions;

const TRACE_TARGET: &str = "lkbc::asm";

/// Counters collected while assembling one code object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblerStats {
    pub emitted_words: u64,
    pub elided_words: u64,
    pub elided_jumps: u64,
    pub patched_sites: u64,
    pub labels_bound: u64,
}

/// Finished output of an assembler: the word buffer plus its side tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledCode {
    pub words: Vec<u32>,
    pub source_positions: SourcePositions,
    pub exceptions: ExceptionsTable,
    #[serde(default)]
    pub stats: AssemblerStats,
}

impl AssembledCode {
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

pub struct BytecodeAssembler {
    words: Vec<u32>,
    current_source_position: Option<SourcePosition>,
    is_unreachable: bool,
    source_positions: SourcePositions,
    exceptions: ExceptionsTable,
    unresolved_jumps: usize,
    stats: AssemblerStats,
    options: AssemblerOptions,
}

impl Default for BytecodeAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl BytecodeAssembler {
    pub fn new() -> Self {
        Self::with_options(AssemblerOptions::default())
    }

    pub fn with_options(options: AssemblerOptions) -> Self {
        Self {
            words: Vec::with_capacity(options.initial_capacity),
            current_source_position: None,
            is_unreachable: false,
            source_positions: SourcePositions::new(),
            exceptions: ExceptionsTable::new(),
            unresolved_jumps: 0,
            stats: AssemblerStats::default(),
            options,
        }
    }

    /// Current word offset; the offset the next emitted word will occupy.
    #[inline]
    pub fn offset(&self) -> usize {
        self.words.len()
    }

    #[inline]
    fn pc(&self) -> u32 {
        self.words.len() as u32
    }

    #[inline]
    pub fn is_unreachable(&self) -> bool {
        self.is_unreachable
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn source_positions(&self) -> &SourcePositions {
        &self.source_positions
    }

    pub fn exceptions(&self) -> &ExceptionsTable {
        &self.exceptions
    }

    pub fn exceptions_mut(&mut self) -> &mut ExceptionsTable {
        &mut self.exceptions
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Number of emitted jumps whose label is still unbound.
    pub fn unresolved_jumps(&self) -> usize {
        self.unresolved_jumps
    }

    pub fn current_source_position(&self) -> Option<SourcePosition> {
        self.current_source_position
    }

    pub fn set_source_position(&mut self, position: Option<SourcePosition>) {
        self.current_source_position = position;
    }

    /// Append one word, unless the current point is unreachable.
    pub fn emit_word(&mut self, word: u32) {
        if self.is_unreachable {
            self.stats.elided_words += 1;
            trace!(target: TRACE_TARGET, offset = self.words.len(), word, "asm.elide_word");
            return;
        }
        self.words.push(word);
        self.stats.emitted_words += 1;
    }

    /// Record the current source position against the current offset.
    pub fn emit_source_position(&mut self) {
        if self.is_unreachable || !self.options.record_source_positions {
            return;
        }
        if let Some(position) = self.current_source_position {
            let pc = self.pc();
            self.source_positions.add(pc, position);
        }
    }

    fn emit(&mut self, opcode: Opcode, word: u32) {
        if opcode.stamps_source_position() {
            self.emit_source_position();
        }
        self.emit_word(word);
        if opcode.is_terminal() {
            self.is_unreachable = true;
        }
    }

    fn emit_0(&mut self, opcode: Opcode) {
        self.emit(opcode, encode_zero(opcode));
    }

    fn emit_a(&mut self, opcode: Opcode, a: u32) -> AsmResult<()> {
        let word = encode_a(opcode, a as i64)?;
        self.emit(opcode, word);
        Ok(())
    }

    fn emit_ad(&mut self, opcode: Opcode, a: u32, d: u32) -> AsmResult<()> {
        let word = encode_ad(opcode, a as i64, d as i64)?;
        self.emit(opcode, word);
        Ok(())
    }

    fn emit_ax(&mut self, opcode: Opcode, a: u32, x: i32) -> AsmResult<()> {
        let word = encode_ax(opcode, a as i64, x as i64)?;
        self.emit(opcode, word);
        Ok(())
    }

    fn emit_d(&mut self, opcode: Opcode, d: u32) -> AsmResult<()> {
        let word = encode_d(opcode, d as i64)?;
        self.emit(opcode, word);
        Ok(())
    }

    fn emit_x(&mut self, opcode: Opcode, x: i32) -> AsmResult<()> {
        let word = encode_x(opcode, x as i64)?;
        self.emit(opcode, word);
        Ok(())
    }

    fn emit_abc(&mut self, opcode: Opcode, a: u32, b: u32, c: u32) -> AsmResult<()> {
        let word = encode_abc(opcode, a as i64, b as i64, c as i64)?;
        self.emit(opcode, word);
        Ok(())
    }

    /// Emit a jump-family instruction targeting `label`.
    ///
    /// Skipped entirely in unreachable code so the label never learns about a
    /// site that does not exist.
    pub fn emit_jump_like(&mut self, opcode: Opcode, label: &mut Label) -> AsmResult<()> {
        if !opcode.is_jump() {
            return Err(AsmError::NotAJump { opcode });
        }
        if self.is_unreachable {
            self.stats.elided_jumps += 1;
            trace!(target: TRACE_TARGET, opcode = opcode.name(), "asm.elide_jump");
            return Ok(());
        }
        let site = self.offset();
        let operand = label.jump_operand_for(site)?;
        let word = encode_t(opcode, operand)?;
        if !label.is_bound() {
            self.unresolved_jumps += 1;
        }
        self.emit(opcode, word);
        Ok(())
    }

    /// Bind `label` to the current offset and patch every jump waiting on it.
    pub fn bind(&mut self, label: &mut Label) -> AsmResult<()> {
        let target = self.offset();
        let sites = label.bind(target)?;
        for &site in &sites {
            let word = match self.words.get(site) {
                Some(word) => *word,
                None => return Err(AsmError::CorruptPatchSite { site, word: 0 }),
            };
            let operand = label.jump_operand_for(site)?;
            self.words[site] = repatch_jump(site, word, operand)?;
            trace!(target: TRACE_TARGET, site, target, displacement = operand, "asm.patch");
        }
        self.unresolved_jumps = self.unresolved_jumps.saturating_sub(sites.len());
        self.stats.patched_sites += sites.len() as u64;
        self.stats.labels_bound += 1;

        if !sites.is_empty() || label.allows_backward_jumps() {
            self.is_unreachable = false;
        }
        debug!(
            target: TRACE_TARGET,
            offset = target,
            patched = sites.len(),
            reachable = !self.is_unreachable,
            "asm.bind"
        );
        Ok(())
    }

    /// Open a try block starting at the current offset.
    pub fn begin_try_block(&mut self, outer_try_index: Option<u16>) -> AsmResult<u16> {
        let pc = self.pc();
        self.exceptions.enter_try_block(outer_try_index, pc)
    }

    /// Close the protected range of `try_index` at the current offset.
    pub fn end_try_block(&mut self, try_index: u16) -> Option<&mut TryBlock> {
        let pc = self.pc();
        let block = self.exceptions.block_mut(try_index)?;
        block.end_pc = pc;
        Some(block)
    }

    /// Mark the current offset as the handler entry of `try_index`.
    ///
    /// Handlers are entered by the runtime's unwinder, so code from here on is
    /// reachable even when the preceding code was dead.
    pub fn bind_handler(&mut self, try_index: u16) -> Option<&mut TryBlock> {
        let pc = self.pc();
        let block = self.exceptions.block_mut(try_index)?;
        block.handler_pc = pc;
        self.is_unreachable = false;
        Some(block)
    }

    pub fn finish(self) -> AsmResult<AssembledCode> {
        if self.unresolved_jumps > 0 {
            return Err(AsmError::UnresolvedJumps {
                count: self.unresolved_jumps,
            });
        }
        if self.options.verify_on_finish {
            crate::disasm::verify(&self.words)?;
        }
        debug!(
            target: TRACE_TARGET,
            words = self.words.len(),
            elided = self.stats.elided_words + self.stats.elided_jumps,
            patched = self.stats.patched_sites,
            positions = self.source_positions.len(),
            try_blocks = self.exceptions.len(),
            "asm.finish"
        );
        Ok(AssembledCode {
            words: self.words,
            source_positions: self.source_positions,
            exceptions: self.exceptions,
            stats: self.stats,
        })
    }

    // Zero-operand instructions.

    pub fn emit_trap(&mut self) {
        self.emit_0(Opcode::Trap);
    }

    pub fn emit_nop(&mut self) {
        self.emit_0(Opcode::Nop);
    }

    pub fn emit_push_null(&mut self) {
        self.emit_0(Opcode::PushNull);
    }

    pub fn emit_push_true(&mut self) {
        self.emit_0(Opcode::PushTrue);
    }

    pub fn emit_push_false(&mut self) {
        self.emit_0(Opcode::PushFalse);
    }

    pub fn emit_drop1(&mut self) {
        self.emit_0(Opcode::Drop1);
    }

    pub fn emit_return_tos(&mut self) {
        self.emit_0(Opcode::ReturnTos);
    }

    pub fn emit_equals_null(&mut self) {
        self.emit_0(Opcode::EqualsNull);
    }

    pub fn emit_boolean_negate_tos(&mut self) {
        self.emit_0(Opcode::BooleanNegateTos);
    }

    pub fn emit_negate_int(&mut self) {
        self.emit_0(Opcode::NegateInt);
    }

    pub fn emit_add_int(&mut self) {
        self.emit_0(Opcode::AddInt);
    }

    pub fn emit_sub_int(&mut self) {
        self.emit_0(Opcode::SubInt);
    }

    pub fn emit_mul_int(&mut self) {
        self.emit_0(Opcode::MulInt);
    }

    pub fn emit_compare_int_eq(&mut self) {
        self.emit_0(Opcode::CompareIntEq);
    }

    pub fn emit_compare_int_lt(&mut self) {
        self.emit_0(Opcode::CompareIntLt);
    }

    pub fn emit_store_indexed_tos(&mut self) {
        self.emit_0(Opcode::StoreIndexedTos);
    }

    // Single register operand.

    pub fn emit_throw(&mut self, rethrow: bool) -> AsmResult<()> {
        self.emit_a(Opcode::Throw, rethrow as u32)
    }

    pub fn emit_check_stack(&mut self, loop_depth: u32) -> AsmResult<()> {
        self.emit_a(Opcode::CheckStack, loop_depth)
    }

    pub fn emit_assert_boolean(&mut self, reg: u32) -> AsmResult<()> {
        self.emit_a(Opcode::AssertBoolean, reg)
    }

    pub fn emit_drop_n(&mut self, count: u32) -> AsmResult<()> {
        self.emit_a(Opcode::DropN, count)
    }

    // Register + unsigned 16-bit.

    pub fn emit_instance_call(&mut self, argc: u32, cp_index: u32) -> AsmResult<()> {
        self.emit_ad(Opcode::InstanceCall, argc, cp_index)
    }

    pub fn emit_direct_call(&mut self, argc: u32, cp_index: u32) -> AsmResult<()> {
        self.emit_ad(Opcode::DirectCall, argc, cp_index)
    }

    pub fn emit_interface_call(&mut self, argc: u32, cp_index: u32) -> AsmResult<()> {
        self.emit_ad(Opcode::InterfaceCall, argc, cp_index)
    }

    pub fn emit_allocate_context(&mut self, context_id: u32, num_vars: u32) -> AsmResult<()> {
        self.emit_ad(Opcode::AllocateContext, context_id, num_vars)
    }

    pub fn emit_assert_assignable(&mut self, is_type_check: u32, cp_index: u32) -> AsmResult<()> {
        self.emit_ad(Opcode::AssertAssignable, is_type_check, cp_index)
    }

    // Register + signed 16-bit.

    pub fn emit_load_int_imm(&mut self, reg: u32, value: i32) -> AsmResult<()> {
        self.emit_ax(Opcode::LoadIntImm, reg, value)
    }

    pub fn emit_add_int_imm(&mut self, reg: u32, value: i32) -> AsmResult<()> {
        self.emit_ax(Opcode::AddIntImm, reg, value)
    }

    // Unsigned 16-bit.

    pub fn emit_entry(&mut self, num_locals: u32) -> AsmResult<()> {
        self.emit_d(Opcode::Entry, num_locals)
    }

    pub fn emit_push_constant(&mut self, cp_index: u32) -> AsmResult<()> {
        self.emit_d(Opcode::PushConstant, cp_index)
    }

    pub fn emit_push_static(&mut self, cp_index: u32) -> AsmResult<()> {
        self.emit_d(Opcode::PushStatic, cp_index)
    }

    pub fn emit_store_static_tos(&mut self, cp_index: u32) -> AsmResult<()> {
        self.emit_d(Opcode::StoreStaticTos, cp_index)
    }

    pub fn emit_load_field_tos(&mut self, cp_index: u32) -> AsmResult<()> {
        self.emit_d(Opcode::LoadFieldTos, cp_index)
    }

    pub fn emit_store_field_tos(&mut self, cp_index: u32) -> AsmResult<()> {
        self.emit_d(Opcode::StoreFieldTos, cp_index)
    }

    pub fn emit_native_call(&mut self, cp_index: u32) -> AsmResult<()> {
        self.emit_d(Opcode::NativeCall, cp_index)
    }

    pub fn emit_allocate(&mut self, cp_index: u32) -> AsmResult<()> {
        self.emit_d(Opcode::Allocate, cp_index)
    }

    // Signed 16-bit (immediates and frame-relative locals).

    pub fn emit_push_int(&mut self, value: i32) -> AsmResult<()> {
        self.emit_x(Opcode::PushInt, value)
    }

    pub fn emit_push(&mut self, local: i32) -> AsmResult<()> {
        self.emit_x(Opcode::Push, local)
    }

    pub fn emit_store_local(&mut self, local: i32) -> AsmResult<()> {
        self.emit_x(Opcode::StoreLocal, local)
    }

    pub fn emit_pop_local(&mut self, local: i32) -> AsmResult<()> {
        self.emit_x(Opcode::PopLocal, local)
    }

    // Three registers.

    pub fn emit_add_regs(&mut self, dst: u32, lhs: u32, rhs: u32) -> AsmResult<()> {
        self.emit_abc(Opcode::AddRegs, dst, lhs, rhs)
    }

    pub fn emit_sub_regs(&mut self, dst: u32, lhs: u32, rhs: u32) -> AsmResult<()> {
        self.emit_abc(Opcode::SubRegs, dst, lhs, rhs)
    }

    pub fn emit_mul_regs(&mut self, dst: u32, lhs: u32, rhs: u32) -> AsmResult<()> {
        self.emit_abc(Opcode::MulRegs, dst, lhs, rhs)
    }

    pub fn emit_load_indexed(&mut self, dst: u32, array: u32, index: u32) -> AsmResult<()> {
        self.emit_abc(Opcode::LoadIndexed, dst, array, index)
    }

    pub fn emit_store_indexed(&mut self, array: u32, index: u32, value: u32) -> AsmResult<()> {
        self.emit_abc(Opcode::StoreIndexed, array, index, value)
    }

    // Jumps.

    pub fn emit_jump(&mut self, label: &mut Label) -> AsmResult<()> {
        self.emit_jump_like(Opcode::Jump, label)
    }

    pub fn emit_jump_if_true(&mut self, label: &mut Label) -> AsmResult<()> {
        self.emit_jump_like(Opcode::JumpIfTrue, label)
    }

    pub fn emit_jump_if_false(&mut self, label: &mut Label) -> AsmResult<()> {
        self.emit_jump_like(Opcode::JumpIfFalse, label)
    }

    pub fn emit_jump_if_null(&mut self, label: &mut Label) -> AsmResult<()> {
        self.emit_jump_like(Opcode::JumpIfNull, label)
    }

    pub fn emit_jump_if_not_null(&mut self, label: &mut Label) -> AsmResult<()> {
        self.emit_jump_like(Opcode::JumpIfNotNull, label)
    }

    pub fn emit_jump_if_eq_strict(&mut self, label: &mut Label) -> AsmResult<()> {
        self.emit_jump_like(Opcode::JumpIfEqStrict, label)
    }

    pub fn emit_jump_if_ne_strict(&mut self, label: &mut Label) -> AsmResult<()> {
        self.emit_jump_like(Opcode::JumpIfNeStrict, label)
    }
}
