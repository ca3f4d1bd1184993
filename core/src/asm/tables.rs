//! Offset-keyed side tables produced alongside the word buffer.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AsmError, AsmResult};

/// Try indices are `u16`; `u16::MAX` is reserved as the "no outer block"
/// marker in the container, so at most this many blocks fit.
pub const MAX_TRY_BLOCKS: usize = u16::MAX as usize;

/// Opaque source location token (a file offset in the originating source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePosition(pub u32);

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub pc: u32,
    pub position: SourcePosition,
}

/// Maps word offsets to the source position that produced them.
///
/// Entries are kept sorted by `pc`. Recording the same position twice in a
/// row is collapsed into one entry; recording a new position at the same
/// `pc` replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourcePositions {
    entries: Vec<PositionEntry>,
}

impl SourcePositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pc: u32, position: SourcePosition) {
        if let Some(last) = self.entries.last_mut() {
            debug_assert!(pc >= last.pc, "source positions must be added in pc order");
            if last.position == position {
                return;
            }
            if last.pc == pc {
                last.position = position;
                self.collapse_tail();
                return;
            }
        }
        self.entries.push(PositionEntry { pc, position });
    }

    // A replacement may leave the tail equal to its predecessor.
    fn collapse_tail(&mut self) {
        if let [.., prev, last] = self.entries.as_slice()
            && prev.position == last.position
        {
            self.entries.pop();
        }
    }

    /// Position in effect at `pc`: the last entry recorded at or before it.
    pub fn lookup(&self, pc: u32) -> Option<SourcePosition> {
        let idx = self.entries.partition_point(|e| e.pc <= pc);
        idx.checked_sub(1).map(|i| self.entries[i].position)
    }

    /// Exact entry recorded at `pc`, if any.
    pub fn at(&self, pc: u32) -> Option<SourcePosition> {
        self.entries
            .binary_search_by_key(&pc, |e| e.pc)
            .ok()
            .map(|i| self.entries[i].position)
    }

    pub fn entries(&self) -> &[PositionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<PositionEntry> for SourcePositions {
    fn from_iter<I: IntoIterator<Item = PositionEntry>>(iter: I) -> Self {
        let mut table = SourcePositions::new();
        for entry in iter {
            table.add(entry.pc, entry.position);
        }
        table
    }
}

/// One protected range and its handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryBlock {
    pub try_index: u16,
    pub outer_try_index: Option<u16>,
    pub start_pc: u32,
    /// Exclusive.
    pub end_pc: u32,
    pub handler_pc: u32,
    pub needs_stack_trace: bool,
    pub is_synthetic: bool,
    /// Constant-pool indices of the caught types.
    #[serde(default)]
    pub handler_types: Vec<u16>,
}

impl TryBlock {
    pub fn covers(&self, pc: u32) -> bool {
        self.start_pc <= pc && pc < self.end_pc
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionsTable {
    blocks: Vec<TryBlock>,
}

impl ExceptionsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new try block starting at `start_pc`. End and handler offsets
    /// start out equal to `start_pc` and are filled in as emission proceeds.
    pub fn enter_try_block(&mut self, outer_try_index: Option<u16>, start_pc: u32) -> AsmResult<u16> {
        if self.blocks.len() >= MAX_TRY_BLOCKS {
            return Err(AsmError::TooManyTryBlocks { limit: MAX_TRY_BLOCKS });
        }
        let try_index = self.blocks.len() as u16;
        debug_assert!(outer_try_index.is_none_or(|outer| outer < try_index));
        self.blocks.push(TryBlock {
            try_index,
            outer_try_index,
            start_pc,
            end_pc: start_pc,
            handler_pc: start_pc,
            needs_stack_trace: false,
            is_synthetic: false,
            handler_types: Vec::new(),
        });
        Ok(try_index)
    }

    /// Append a fully described block, as read back from a container.
    pub fn push(&mut self, block: TryBlock) {
        self.blocks.push(block);
    }

    pub fn block(&self, try_index: u16) -> Option<&TryBlock> {
        self.blocks.get(try_index as usize)
    }

    pub fn block_mut(&mut self, try_index: u16) -> Option<&mut TryBlock> {
        self.blocks.get_mut(try_index as usize)
    }

    /// Innermost block covering `pc`.
    pub fn innermost_at(&self, pc: u32) -> Option<&TryBlock> {
        self.blocks
            .iter()
            .filter(|b| b.covers(pc))
            .max_by_key(|b| b.start_pc)
    }

    pub fn blocks(&self) -> &[TryBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
