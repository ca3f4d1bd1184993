//! Verification and human-readable listings of assembled code.

use serde::Serialize;
use std::fmt::Write as _;

use crate::asm::{AssembledCode, SourcePosition};
use crate::encoding::{Instr, decode_word};
use crate::error::{AsmError, AsmResult};

/// Check that every word decodes and every jump lands inside the buffer
/// (the one-past-the-end offset is a valid target).
pub fn verify(words: &[u32]) -> AsmResult<()> {
    for (pc, &word) in words.iter().enumerate() {
        let instr = decode_word(word).map_err(|err| AsmError::Verify {
            pc,
            detail: err.to_string(),
        })?;
        if let Some(disp) = instr.jump_displacement() {
            let target = pc as i64 + disp as i64;
            if target < 0 || target > words.len() as i64 {
                return Err(AsmError::Verify {
                    pc,
                    detail: format!("jump target {} outside 0..={}", target, words.len()),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisasmOptions {
    pub show_positions: bool,
    pub show_try_blocks: bool,
}

impl Default for DisasmOptions {
    fn default() -> Self {
        Self {
            show_positions: true,
            show_try_blocks: true,
        }
    }
}

/// One decoded word, as emitted by the JSON listing.
#[derive(Debug, Clone, Serialize)]
pub struct ListingEntry {
    pub pc: u32,
    pub word: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instr: Option<Instr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<SourcePosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn listing(code: &AssembledCode) -> Vec<ListingEntry> {
    code.words
        .iter()
        .enumerate()
        .map(|(pc, &word)| {
            let pc = pc as u32;
            let position = code.source_positions.at(pc);
            match decode_word(word) {
                Ok(instr) => ListingEntry {
                    pc,
                    word,
                    target: instr.jump_displacement().map(|d| pc as i64 + d as i64),
                    instr: Some(instr),
                    position,
                    error: None,
                },
                Err(err) => ListingEntry {
                    pc,
                    word,
                    instr: None,
                    target: None,
                    position,
                    error: Some(err.to_string()),
                },
            }
        })
        .collect()
}

pub fn disassemble(code: &AssembledCode) -> String {
    disassemble_with(code, &DisasmOptions::default())
}

pub fn disassemble_with(code: &AssembledCode, opts: &DisasmOptions) -> String {
    let mut out = String::new();
    for entry in listing(code) {
        if opts.show_try_blocks {
            write_try_markers(&mut out, code, entry.pc);
        }
        let text = match (&entry.instr, &entry.error) {
            (Some(instr), _) => instr.to_string(),
            _ => format!(".word {:#010x}", entry.word),
        };
        let mut notes = Vec::new();
        if let Some(target) = entry.target {
            notes.push(format!("-> {}", target));
        }
        if opts.show_positions
            && let Some(pos) = entry.position
        {
            notes.push(pos.to_string());
        }
        if let Some(err) = &entry.error {
            notes.push(err.clone());
        }
        if notes.is_empty() {
            let _ = writeln!(out, "{:>5}: {:08x}  {}", entry.pc, entry.word, text);
        } else {
            let _ = writeln!(
                out,
                "{:>5}: {:08x}  {:<28} ; {}",
                entry.pc,
                entry.word,
                text,
                notes.join(", ")
            );
        }
    }
    if opts.show_try_blocks {
        write_try_markers(&mut out, code, code.words.len() as u32);
    }
    out
}

fn write_try_markers(out: &mut String, code: &AssembledCode, pc: u32) {
    for block in code.exceptions.blocks() {
        if block.end_pc == pc && block.start_pc != block.end_pc {
            let _ = writeln!(out, "       ; try #{} end", block.try_index);
        }
    }
    for block in code.exceptions.blocks() {
        if block.start_pc == pc {
            match block.outer_try_index {
                Some(outer) => {
                    let _ = writeln!(out, "       ; try #{} begin (outer #{})", block.try_index, outer);
                }
                None => {
                    let _ = writeln!(out, "       ; try #{} begin", block.try_index);
                }
            }
        }
        if block.handler_pc == pc && block.handler_pc != block.start_pc {
            let _ = writeln!(out, "       ; try #{} handler", block.try_index);
        }
    }
}
