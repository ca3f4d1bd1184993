//! LKBC container: assembled code plus its side tables in one binary blob.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! "LKBC" | version:u16 | reserved:u16 | flags:u32 | section*
//! section := tag:[u8;4] | len:u32 | payload[len]
//! ```
//!
//! Sections: `CODE` (required), `SPOS`, `EXCT`, `META` (JSON). Word `i` of
//! the code occupies bytes `[4i, 4i + 4)` of the `CODE` word array, so the
//! opcode byte comes first.

use std::collections::BTreeMap;

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::asm::{
    AssembledCode, ExceptionsTable, MAX_TRY_BLOCKS, PositionEntry, SourcePosition, SourcePositions, TryBlock,
};

const MAGIC: [u8; 4] = *b"LKBC";
pub const CURRENT_VERSION: u16 = 1;
const TRACE_TARGET: &str = "lkbc::container";
const NO_OUTER_TRY: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleFlags(u32);

impl ModuleFlags {
    pub const NONE: ModuleFlags = ModuleFlags(0);
    /// The word buffer passed the verifier before it was written.
    pub const VERIFIED: ModuleFlags = ModuleFlags(1 << 0);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> ModuleFlags {
        ModuleFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: ModuleFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: ModuleFlags) {
        self.0 |= other.0;
    }
}

/// Optional metadata describing where the code came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMeta {
    pub source: Option<String>,
    /// Name of the function or code object.
    pub name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeModule {
    pub version: u16,
    pub flags: ModuleFlags,
    pub code: AssembledCode,
    pub meta: Option<ModuleMeta>,
}

impl CodeModule {
    pub fn new(code: AssembledCode) -> Self {
        Self {
            version: CURRENT_VERSION,
            flags: ModuleFlags::NONE,
            code,
            meta: None,
        }
    }

    /// Run the verifier and record the result in the flags.
    pub fn verified(mut self) -> Result<Self> {
        crate::disasm::verify(&self.code.words)?;
        self.flags.insert(ModuleFlags::VERIFIED);
        Ok(self)
    }
}

/// Section sizes of an encoded module, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionInfo {
    pub tag: String,
    pub len: u32,
}

pub fn encode_module(module: &CodeModule) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16 + module.code.words.len() * 4);
    out.extend_from_slice(&MAGIC);
    write_u16(&mut out, module.version);
    write_u16(&mut out, 0); // reserved
    write_u32(&mut out, module.flags.bits());

    write_section(&mut out, *b"CODE", &encode_words(&module.code.words)?);

    if !module.code.source_positions.is_empty() {
        write_section(&mut out, *b"SPOS", &encode_positions(&module.code.source_positions)?);
    }

    if !module.code.exceptions.is_empty() {
        write_section(&mut out, *b"EXCT", &encode_exceptions(&module.code.exceptions)?);
    }

    // Written even when empty so `Some(default)` survives a round trip.
    if let Some(meta) = &module.meta {
        let payload = serde_json::to_vec(meta)?;
        write_section(&mut out, *b"META", &payload);
    }

    debug!(
        target: TRACE_TARGET,
        bytes = out.len(),
        words = module.code.words.len(),
        "lkbc.encode"
    );
    Ok(out)
}

pub fn decode_module(bytes: &[u8]) -> Result<CodeModule> {
    let (version, flags_bits) = read_header(bytes)?;

    let mut words: Option<Vec<u32>> = None;
    let mut positions: Option<SourcePositions> = None;
    let mut exceptions: Option<ExceptionsTable> = None;
    let mut meta: Option<ModuleMeta> = None;

    let mut cursor = 12;
    while cursor < bytes.len() {
        let (tag, payload) = read_section(bytes, &mut cursor)?;
        match &tag {
            b"CODE" => {
                ensure!(words.is_none(), "duplicate CODE section");
                words = Some(decode_words(payload)?);
            }
            b"SPOS" => {
                ensure!(positions.is_none(), "duplicate SPOS section");
                positions = Some(decode_positions(payload)?);
            }
            b"EXCT" => {
                ensure!(exceptions.is_none(), "duplicate EXCT section");
                exceptions = Some(decode_exceptions(payload)?);
            }
            b"META" => {
                ensure!(meta.is_none(), "duplicate META section");
                meta = Some(serde_json::from_slice(payload).context("invalid META section")?);
            }
            _ => {
                // Unknown sections are skipped for forward compatibility.
            }
        }
    }

    let words = words.ok_or_else(|| anyhow::anyhow!("missing CODE section"))?;
    debug!(target: TRACE_TARGET, words = words.len(), "lkbc.decode");

    Ok(CodeModule {
        version,
        flags: ModuleFlags::from_bits(flags_bits),
        code: AssembledCode {
            words,
            source_positions: positions.unwrap_or_default(),
            exceptions: exceptions.unwrap_or_default(),
            stats: Default::default(),
        },
        meta,
    })
}

/// List the sections of an encoded module without decoding their payloads.
pub fn list_sections(bytes: &[u8]) -> Result<Vec<SectionInfo>> {
    read_header(bytes)?;
    let mut cursor = 12;
    let mut sections = Vec::new();
    while cursor < bytes.len() {
        let (tag, payload) = read_section(bytes, &mut cursor)?;
        sections.push(SectionInfo {
            tag: String::from_utf8_lossy(&tag).into_owned(),
            len: payload.len() as u32,
        });
    }
    Ok(sections)
}

fn read_header(bytes: &[u8]) -> Result<(u16, u32)> {
    ensure!(bytes.len() >= 12, "module too small");
    ensure!(bytes[..4] == MAGIC, "invalid LKBC magic");

    let mut cursor = 4;
    let version = read_u16(bytes, &mut cursor)?;
    let _reserved = read_u16(bytes, &mut cursor)?;
    let flags_bits = read_u32(bytes, &mut cursor)?;

    ensure!(
        version <= CURRENT_VERSION,
        "unsupported LKBC version {} (reader supports <= {})",
        version,
        CURRENT_VERSION
    );
    Ok((version, flags_bits))
}

fn read_section<'a>(bytes: &'a [u8], cursor: &mut usize) -> Result<([u8; 4], &'a [u8])> {
    let tag = read_tag(bytes, cursor)?;
    let len = read_u32(bytes, cursor)? as usize;
    ensure!(*cursor + len <= bytes.len(), "section overruns payload");
    let payload = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok((tag, payload))
}

fn write_section(out: &mut Vec<u8>, tag: [u8; 4], payload: &[u8]) {
    out.extend_from_slice(&tag);
    write_u32(out, payload.len() as u32);
    out.extend_from_slice(payload);
}

fn encode_words(words: &[u32]) -> Result<Vec<u8>> {
    ensure!(words.len() <= u32::MAX as usize, "code too long");
    let mut out = Vec::with_capacity(4 + words.len() * 4);
    write_u32(&mut out, words.len() as u32);
    for &word in words {
        write_u32(&mut out, word);
    }
    Ok(out)
}

fn decode_words(bytes: &[u8]) -> Result<Vec<u32>> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor)? as usize;
    ensure!(
        bytes.len() - cursor == count * 4,
        "CODE section length does not match word count {}",
        count
    );
    let mut words = Vec::with_capacity(count);
    for _ in 0..count {
        words.push(read_u32(bytes, &mut cursor)?);
    }
    Ok(words)
}

fn encode_positions(table: &SourcePositions) -> Result<Vec<u8>> {
    ensure!(table.len() <= u32::MAX as usize, "source position table too long");
    let mut out = Vec::with_capacity(4 + table.len() * 8);
    write_u32(&mut out, table.len() as u32);
    for entry in table.entries() {
        write_u32(&mut out, entry.pc);
        write_u32(&mut out, entry.position.0);
    }
    Ok(out)
}

fn decode_positions(bytes: &[u8]) -> Result<SourcePositions> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor)? as usize;
    let mut entries = Vec::with_capacity(count.min(bytes.len() / 8));
    let mut last_pc = 0u32;
    for idx in 0..count {
        let pc = read_u32(bytes, &mut cursor)?;
        let position = SourcePosition(read_u32(bytes, &mut cursor)?);
        ensure!(idx == 0 || pc > last_pc, "source positions out of order at entry {}", idx);
        last_pc = pc;
        entries.push(PositionEntry { pc, position });
    }
    ensure!(cursor == bytes.len(), "unexpected trailing data in SPOS section");
    Ok(entries.into_iter().collect())
}

fn encode_exceptions(table: &ExceptionsTable) -> Result<Vec<u8>> {
    ensure!(
        table.len() <= MAX_TRY_BLOCKS,
        "exception table has {} blocks, limit is {}",
        table.len(),
        MAX_TRY_BLOCKS
    );
    let mut out = Vec::new();
    write_u32(&mut out, table.len() as u32);
    for block in table.blocks() {
        ensure!(
            block.handler_types.len() <= u16::MAX as usize,
            "try block #{} catches too many types",
            block.try_index
        );
        write_u16(&mut out, block.try_index);
        write_u16(&mut out, block.outer_try_index.unwrap_or(NO_OUTER_TRY));
        write_u32(&mut out, block.start_pc);
        write_u32(&mut out, block.end_pc);
        write_u32(&mut out, block.handler_pc);
        let flags = (block.needs_stack_trace as u8) | ((block.is_synthetic as u8) << 1);
        write_u8(&mut out, flags);
        write_u16(&mut out, block.handler_types.len() as u16);
        for &ty in &block.handler_types {
            write_u16(&mut out, ty);
        }
    }
    Ok(out)
}

fn decode_exceptions(bytes: &[u8]) -> Result<ExceptionsTable> {
    let mut cursor = 0usize;
    let count = read_u32(bytes, &mut cursor)? as usize;
    ensure!(count <= MAX_TRY_BLOCKS, "EXCT section claims {} blocks, limit is {}", count, MAX_TRY_BLOCKS);
    let mut table = ExceptionsTable::new();
    for _ in 0..count {
        let try_index = read_u16(bytes, &mut cursor)?;
        let outer_raw = read_u16(bytes, &mut cursor)?;
        let start_pc = read_u32(bytes, &mut cursor)?;
        let end_pc = read_u32(bytes, &mut cursor)?;
        let handler_pc = read_u32(bytes, &mut cursor)?;
        let flags = read_u8(bytes, &mut cursor)?;
        let ntypes = read_u16(bytes, &mut cursor)? as usize;
        let mut handler_types = Vec::with_capacity(ntypes);
        for _ in 0..ntypes {
            handler_types.push(read_u16(bytes, &mut cursor)?);
        }
        ensure!(
            try_index as usize == table.len(),
            "try block index {} out of sequence",
            try_index
        );
        ensure!(start_pc <= end_pc, "try block #{} has inverted range", try_index);
        let outer_try_index = if outer_raw == NO_OUTER_TRY { None } else { Some(outer_raw) };
        if let Some(outer) = outer_try_index {
            ensure!(outer < try_index, "try block #{} names later outer block #{}", try_index, outer);
        }
        table.push(TryBlock {
            try_index,
            outer_try_index,
            start_pc,
            end_pc,
            handler_pc,
            needs_stack_trace: flags & 1 != 0,
            is_synthetic: flags & 2 != 0,
            handler_types,
        });
    }
    ensure!(cursor == bytes.len(), "unexpected trailing data in EXCT section");
    Ok(table)
}

fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn read_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8> {
    if *cursor >= bytes.len() {
        bail!("unexpected end of input while reading u8");
    }
    let value = bytes[*cursor];
    *cursor += 1;
    Ok(value)
}

fn read_u16(bytes: &[u8], cursor: &mut usize) -> Result<u16> {
    if *cursor + 2 > bytes.len() {
        bail!("unexpected end of input while reading u16");
    }
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 2]);
    *cursor += 2;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    if *cursor + 4 > bytes.len() {
        bail!("unexpected end of input while reading u32");
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(u32::from_le_bytes(buf))
}

fn read_tag(bytes: &[u8], cursor: &mut usize) -> Result<[u8; 4]> {
    if *cursor + 4 > bytes.len() {
        bail!("unexpected end of input while reading section tag");
    }
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&bytes[*cursor..*cursor + 4]);
    *cursor += 4;
    Ok(tag)
}
