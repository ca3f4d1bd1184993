use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Knobs for a single [`BytecodeAssembler`](crate::asm::BytecodeAssembler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerOptions {
    /// Record `(pc, position)` pairs for stamping opcodes.
    pub record_source_positions: bool,
    /// Run the verifier over the word buffer in `finish`.
    pub verify_on_finish: bool,
    /// Initial word buffer capacity.
    pub initial_capacity: usize,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        Self {
            record_source_positions: true,
            verify_on_finish: false,
            initial_capacity: 64,
        }
    }
}

impl AssemblerOptions {
    /// Parse options from a TOML document. Missing keys keep their defaults;
    /// the options may also live under an `[assembler]` table.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Wrapped {
            assembler: AssemblerOptions,
        }

        let table: toml::Table = toml::from_str(input).context("invalid assembler options TOML")?;
        let value = toml::Value::Table(table);
        if value.get("assembler").is_some() {
            let wrapped = Wrapped::deserialize(value).context("invalid [assembler] table")?;
            return Ok(wrapped.assembler);
        }
        AssemblerOptions::deserialize(value).context("invalid assembler options")
    }
}
