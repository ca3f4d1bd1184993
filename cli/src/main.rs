use std::path::{Component, Path, PathBuf};
use std::sync::Once;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lkbc_core::{
    disasm::{self, DisasmOptions},
    lkbc::{self, CodeModule, ModuleFlags},
};
use serde::Serialize;

mod config;
#[cfg(test)]
mod main_test;

use config::CliConfig;

static LOG_INIT: Once = Once::new();
const DEFAULT_TRACE_FILTER: &str = "lkbc::asm=info,lkbc::container=info,lkbc_cli=info";

#[derive(Debug, Parser)]
#[command(name = "lkbc", author, version, about = "Inspect LKBC bytecode modules", long_about = None)]
struct CliArgs {
    /// TOML file with output defaults
    #[arg(long, global = true, value_name = "PATH", value_parser = parse_sanitized_path)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print a disassembly listing of a module.
    Disasm {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
        /// Hide source position annotations
        #[arg(long)]
        no_positions: bool,
        /// Hide try block markers
        #[arg(long)]
        no_try_blocks: bool,
    },
    /// Show header fields, sections and table sizes.
    Inspect {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Check that every word decodes and every jump stays in bounds.
    Verify {
        #[arg(value_name = "FILE", value_parser = parse_sanitized_path)]
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct InspectReport {
    version: u16,
    flags: u32,
    verified_flag: bool,
    words: usize,
    source_positions: usize,
    try_blocks: usize,
    sections: Vec<lkbc::SectionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meta: Option<lkbc::ModuleMeta>,
}

#[derive(Debug, Serialize)]
struct JsonListing<'a> {
    code: &'a lkbc_core::AssembledCode,
    listing: Vec<disasm::ListingEntry>,
}

pub(crate) fn sanitize_path(raw: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(raw);
    if path.components().any(|c| c == Component::ParentDir) {
        anyhow::bail!("module paths may not contain '..' components: {}", raw);
    }
    Ok(path)
}

fn parse_sanitized_path(raw: &str) -> Result<PathBuf, String> {
    sanitize_path(raw).map_err(|e| e.to_string())
}

/// How `LKBC_LOG` asks for logging: off, the built-in filter, or an explicit
/// `EnvFilter` expression.
#[derive(Debug, PartialEq, Eq)]
enum LogSetting {
    Off,
    Default,
    Filter(String),
}

impl LogSetting {
    fn parse(raw: &str) -> Self {
        let value = raw.trim();
        let is_any = |keys: &[&str]| keys.iter().any(|k| value.eq_ignore_ascii_case(k));
        if value.is_empty() || is_any(&["0", "false", "off"]) {
            LogSetting::Off
        } else if is_any(&["1", "true", "on"]) {
            LogSetting::Default
        } else {
            LogSetting::Filter(value.to_string())
        }
    }
}

fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let Ok(raw) = std::env::var("LKBC_LOG") else {
        return;
    };
    let filter = match LogSetting::parse(&raw) {
        LogSetting::Off => return,
        LogSetting::Default => std::env::var("RUST_LOG").ok().and_then(|e| EnvFilter::try_new(e).ok()),
        LogSetting::Filter(expr) => EnvFilter::try_new(expr).ok(),
    }
    .unwrap_or_else(|| EnvFilter::new(DEFAULT_TRACE_FILTER));

    LOG_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .try_init();
    });
}

fn read_module(path: &Path) -> anyhow::Result<(Vec<u8>, CodeModule)> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read file '{}'", path.display()))?;
    let module = lkbc::decode_module(&bytes).with_context(|| format!("Failed to decode '{}'", path.display()))?;
    tracing::debug!(target: "lkbc_cli", path = %path.display(), bytes = bytes.len(), "module.read");
    Ok((bytes, module))
}

fn run_disasm(path: &Path, cfg: &CliConfig) -> anyhow::Result<String> {
    let (_, module) = read_module(path)?;
    if cfg.json {
        let payload = JsonListing {
            code: &module.code,
            listing: disasm::listing(&module.code),
        };
        return Ok(serde_json::to_string_pretty(&payload)?);
    }
    let opts = DisasmOptions {
        show_positions: cfg.show_positions,
        show_try_blocks: cfg.show_try_blocks,
    };
    Ok(disasm::disassemble_with(&module.code, &opts))
}

fn run_inspect(path: &Path, json: bool) -> anyhow::Result<String> {
    let (bytes, module) = read_module(path)?;
    let report = InspectReport {
        version: module.version,
        flags: module.flags.bits(),
        verified_flag: module.flags.contains(ModuleFlags::VERIFIED),
        words: module.code.words.len(),
        source_positions: module.code.source_positions.len(),
        try_blocks: module.code.exceptions.len(),
        sections: lkbc::list_sections(&bytes)?,
        meta: module.meta,
    };
    if json {
        return Ok(serde_json::to_string_pretty(&report)?);
    }
    let mut out = String::new();
    out.push_str(&format!("version:          {}\n", report.version));
    out.push_str(&format!(
        "flags:            {:#x}{}\n",
        report.flags,
        if report.verified_flag { " (verified)" } else { "" }
    ));
    out.push_str(&format!("words:            {}\n", report.words));
    out.push_str(&format!("source positions: {}\n", report.source_positions));
    out.push_str(&format!("try blocks:       {}\n", report.try_blocks));
    for section in &report.sections {
        out.push_str(&format!("section {}:     {} bytes\n", section.tag, section.len));
    }
    if let Some(meta) = &report.meta {
        if let Some(name) = &meta.name {
            out.push_str(&format!("name:             {}\n", name));
        }
        if let Some(source) = &meta.source {
            out.push_str(&format!("source:           {}\n", source));
        }
    }
    Ok(out)
}

fn run_verify(path: &Path) -> anyhow::Result<String> {
    let (_, module) = read_module(path)?;
    disasm::verify(&module.code.words).with_context(|| format!("'{}' failed verification", path.display()))?;
    Ok(format!("ok: {} words\n", module.code.words.len()))
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let CliArgs { config, command } = CliArgs::parse();
    let mut cfg = CliConfig::load(config.as_deref())?;

    let output = match command {
        Commands::Disasm {
            file,
            json,
            no_positions,
            no_try_blocks,
        } => {
            cfg.json |= json;
            cfg.show_positions &= !no_positions;
            cfg.show_try_blocks &= !no_try_blocks;
            run_disasm(&file, &cfg)?
        }
        Commands::Inspect { file, json } => run_inspect(&file, json || cfg.json)?,
        Commands::Verify { file } => run_verify(&file)?,
    };
    print!("{}", output);
    if !output.ends_with('\n') {
        println!();
    }
    Ok(())
}
