use assert_cmd::prelude::*;
use lkbc_core::{
    AssembledCode, BytecodeAssembler, Label, SourcePosition,
    lkbc::{CodeModule, ModuleMeta, encode_module},
};
use predicates::prelude::*;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

fn sample_code() -> AssembledCode {
    let mut asm = BytecodeAssembler::new();
    asm.emit_entry(2).unwrap();
    let try_index = asm.begin_try_block(None).unwrap();
    asm.set_source_position(Some(SourcePosition(12)));
    asm.emit_push_int(7).unwrap();
    let mut done = Label::default();
    asm.emit_jump_if_true(&mut done).unwrap();
    asm.emit_push_null();
    asm.emit_throw(false).unwrap();
    asm.bind(&mut done).unwrap();
    asm.end_try_block(try_index).unwrap();
    asm.emit_push_true();
    asm.emit_return_tos();
    asm.bind_handler(try_index).unwrap();
    asm.emit_push_false();
    asm.emit_return_tos();
    asm.finish().unwrap()
}

fn write_module(path: &Path, module: &CodeModule) -> Result<(), Box<dyn Error>> {
    fs::write(path, encode_module(module)?)?;
    Ok(())
}

#[test]
fn disasm_prints_listing_with_positions_and_try_markers() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("sample.lkbc");
    write_module(&path, &CodeModule::new(sample_code()))?;

    let mut cmd = Command::cargo_bin("lkbc")?;
    cmd.args(["disasm", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("JumpIfTrue"))
        .stdout(predicate::str::contains("ReturnTOS"))
        .stdout(predicate::str::contains("@12"))
        .stdout(predicate::str::contains("; try #0 begin"));

    Ok(())
}

#[test]
fn disasm_flags_hide_annotations() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("sample.lkbc");
    write_module(&path, &CodeModule::new(sample_code()))?;

    let mut cmd = Command::cargo_bin("lkbc")?;
    cmd.args(["disasm", "--no-positions", "--no-try-blocks", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("ReturnTOS"))
        .stdout(predicate::str::contains("@12").not())
        .stdout(predicate::str::contains("try #").not());

    Ok(())
}

#[test]
fn config_file_supplies_disasm_defaults() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("sample.lkbc");
    write_module(&path, &CodeModule::new(sample_code()))?;
    let config = dir.path().join("lkbc.toml");
    fs::write(&config, "json = true\n")?;

    let mut cmd = Command::cargo_bin("lkbc")?;
    cmd.args(["--config", config.to_str().unwrap(), "disasm", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"listing\""))
        .stdout(predicate::str::contains("\"opcode\": \"Jump"));

    Ok(())
}

#[test]
fn inspect_json_reports_sections_and_meta() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("sample.lkbc");
    let mut module = CodeModule::new(sample_code()).verified()?;
    module.meta = Some(ModuleMeta {
        name: Some("sample".to_string()),
        ..Default::default()
    });
    write_module(&path, &module)?;

    let mut cmd = Command::cargo_bin("lkbc")?;
    cmd.args(["inspect", "--json", path.to_str().unwrap()]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"CODE\""))
        .stdout(predicate::str::contains("\"EXCT\""))
        .stdout(predicate::str::contains("\"verified_flag\": true"))
        .stdout(predicate::str::contains("\"sample\""));

    Ok(())
}

#[test]
fn verify_accepts_assembled_module() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("sample.lkbc");
    write_module(&path, &CodeModule::new(sample_code()))?;

    let mut cmd = Command::cargo_bin("lkbc")?;
    cmd.args(["verify", path.to_str().unwrap()]);
    cmd.assert().success().stdout(predicate::str::starts_with("ok:"));

    Ok(())
}

#[test]
fn verify_rejects_unknown_opcode() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("corrupt.lkbc");
    let mut code = sample_code();
    code.words[1] = 0xff;
    write_module(&path, &CodeModule::new(code))?;

    let mut cmd = Command::cargo_bin("lkbc")?;
    cmd.args(["verify", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed verification"));

    Ok(())
}

#[test]
fn rejects_file_without_magic() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("garbage.lkbc");
    fs::write(&path, b"not a module")?;

    let mut cmd = Command::cargo_bin("lkbc")?;
    cmd.args(["inspect", path.to_str().unwrap()]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to decode"));

    Ok(())
}
