use criterion::{Criterion, criterion_group, criterion_main};
use lkbc_core::{
    BytecodeAssembler, Label, SourcePosition, disasm,
    lkbc::{CodeModule, decode_module, encode_module},
};
use std::hint::black_box;

// Straight-line loop body with a forward exit and a backward edge, repeated
// `blocks` times.
fn assemble_loops(blocks: usize) -> lkbc_core::AssembledCode {
    let mut asm = BytecodeAssembler::new();
    asm.emit_entry(4).unwrap();
    for i in 0..blocks {
        let mut header = Label::backward();
        let mut exit = Label::default();
        asm.bind(&mut header).unwrap();
        asm.set_source_position(Some(SourcePosition(i as u32 * 8)));
        asm.emit_check_stack(1).unwrap();
        asm.emit_push(0).unwrap();
        asm.emit_push_int(100).unwrap();
        asm.emit_compare_int_lt();
        asm.emit_jump_if_false(&mut exit).unwrap();
        asm.emit_add_int_imm(0, 1).unwrap();
        asm.emit_direct_call(1, (i % 1024) as u32).unwrap();
        asm.emit_drop1();
        asm.emit_jump(&mut header).unwrap();
        asm.bind(&mut exit).unwrap();
    }
    asm.emit_push_null();
    asm.emit_return_tos();
    asm.finish().unwrap()
}

fn assembler_bench(c: &mut Criterion) {
    c.bench_function("assemble_256_loops", |b| {
        b.iter(|| {
            let code = assemble_loops(black_box(256));
            black_box(code);
        })
    });

    let code = assemble_loops(256);
    c.bench_function("verify_256_loops", |b| {
        b.iter(|| {
            disasm::verify(black_box(&code.words)).unwrap();
        })
    });

    let bytes = encode_module(&CodeModule::new(code.clone())).unwrap();
    c.bench_function("lkbc_decode_256_loops", |b| {
        b.iter(|| {
            let module = decode_module(black_box(&bytes)).unwrap();
            black_box(module);
        })
    });
}

criterion_group!(benches, assembler_bench);
criterion_main!(benches);
