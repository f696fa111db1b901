//! Benchmarks for instruction emission.
//!
//! Measures the cost of the assembler pipeline on synthetic method bodies:
//! - Straight-line emission into the recording assembler
//! - Branch-heavy bodies with forward and backward labels
//! - Emission through the backed assembler into the bytecode sink
//! - Replaying a recorded stream
//! - Rendering a disassembly

extern crate cilemit;

use cilemit::prelude::*;
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

fn int32() -> TypeHandle {
    TypeHandle::new(Token::new(0x0100_0001), "System.Int32")
}

/// A loop summing `0..count` into a local, unrolled `blocks` times.
fn emit_loops<E: Emitter>(e: &mut E, blocks: usize) -> Result<()> {
    let sum = e.declare_local(int32(), false)?;
    let i = e.declare_local(int32(), false)?;

    for _ in 0..blocks {
        let head = e.define_label()?;
        let exit = e.define_label()?;
        e.ldc_i4(0)?
            .stloc(&i)?
            .mark_label(&head)?
            .ldloc(&i)?
            .ldc_i4(100)?
            .emit_label(OpCode::Bge, &exit)?
            .ldloc(&sum)?
            .ldloc(&i)?
            .emit(OpCode::Add)?
            .stloc(&sum)?
            .ldloc(&i)?
            .ldc_i4(1)?
            .emit(OpCode::Add)?
            .stloc(&i)?
            .emit_label(OpCode::Br, &head)?
            .mark_label(&exit)?;
    }
    e.ldloc(&sum)?.ret()?;
    Ok(())
}

/// Benchmark straight-line constant loads and arithmetic.
fn bench_record_straight_line(c: &mut Criterion) {
    c.bench_function("record_straight_line_1k", |b| {
        b.iter(|| {
            let mut asm = RecordingAssembler::new();
            for i in 0..1000 {
                asm.ldc_i4(black_box(i)).unwrap().emit(OpCode::Pop).unwrap();
            }
            black_box(asm.finish().unwrap())
        });
    });
}

/// Benchmark branch-heavy bodies on the recording assembler.
fn bench_record_loops(c: &mut Criterion) {
    c.bench_function("record_loops_100", |b| {
        b.iter(|| {
            let mut asm = RecordingAssembler::new();
            emit_loops(&mut asm, black_box(100)).unwrap();
            black_box(asm.finish().unwrap())
        });
    });
}

/// Benchmark the same bodies through the bytecode sink.
fn bench_backed_loops(c: &mut Criterion) {
    c.bench_function("backed_loops_100", |b| {
        b.iter(|| {
            let mut asm = BackedAssembler::new(BytecodeSink::new());
            emit_loops(&mut asm, black_box(100)).unwrap();
            let (_, sink) = asm.finish().unwrap();
            black_box(sink.finish().unwrap())
        });
    });
}

/// Benchmark replaying a recorded body into a fresh recorder.
fn bench_replay(c: &mut Criterion) {
    let mut asm = RecordingAssembler::new();
    emit_loops(&mut asm, 100).unwrap();
    let stream = asm.finish().unwrap();

    c.bench_function("replay_loops_100", |b| {
        b.iter(|| {
            let mut target = RecordingAssembler::new();
            stream.replay_into(&mut target).unwrap();
            black_box(target)
        });
    });
}

/// Benchmark rendering a disassembly listing.
fn bench_disassembly(c: &mut Criterion) {
    let mut asm = RecordingAssembler::new();
    emit_loops(&mut asm, 100).unwrap();
    let stream = asm.finish().unwrap();
    let disassembler = Disassembler::new(DisassemblyOptions::verbose());

    c.bench_function("disassemble_loops_100", |b| {
        b.iter(|| black_box(disassembler.render(black_box(&stream))));
    });
}

criterion_group!(
    benches,
    bench_record_straight_line,
    bench_record_loops,
    bench_backed_loops,
    bench_replay,
    bench_disassembly,
);
criterion_main!(benches);
