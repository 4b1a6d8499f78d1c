// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Wind-tunnel benchmarks for the shadow engine: instrumentation of a fresh
//! superblock, and the evaluator hot path over a chain of dependent adds.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use fp_shadow::context::ToolContext;
use fp_shadow::instrument::instrument_block;
use fp_shadow::ir::{Block, BlockBuilder, Expr, IrConst, IrOp, IrType};
use fp_shadow::machine::Machine;
use fp_shadow::options::ToolOptions;

fn chain_block(adds: usize) -> Block {
    let mut b = BlockBuilder::new();
    b.imark(0x40_0000);
    let mut sum = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1000)));
    let step = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1008)));
    for i in 0..adds {
        b.imark(0x40_0004 + 4 * i as u64);
        sum = b.binop(IrOp::AddF64Lo, Expr::tmp(sum), Expr::tmp(step));
    }
    b.store(Expr::Const(IrConst::U64(0x1010)), Expr::tmp(sum));
    b.build()
}

fn bench_instrument(c: &mut Criterion) {
    let block = chain_block(64);
    c.bench_function("instrument_block/64_adds", |bench| {
        bench.iter(|| {
            let mut ctx = ToolContext::new(ToolOptions::default());
            let machine = Machine::new();
            black_box(instrument_block(&mut ctx, &machine, black_box(&block)))
        });
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_chain");
    for adds in [8_usize, 64] {
        let block = chain_block(adds);
        group.bench_with_input(BenchmarkId::from_parameter(adds), &block, |bench, block| {
            let mut ctx = ToolContext::new(ToolOptions::default());
            let mut machine = Machine::new();
            machine.set_f64(0x1000, 0.0);
            machine.set_f64(0x1008, 0.1);
            let instrumented = instrument_block(&mut ctx, &machine, block);
            bench.iter(|| {
                machine.run_block(&mut ctx, block, black_box(&instrumented));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_instrument, bench_evaluate);
criterion_main!(benches);
