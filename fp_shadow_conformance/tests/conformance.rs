// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

#![allow(missing_docs, reason = "integration test crate")]

use fp_shadow::client::{self, ClientReply, ClientRequest};
use fp_shadow::context::ToolContext;
use fp_shadow::ir::{Block, BlockBuilder, Expr, IrConst, IrOp, IrType, RegArray, Temp};
use fp_shadow::machine::{Machine, TempValue};
use fp_shadow::options::ToolOptions;

fn ctx_with(opts: ToolOptions) -> ToolContext {
    ToolContext::new(opts)
}

fn default_ctx() -> ToolContext {
    ctx_with(ToolOptions::default())
}

fn error_greater(ctx: &mut ToolContext, machine: &mut Machine, addr: u64, bound: f64) -> bool {
    match client::handle_request(ctx, machine, &ClientRequest::ErrorGreater { addr, bound }) {
        ClientReply::Word(w) => w != 0,
        other => panic!("unexpected reply {other:?}"),
    }
}

fn get_shadow_text(ctx: &mut ToolContext, machine: &mut Machine, addr: u64) -> String {
    match client::handle_request(ctx, machine, &ClientRequest::GetShadow { addr }) {
        ClientReply::Text(text) => text,
        other => panic!("unexpected reply {other:?}"),
    }
}

const A_BIG: u64 = 0x1000;
const A_TINY: u64 = 0x1008;
const A_SUM: u64 = 0x1010;
const A_DIFF: u64 = 0x1018;

/// S1: catastrophic cancellation in single precision.
///
/// `a = 1.0e8f + 1.0e-8f; b = a - 1.0e8f;` loses every significant bit: the
/// shadow flags more than 20 cancelled bits and a large relative error, and
/// the subtraction's origin records the cancellation maximum.
#[test]
fn s1_catastrophic_cancellation() {
    let mut b = BlockBuilder::new();
    b.imark(0x40_0000);
    let big = b.load(IrType::F32, Expr::Const(IrConst::U64(A_BIG)));
    let tiny = b.load(IrType::F32, Expr::Const(IrConst::U64(A_TINY)));
    let a = b.binop(IrOp::AddF32Lo, Expr::tmp(big), Expr::tmp(tiny));
    b.store(Expr::Const(IrConst::U64(A_SUM)), Expr::tmp(a));
    b.imark(0x40_0004);
    let diff = b.binop(IrOp::SubF32Lo, Expr::tmp(a), Expr::tmp(big));
    b.store(Expr::Const(IrConst::U64(A_DIFF)), Expr::tmp(diff));
    let block = b.build();

    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f32(A_BIG, 1.0e8);
    machine.set_f32(A_TINY, 1.0e-8);
    machine.run(&mut ctx, &block);

    let sv = ctx.store.mem(A_DIFF).expect("diff is tracked");
    assert!(sv.canceled > 20, "canceled = {}", sv.canceled);
    assert!(error_greater(&mut ctx, &mut machine, A_DIFF, 1e-7));

    let mv = &ctx.diag.mean_values[&0x40_0004];
    assert!(mv.canceled_max >= 20);
    assert_eq!(mv.count, 1);
}

/// S2: epsilon accumulation. Five single-precision adds of 0.2f drift away
/// from 1.0 while the shadow tracks the exact sum of the seeds; the final
/// shadow has a dependency path of five operations.
#[test]
fn s2_epsilon_accumulation() {
    let mut b = BlockBuilder::new();
    b.imark(0x41_0000);
    let mut sum = b.load(IrType::F32, Expr::Const(IrConst::U64(A_BIG)));
    let step = b.load(IrType::F32, Expr::Const(IrConst::U64(A_TINY)));
    for _ in 0..5 {
        sum = b.binop(IrOp::AddF32Lo, Expr::tmp(sum), Expr::tmp(step));
    }
    b.store(Expr::Const(IrConst::U64(A_SUM)), Expr::tmp(sum));
    let block = b.build();

    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f32(A_BIG, 0.0);
    machine.set_f32(A_TINY, 0.2);
    machine.run(&mut ctx, &block);

    // Round-to-nearest collapses the guest's sum onto 1.0 while the shadow
    // keeps the exact residue of the five seeds.
    let guest = f32::from_bits(machine.get_f64(A_SUM).map(f64::to_bits).unwrap() as u32);
    assert_eq!(guest, 1.0);

    let sv = ctx.store.mem(A_SUM).expect("sum is tracked");
    assert_ne!(sv.value.to_f64(), f64::from(guest));
    assert_eq!(sv.op_count, 5);
    assert!(error_greater(&mut ctx, &mut machine, A_SUM, 1e-9));

    let reply = client::handle_request(
        &mut ctx,
        &mut machine,
        &ClientRequest::PrintError {
            name: "s".into(),
            addr: A_SUM,
        },
    );
    let ClientReply::Text(text) = reply else {
        panic!("print error produced no text");
    };
    assert!(text.contains("RELATIVE ERROR"));
}

fn tracked_store_block(dst: u64) -> Block {
    let mut b = BlockBuilder::new();
    b.imark(0x42_0000);
    let x = b.load(IrType::F64, Expr::Const(IrConst::U64(A_BIG)));
    let y = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
    b.store(Expr::Const(IrConst::U64(dst)), Expr::tmp(s));
    b.build()
}

/// S3: drift recovery. An untracked write between two tracked uses
/// deactivates the stale shadow, so the next evaluation reseeds every
/// channel from the guest's bytes and reports no error.
#[test]
fn s3_drift_recovery_via_untracked_store() {
    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));

    // The guest overwrites *p through an untracked path (an integer-typed
    // constant store, as memcpy would do).
    let mut b = BlockBuilder::new();
    b.imark(0x42_1000);
    b.store(
        Expr::Const(IrConst::U64(A_SUM)),
        Expr::Const(IrConst::U64(2.5_f64.to_bits())),
    );
    let untracked = b.build();
    machine.run(&mut ctx, &untracked);
    assert!(!ctx.store.mem(A_SUM).unwrap().active);

    // The next consumer of *p reads plain guest data: no residual error.
    let mut b = BlockBuilder::new();
    b.imark(0x42_2000);
    let p = b.load(IrType::F64, Expr::Const(IrConst::U64(A_SUM)));
    let q = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    let s = b.binop(IrOp::MulF64Lo, Expr::tmp(p), Expr::tmp(q));
    b.store(Expr::Const(IrConst::U64(A_DIFF)), Expr::tmp(s));
    let consumer = b.build();
    machine.run(&mut ctx, &consumer);

    assert!(!error_greater(&mut ctx, &mut machine, A_DIFF, 1e-12));
}

/// Drift recovery proper: when a carrier's captured guest result and its
/// simulated-original channel disagree, the next operand read resets all
/// three channels to the guest value (property 7).
#[test]
fn drift_repair_resets_channels() {
    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));

    // Simulate an untracked mutation the store never saw: the recorded
    // guest result moves away from the simulated-original channel.
    {
        use rug::Assign;
        let sv = ctx.store.mem_mut(A_SUM).unwrap();
        sv.org = Some(fp_shadow::store::GuestValue::F64(7.25));
        sv.value.assign(9.0);
    }
    machine.set_f64(A_SUM, 7.25);

    let mut b = BlockBuilder::new();
    b.imark(0x42_3000);
    let p = b.load(IrType::F64, Expr::Const(IrConst::U64(A_SUM)));
    let one = b.load(IrType::F64, Expr::Const(IrConst::U64(A_DIFF)));
    let s = b.binop(IrOp::AddF64Lo, Expr::tmp(p), Expr::tmp(one));
    b.store(Expr::Const(IrConst::U64(0x1020)), Expr::tmp(s));
    let consumer = b.build();
    machine.set_f64(A_DIFF, 1.0);
    machine.run(&mut ctx, &consumer);

    // 7.25 + 1.0 is exact, so a recovered shadow shows zero error.
    assert!(!error_greater(&mut ctx, &mut machine, 0x1020, 1e-15));
    let text = get_shadow_text(&mut ctx, &mut machine, 0x1020);
    assert!(text.starts_with("8.25") || text.starts_with(" 8.25"), "{text}");
}

const PSO_SITE: u64 = 0x43_0008;

fn pso_block() -> Block {
    // p = x + y carries a 2^-32 shadow-only residue; subtracting the
    // constant 1 - 2^-22 inflates that residue five decades.
    let mut b = BlockBuilder::new();
    b.imark(0x43_0000);
    let x = b.load(IrType::F32, Expr::Const(IrConst::U64(A_BIG)));
    let y = b.load(IrType::F32, Expr::Const(IrConst::U64(A_TINY)));
    let p = b.binop(IrOp::AddF32Lo, Expr::tmp(x), Expr::tmp(y));
    b.imark(PSO_SITE);
    let t = b.binop(
        IrOp::SubF32Lo,
        Expr::tmp(p),
        Expr::Const(IrConst::F64(1.0 - (2.0_f64).powi(-22))),
    );
    b.store(Expr::Const(IrConst::U64(A_DIFF)), Expr::tmp(t));
    b.build()
}

/// S4: PSO detection and runtime fix across two runs.
#[test]
fn s4_pso_detection_and_fix() {
    let mut opts = ToolOptions::default();
    opts.detect_pso = true;
    let mut ctx = ctx_with(opts);
    ctx.exe = std::env::temp_dir().join(format!("fp_shadow_s4_{}", std::process::id()));
    let mut machine = Machine::new();
    machine.set_f32(A_BIG, 1.0);
    machine.set_f32(A_TINY, (2.0_f32).powi(-32));

    let block = pso_block();

    // Run 1: the inflation fires on every instance.
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::PsoBeginRun);
    for _ in 0..10 {
        client::handle_request(&mut ctx, &mut machine, &ClientRequest::PsoBeginInstance);
        machine.run(&mut ctx, &block);
    }
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::PsoEndRun);
    assert!(ctx.diag.detected_pso.contains_key(&PSO_SITE));
    assert!(!ctx.diag.detected_pso[&PSO_SITE].false_positive);
    assert_eq!(
        client::handle_request(&mut ctx, &mut machine, &ClientRequest::IsPsoFinished),
        ClientReply::Word(0)
    );

    // Run 2: the site is silently fixed and the downstream error vanishes.
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::PsoBeginRun);
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::PsoBeginInstance);
    machine.run(&mut ctx, &block);
    assert!(!error_greater(&mut ctx, &mut machine, A_DIFF, 1e-10));
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::PsoEndRun);
    assert_eq!(
        client::handle_request(&mut ctx, &mut machine, &ClientRequest::IsPsoFinished),
        ClientReply::Word(1)
    );
}

/// S5: branch divergence. Shadow-only residue flips a CmpF64 from the
/// guest's "less than" to the shadow's "greater than"; the shadow's
/// ordering reaches the guest and the site is noted once.
#[test]
fn s5_shadow_branching_follows_the_shadow() {
    let mut b = BlockBuilder::new();
    b.imark(0x44_0000);
    let mut p = b.load(IrType::F64, Expr::Const(IrConst::U64(A_BIG)));
    let step = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    for _ in 0..5 {
        p = b.binop(IrOp::AddF64Lo, Expr::tmp(p), Expr::tmp(step));
    }
    let q = b.load(IrType::F64, Expr::Const(IrConst::U64(A_SUM)));
    let base = b.load(IrType::F64, Expr::Const(IrConst::U64(A_DIFF)));
    let q2 = b.binop(IrOp::AddF64Lo, Expr::tmp(base), Expr::tmp(q));
    b.imark(0x44_0008);
    let cmp = b.binop(IrOp::CmpF64, Expr::tmp(p), Expr::tmp(q2));
    let block = b.build();

    let run = |goto_shadow: bool| -> (TempValue, usize) {
        let mut opts = ToolOptions::default();
        opts.goto_shadow_branch = goto_shadow;
        let mut ctx = ctx_with(opts);
        let mut machine = Machine::new();
        machine.set_f64(A_BIG, 1.0);
        machine.set_f64(A_TINY, (2.0_f64).powi(-54));
        machine.set_f64(A_SUM, (2.0_f64).powi(-52));
        machine.set_f64(A_DIFF, 1.0);
        machine.run(&mut ctx, &block);
        (machine.temp(cmp), ctx.diag.branch_divergence_sites())
    };

    // Natively the guest sees 1.0 < 1.0 + 2^-52.
    let (native, _) = run(false);
    assert_eq!(native, TempValue::I32(0x01));

    // Under shadow branching the accumulated 5 * 2^-54 outweighs 2^-52.
    let (shadowed, sites) = run(true);
    assert_eq!(shadowed, TempValue::I32(0x00));
    assert_eq!(sites, 1);
}

/// S6: stage-iteration divergence. Iteration 2 loses the low bits of 1/3
/// through an absorbing round trip; the stage tracker reports the address
/// with `iterMin = iterMax = 2`, and the lifted limit silences an identical
/// third iteration.
#[test]
fn s6_stage_divergence() {
    let x_addr = 0x2000_u64;

    let exact_third = |b: &mut BlockBuilder| -> Temp {
        let one = b.load(IrType::F64, Expr::Const(IrConst::U64(A_BIG)));
        let three = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
        b.binop(IrOp::DivF64Lo, Expr::tmp(one), Expr::tmp(three))
    };

    let mut b = BlockBuilder::new();
    b.imark(0x45_0000);
    let t = exact_third(&mut b);
    b.store(Expr::Const(IrConst::U64(x_addr)), Expr::tmp(t));
    let iter1 = b.build();

    let mut b = BlockBuilder::new();
    b.imark(0x45_1000);
    let t = exact_third(&mut b);
    let big = b.load(IrType::F64, Expr::Const(IrConst::U64(A_SUM)));
    let up = b.binop(IrOp::AddF64Lo, Expr::tmp(t), Expr::tmp(big));
    let down = b.binop(IrOp::SubF64Lo, Expr::tmp(up), Expr::tmp(big));
    b.store(Expr::Const(IrConst::U64(x_addr)), Expr::tmp(down));
    let iter2 = b.build();

    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);
    machine.set_f64(A_SUM, 8192.0);

    client::handle_request(&mut ctx, &mut machine, &ClientRequest::BeginStage(0));
    machine.run(&mut ctx, &iter1);
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::EndStage(0));

    client::handle_request(&mut ctx, &mut machine, &ClientRequest::BeginStage(0));
    machine.run(&mut ctx, &iter2);
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::EndStage(0));

    let report = ctx.diag.stage_report(0).expect("stage produced reports")[&x_addr].clone();
    assert_eq!(report.count, 1);
    assert_eq!(report.iter_min, 2);
    assert_eq!(report.iter_max, 2);

    // The limit was lifted to ~2^-40; an identical third iteration stays
    // under it.
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::BeginStage(0));
    machine.run(&mut ctx, &iter2);
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::EndStage(0));
    assert_eq!(ctx.diag.stage_report(0).unwrap()[&x_addr].count, 1);
}

/// Property 3: an untracked register write deactivates the slot's shadow
/// until a tracked write revives it.
#[test]
fn untracked_register_write_deactivates() {
    let mut b = BlockBuilder::new();
    b.imark(0x46_0000);
    let x = b.load(IrType::F64, Expr::Const(IrConst::U64(A_BIG)));
    let y = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
    b.put(64, Expr::tmp(s));
    let tracked = b.build();

    let mut b = BlockBuilder::new();
    b.imark(0x46_1000);
    let c = b.konst(IrConst::F64(0.0));
    b.put(64, Expr::tmp(c));
    let untracked = b.build();

    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 0.1);
    machine.set_f64(A_TINY, 0.2);
    machine.run(&mut ctx, &tracked);
    assert!(ctx.store.reg(0, 64).unwrap().active);

    machine.run(&mut ctx, &untracked);
    assert!(!ctx.store.reg(0, 64).unwrap().active);
}

/// Register and circular-register round trips carry the shadow along.
#[test]
fn circular_register_round_trip() {
    let fpreg = RegArray {
        base: 100,
        n_elems: 8,
    };

    let mut b = BlockBuilder::new();
    b.imark(0x47_0000);
    let x = b.load(IrType::F64, Expr::Const(IrConst::U64(A_BIG)));
    let y = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
    // Write at rotating index 6 + bias 3 = slot 1 (mod 8).
    let ix = b.konst(IrConst::U32(6));
    b.put_i(fpreg, Expr::tmp(ix), 3, Expr::tmp(s));
    let back = b.get_i(IrType::F64, fpreg, Expr::tmp(ix), 3);
    b.store(Expr::Const(IrConst::U64(A_SUM)), Expr::tmp(back));
    let block = b.build();

    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0e8);
    machine.set_f64(A_TINY, 1.0e-8);
    machine.run(&mut ctx, &block);

    let sv = ctx.store.mem(A_SUM).expect("round-tripped value is tracked");
    assert_eq!(sv.op_count, 1);
    assert!(ctx.store.reg(0, 101).is_some(), "slot 100 + 1 was written");
}

/// Mux propagates the shadow of the side the guest actually selected.
#[test]
fn mux_selects_the_guest_side() {
    let mut b = BlockBuilder::new();
    b.imark(0x48_0000);
    let x = b.load(IrType::F64, Expr::Const(IrConst::U64(A_BIG)));
    let y = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
    let cond = b.konst(IrConst::U32(1));
    let m = b.mux(cond, Expr::tmp(x), Expr::tmp(s));
    b.store(Expr::Const(IrConst::U64(A_SUM)), Expr::tmp(m));
    let block = b.build();

    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 0.5);
    machine.set_f64(A_TINY, 0.25);
    machine.run(&mut ctx, &block);

    // The nonzero condition selected the tracked sum.
    let sv = ctx.store.mem(A_SUM).expect("selected side is tracked");
    assert_eq!(sv.op_count, 1);
    assert_eq!(sv.origin, 0x48_0000);
}

/// Track-int: the conversion rounds the shadow, not the guest's value.
#[test]
fn track_int_converts_the_shadow() {
    let mut b = BlockBuilder::new();
    b.imark(0x49_0000);
    let x = b.load(IrType::F64, Expr::Const(IrConst::U64(A_BIG)));
    let y = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
    let rm = b.konst(IrConst::U32(0));
    let i = b.binop(IrOp::F64ToI32S, Expr::tmp(rm), Expr::tmp(s));
    let block = b.build();

    let run = |track_int: bool| -> TempValue {
        let mut opts = ToolOptions::default();
        opts.track_int = track_int;
        let mut ctx = ctx_with(opts);
        let mut machine = Machine::new();
        machine.set_f64(A_BIG, 2.5);
        machine.set_f64(A_TINY, 0.499_999_999_999_999_94);
        machine.run(&mut ctx, &block);
        machine.temp(i)
    };

    // Natively the guest truncates 2.9999999999999996 to 2; the rounded
    // shadow lands on 3.
    assert_eq!(run(false), TempValue::I32(2));
    assert_eq!(run(true), TempValue::I32(3));
}

/// Property 5: ORIGINAL_TO_SHADOW then SHADOW_TO_ORIGINAL round-trips the
/// guest bytes and pins the shadow to the IEEE value.
#[test]
fn original_shadow_round_trip() {
    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));

    let before = machine.get_f64(A_SUM).unwrap();
    client::handle_request(
        &mut ctx,
        &mut machine,
        &ClientRequest::OriginalToShadow { addr: A_SUM },
    );
    client::handle_request(
        &mut ctx,
        &mut machine,
        &ClientRequest::ShadowToOriginal { addr: A_SUM },
    );
    assert_eq!(machine.get_f64(A_SUM), Some(before));

    let sv = ctx.store.mem(A_SUM).unwrap();
    assert_eq!(sv.value.to_f64(), before);
}

/// Property 6: RESET is idempotent.
#[test]
fn reset_is_idempotent() {
    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));

    client::handle_request(&mut ctx, &mut machine, &ClientRequest::Reset);
    let once = ctx.store.mem(A_SUM).map(|sv| sv.active);
    client::handle_request(&mut ctx, &mut machine, &ClientRequest::Reset);
    let twice = ctx.store.mem(A_SUM).map(|sv| sv.active);
    assert_eq!(once, Some(false));
    assert_eq!(once, twice);
}

/// Property 8: precision discipline of the middle and simulated-original
/// channels follows the operation's nominal width.
#[test]
fn channel_precision_follows_op_width() {
    let mut b = BlockBuilder::new();
    b.imark(0x4A_0000);
    let x32 = b.load(IrType::F32, Expr::Const(IrConst::U64(A_BIG)));
    let s32 = b.binop(IrOp::AddF32Lo, Expr::tmp(x32), Expr::tmp(x32));
    b.store(Expr::Const(IrConst::U64(A_SUM)), Expr::tmp(s32));
    let x64 = b.load(IrType::F64, Expr::Const(IrConst::U64(A_TINY)));
    let s64 = b.binop(IrOp::AddF64Lo, Expr::tmp(x64), Expr::tmp(x64));
    b.store(Expr::Const(IrConst::U64(A_DIFF)), Expr::tmp(s64));
    let block = b.build();

    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f32(A_BIG, 1.5);
    machine.set_f64(A_TINY, 2.5);
    machine.run(&mut ctx, &block);

    // The ops' result shadows carry guest-precision middle and
    // simulated-original channels.
    let blk = ctx.blocks_executed;
    let sv32 = ctx.store.temp(s32, blk).unwrap();
    assert_eq!(sv32.mid_value.prec(), 24);
    assert_eq!(sv32.ori_value.prec(), 24);
    assert_eq!(sv32.value.prec(), 120);

    let sv64 = ctx.store.temp(s64, blk).unwrap();
    assert_eq!(sv64.mid_value.prec(), 53);
    assert_eq!(sv64.ori_value.prec(), 53);
}

/// In simulate-original mode even the shadow channel runs at guest
/// precision.
#[test]
fn simulate_original_narrows_the_shadow() {
    let mut opts = ToolOptions::default();
    opts.simulate_original = true;
    let mut ctx = ctx_with(opts);
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));

    let sv = ctx.store.mem(A_SUM).unwrap();
    assert_eq!(sv.value.prec(), 53);
}

/// BEGIN/END toggle analysis; `--ignore-end=yes` pins it on.
#[test]
fn begin_end_toggle_analysis() {
    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);

    client::handle_request(&mut ctx, &mut machine, &ClientRequest::End);
    assert!(!ctx.analyze);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));
    assert!(ctx.store.mem(A_SUM).is_none(), "analysis was off");

    client::handle_request(&mut ctx, &mut machine, &ClientRequest::Begin);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));
    assert!(ctx.store.mem(A_SUM).is_some());

    let mut opts = ToolOptions::default();
    opts.ignore_end = true;
    let mut pinned = ctx_with(opts);
    client::handle_request(&mut pinned, &mut machine, &ClientRequest::End);
    assert!(pinned.analyze);
}

/// The alloc/free counters balance at teardown (resource discipline).
#[test]
fn fini_balances_shadow_allocations() {
    let mut ctx = default_ctx();
    ctx.exe = std::env::temp_dir().join(format!("fp_shadow_fini_{}", std::process::id()));
    let mut machine = Machine::new();
    machine.set_f64(A_BIG, 1.0);
    machine.set_f64(A_TINY, 3.0);
    machine.run(&mut ctx, &tracked_store_block(A_SUM));

    assert!(ctx.store.live() > 0);
    ctx.fini(&machine).expect("reports written");
    assert_eq!(ctx.store.live(), 0);
    assert_eq!(ctx.store.allocs, ctx.store.frees);
}

/// GET_SHADOW renders `noshadow` for untracked addresses and a value
/// otherwise; GET_RELATIVE_ERROR degrades to `0.0e+0`.
#[test]
fn textual_queries_degrade_gracefully() {
    let mut ctx = default_ctx();
    let mut machine = Machine::new();
    assert_eq!(get_shadow_text(&mut ctx, &mut machine, 0xDEAD), "noshadow");
    let reply = client::handle_request(
        &mut ctx,
        &mut machine,
        &ClientRequest::GetRelativeError { addr: 0xDEAD },
    );
    assert_eq!(reply, ClientReply::Text("0.0e+0".into()));
}
