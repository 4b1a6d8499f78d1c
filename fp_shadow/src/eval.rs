// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The operation evaluator.
//!
//! Every intercepted floating-point operation is evaluated three times in
//! parallel: in the high-precision shadow channel, in the guest-precision
//! "middle" channel, and in the guest-precision simulated-original channel
//! with IEEE subnormal emulation. Operand shadows are repaired against the
//! guest's own captured results before use (drift recovery), cancellation is
//! quantified on additive ops, and every evaluation feeds the diagnostic
//! accumulators.

use core::cmp::Ordering;

use rug::{Assign, Float};

use crate::context::ToolContext;
use crate::ir::{CvtKind, FpPrec, InsnAddr, IrOp, Temp};
use crate::numeric::{self, FpBinary, FpUnary};
use crate::scratch;
use crate::store::{GuestValue, ShadowValue};

/// Result encodings of a CmpF64, matching the x87 condition flags the guest
/// expects.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpF64Result {
    /// First operand greater.
    Gt,
    /// First operand less.
    Lt,
    /// Operands equal.
    Eq,
    /// Unordered (a NaN operand).
    Un,
}

impl CmpF64Result {
    /// The guest-visible encoding.
    #[must_use]
    pub fn encoding(self) -> u32 {
        match self {
            Self::Gt => 0x00,
            Self::Lt => 0x01,
            Self::Eq => 0x40,
            Self::Un => 0x45,
        }
    }

    fn from_partial(ord: Option<Ordering>) -> Self {
        match ord {
            Some(Ordering::Greater) => Self::Gt,
            Some(Ordering::Less) => Self::Lt,
            Some(Ordering::Equal) => Self::Eq,
            None => Self::Un,
        }
    }
}

/// One resolved operand: the three channel inputs plus propagated metadata.
struct Operand {
    tmp_x: Float,
    mid_x: Float,
    ori_x: Float,
    op_count: u64,
    origin: InsnAddr,
    canceled: i64,
    cancel_origin: InsnAddr,
    input_rel: Float,
    exact_bits: i64,
}

/// Repairs a shadow whose simulated-original channel no longer matches the
/// guest's captured result: some untracked operation mutated the carrier, so
/// all three channels restart from the guest value.
fn check_and_recover(sv: &mut ShadowValue) {
    let Some(org) = sv.org else {
        panic!("shadow value without captured guest result");
    };
    let org_f = org.to_float();
    if sv.ori_value.is_nan() && org_f.is_nan() {
        return;
    }
    if sv.ori_value != org_f {
        log::info!("untracked operations may exist; recovering shadow state");
        sv.value.assign(&org_f);
        sv.mid_value.assign(&org_f);
        sv.ori_value.assign(&org_f);
    }
}

/// Resolves one operand into the three channel inputs.
///
/// A tracked temp supplies its shadow channels and metadata; a constant or
/// untracked temp seeds all three channels from the guest's IEEE bits in the
/// scratch slot. Drift recovery runs first when `recover` is set.
fn load_operand(
    ctx: &mut ToolContext,
    slot: usize,
    arg: Temp,
    is_const: bool,
    prec: FpPrec,
    recover: bool,
) -> Operand {
    let sim = ctx.opts.simulate_original;
    let high_prec = if sim { prec.bits() } else { ctx.opts.precision };
    let mut operand = Operand {
        tmp_x: Float::new(high_prec),
        mid_x: Float::new(prec.bits()),
        ori_x: Float::new(prec.bits()),
        op_count: 0,
        origin: 0,
        canceled: 0,
        cancel_origin: 0,
        input_rel: Float::new(ctx.opts.precision),
        exact_bits: prec.mantissa_bits(),
    };

    if is_const {
        scratch::read_const(ctx.scratch.konst[slot], &mut operand.tmp_x);
        operand.mid_x.assign(&operand.tmp_x);
        numeric::assign_channel(&mut operand.ori_x, &operand.tmp_x, true);
        return operand;
    }

    let blk = ctx.blocks_executed;
    if recover {
        if let Some(sv) = ctx.store.temp_mut(arg, blk) {
            check_and_recover(sv);
        }
    }
    {
        let (store, diag) = (&ctx.store, &ctx.diag);
        diag.operand_rel_error(store.temp(arg, blk), &mut operand.input_rel);
    }

    match ctx.store.temp(arg, blk) {
        Some(sv) => {
            operand.tmp_x.assign(&sv.value);
            operand.mid_x.assign(&sv.mid_value);
            numeric::assign_channel(&mut operand.ori_x, &sv.ori_value, true);
            operand.op_count = sv.op_count;
            operand.origin = sv.origin;
            operand.canceled = sv.canceled;
            operand.cancel_origin = sv.cancel_origin;

            if ctx.opts.bad_cancellations {
                let mut ieee = Float::new(ctx.opts.precision);
                ctx.scratch.tmp[slot].read(&mut ieee, false);
                operand.exact_bits = numeric::exact_bits(&operand.tmp_x, &ieee, prec);
                if let Some(org) = sv.org {
                    let cap = if org.is_f32() { 23 } else { 52 };
                    operand.exact_bits = operand.exact_bits.min(cap);
                }
            }
        }
        None => {
            ctx.scratch.tmp[slot].read(&mut operand.tmp_x, sim);
            operand.mid_x.assign(&operand.tmp_x);
            numeric::assign_channel(&mut operand.ori_x, &operand.tmp_x, true);
        }
    }
    operand
}

/// Fresh result channels at the right precisions for this op.
fn result_channels(ctx: &ToolContext, prec: FpPrec) -> (Float, Float, Float) {
    let value_prec = if ctx.opts.simulate_original {
        prec.bits()
    } else {
        ctx.opts.precision
    };
    (
        Float::new(value_prec),
        Float::new(prec.bits()),
        Float::new(prec.bits()),
    )
}

fn max_rel<'a>(a: &'a Float, b: &'a Float) -> &'a Float {
    if b.partial_cmp(a) == Some(Ordering::Greater) {
        b
    } else {
        a
    }
}

/// Logs a one-evaluation error summary, gated like the original's per-op
/// error printing.
fn log_error_short(ctx: &ToolContext, tmp: Temp) {
    let opts = &ctx.opts;
    if !(opts.detect_pso || opts.print_every_error || opts.error_localization) {
        return;
    }
    let Some(sv) = ctx.store.temp(tmp, ctx.blocks_executed) else {
        if opts.print_every_error {
            log::info!("no shadow value at the evaluated result");
        }
        return;
    };
    let Some(org) = sv.org else {
        return;
    };
    let mut org_f = Float::new(opts.precision);
    org.assign_to(&mut org_f);
    let mut rel = Float::new(opts.precision);
    numeric::relative_error(&mut rel, &sv.value, &org_f);
    if opts.detect_pso || opts.print_every_error || rel >= 1e-10 {
        log::info!(
            "origin {:#x}: original {}, shadow {}, relative error {}",
            sv.origin,
            numeric::short_string(&org_f),
            numeric::short_string(&sv.value),
            numeric::short_string(&rel)
        );
    }
}

/// Evaluates a unary operation (sqrt, neg, abs).
pub fn process_un_op(ctx: &mut ToolContext, addr: InsnAddr, const_mask: u32) {
    if !ctx.analyze {
        return;
    }
    let args = ctx.scratch.un_op;
    let op = args.op;
    let prec = op.precision();

    // Unary ops are never precision-specific; no recovery or inflation
    // bookkeeping on their operands.
    let a = load_operand(ctx, 0, args.arg, const_mask & 0x1 != 0, prec, false);

    let kind = match op {
        IrOp::SqrtF32Lo | IrOp::SqrtF64Lo => FpUnary::Sqrt,
        IrOp::NegF32 | IrOp::NegF64 => FpUnary::Neg,
        IrOp::AbsF32 | IrOp::AbsF64 => FpUnary::Abs,
        _ => panic!("unhandled unary operation {op:?}"),
    };

    let (mut value, mut mid, mut ori) = result_channels(ctx, prec);
    numeric::unary(&mut value, kind, &a.tmp_x, false);
    numeric::unary(&mut mid, kind, &a.mid_x, false);
    numeric::unary(&mut ori, kind, &a.ori_x, true);

    ctx.stats.fp_ops += 1;
    let blk = ctx.blocks_executed;
    let res = ctx.store.set_temp(args.wr_tmp, blk);
    res.value = value;
    res.mid_value = mid;
    res.ori_value = ori;
    res.op_count = a.op_count + 1;
    res.origin = addr;
    res.canceled = a.canceled;
    res.cancel_origin = a.cancel_origin;
    res.org = Some(args.org);

    if ctx.opts.mean_error {
        let (store, diag) = (&ctx.store, &mut ctx.diag);
        if let Some(res) = store.temp(args.wr_tmp, blk) {
            diag.update_mean_value(addr, op, &res.value, args.org, 0, a.origin, 0, 0);
        }
    }
    if ctx.opts.print_every_error {
        log_error_short(ctx, args.wr_tmp);
    }
}

fn binary_kind(op: IrOp) -> FpBinary {
    match op {
        IrOp::AddF32Lo | IrOp::AddF64Lo | IrOp::AddF64 => FpBinary::Add,
        IrOp::SubF32Lo | IrOp::SubF64Lo | IrOp::SubF64 => FpBinary::Sub,
        IrOp::MulF32Lo | IrOp::MulF64Lo | IrOp::MulF64 => FpBinary::Mul,
        IrOp::DivF32Lo | IrOp::DivF64Lo | IrOp::DivF64 => FpBinary::Div,
        IrOp::MinF32Lo | IrOp::MinF64Lo => FpBinary::Min,
        IrOp::MaxF32Lo | IrOp::MaxF64Lo => FpBinary::Max,
        _ => panic!("unhandled binary operation {op:?}"),
    }
}

fn is_additive(kind: FpBinary) -> bool {
    matches!(kind, FpBinary::Add | FpBinary::Sub)
}

/// Commits a two-operand evaluation: channels, metadata, cancellation
/// maxima, accumulator updates, and the PSO runtime fix.
#[allow(clippy::too_many_arguments)]
fn commit_binary(
    ctx: &mut ToolContext,
    addr: InsnAddr,
    op: IrOp,
    wr_tmp: Temp,
    org: GuestValue,
    a1: &Operand,
    a2: &Operand,
    need_fix: bool,
) {
    let prec = op.precision();
    let kind = binary_kind(op);
    let (mut value, mut mid, mut ori) = result_channels(ctx, prec);

    numeric::binary(&mut value, kind, &a1.tmp_x, &a2.tmp_x, false);
    // A fixed site reseeds its middle channel from the high-precision
    // inputs rounded to guest precision: the result the guest would see if
    // the operation were computed on corrected operands.
    if need_fix {
        let mut m1 = Float::new(prec.bits());
        m1.assign(&a1.tmp_x);
        let mut m2 = Float::new(prec.bits());
        m2.assign(&a2.tmp_x);
        numeric::binary(&mut mid, kind, &m1, &m2, false);
    } else {
        numeric::binary(&mut mid, kind, &a1.mid_x, &a2.mid_x, false);
    }
    numeric::binary(&mut ori, kind, &a1.ori_x, &a2.ori_x, true);

    let canceled = if is_additive(kind) {
        numeric::canceled_bits(&value, &a1.tmp_x, &a2.tmp_x)
    } else {
        0
    };

    let mut max_canceled = canceled;
    let mut cancel_origin = addr;
    if a1.canceled > max_canceled {
        max_canceled = a1.canceled;
        cancel_origin = a1.cancel_origin;
    }
    if a2.canceled > max_canceled {
        max_canceled = a2.canceled;
        cancel_origin = a2.cancel_origin;
    }

    ctx.stats.fp_ops += 1;
    let blk = ctx.blocks_executed;
    let res = ctx.store.set_temp(wr_tmp, blk);
    res.value = value;
    res.mid_value = mid;
    res.ori_value = ori;
    res.op_count = 1 + a1.op_count.max(a2.op_count);
    res.origin = addr;
    res.canceled = max_canceled;
    res.cancel_origin = cancel_origin;
    res.org = Some(org);

    if ctx.opts.mean_error {
        let badness = if ctx.opts.bad_cancellations && canceled > 0 {
            (canceled - a1.exact_bits.min(a2.exact_bits)).max(0)
        } else {
            0
        };
        let (store, diag) = (&ctx.store, &mut ctx.diag);
        if let Some(res) = store.temp(wr_tmp, blk) {
            diag.update_mean_value(
                addr,
                op,
                &res.value,
                org,
                canceled,
                a1.origin,
                a2.origin,
                badness,
            );
        }
    }

    // The runtime fix substitutes the middle channel for the shadow after
    // the accumulators saw the unfixed error, so downstream consumers read
    // the corrected value while the statistics still localize the site.
    if need_fix {
        if let Some(res) = ctx.store.temp_mut(wr_tmp, blk) {
            let mid = res.mid_value.clone();
            res.value.assign(&mid);
        }
    }

    if ctx.opts.detect_pso && !ctx.diag.finish_pso {
        let input_rel = max_rel(&a1.input_rel, &a2.input_rel).clone();
        let (store, diag) = (&ctx.store, &mut ctx.diag);
        if let Some(res) = store.temp(wr_tmp, blk) {
            diag.analyze_pso(&input_rel, res);
        }
    }
    if ctx.opts.print_every_error {
        log_error_short(ctx, wr_tmp);
    }
}

/// Evaluates a binary operation (add, sub, mul, div, min, max).
pub fn process_bin_op(ctx: &mut ToolContext, addr: InsnAddr, const_mask: u32) {
    if !ctx.analyze {
        return;
    }
    let args = ctx.scratch.bin_op;
    let prec = args.op.precision();
    let need_fix = ctx.opts.detect_pso && ctx.diag.detected_pso.contains_key(&addr);

    let a1 = load_operand(ctx, 0, args.arg1, const_mask & 0x1 != 0, prec, true);
    let a2 = load_operand(ctx, 1, args.arg2, const_mask & 0x2 != 0, prec, true);

    commit_binary(ctx, addr, args.op, args.wr_tmp, args.org, &a1, &a2, need_fix);
}

/// Evaluates a rounded ternary operation; the rounding-mode operand was
/// dropped at instrumentation time.
pub fn process_tri_op(ctx: &mut ToolContext, addr: InsnAddr, const_mask: u32) {
    if !ctx.analyze {
        return;
    }
    let args = ctx.scratch.tri_op;
    let prec = args.op.precision();
    let need_fix = ctx.opts.detect_pso && ctx.diag.detected_pso.contains_key(&addr);

    let a2 = load_operand(ctx, 1, args.arg2, const_mask & 0x2 != 0, prec, true);
    let a3 = load_operand(ctx, 2, args.arg3, const_mask & 0x4 != 0, prec, true);

    commit_binary(
        ctx,
        addr,
        args.op,
        args.wr_tmp,
        GuestValue::F64(args.org),
        &a2,
        &a3,
        need_fix,
    );
}

// Reads one comparison side from its scratch slot or constant.
fn read_side(ctx: &ToolContext, slot: usize, is_const: bool, dst: &mut Float) {
    if is_const {
        scratch::read_const(ctx.scratch.konst[slot], dst);
    } else {
        ctx.scratch.tmp[slot].read(dst, false);
    }
}

/// Evaluates a CmpF64 whose result drives guest control flow.
///
/// The high-precision shadow ordering is returned; a disagreement with the
/// simulated-original ordering is logged once per site. Every path yields a
/// definite encoding.
pub fn process_cmp_f64(ctx: &mut ToolContext, addr: InsnAddr, const_mask: u32) -> CmpF64Result {
    let args = ctx.scratch.bin_op;
    if !ctx.analyze {
        // Analysis is off; reproduce the guest's own comparison.
        let mut lhs = Float::new(64);
        let mut rhs = Float::new(64);
        read_side(ctx, 0, const_mask & 0x1 != 0, &mut lhs);
        read_side(ctx, 1, const_mask & 0x2 != 0, &mut rhs);
        return CmpF64Result::from_partial(lhs.partial_cmp(&rhs));
    }

    let prec = args.op.precision();
    let a1 = load_operand(ctx, 0, args.arg1, const_mask & 0x1 != 0, prec, true);
    let a2 = load_operand(ctx, 1, args.arg2, const_mask & 0x2 != 0, prec, true);

    let shadow_ord = a1.tmp_x.partial_cmp(&a2.tmp_x);
    let original_ord = a1.ori_x.partial_cmp(&a2.ori_x);
    if shadow_ord != original_ord && ctx.diag.note_branch_divergence(addr) {
        log::info!("comparison at {addr:#x} diverges; guest follows the shadow ordering");
    }

    CmpF64Result::from_partial(shadow_ord)
}

fn convert_to_int(value: f64, kind: CvtKind) -> u64 {
    // Round to nearest-even, then saturate into the target width. NaN
    // converts to zero.
    let rounded = value.round_ties_even();
    match kind {
        CvtKind::I16S => rounded as i16 as u16 as u64,
        CvtKind::I32S => rounded as i32 as u32 as u64,
        CvtKind::I32U => u64::from(rounded as u32),
        CvtKind::I64S => rounded as i64 as u64,
        CvtKind::I64U => rounded as u64,
    }
}

/// Evaluates a float-to-integer conversion in track-int mode, returning the
/// integer bits the guest receives. The shadow, not the guest's own value,
/// is converted, so downstream integer code sees the corrected result.
pub fn process_cvt_to_int(
    ctx: &mut ToolContext,
    _addr: InsnAddr,
    const_mask: u32,
    kind: CvtKind,
) -> u64 {
    let args = ctx.scratch.bin_op;
    if !ctx.analyze {
        let mut value = Float::new(64);
        read_side(ctx, 1, const_mask & 0x2 != 0, &mut value);
        return convert_to_int(value.to_f64(), kind);
    }

    let prec = args.op.precision();
    let a2 = load_operand(ctx, 1, args.arg2, const_mask & 0x2 != 0, prec, true);
    convert_to_int(a2.tmp_x.to_f64(), kind)
}
