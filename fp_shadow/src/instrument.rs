// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The block instrumenter.
//!
//! Runs once per freshly-translated superblock: two dataflow passes decide
//! which intermediates need shadow tracking, then an emission pass produces
//! the step stream the host executes. Each step either replays an original
//! statement or fires a runtime hook; for CmpF64 under shadow branching and
//! for conversions under track-int, the hook replaces the original statement
//! and its return value becomes the guest result.

use smallvec::SmallVec;

use crate::analysis::{importance, substitute};
use crate::context::ToolContext;
use crate::host::GuestHost;
use crate::ir::{Block, CvtKind, Expr, InsnAddr, IrConst, IrOp, RegOffset, Stmt, Temp};

/// A shadowed operand reference: the temp whose shadow is consulted (after
/// substitution) and the temp whose guest bits are sampled into the scratch
/// slot, or a constant.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum OperandRef {
    /// A temp operand.
    Tmp {
        /// Shadow lookup temp (substitution applied).
        sv: Temp,
        /// Guest-value sampling temp (the original operand).
        val: Temp,
    },
    /// A constant operand.
    Const(IrConst),
}

/// A store address: sampled from a temp or fixed at translation time.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum AddrRef {
    /// Address held in a temp.
    Tmp(Temp),
    /// Constant address.
    Const(u64),
}

/// An index expression of a circular register access.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum IxRef {
    /// Index held in a temp.
    Tmp(Temp),
    /// Constant index.
    Const(i32),
}

/// A runtime hook emitted by the instrumenter.
#[derive(Clone, Debug, PartialEq)]
pub enum Hook {
    /// Bumps the process-wide block counter; first step of every block.
    EnterBlock,
    /// Unary FP evaluation.
    UnOp {
        /// Guest instruction address.
        addr: InsnAddr,
        /// The operation.
        op: IrOp,
        /// Result temp.
        wr_tmp: Temp,
        /// Operand.
        arg: OperandRef,
    },
    /// Binary FP evaluation.
    BinOp {
        /// Guest instruction address.
        addr: InsnAddr,
        /// The operation.
        op: IrOp,
        /// Result temp.
        wr_tmp: Temp,
        /// First operand.
        arg1: OperandRef,
        /// Second operand.
        arg2: OperandRef,
    },
    /// Rounded ternary FP evaluation (rounding-mode operand dropped).
    TriOp {
        /// Guest instruction address.
        addr: InsnAddr,
        /// The operation.
        op: IrOp,
        /// Result temp.
        wr_tmp: Temp,
        /// Second operand.
        arg2: OperandRef,
        /// Third operand.
        arg3: OperandRef,
    },
    /// CmpF64 under shadow branching; replaces the original statement.
    CmpF64 {
        /// Guest instruction address.
        addr: InsnAddr,
        /// Result temp, written with the returned encoding.
        wr_tmp: Temp,
        /// First operand.
        arg1: OperandRef,
        /// Second operand.
        arg2: OperandRef,
    },
    /// Float-to-int conversion under track-int; replaces the original
    /// statement.
    CvtToInt {
        /// Guest instruction address.
        addr: InsnAddr,
        /// The operation.
        op: IrOp,
        /// Target width.
        kind: CvtKind,
        /// Result temp, written with the returned bits.
        wr_tmp: Temp,
        /// The converted operand.
        arg2: OperandRef,
    },
    /// Conditional-select shadow propagation.
    Mux {
        /// Result temp.
        wr_tmp: Temp,
        /// Condition temp.
        cond: Temp,
        /// Condition-zero side shadow temp; `None` when constant.
        expr0: Option<Temp>,
        /// Condition-nonzero side shadow temp; `None` when constant.
        expr_x: Option<Temp>,
    },
    /// Load shadow propagation.
    Load {
        /// Destination temp.
        tmp: Temp,
        /// Address temp.
        addr: Temp,
    },
    /// Store shadow propagation.
    Store {
        /// Address.
        addr: AddrRef,
        /// Data shadow temp (substituted); `None` for untracked data.
        data: Option<Temp>,
        /// Temp whose guest bits are sampled as the stored value.
        val: Option<Temp>,
        /// The stored width classifies as binary32.
        is_float: bool,
    },
    /// Register-read shadow propagation.
    Get {
        /// Register byte offset.
        offset: RegOffset,
        /// Destination temp.
        tmp: Temp,
    },
    /// Register-write shadow propagation.
    Put {
        /// Register byte offset.
        offset: RegOffset,
        /// Data shadow temp (substituted); `None` for untracked data.
        data: Option<Temp>,
    },
    /// Circular register read.
    GetI {
        /// First element byte offset.
        base: RegOffset,
        /// Element count.
        n_elems: u32,
        /// Constant bias.
        bias: i32,
        /// Runtime index.
        ix: IxRef,
        /// Destination temp.
        tmp: Temp,
    },
    /// Circular register write.
    PutI {
        /// First element byte offset.
        base: RegOffset,
        /// Element count.
        n_elems: u32,
        /// Constant bias.
        bias: i32,
        /// Runtime index.
        ix: IxRef,
        /// Data shadow temp (substituted); `None` for untracked data.
        data: Option<Temp>,
    },
}

/// One step of an instrumented block.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Execute the original statement at this index.
    Exec(usize),
    /// Fire a runtime hook.
    Call(Hook),
}

/// The instrumented form of one superblock.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstrumentedBlock {
    /// Steps in execution order.
    pub steps: Vec<Step>,
}

fn subst_or(subst: &[Option<Temp>], t: Temp) -> Temp {
    subst[t.index()].unwrap_or(t)
}

fn operand_ref(subst: &[Option<Temp>], e: &Expr) -> OperandRef {
    match e {
        Expr::RdTmp(t) => OperandRef::Tmp {
            sv: subst_or(subst, *t),
            val: *t,
        },
        Expr::Const(c) => OperandRef::Const(*c),
        _ => panic!("operand expressions must be flat"),
    }
}

fn data_tmp(subst: &[Option<Temp>], e: &Expr) -> Option<Temp> {
    e.as_tmp().map(|t| subst_or(subst, t))
}

fn ix_ref(ix: &Expr) -> IxRef {
    match ix {
        Expr::RdTmp(t) => IxRef::Tmp(*t),
        Expr::Const(IrConst::U32(v)) => IxRef::Const(*v as i32),
        Expr::Const(IrConst::U64(v)) => IxRef::Const(*v as i32),
        _ => panic!("circular index expressions must be flat integers"),
    }
}

/// Instruments one translated superblock.
pub fn instrument_block<H: GuestHost>(
    ctx: &mut ToolContext,
    host: &H,
    block: &Block,
) -> InstrumentedBlock {
    ctx.stats.sb_counter += 1;
    ctx.stats.total_ins += block.stmts.len() as u64;
    if ctx.stats.max_temps < block.n_temps() as u32 {
        ctx.stats.max_temps = block.n_temps() as u32;
    }

    let mut steps = Vec::with_capacity(block.stmts.len() * 2 + 1);

    // Preamble before the first instruction marker is replayed untouched.
    let mut start = 0;
    while start < block.stmts.len() && !matches!(block.stmts[start], Stmt::IMark { .. }) {
        if !matches!(block.stmts[start], Stmt::NoOp) {
            steps.push(Step::Exec(start));
        }
        start += 1;
    }

    let imp = importance::compute(block, start);
    let subst = substitute::compute(block, start);

    steps.push(Step::Call(Hook::EnterBlock));

    let ignore_libraries = ctx.opts.ignore_libraries;
    let goto_shadow_branch = ctx.opts.goto_shadow_branch;
    let track_int = ctx.opts.track_int;
    let ignore_site = |addr: InsnAddr| ignore_libraries && host.in_library(addr);

    // Address of the current guest instruction.
    let mut cia: InsnAddr = 0;

    for (j, stmt) in block.stmts.iter().enumerate().skip(start) {
        // Hooks for this statement; emitted after (or instead of) the
        // original.
        let mut hooks: SmallVec<[Hook; 2]> = SmallVec::new();
        let mut exec_original = true;

        match stmt {
            Stmt::NoOp => continue,
            Stmt::IMark { addr, .. } => cia = *addr,
            Stmt::AbiHint | Stmt::Exit { .. } => {}
            Stmt::Put { offset, data } => {
                ctx.stats.put_count += 1;
                if *offset == ctx.layout.ip_offset || imp.redundant_put[j] {
                    ctx.stats.puts_ignored += 1;
                } else {
                    hooks.push(Hook::Put {
                        offset: *offset,
                        data: data_tmp(&subst, data),
                    });
                }
            }
            Stmt::PutI {
                descr,
                ix,
                bias,
                data,
            } => {
                hooks.push(Hook::PutI {
                    base: descr.base,
                    n_elems: descr.n_elems,
                    bias: *bias,
                    ix: ix_ref(ix),
                    data: data_tmp(&subst, data),
                });
            }
            Stmt::Store { addr, data } => {
                ctx.stats.store_count += 1;
                let is_float = match data.as_tmp() {
                    Some(t) => !matches!(
                        block.temp_types[t.index()],
                        crate::ir::IrType::I64 | crate::ir::IrType::F64 | crate::ir::IrType::V128
                    ),
                    None => {
                        ctx.stats.stores_ignored += 1;
                        true
                    }
                };
                let addr_ref = match addr {
                    Expr::RdTmp(t) => AddrRef::Tmp(*t),
                    Expr::Const(IrConst::U64(a)) => AddrRef::Const(*a),
                    Expr::Const(IrConst::U32(a)) => AddrRef::Const(u64::from(*a)),
                    _ => panic!("store addresses must be flat"),
                };
                hooks.push(Hook::Store {
                    addr: addr_ref,
                    data: data_tmp(&subst, data),
                    val: data.as_tmp(),
                    is_float,
                });
            }
            Stmt::WrTmp { tmp, data } => match data {
                Expr::Const(_) => {}
                Expr::Load { addr, .. } => {
                    ctx.stats.load_count += 1;
                    if let Some(addr_tmp) = addr.as_tmp() {
                        hooks.push(Hook::Load {
                            tmp: *tmp,
                            addr: addr_tmp,
                        });
                    } else {
                        ctx.stats.loads_ignored += 1;
                    }
                }
                Expr::Get { offset, .. } => {
                    ctx.stats.get_count += 1;
                    if subst[tmp.index()].is_some() || imp.imp_tmp[tmp.index()] < 0 {
                        ctx.stats.gets_ignored += 1;
                    } else {
                        hooks.push(Hook::Get {
                            offset: *offset,
                            tmp: *tmp,
                        });
                    }
                }
                Expr::GetI { descr, ix, bias } => {
                    if subst[tmp.index()].is_none() && imp.imp_tmp[tmp.index()] >= 0 {
                        hooks.push(Hook::GetI {
                            base: descr.base,
                            n_elems: descr.n_elems,
                            bias: *bias,
                            ix: ix_ref(ix),
                            tmp: *tmp,
                        });
                    }
                }
                Expr::Unop { op, arg } => match op {
                    IrOp::SqrtF32Lo
                    | IrOp::SqrtF64Lo
                    | IrOp::NegF32
                    | IrOp::NegF64
                    | IrOp::AbsF32
                    | IrOp::AbsF64 => {
                        if !ignore_site(cia) {
                            hooks.push(Hook::UnOp {
                                addr: cia,
                                op: *op,
                                wr_tmp: *tmp,
                                arg: operand_ref(&subst, arg),
                            });
                        }
                    }
                    _ if op.is_unsupported_fp() => ctx.diag.record_unsupported(*op),
                    _ => {}
                },
                Expr::Binop { op, arg1, arg2 } => match op {
                    IrOp::CmpF64 => {
                        if goto_shadow_branch && !ignore_site(cia) {
                            exec_original = false;
                            hooks.push(Hook::CmpF64 {
                                addr: cia,
                                wr_tmp: *tmp,
                                arg1: operand_ref(&subst, arg1),
                                arg2: operand_ref(&subst, arg2),
                            });
                        }
                    }
                    IrOp::AddF32Lo
                    | IrOp::SubF32Lo
                    | IrOp::MulF32Lo
                    | IrOp::DivF32Lo
                    | IrOp::MinF32Lo
                    | IrOp::MaxF32Lo
                    | IrOp::AddF64Lo
                    | IrOp::SubF64Lo
                    | IrOp::MulF64Lo
                    | IrOp::DivF64Lo
                    | IrOp::MinF64Lo
                    | IrOp::MaxF64Lo => {
                        if !ignore_site(cia) {
                            hooks.push(Hook::BinOp {
                                addr: cia,
                                op: *op,
                                wr_tmp: *tmp,
                                arg1: operand_ref(&subst, arg1),
                                arg2: operand_ref(&subst, arg2),
                            });
                        }
                    }
                    IrOp::F64ToI16S
                    | IrOp::F64ToI32S
                    | IrOp::F64ToI32U
                    | IrOp::F64ToI64S
                    | IrOp::F64ToI64U => {
                        if track_int && !ignore_site(cia) {
                            exec_original = false;
                            let kind = op.cvt_kind().unwrap_or(CvtKind::I64S);
                            hooks.push(Hook::CvtToInt {
                                addr: cia,
                                op: *op,
                                kind,
                                wr_tmp: *tmp,
                                arg2: operand_ref(&subst, arg2),
                            });
                        }
                    }
                    _ if op.is_unsupported_fp() => ctx.diag.record_unsupported(*op),
                    _ => {}
                },
                Expr::Triop {
                    op, arg2, arg3, ..
                } => match op {
                    IrOp::AddF64 | IrOp::SubF64 | IrOp::MulF64 | IrOp::DivF64 => {
                        if !ignore_site(cia) {
                            hooks.push(Hook::TriOp {
                                addr: cia,
                                op: *op,
                                wr_tmp: *tmp,
                                arg2: operand_ref(&subst, arg2),
                                arg3: operand_ref(&subst, arg3),
                            });
                        }
                    }
                    _ if op.is_unsupported_fp() => ctx.diag.record_unsupported(*op),
                    _ => {}
                },
                Expr::Mux {
                    cond,
                    if_false,
                    if_true,
                } => {
                    let cond_tmp = cond
                        .as_tmp()
                        .unwrap_or_else(|| panic!("mux conditions must be temps"));
                    hooks.push(Hook::Mux {
                        wr_tmp: *tmp,
                        cond: cond_tmp,
                        expr0: data_tmp(&subst, if_false),
                        expr_x: data_tmp(&subst, if_true),
                    });
                }
                Expr::RdTmp(_) => {}
            },
        }

        if exec_original {
            steps.push(Step::Exec(j));
        }
        steps.extend(hooks.into_iter().map(Step::Call));
    }

    InstrumentedBlock { steps }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockBuilder, IrType};
    use crate::options::ToolOptions;

    struct NoHost;

    impl GuestHost for NoHost {
        fn read_f32(&self, _addr: u64) -> Option<f32> {
            None
        }
        fn read_f64(&self, _addr: u64) -> Option<f64> {
            None
        }
        fn write_f32(&mut self, _addr: u64, _value: f32) {}
        fn write_f64(&mut self, _addr: u64, _value: f64) {}
        fn describe(&self, addr: u64) -> String {
            format!("{addr:#x}")
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new(ToolOptions::default())
    }

    fn hooks(ib: &InstrumentedBlock) -> Vec<&Hook> {
        ib.steps
            .iter()
            .filter_map(|s| match s {
                Step::Call(h) => Some(h),
                Step::Exec(_) => None,
            })
            .collect()
    }

    #[test]
    fn every_block_starts_with_a_counter_bump() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let block = b.build();
        let ib = instrument_block(&mut ctx(), &NoHost, &block);
        assert_eq!(ib.steps[0], Step::Call(Hook::EnterBlock));
    }

    #[test]
    fn binop_operands_use_the_substitution_chain() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1000)));
        let bits = b.unop(IrOp::ReinterpF64AsI64, Expr::tmp(x));
        let back = b.unop(IrOp::ReinterpI64AsF64, Expr::tmp(bits));
        let y = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1008)));
        let _sum = b.binop(IrOp::AddF64Lo, Expr::tmp(back), Expr::tmp(y));
        let block = b.build();

        let ib = instrument_block(&mut ctx(), &NoHost, &block);
        let hook = hooks(&ib)
            .into_iter()
            .find_map(|h| match h {
                Hook::BinOp { arg1, .. } => Some(*arg1),
                _ => None,
            })
            .unwrap();
        assert_eq!(hook, OperandRef::Tmp { sv: x, val: back });
    }

    #[test]
    fn ip_register_writes_are_not_shadowed() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.konst(IrConst::U64(0x200));
        b.put(168, Expr::tmp(x));
        let block = b.build();

        let mut c = ctx();
        let ib = instrument_block(&mut c, &NoHost, &block);
        assert!(!hooks(&ib).iter().any(|h| matches!(h, Hook::Put { .. })));
        assert_eq!(c.stats.puts_ignored, 1);
    }

    #[test]
    fn const_address_loads_are_skipped() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let _x = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1000)));
        let block = b.build();

        let mut c = ctx();
        let ib = instrument_block(&mut c, &NoHost, &block);
        assert!(!hooks(&ib).iter().any(|h| matches!(h, Hook::Load { .. })));
        assert_eq!(c.stats.loads_ignored, 1);
    }

    #[test]
    fn unsupported_ops_are_recorded_once() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1000)));
        let rm = b.konst(IrConst::U32(0));
        let _s = b.binop(IrOp::SinF64, Expr::tmp(rm), Expr::tmp(x));
        let _c = b.binop(IrOp::CosF64, Expr::tmp(rm), Expr::tmp(x));
        let _s2 = b.binop(IrOp::SinF64, Expr::tmp(rm), Expr::tmp(x));
        let block = b.build();

        let mut c = ctx();
        instrument_block(&mut c, &NoHost, &block);
        assert_eq!(c.diag.unsupported.len(), 2);
    }

    #[test]
    fn cmp_replaces_the_original_statement_under_shadow_branching() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1000)));
        let y = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1008)));
        let cmp = b.binop(IrOp::CmpF64, Expr::tmp(x), Expr::tmp(y));
        let block = b.build();

        let mut c = ctx();
        c.opts.goto_shadow_branch = true;
        let ib = instrument_block(&mut c, &NoHost, &block);
        // The WrTmp of the comparison must not be replayed natively.
        let cmp_stmt = block
            .stmts
            .iter()
            .position(|s| matches!(s, Stmt::WrTmp { tmp, .. } if *tmp == cmp))
            .unwrap();
        assert!(!ib.steps.contains(&Step::Exec(cmp_stmt)));
        assert!(hooks(&ib).iter().any(|h| matches!(h, Hook::CmpF64 { .. })));
    }
}
