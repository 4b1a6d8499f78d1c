// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Backward importance propagation.
//!
//! One backward walk per superblock decides which intermediates can carry
//! shadow state anybody downstream cares about. Temps consumed by shadowed
//! FP operations, stores, register writes, or pass-through repackagings are
//! shadow-relevant; temps consumed only by plain integer computation are
//! shadow-irrelevant and their producing register reads need no tracking.
//! Register writes overwritten later in the same block before any read or
//! block exit are redundant for shadow purposes.

use crate::ir::{Block, Expr, IrOp, Stmt};
use crate::store::MAX_REGISTERS;

/// Per-temp verdicts. Values: `0` unseen, `1` shadow-relevant, `-1`
/// shadow-irrelevant.
#[derive(Clone, Debug)]
pub(crate) struct Importance {
    pub(crate) imp_tmp: Vec<i8>,
    /// Indexed by statement: register writes whose slot is overwritten
    /// below before any read or exit.
    pub(crate) redundant_put: Vec<bool>,
}

fn mark(imp: &mut [i8], e: &Expr, verdict: i8) {
    if let Expr::RdTmp(t) = e {
        let slot = &mut imp[t.index()];
        if verdict > 0 || *slot == 0 {
            *slot = verdict;
        }
    }
}

pub(crate) fn compute(block: &Block, start: usize) -> Importance {
    let mut imp_reg = vec![true; MAX_REGISTERS as usize];
    let mut imp_tmp = vec![0_i8; block.n_temps()];
    let mut redundant_put = vec![false; block.stmts.len()];

    for j in (start..block.stmts.len()).rev() {
        match &block.stmts[j] {
            Stmt::Put { offset, data } => {
                redundant_put[j] = !imp_reg[*offset as usize];
                imp_reg[*offset as usize] = false;
                mark(&mut imp_tmp, data, 1);
            }
            Stmt::PutI { .. } => {
                // The written slot is only known at run time; treat it as a
                // read barrier for the whole file.
                imp_reg.fill(true);
            }
            Stmt::Store { data, .. } => {
                mark(&mut imp_tmp, data, 1);
            }
            Stmt::Exit { .. } => {
                // A side exit publishes every register to the next block.
                imp_reg.fill(true);
            }
            Stmt::WrTmp { data, .. } => match data {
                Expr::Get { offset, .. } => {
                    imp_reg[*offset as usize] = true;
                }
                Expr::GetI { .. } => {
                    // The read slot is only known at run time.
                    imp_reg.fill(true);
                }
                Expr::Unop { op, arg } => match op {
                    IrOp::SqrtF32Lo
                    | IrOp::SqrtF64Lo
                    | IrOp::NegF32
                    | IrOp::NegF64
                    | IrOp::AbsF32
                    | IrOp::AbsF64 => mark(&mut imp_tmp, arg, 1),
                    _ if op.is_pass_through() => mark(&mut imp_tmp, arg, 1),
                    _ => mark(&mut imp_tmp, arg, -1),
                },
                Expr::Binop { op, arg1, arg2 } => match op {
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
                    | IrOp::MaxF64Lo
                    | IrOp::CmpF64
                    | IrOp::F64ToF32
                    | IrOp::I64HLToV128
                    | IrOp::I32HLToI64 => {
                        mark(&mut imp_tmp, arg1, 1);
                        mark(&mut imp_tmp, arg2, 1);
                    }
                    IrOp::F64ToI16S
                    | IrOp::F64ToI32S
                    | IrOp::F64ToI32U
                    | IrOp::F64ToI64S
                    | IrOp::F64ToI64U => mark(&mut imp_tmp, arg2, 1),
                    _ => {
                        mark(&mut imp_tmp, arg1, -1);
                        mark(&mut imp_tmp, arg2, -1);
                    }
                },
                Expr::Triop {
                    op, arg2, arg3, ..
                } => match op {
                    IrOp::AddF64 | IrOp::SubF64 | IrOp::MulF64 | IrOp::DivF64 => {
                        mark(&mut imp_tmp, arg2, 1);
                        mark(&mut imp_tmp, arg3, 1);
                    }
                    _ => {
                        mark(&mut imp_tmp, arg2, -1);
                        mark(&mut imp_tmp, arg3, -1);
                    }
                },
                // Mux operands keep whatever verdict downstream gave them.
                _ => {}
            },
            _ => {}
        }
    }

    Importance {
        imp_tmp,
        redundant_put,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockBuilder, Expr, IrConst, IrType};

    #[test]
    fn fp_consumers_mark_operands_relevant() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.get(IrType::F64, 16);
        let y = b.get(IrType::F64, 24);
        let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
        b.put(32, Expr::tmp(s));
        let block = b.build();

        let imp = compute(&block, 0);
        assert_eq!(imp.imp_tmp[x.index()], 1);
        assert_eq!(imp.imp_tmp[y.index()], 1);
        assert_eq!(imp.imp_tmp[s.index()], 1);
    }

    #[test]
    fn integer_only_consumers_mark_operands_irrelevant() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.get(IrType::I64, 16);
        let y = b.konst(IrConst::U64(1));
        let s = b.binop(IrOp::Add64, Expr::tmp(x), Expr::tmp(y));
        let _ = s;
        let block = b.build();

        let imp = compute(&block, 0);
        assert_eq!(imp.imp_tmp[x.index()], -1);
    }

    #[test]
    fn overwritten_register_write_is_redundant() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.get(IrType::F64, 16);
        b.put(32, Expr::tmp(x));
        let y = b.get(IrType::F64, 24);
        b.put(32, Expr::tmp(y));
        let block = b.build();

        let imp = compute(&block, 0);
        // Statement 2 is the first Put; it dies before any read of offset 32.
        assert!(imp.redundant_put[2]);
        assert!(!imp.redundant_put[4]);
    }

    #[test]
    fn side_exit_keeps_register_writes_alive() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.get(IrType::F64, 16);
        b.put(32, Expr::tmp(x));
        b.exit(Expr::Const(IrConst::U1(true)), 0x200);
        let y = b.get(IrType::F64, 24);
        b.put(32, Expr::tmp(y));
        let block = b.build();

        let imp = compute(&block, 0);
        assert!(!imp.redundant_put[2]);
    }
}
