// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Forward substitution chain.
//!
//! Guest code routinely smuggles a floating-point value through bit
//! reinterprets, 32/64/128-bit repackagings, and register round trips before
//! the next FP operation consumes it. A forward walk resolves each such temp
//! to the ultimate source temp that actually carries the shadow value, so the
//! evaluator does a single substituted lookup instead of chasing the chain
//! dynamically.

use crate::ir::{Block, Expr, IrOp, Stmt, Temp};
use crate::store::MAX_REGISTERS;

fn chase(subst: &[Option<Temp>], src: Temp) -> Option<Temp> {
    subst[src.index()].or(Some(src))
}

pub(crate) fn compute(block: &Block, start: usize) -> Vec<Option<Temp>> {
    let mut tmp_instead: Vec<Option<Temp>> = vec![None; block.n_temps()];
    let mut tmp_in_reg: Vec<Option<Temp>> = vec![None; MAX_REGISTERS as usize];

    for stmt in &block.stmts[start..] {
        match stmt {
            Stmt::Put { offset, data } => {
                tmp_in_reg[*offset as usize] = data.as_tmp();
            }
            Stmt::WrTmp { tmp, data } => match data {
                Expr::Get { offset, .. } => {
                    if let Some(src) = tmp_in_reg[*offset as usize] {
                        tmp_instead[tmp.index()] = chase(&tmp_instead, src);
                    }
                }
                Expr::RdTmp(src) => {
                    tmp_instead[tmp.index()] = tmp_instead[src.index()];
                }
                Expr::Unop { op, arg } if op.is_pass_through() => {
                    if let Some(src) = arg.as_tmp() {
                        tmp_instead[tmp.index()] = chase(&tmp_instead, src);
                    }
                }
                Expr::Binop { op, arg1, arg2 } => match op {
                    IrOp::F64ToF32 => {
                        if let Some(src) = arg2.as_tmp() {
                            tmp_instead[tmp.index()] = chase(&tmp_instead, src);
                        }
                    }
                    IrOp::I64HLToV128 | IrOp::I32HLToI64 => {
                        if let Some(src) = arg1.as_tmp().or_else(|| arg2.as_tmp()) {
                            tmp_instead[tmp.index()] = chase(&tmp_instead, src);
                        }
                    }
                    _ => {}
                },
                _ => {}
            },
            _ => {}
        }
    }

    tmp_instead
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockBuilder, IrType};

    #[test]
    fn reinterpret_chain_resolves_to_source() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.load(IrType::F64, Expr::Const(crate::ir::IrConst::U64(0x1000)));
        let bits = b.unop(IrOp::ReinterpF64AsI64, Expr::tmp(x));
        let back = b.unop(IrOp::ReinterpI64AsF64, Expr::tmp(bits));
        let block = b.build();

        let subst = compute(&block, 0);
        assert_eq!(subst[bits.index()], Some(x));
        assert_eq!(subst[back.index()], Some(x));
    }

    #[test]
    fn register_round_trip_resolves_to_source() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.load(IrType::F64, Expr::Const(crate::ir::IrConst::U64(0x1000)));
        b.put(16, Expr::tmp(x));
        let y = b.get(IrType::F64, 16);
        let block = b.build();

        let subst = compute(&block, 0);
        assert_eq!(subst[y.index()], Some(x));
    }

    #[test]
    fn repack_prefers_first_temp_operand() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let hi = b.load(IrType::I64, Expr::Const(crate::ir::IrConst::U64(0x1000)));
        let lo = b.load(IrType::I64, Expr::Const(crate::ir::IrConst::U64(0x1008)));
        let v = b.binop(IrOp::I64HLToV128, Expr::tmp(hi), Expr::tmp(lo));
        let block = b.build();

        let subst = compute(&block, 0);
        assert_eq!(subst[v.index()], Some(hi));
    }
}
