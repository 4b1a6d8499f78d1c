// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! A minimal reference guest machine.
//!
//! The real embedding is a DBI framework that translates guest code, runs
//! the instrumenter over each fresh superblock, and executes the step stream
//! with native code. This machine stands in for that framework so the engine
//! can be exercised end to end: it interprets superblocks, fills the scratch
//! records exactly as instrumented stores would, fires the runtime
//! callbacks, and serves guest memory and a synthetic symbol table to the
//! client-request and report paths.
//!
//! It models scalar guest state only; vector temps exist solely to carry a
//! scalar through 128-bit repackagings.

use hashbrown::HashMap;

use crate::context::ToolContext;
use crate::eval;
use crate::host::GuestHost;
use crate::instrument::{AddrRef, Hook, InstrumentedBlock, IxRef, OperandRef, Step};
use crate::ir::{
    Block, Expr, FpPrec, GuestAddr, InsnAddr, IrConst, IrOp, IrType, RegOffset, Stmt, Temp,
    ThreadId,
};
use crate::scratch::{SlotBits, TempSlot};
use crate::store::GuestValue;
use crate::transfer;

/// A guest value held in a temp, register slot, or memory cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum TempValue {
    /// 16-bit integer.
    I16(u16),
    /// 32-bit integer.
    I32(u32),
    /// 64-bit integer.
    I64(u64),
    /// IEEE binary32.
    F32(f32),
    /// IEEE binary64.
    F64(f64),
    /// 128-bit vector as two 64-bit halves `[low, high]`.
    V128([u64; 2]),
}

impl TempValue {
    /// The zero value of a type.
    #[must_use]
    pub fn zero(ty: IrType) -> Self {
        match ty {
            IrType::I16 => Self::I16(0),
            IrType::I32 => Self::I32(0),
            IrType::I64 => Self::I64(0),
            IrType::F32 => Self::F32(0.0),
            IrType::F64 => Self::F64(0.0),
            IrType::V128 => Self::V128([0, 0]),
        }
    }

    fn bits(self) -> [u64; 2] {
        match self {
            Self::I16(v) => [u64::from(v), 0],
            Self::I32(v) => [u64::from(v), 0],
            Self::I64(v) => [v, 0],
            Self::F32(v) => [u64::from(v.to_bits()), 0],
            Self::F64(v) => [v.to_bits(), 0],
            Self::V128(v) => v,
        }
    }

    fn from_bits(ty: IrType, bits: [u64; 2]) -> Self {
        match ty {
            IrType::I16 => Self::I16(bits[0] as u16),
            IrType::I32 => Self::I32(bits[0] as u32),
            IrType::I64 => Self::I64(bits[0]),
            IrType::F32 => Self::F32(f32::from_bits(bits[0] as u32)),
            IrType::F64 => Self::F64(f64::from_bits(bits[0])),
            IrType::V128 => Self::V128(bits),
        }
    }

    fn is_nonzero(self) -> bool {
        self.bits() != [0, 0]
    }

    fn as_u64(self) -> u64 {
        self.bits()[0]
    }

    fn as_i32(self) -> i32 {
        self.bits()[0] as i32
    }

    fn as_f32(self) -> f32 {
        match self {
            Self::F32(v) => v,
            Self::V128([lo, _]) if lo >> 32 == 0 => f32::from_bits(lo as u32),
            other => panic!("expected a binary32 lane, found {other:?}"),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::F64(v) => v,
            Self::I64(bits) => f64::from_bits(bits),
            Self::V128([lo, _]) => f64::from_bits(lo),
            other => panic!("expected a binary64 lane, found {other:?}"),
        }
    }

    fn to_slot(self) -> TempSlot {
        let bits = match self {
            Self::F32(v) => SlotBits::F32(v),
            Self::F64(v) => SlotBits::F64(v),
            Self::V128(v) => SlotBits::V128(v),
            other => panic!("sampled a non-floating temp into a slot: {other:?}"),
        };
        TempSlot { bits }
    }
}

/// Where a block run ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockExit {
    /// Fell through the last statement.
    Fallthrough,
    /// A side exit fired toward the given guest address.
    Taken(InsnAddr),
}

/// The reference machine.
#[derive(Debug, Default)]
pub struct Machine {
    /// Guest thread executing the blocks.
    pub thread: ThreadId,
    temps: Vec<TempValue>,
    regs: HashMap<RegOffset, TempValue>,
    mem: HashMap<GuestAddr, TempValue>,
    symbols: HashMap<InsnAddr, String>,
    libraries: Vec<(InsnAddr, InsnAddr)>,
}

impl Machine {
    /// Creates an empty machine for thread 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a binary64 guest memory cell.
    pub fn set_f64(&mut self, addr: GuestAddr, value: f64) {
        self.mem.insert(addr, TempValue::F64(value));
    }

    /// Writes a binary32 guest memory cell.
    pub fn set_f32(&mut self, addr: GuestAddr, value: f32) {
        self.mem.insert(addr, TempValue::F32(value));
    }

    /// Reads back a binary64 guest memory cell.
    #[must_use]
    pub fn get_f64(&self, addr: GuestAddr) -> Option<f64> {
        self.read_f64(addr)
    }

    /// Registers a symbol for address descriptions.
    pub fn add_symbol(&mut self, addr: InsnAddr, name: &str) {
        self.symbols.insert(addr, name.into());
    }

    /// Marks an address range as library code.
    pub fn add_library_range(&mut self, start: InsnAddr, end: InsnAddr) {
        self.libraries.push((start, end));
    }

    /// The current value of a temp, for assertions in tests.
    #[must_use]
    pub fn temp(&self, t: Temp) -> TempValue {
        self.temps[t.index()]
    }

    fn mem_cell_bits(&self, addr: GuestAddr) -> [u64; 2] {
        self.mem.get(&addr).map_or([0, 0], |v| v.bits())
    }

    fn reg_value(&self, offset: RegOffset, ty: IrType) -> TempValue {
        self.regs
            .get(&offset)
            .copied()
            .unwrap_or(TempValue::zero(ty))
    }

    fn circular_offset(&self, base: RegOffset, n_elems: u32, ix: i32, bias: i32) -> RegOffset {
        let offset =
            i64::from(base) + (i64::from(ix) + i64::from(bias)).rem_euclid(i64::from(n_elems));
        offset as RegOffset
    }

    fn eval_expr(&self, block: &Block, e: &Expr) -> TempValue {
        match e {
            Expr::Const(c) => match c {
                IrConst::U1(b) => TempValue::I32(u32::from(*b)),
                IrConst::U32(v) => TempValue::I32(*v),
                IrConst::U64(v) => TempValue::I64(*v),
                IrConst::F64(v) => TempValue::F64(*v),
                IrConst::V128(mask) => {
                    let mut halves = [0_u64; 2];
                    for lane in 0..16_u32 {
                        if mask >> lane & 1 == 1 {
                            halves[(lane / 8) as usize] |= 0xFF << (lane % 8 * 8);
                        }
                    }
                    TempValue::V128(halves)
                }
            },
            Expr::RdTmp(t) => self.temps[t.index()],
            Expr::Load { ty, addr } => {
                let addr = self.eval_expr(block, addr).as_u64();
                TempValue::from_bits(*ty, self.mem_cell_bits(addr))
            }
            Expr::Get { offset, ty } => self.reg_value(*offset, *ty),
            Expr::GetI { descr, ix, bias } => {
                let ix = self.eval_expr(block, ix).as_i32();
                let offset = self.circular_offset(descr.base, descr.n_elems, ix, *bias);
                self.reg_value(offset, IrType::F64)
            }
            Expr::Unop { op, arg } => {
                let a = self.eval_expr(block, arg);
                self.eval_unop(*op, a)
            }
            Expr::Binop { op, arg1, arg2 } => {
                let a = self.eval_expr(block, arg1);
                let b = self.eval_expr(block, arg2);
                self.eval_binop(*op, a, b)
            }
            Expr::Triop { op, arg2, arg3, .. } => {
                let b = self.eval_expr(block, arg2);
                let c = self.eval_expr(block, arg3);
                self.eval_triop(*op, b, c)
            }
            Expr::Mux {
                cond,
                if_false,
                if_true,
            } => {
                if self.eval_expr(block, cond).is_nonzero() {
                    self.eval_expr(block, if_true)
                } else {
                    self.eval_expr(block, if_false)
                }
            }
        }
    }

    fn eval_unop(&self, op: IrOp, a: TempValue) -> TempValue {
        match op {
            IrOp::SqrtF32Lo => TempValue::F32(a.as_f32().sqrt()),
            IrOp::SqrtF64Lo => TempValue::F64(a.as_f64().sqrt()),
            IrOp::NegF32 => TempValue::F32(-a.as_f32()),
            IrOp::NegF64 => TempValue::F64(-a.as_f64()),
            IrOp::AbsF32 => TempValue::F32(a.as_f32().abs()),
            IrOp::AbsF64 => TempValue::F64(a.as_f64().abs()),
            IrOp::F32ToF64 => TempValue::F64(f64::from(a.as_f32())),
            IrOp::ReinterpI64AsF64 => TempValue::F64(f64::from_bits(a.as_u64())),
            IrOp::ReinterpF64AsI64 => TempValue::I64(a.as_f64().to_bits()),
            IrOp::U32ToV128 | IrOp::U64ToV128 => TempValue::V128([a.as_u64(), 0]),
            IrOp::V128To64 => TempValue::I64(a.bits()[0]),
            IrOp::V128HiTo64 => TempValue::I64(a.bits()[1]),
            IrOp::I64To32 => TempValue::I32(a.as_u64() as u32),
            IrOp::I64HiTo32 => TempValue::I32((a.as_u64() >> 32) as u32),
            IrOp::U32ToU64 => TempValue::I64(u64::from(a.as_u64() as u32)),
            _ => panic!("reference machine does not model unary {op:?}"),
        }
    }

    fn eval_binop(&self, op: IrOp, a: TempValue, b: TempValue) -> TempValue {
        match op {
            IrOp::AddF32Lo => TempValue::F32(a.as_f32() + b.as_f32()),
            IrOp::SubF32Lo => TempValue::F32(a.as_f32() - b.as_f32()),
            IrOp::MulF32Lo => TempValue::F32(a.as_f32() * b.as_f32()),
            IrOp::DivF32Lo => TempValue::F32(a.as_f32() / b.as_f32()),
            IrOp::MinF32Lo => TempValue::F32(a.as_f32().min(b.as_f32())),
            IrOp::MaxF32Lo => TempValue::F32(a.as_f32().max(b.as_f32())),
            IrOp::AddF64Lo => TempValue::F64(a.as_f64() + b.as_f64()),
            IrOp::SubF64Lo => TempValue::F64(a.as_f64() - b.as_f64()),
            IrOp::MulF64Lo => TempValue::F64(a.as_f64() * b.as_f64()),
            IrOp::DivF64Lo => TempValue::F64(a.as_f64() / b.as_f64()),
            IrOp::MinF64Lo => TempValue::F64(a.as_f64().min(b.as_f64())),
            IrOp::MaxF64Lo => TempValue::F64(a.as_f64().max(b.as_f64())),
            IrOp::CmpF64 => {
                let (x, y) = (a.as_f64(), b.as_f64());
                let enc = if x.is_nan() || y.is_nan() {
                    0x45
                } else if x < y {
                    0x01
                } else if x > y {
                    0x00
                } else {
                    0x40
                };
                TempValue::I32(enc)
            }
            IrOp::F64ToF32 => TempValue::F32(b.as_f64() as f32),
            IrOp::F64ToI16S => TempValue::I16(b.as_f64() as i16 as u16),
            IrOp::F64ToI32S => TempValue::I32(b.as_f64() as i32 as u32),
            IrOp::F64ToI32U => TempValue::I32(b.as_f64() as u32),
            IrOp::F64ToI64S => TempValue::I64(b.as_f64() as i64 as u64),
            IrOp::F64ToI64U => TempValue::I64(b.as_f64() as u64),
            IrOp::I64HLToV128 => TempValue::V128([b.as_u64(), a.as_u64()]),
            IrOp::I32HLToI64 => {
                TempValue::I64(u64::from(a.as_u64() as u32) << 32 | u64::from(b.as_u64() as u32))
            }
            IrOp::Add32 => TempValue::I32((a.as_u64() as u32).wrapping_add(b.as_u64() as u32)),
            IrOp::Add64 => TempValue::I64(a.as_u64().wrapping_add(b.as_u64())),
            IrOp::Xor64 => TempValue::I64(a.as_u64() ^ b.as_u64()),
            IrOp::SinF64 => TempValue::F64(b.as_f64().sin()),
            IrOp::CosF64 => TempValue::F64(b.as_f64().cos()),
            IrOp::TanF64 => TempValue::F64(b.as_f64().tan()),
            _ => panic!("reference machine does not model binary {op:?}"),
        }
    }

    fn eval_triop(&self, op: IrOp, b: TempValue, c: TempValue) -> TempValue {
        match op {
            IrOp::AddF64 => TempValue::F64(b.as_f64() + c.as_f64()),
            IrOp::SubF64 => TempValue::F64(b.as_f64() - c.as_f64()),
            IrOp::MulF64 => TempValue::F64(b.as_f64() * c.as_f64()),
            IrOp::DivF64 => TempValue::F64(b.as_f64() / c.as_f64()),
            _ => panic!("reference machine does not model ternary {op:?}"),
        }
    }

    fn exec_stmt(&mut self, block: &Block, stmt: &Stmt) -> Option<InsnAddr> {
        match stmt {
            Stmt::NoOp | Stmt::IMark { .. } | Stmt::AbiHint => None,
            Stmt::WrTmp { tmp, data } => {
                self.temps[tmp.index()] = self.eval_expr(block, data);
                None
            }
            Stmt::Store { addr, data } => {
                let addr = self.eval_expr(block, addr).as_u64();
                let value = self.eval_expr(block, data);
                self.mem.insert(addr, value);
                None
            }
            Stmt::Put { offset, data } => {
                let value = self.eval_expr(block, data);
                self.regs.insert(*offset, value);
                None
            }
            Stmt::PutI {
                descr,
                ix,
                bias,
                data,
            } => {
                let ix = self.eval_expr(block, ix).as_i32();
                let offset = self.circular_offset(descr.base, descr.n_elems, ix, *bias);
                let value = self.eval_expr(block, data);
                self.regs.insert(offset, value);
                None
            }
            Stmt::Exit { guard, dst } => self
                .eval_expr(block, guard)
                .is_nonzero()
                .then_some(*dst),
        }
    }

    // Samples one operand into its scratch slot; returns the constant mask
    // contribution.
    fn stage_operand(
        &self,
        ctx: &mut ToolContext,
        slot: usize,
        const_bit: u32,
        arg: &OperandRef,
    ) -> u32 {
        match arg {
            OperandRef::Tmp { val, .. } => {
                ctx.scratch.tmp[slot] = self.temps[val.index()].to_slot();
                0
            }
            OperandRef::Const(c) => {
                ctx.scratch.konst[slot] = *c;
                const_bit
            }
        }
    }

    fn sv_tmp(arg: &OperandRef) -> Temp {
        match arg {
            OperandRef::Tmp { sv, .. } => *sv,
            OperandRef::Const(_) => Temp(0),
        }
    }

    fn guest_result(&self, t: Temp, prec: FpPrec) -> GuestValue {
        match prec {
            FpPrec::Single => GuestValue::F32(self.temps[t.index()].as_f32()),
            FpPrec::Double => GuestValue::F64(self.temps[t.index()].as_f64()),
        }
    }

    fn resolve_ix(&self, ix: &IxRef) -> i32 {
        match ix {
            IxRef::Tmp(t) => self.temps[t.index()].as_i32(),
            IxRef::Const(v) => *v,
        }
    }

    fn fire_hook(&mut self, ctx: &mut ToolContext, block: &Block, hook: &Hook) {
        match hook {
            Hook::EnterBlock => ctx.blocks_executed += 1,
            Hook::UnOp {
                addr,
                op,
                wr_tmp,
                arg,
            } => {
                let mask = self.stage_operand(ctx, 0, 0x1, arg);
                ctx.scratch.un_op.op = *op;
                ctx.scratch.un_op.wr_tmp = *wr_tmp;
                ctx.scratch.un_op.arg = Self::sv_tmp(arg);
                ctx.scratch.un_op.org = self.guest_result(*wr_tmp, op.precision());
                eval::process_un_op(ctx, *addr, mask);
            }
            Hook::BinOp {
                addr,
                op,
                wr_tmp,
                arg1,
                arg2,
            } => {
                let mask = self.stage_operand(ctx, 0, 0x1, arg1)
                    | self.stage_operand(ctx, 1, 0x2, arg2);
                ctx.scratch.bin_op.op = *op;
                ctx.scratch.bin_op.wr_tmp = *wr_tmp;
                ctx.scratch.bin_op.arg1 = Self::sv_tmp(arg1);
                ctx.scratch.bin_op.arg2 = Self::sv_tmp(arg2);
                ctx.scratch.bin_op.org = self.guest_result(*wr_tmp, op.precision());
                eval::process_bin_op(ctx, *addr, mask);
            }
            Hook::TriOp {
                addr,
                op,
                wr_tmp,
                arg2,
                arg3,
            } => {
                let mask = self.stage_operand(ctx, 1, 0x2, arg2)
                    | self.stage_operand(ctx, 2, 0x4, arg3);
                ctx.scratch.tri_op.op = *op;
                ctx.scratch.tri_op.wr_tmp = *wr_tmp;
                ctx.scratch.tri_op.arg2 = Self::sv_tmp(arg2);
                ctx.scratch.tri_op.arg3 = Self::sv_tmp(arg3);
                ctx.scratch.tri_op.org = self.temps[wr_tmp.index()].as_f64();
                eval::process_tri_op(ctx, *addr, mask);
            }
            Hook::CmpF64 {
                addr,
                wr_tmp,
                arg1,
                arg2,
            } => {
                let mask = self.stage_operand(ctx, 0, 0x1, arg1)
                    | self.stage_operand(ctx, 1, 0x2, arg2);
                ctx.scratch.bin_op.op = IrOp::CmpF64;
                ctx.scratch.bin_op.wr_tmp = *wr_tmp;
                ctx.scratch.bin_op.arg1 = Self::sv_tmp(arg1);
                ctx.scratch.bin_op.arg2 = Self::sv_tmp(arg2);
                let result = eval::process_cmp_f64(ctx, *addr, mask);
                self.temps[wr_tmp.index()] = TempValue::I32(result.encoding());
            }
            Hook::CvtToInt {
                addr,
                op,
                kind,
                wr_tmp,
                arg2,
            } => {
                let mask = self.stage_operand(ctx, 1, 0x2, arg2);
                ctx.scratch.bin_op.op = *op;
                ctx.scratch.bin_op.wr_tmp = *wr_tmp;
                ctx.scratch.bin_op.arg2 = Self::sv_tmp(arg2);
                let bits = eval::process_cvt_to_int(ctx, *addr, mask, *kind);
                let ty = block.temp_types[wr_tmp.index()];
                self.temps[wr_tmp.index()] = TempValue::from_bits(ty, [bits, 0]);
            }
            Hook::Mux {
                wr_tmp,
                cond,
                expr0,
                expr_x,
            } => {
                ctx.scratch.mux.wr_tmp = *wr_tmp;
                ctx.scratch.mux.cond = self.temps[cond.index()].is_nonzero();
                ctx.scratch.mux.expr0 = *expr0;
                ctx.scratch.mux.expr_x = *expr_x;
                transfer::process_mux(ctx);
            }
            Hook::Load { tmp, addr } => {
                let addr = self.temps[addr.index()].as_u64();
                transfer::process_load(ctx, *tmp, addr);
            }
            Hook::Store {
                addr,
                data,
                val,
                is_float,
            } => {
                let addr = match addr {
                    AddrRef::Tmp(t) => self.temps[t.index()].as_u64(),
                    AddrRef::Const(a) => *a,
                };
                if let Some(val) = val {
                    ctx.scratch.store.org =
                        self.temps[val.index()].to_slot().as_guest_value(*is_float);
                }
                transfer::process_store(ctx, addr, *data);
            }
            Hook::Get { offset, tmp } => {
                transfer::process_get(ctx, self.thread, *offset, *tmp);
            }
            Hook::Put { offset, data } => {
                transfer::process_put(ctx, self.thread, *offset, *data);
            }
            Hook::GetI {
                base,
                n_elems,
                bias,
                ix,
                tmp,
            } => {
                ctx.scratch.circ.ix = self.resolve_ix(ix);
                ctx.scratch.circ.bias = *bias;
                transfer::process_get_i(ctx, self.thread, *base, *n_elems, *tmp);
            }
            Hook::PutI {
                base,
                n_elems,
                bias,
                ix,
                data,
            } => {
                ctx.scratch.circ.ix = self.resolve_ix(ix);
                ctx.scratch.circ.bias = *bias;
                transfer::process_put_i(ctx, self.thread, *base, *n_elems, *data);
            }
        }
    }

    /// Executes one instrumented superblock.
    pub fn run_block(
        &mut self,
        ctx: &mut ToolContext,
        block: &Block,
        instrumented: &InstrumentedBlock,
    ) -> BlockExit {
        self.temps = block.temp_types.iter().map(|ty| TempValue::zero(*ty)).collect();
        for step in &instrumented.steps {
            match step {
                Step::Exec(i) => {
                    if let Some(dst) = self.exec_stmt(block, &block.stmts[*i]) {
                        return BlockExit::Taken(dst);
                    }
                }
                Step::Call(hook) => self.fire_hook(ctx, block, hook),
            }
        }
        BlockExit::Fallthrough
    }

    /// Instruments and runs a block in one go, the way the host's
    /// translate-then-dispatch cycle would.
    pub fn run(&mut self, ctx: &mut ToolContext, block: &Block) -> BlockExit {
        let instrumented = crate::instrument::instrument_block(ctx, self, block);
        self.run_block(ctx, block, &instrumented)
    }
}

impl GuestHost for Machine {
    fn read_f32(&self, addr: GuestAddr) -> Option<f32> {
        self.mem
            .get(&addr)
            .map(|cell| f32::from_bits(cell.bits()[0] as u32))
    }

    fn read_f64(&self, addr: GuestAddr) -> Option<f64> {
        self.mem.get(&addr).map(|cell| f64::from_bits(cell.bits()[0]))
    }

    fn write_f32(&mut self, addr: GuestAddr, value: f32) {
        self.mem.insert(addr, TempValue::F32(value));
    }

    fn write_f64(&mut self, addr: GuestAddr, value: f64) {
        self.mem.insert(addr, TempValue::F64(value));
    }

    fn describe(&self, addr: InsnAddr) -> String {
        match self.symbols.get(&addr) {
            Some(name) => format!("{addr:#x}: {name}"),
            None => format!("{addr:#x}"),
        }
    }

    fn in_library(&self, addr: InsnAddr) -> bool {
        self.libraries
            .iter()
            .any(|(start, end)| (*start..*end).contains(&addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BlockBuilder;
    use crate::options::ToolOptions;

    #[test]
    fn native_execution_matches_ieee() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let x = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1000)));
        let y = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1008)));
        let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
        b.store(Expr::Const(IrConst::U64(0x1010)), Expr::tmp(s));
        let block = b.build();

        let mut ctx = ToolContext::new(ToolOptions::default());
        let mut machine = Machine::new();
        machine.set_f64(0x1000, 0.1);
        machine.set_f64(0x1008, 0.2);
        let exit = machine.run(&mut ctx, &block);
        assert_eq!(exit, BlockExit::Fallthrough);
        assert_eq!(machine.get_f64(0x1010), Some(0.1 + 0.2));
    }

    #[test]
    fn block_counter_advances_per_run() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        let block = b.build();

        let mut ctx = ToolContext::new(ToolOptions::default());
        let mut machine = Machine::new();
        machine.run(&mut ctx, &block);
        machine.run(&mut ctx, &block);
        assert_eq!(ctx.blocks_executed, 2);
    }

    #[test]
    fn side_exit_stops_the_block() {
        let mut b = BlockBuilder::new();
        b.imark(0x100);
        b.exit(Expr::Const(IrConst::U1(true)), 0x2000);
        b.store(Expr::Const(IrConst::U64(0x1010)), Expr::Const(IrConst::U64(7)));
        let block = b.build();

        let mut ctx = ToolContext::new(ToolOptions::default());
        let mut machine = Machine::new();
        let exit = machine.run(&mut ctx, &block);
        assert_eq!(exit, BlockExit::Taken(0x2000));
        assert_eq!(machine.mem.get(&0x1010), None);
    }
}
