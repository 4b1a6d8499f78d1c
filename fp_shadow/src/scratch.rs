// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-operation scratch records.
//!
//! The instrumenter arranges for each hook site to fill exactly one of these
//! fixed-layout records immediately before its callback runs; the stores and
//! the callback form an indivisible sequence on the executing thread. The
//! records are the ABI between instrumented guest code and the evaluator:
//! they are written field by field, never as opaque blobs.

use rug::{Assign, Float};

use crate::ir::{IrConst, IrOp, Temp};
use crate::store::GuestValue;

/// Number of temp-value slots.
pub const TMP_SLOTS: usize = 4;

/// Number of constant slots.
pub const CONST_SLOTS: usize = 4;

/// Raw bits of a sampled guest temporary.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum SlotBits {
    /// A binary32 temp.
    F32(f32),
    /// A binary64 temp.
    F64(f64),
    /// A 128-bit vector temp as two 64-bit halves `[low, high]`.
    V128([u64; 2]),
}

impl Default for SlotBits {
    fn default() -> Self {
        Self::F64(0.0)
    }
}

/// A sampled guest temporary value.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TempSlot {
    /// The sampled bits.
    pub bits: SlotBits,
}

impl TempSlot {
    /// Reads the slot into `dst`.
    ///
    /// In simulate-original mode the destination precision follows the
    /// sampled type. Vector temps hold a scalar in lane 0: when bits 32..64
    /// are clear the lane is a binary32, otherwise the low half is a
    /// binary64. Full multi-lane vectors are not modeled.
    pub fn read(&self, dst: &mut Float, simulate_original: bool) {
        match self.bits {
            SlotBits::F32(v) => {
                if simulate_original {
                    dst.set_prec(24);
                }
                dst.assign(v);
            }
            SlotBits::F64(v) => {
                if simulate_original {
                    dst.set_prec(53);
                }
                dst.assign(v);
            }
            SlotBits::V128([lo, _hi]) => {
                if lo >> 32 == 0 {
                    if simulate_original {
                        dst.set_prec(24);
                    }
                    dst.assign(f32::from_bits(lo as u32));
                } else {
                    if simulate_original {
                        dst.set_prec(53);
                    }
                    dst.assign(f64::from_bits(lo));
                }
            }
        }
    }

    /// The slot value as the guest IEEE result of a store, using the
    /// same lane classification as [`TempSlot::read`].
    #[must_use]
    pub fn as_guest_value(&self, is_float: bool) -> GuestValue {
        match self.bits {
            SlotBits::F32(v) => GuestValue::F32(v),
            SlotBits::F64(v) => GuestValue::F64(v),
            SlotBits::V128([lo, _hi]) => {
                if is_float && lo >> 32 == 0 {
                    GuestValue::F32(f32::from_bits(lo as u32))
                } else {
                    GuestValue::F64(f64::from_bits(lo))
                }
            }
        }
    }
}

/// Reads a constant slot into `dst`.
///
/// Only binary64 constants and the restricted 128-bit bit-mask constants
/// appear as floating-point operands; anything else at a shadowed operand
/// position is a host contract violation.
pub fn read_const(c: IrConst, dst: &mut Float) {
    match c {
        IrConst::F64(v) => dst.assign(v),
        IrConst::V128(mask) => {
            let mut lo = 0_u64;
            for lane in 0..8 {
                if mask >> lane & 1 == 1 {
                    lo |= 0xFF << (lane * 8);
                }
            }
            dst.assign(f64::from_bits(lo));
        }
        _ => panic!("unhandled constant at a shadowed operand: {c:?}"),
    }
}

/// Arguments of a unary-op hook.
#[derive(Copy, Clone, Debug)]
pub struct UnOpArgs {
    /// The operation.
    pub op: IrOp,
    /// Result temp.
    pub wr_tmp: Temp,
    /// Operand temp (substituted).
    pub arg: Temp,
    /// The guest's own IEEE result.
    pub org: GuestValue,
}

/// Arguments of a binary-op (and CmpF64, and conversion) hook.
#[derive(Copy, Clone, Debug)]
pub struct BinOpArgs {
    /// The operation.
    pub op: IrOp,
    /// Result temp.
    pub wr_tmp: Temp,
    /// First operand temp (substituted).
    pub arg1: Temp,
    /// Second operand temp (substituted).
    pub arg2: Temp,
    /// The guest's own IEEE result.
    pub org: GuestValue,
}

/// Arguments of a ternary-op hook. The rounding-mode operand is not carried.
#[derive(Copy, Clone, Debug)]
pub struct TriOpArgs {
    /// The operation.
    pub op: IrOp,
    /// Result temp.
    pub wr_tmp: Temp,
    /// Second operand temp (substituted).
    pub arg2: Temp,
    /// Third operand temp (substituted).
    pub arg3: Temp,
    /// The guest's own IEEE result (rounded ternaries are binary64).
    pub org: f64,
}

/// Arguments of a store hook.
#[derive(Copy, Clone, Debug)]
pub struct StoreArgs {
    /// The stored guest value.
    pub org: GuestValue,
}

/// Arguments of a mux hook.
#[derive(Copy, Clone, Debug)]
pub struct MuxArgs {
    /// Result temp.
    pub wr_tmp: Temp,
    /// The guest condition value.
    pub cond: bool,
    /// Temp of the condition-zero side; `None` when it is a constant.
    pub expr0: Option<Temp>,
    /// Temp of the condition-nonzero side; `None` when it is a constant.
    pub expr_x: Option<Temp>,
}

/// Arguments of a circular register access.
#[derive(Copy, Clone, Debug, Default)]
pub struct CircRegArgs {
    /// The runtime index value.
    pub ix: i32,
    /// The constant bias.
    pub bias: i32,
}

/// All scratch state, owned by the context.
#[derive(Clone, Debug)]
pub struct Scratch {
    /// Unary-op record.
    pub un_op: UnOpArgs,
    /// Binary-op record.
    pub bin_op: BinOpArgs,
    /// Ternary-op record.
    pub tri_op: TriOpArgs,
    /// Store record.
    pub store: StoreArgs,
    /// Mux record.
    pub mux: MuxArgs,
    /// Circular register record.
    pub circ: CircRegArgs,
    /// Sampled operand temps.
    pub tmp: [TempSlot; TMP_SLOTS],
    /// Sampled operand constants.
    pub konst: [IrConst; CONST_SLOTS],
}

impl Default for Scratch {
    fn default() -> Self {
        Self {
            un_op: UnOpArgs {
                op: IrOp::NegF64,
                wr_tmp: Temp(0),
                arg: Temp(0),
                org: GuestValue::F64(0.0),
            },
            bin_op: BinOpArgs {
                op: IrOp::AddF64Lo,
                wr_tmp: Temp(0),
                arg1: Temp(0),
                arg2: Temp(0),
                org: GuestValue::F64(0.0),
            },
            tri_op: TriOpArgs {
                op: IrOp::AddF64,
                wr_tmp: Temp(0),
                arg2: Temp(0),
                arg3: Temp(0),
                org: 0.0,
            },
            store: StoreArgs {
                org: GuestValue::F64(0.0),
            },
            mux: MuxArgs {
                wr_tmp: Temp(0),
                cond: false,
                expr0: None,
                expr_x: None,
            },
            circ: CircRegArgs::default(),
            tmp: [TempSlot::default(); TMP_SLOTS],
            konst: [IrConst::F64(0.0); CONST_SLOTS],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v128_slot_classifies_by_upper_bits_of_low_half() {
        let mut x = Float::new(120);
        let f32_slot = TempSlot {
            bits: SlotBits::V128([f32::to_bits(1.5) as u64, 0]),
        };
        f32_slot.read(&mut x, false);
        assert_eq!(x, 1.5);

        let f64_slot = TempSlot {
            bits: SlotBits::V128([f64::to_bits(2.5), 0]),
        };
        f64_slot.read(&mut x, false);
        assert_eq!(x, 2.5);
    }

    #[test]
    fn sim_original_reads_at_slot_precision() {
        let mut x = Float::new(120);
        TempSlot {
            bits: SlotBits::F32(3.0),
        }
        .read(&mut x, true);
        assert_eq!(x.prec(), 24);
    }

    #[test]
    fn v128_mask_constant_expands_to_bytes() {
        let mut x = Float::new(120);
        read_const(IrConst::V128(0), &mut x);
        assert_eq!(x, 0);
        read_const(IrConst::V128(0x01), &mut x);
        assert_eq!(x, f64::from_bits(0xFF));
    }
}
