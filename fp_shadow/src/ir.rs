// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Guest IR data model.
//!
//! The host DBI framework hands the engine translated guest superblocks in a
//! flat, VEX-like form: a statement list over typed temporaries, where every
//! operand of an operation is either a temporary read or a constant. This
//! module defines that form plus the op classification tables the
//! instrumenter and evaluator share (floating-point shape, nominal precision,
//! pass-through set, known-unsupported set).

use core::fmt;

/// A guest instruction address (the origin of an operation).
pub type InsnAddr = u64;

/// A guest memory address.
pub type GuestAddr = u64;

/// A guest register byte offset into the guest state block.
pub type RegOffset = u32;

/// A guest thread id.
pub type ThreadId = u32;

/// An IR temporary, assigned at most once per superblock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Temp(pub u32);

impl Temp {
    /// Returns the temp as a slot index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// The type of a temporary or expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IrType {
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// IEEE binary32.
    F32,
    /// IEEE binary64.
    F64,
    /// 128-bit vector.
    V128,
}

/// An IR constant.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum IrConst {
    /// 1-bit value (guards).
    U1(bool),
    /// 32-bit integer.
    U32(u32),
    /// 64-bit integer.
    U64(u64),
    /// IEEE binary64.
    F64(f64),
    /// 128-bit restricted vector constant: one bit per byte lane, each set
    /// bit expanding to a 0xFF byte.
    V128(u16),
}

impl IrConst {
    /// Returns the type of the constant.
    #[must_use]
    pub fn ty(self) -> IrType {
        match self {
            Self::U1(_) | Self::U32(_) => IrType::I32,
            Self::U64(_) => IrType::I64,
            Self::F64(_) => IrType::F64,
            Self::V128(_) => IrType::V128,
        }
    }
}

/// Nominal floating-point precision of a classified operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FpPrec {
    /// IEEE binary32: 24 significand bits.
    Single,
    /// IEEE binary64: 53 significand bits.
    Double,
}

impl FpPrec {
    /// Significand width in bits, including the implicit bit.
    #[must_use]
    pub fn bits(self) -> u32 {
        match self {
            Self::Single => 24,
            Self::Double => 53,
        }
    }

    /// Stored mantissa width in bits.
    #[must_use]
    pub fn mantissa_bits(self) -> i64 {
        match self {
            Self::Single => 23,
            Self::Double => 52,
        }
    }
}

/// Target of a float-to-integer conversion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CvtKind {
    /// Signed 16-bit result.
    I16S,
    /// Signed 32-bit result.
    I32S,
    /// Unsigned 32-bit result.
    I32U,
    /// Signed 64-bit result.
    I64S,
    /// Unsigned 64-bit result.
    I64U,
}

/// An IR operation.
///
/// The variants are grouped by how the instrumenter treats them: shadowed
/// floating-point shapes, bit-shuffling pass-throughs that forward shadow
/// identity, floating-point operations the engine knows it does not shadow,
/// and plain integer operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IrOp {
    // Shadowed unary floating-point ops. The `Lo` forms are the scalar-SSE
    // lane-0 operations.
    /// Square root, lane 0, binary32.
    SqrtF32Lo,
    /// Square root, lane 0, binary64.
    SqrtF64Lo,
    /// Negate, binary32.
    NegF32,
    /// Negate, binary64.
    NegF64,
    /// Absolute value, binary32.
    AbsF32,
    /// Absolute value, binary64.
    AbsF64,

    // Shadowed binary floating-point ops (scalar-SSE lane 0).
    /// Add, lane 0, binary32.
    AddF32Lo,
    /// Subtract, lane 0, binary32.
    SubF32Lo,
    /// Multiply, lane 0, binary32.
    MulF32Lo,
    /// Divide, lane 0, binary32.
    DivF32Lo,
    /// Minimum, lane 0, binary32.
    MinF32Lo,
    /// Maximum, lane 0, binary32.
    MaxF32Lo,
    /// Add, lane 0, binary64.
    AddF64Lo,
    /// Subtract, lane 0, binary64.
    SubF64Lo,
    /// Multiply, lane 0, binary64.
    MulF64Lo,
    /// Divide, lane 0, binary64.
    DivF64Lo,
    /// Minimum, lane 0, binary64.
    MinF64Lo,
    /// Maximum, lane 0, binary64.
    MaxF64Lo,

    /// Three-way binary64 comparison producing an x87-style encoding.
    CmpF64,

    // Float-to-integer conversions, shadowed in track-int mode. The first
    // operand is the rounding mode and is ignored.
    /// binary64 to signed 16-bit integer.
    F64ToI16S,
    /// binary64 to signed 32-bit integer.
    F64ToI32S,
    /// binary64 to unsigned 32-bit integer.
    F64ToI32U,
    /// binary64 to signed 64-bit integer.
    F64ToI64S,
    /// binary64 to unsigned 64-bit integer.
    F64ToI64U,

    // Shadowed ternary ops: rounded binary64 arithmetic where the first
    // operand carries the rounding mode and is ignored.
    /// Rounded add, binary64.
    AddF64,
    /// Rounded subtract, binary64.
    SubF64,
    /// Rounded multiply, binary64.
    MulF64,
    /// Rounded divide, binary64.
    DivF64,

    // Pass-through ops: these never compute a floating-point result, they
    // only move or repackage bits, so shadow identity is forwarded across
    // them by the substitution chain.
    /// Widen binary32 to binary64 (exact).
    F32ToF64,
    /// Round binary64 to binary32 (binop; first operand is the rounding
    /// mode).
    F64ToF32,
    /// Reinterpret 64-bit integer bits as binary64.
    ReinterpI64AsF64,
    /// Reinterpret binary64 bits as a 64-bit integer.
    ReinterpF64AsI64,
    /// Zero-extend a 32-bit value into a 128-bit vector.
    U32ToV128,
    /// Zero-extend a 64-bit value into a 128-bit vector.
    U64ToV128,
    /// Low 64 bits of a 128-bit vector.
    V128To64,
    /// High 64 bits of a 128-bit vector.
    V128HiTo64,
    /// Low 32 bits of a 64-bit value.
    I64To32,
    /// High 32 bits of a 64-bit value.
    I64HiTo32,
    /// Zero-extend 32-bit to 64-bit.
    U32ToU64,
    /// Concatenate two 64-bit halves into a 128-bit vector (high, low).
    I64HLToV128,
    /// Concatenate two 32-bit halves into a 64-bit value (high, low).
    I32HLToI64,

    // Floating-point ops the engine knows about but does not shadow. These
    // are recorded once and reported at termination.
    /// Vector add, 4 x binary32.
    AddF32x4,
    /// Vector subtract, 4 x binary32.
    SubF32x4,
    /// Vector multiply, 4 x binary32.
    MulF32x4,
    /// Vector divide, 4 x binary32.
    DivF32x4,
    /// Vector minimum, 4 x binary32.
    MinF32x4,
    /// Vector maximum, 4 x binary32.
    MaxF32x4,
    /// Vector add, 2 x binary64.
    AddF64x2,
    /// Vector subtract, 2 x binary64.
    SubF64x2,
    /// Vector multiply, 2 x binary64.
    MulF64x2,
    /// Vector divide, 2 x binary64.
    DivF64x2,
    /// Vector square root, 4 x binary32.
    SqrtF32x4,
    /// Vector square root, 2 x binary64.
    SqrtF64x2,
    /// Reciprocal estimate, lane 0, binary32.
    RecipF32Lo,
    /// Reciprocal square-root estimate, lane 0, binary32.
    RSqrtF32Lo,
    /// Rounded add, binary32 (ternary).
    AddF32,
    /// Rounded subtract, binary32 (ternary).
    SubF32,
    /// Rounded multiply, binary32 (ternary).
    MulF32,
    /// Rounded divide, binary32 (ternary).
    DivF32,
    /// Fused multiply-add, binary64.
    MAddF64,
    /// Fused multiply-subtract, binary64.
    MSubF64,
    /// Sine, binary64 (binop; first operand is the rounding mode).
    SinF64,
    /// Cosine, binary64.
    CosF64,
    /// Tangent, binary64.
    TanF64,
    /// Arctangent, binary64.
    AtanF64,
    /// 2^x - 1, binary64.
    Exp2M1F64,
    /// y * log2(x), binary64.
    Yl2xF64,
    /// x * 2^trunc(y), binary64.
    ScaleF64,
    /// Round binary64 to binary32 at the current x87 rounding mode.
    RoundF64ToF32,

    // Plain integer ops, never shadowed.
    /// Wrapping 32-bit add.
    Add32,
    /// Wrapping 64-bit add.
    Add64,
    /// 64-bit bitwise exclusive or.
    Xor64,
}

impl IrOp {
    /// Nominal precision of a shadowed floating-point operation.
    ///
    /// Panics on operations outside the shadowed set; callers only classify
    /// operations the instrumenter has already matched.
    #[must_use]
    pub fn precision(self) -> FpPrec {
        match self {
            Self::SqrtF32Lo
            | Self::NegF32
            | Self::AbsF32
            | Self::AddF32Lo
            | Self::SubF32Lo
            | Self::MulF32Lo
            | Self::DivF32Lo
            | Self::MinF32Lo
            | Self::MaxF32Lo => FpPrec::Single,
            Self::SqrtF64Lo
            | Self::NegF64
            | Self::AbsF64
            | Self::AddF64Lo
            | Self::SubF64Lo
            | Self::MulF64Lo
            | Self::DivF64Lo
            | Self::MinF64Lo
            | Self::MaxF64Lo
            | Self::CmpF64
            | Self::F64ToI16S
            | Self::F64ToI32S
            | Self::F64ToI32U
            | Self::F64ToI64S
            | Self::F64ToI64U
            | Self::AddF64
            | Self::SubF64
            | Self::MulF64
            | Self::DivF64 => FpPrec::Double,
            _ => panic!("precision() on unclassified operation {self:?}"),
        }
    }

    /// Returns `true` for bit-shuffling ops that forward shadow identity.
    #[must_use]
    pub fn is_pass_through(self) -> bool {
        matches!(
            self,
            Self::F32ToF64
                | Self::F64ToF32
                | Self::ReinterpI64AsF64
                | Self::ReinterpF64AsI64
                | Self::U32ToV128
                | Self::U64ToV128
                | Self::V128To64
                | Self::V128HiTo64
                | Self::I64To32
                | Self::I64HiTo32
                | Self::U32ToU64
                | Self::I64HLToV128
                | Self::I32HLToI64
        )
    }

    /// Returns `true` for floating-point ops the engine does not shadow.
    #[must_use]
    pub fn is_unsupported_fp(self) -> bool {
        matches!(
            self,
            Self::AddF32x4
                | Self::SubF32x4
                | Self::MulF32x4
                | Self::DivF32x4
                | Self::MinF32x4
                | Self::MaxF32x4
                | Self::AddF64x2
                | Self::SubF64x2
                | Self::MulF64x2
                | Self::DivF64x2
                | Self::SqrtF32x4
                | Self::SqrtF64x2
                | Self::RecipF32Lo
                | Self::RSqrtF32Lo
                | Self::AddF32
                | Self::SubF32
                | Self::MulF32
                | Self::DivF32
                | Self::MAddF64
                | Self::MSubF64
                | Self::SinF64
                | Self::CosF64
                | Self::TanF64
                | Self::AtanF64
                | Self::Exp2M1F64
                | Self::Yl2xF64
                | Self::ScaleF64
                | Self::RoundF64ToF32
        )
    }

    /// Returns the conversion kind for float-to-integer ops.
    #[must_use]
    pub fn cvt_kind(self) -> Option<CvtKind> {
        match self {
            Self::F64ToI16S => Some(CvtKind::I16S),
            Self::F64ToI32S => Some(CvtKind::I32S),
            Self::F64ToI32U => Some(CvtKind::I32U),
            Self::F64ToI64S => Some(CvtKind::I64S),
            Self::F64ToI64U => Some(CvtKind::I64U),
            _ => None,
        }
    }
}

/// A guest register array with circular (rotating) addressing, e.g. the x87
/// register stack. An access resolves to `base + (ix + bias) mod n_elems`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegArray {
    /// Byte offset of the first element.
    pub base: RegOffset,
    /// Number of elements in the array.
    pub n_elems: u32,
}

/// An IR expression.
///
/// Blocks arrive flattened: operands of operations are always [`Expr::RdTmp`]
/// or [`Expr::Const`]; only statement-level positions (load addresses, array
/// indices) carry nested expressions, and those are also flat.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A constant.
    Const(IrConst),
    /// Read of a temporary.
    RdTmp(Temp),
    /// Memory load.
    Load {
        /// Result type.
        ty: IrType,
        /// Address expression (temp or constant).
        addr: Box<Expr>,
    },
    /// Guest register read.
    Get {
        /// Register byte offset.
        offset: RegOffset,
        /// Result type.
        ty: IrType,
    },
    /// Guest register read with circular addressing.
    GetI {
        /// Register array descriptor.
        descr: RegArray,
        /// Index expression (temp or constant).
        ix: Box<Expr>,
        /// Constant index bias.
        bias: i32,
    },
    /// Unary operation.
    Unop {
        /// Operation.
        op: IrOp,
        /// Operand.
        arg: Box<Expr>,
    },
    /// Binary operation.
    Binop {
        /// Operation.
        op: IrOp,
        /// First operand.
        arg1: Box<Expr>,
        /// Second operand.
        arg2: Box<Expr>,
    },
    /// Ternary operation.
    Triop {
        /// Operation.
        op: IrOp,
        /// First operand (rounding mode for the rounded arithmetic forms).
        arg1: Box<Expr>,
        /// Second operand.
        arg2: Box<Expr>,
        /// Third operand.
        arg3: Box<Expr>,
    },
    /// Conditional select: yields `if_false` when the condition is zero,
    /// `if_true` otherwise.
    Mux {
        /// Condition (a temp read).
        cond: Box<Expr>,
        /// Value when the condition is zero.
        if_false: Box<Expr>,
        /// Value when the condition is nonzero.
        if_true: Box<Expr>,
    },
}

impl Expr {
    /// Shorthand for a temp read.
    #[must_use]
    pub fn tmp(t: Temp) -> Self {
        Self::RdTmp(t)
    }

    /// Returns the temp if this is a temp read.
    #[must_use]
    pub fn as_tmp(&self) -> Option<Temp> {
        match self {
            Self::RdTmp(t) => Some(*t),
            _ => None,
        }
    }

    /// Returns the constant if this is a constant.
    #[must_use]
    pub fn as_const(&self) -> Option<IrConst> {
        match self {
            Self::Const(c) => Some(*c),
            _ => None,
        }
    }
}

/// An IR statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// No-op filler left by the host's IR optimizer.
    NoOp,
    /// Marks the start of a guest instruction.
    IMark {
        /// Guest address of the instruction.
        addr: InsnAddr,
        /// Encoded length in bytes.
        len: u32,
    },
    /// ABI hint from the host; carried through untouched.
    AbiHint,
    /// Write a temporary.
    WrTmp {
        /// Destination temp.
        tmp: Temp,
        /// Value expression.
        data: Expr,
    },
    /// Memory store.
    Store {
        /// Address expression (temp or constant).
        addr: Expr,
        /// Data expression (temp or constant).
        data: Expr,
    },
    /// Guest register write.
    Put {
        /// Register byte offset.
        offset: RegOffset,
        /// Data expression (temp or constant).
        data: Expr,
    },
    /// Guest register write with circular addressing.
    PutI {
        /// Register array descriptor.
        descr: RegArray,
        /// Index expression (temp or constant).
        ix: Expr,
        /// Constant index bias.
        bias: i32,
        /// Data expression (temp or constant).
        data: Expr,
    },
    /// Conditional block exit.
    Exit {
        /// Guard expression; the exit is taken when nonzero.
        guard: Expr,
        /// Guest target address.
        dst: InsnAddr,
    },
}

/// A translated guest superblock: a statement list plus the type environment
/// for its temporaries.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Block {
    /// Types of temps `t0..`.
    pub temp_types: Vec<IrType>,
    /// Statements in guest program order.
    pub stmts: Vec<Stmt>,
}

impl Block {
    /// Number of temporaries used by the block.
    #[must_use]
    pub fn n_temps(&self) -> usize {
        self.temp_types.len()
    }
}

/// Fixed facts about the guest register layout the instrumenter needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GuestLayout {
    /// Byte offset of the guest instruction pointer. Writes to it are
    /// control flow, not data, and are never shadowed.
    pub ip_offset: RegOffset,
}

impl Default for GuestLayout {
    fn default() -> Self {
        // The canonical 64-bit guest keeps its instruction pointer at byte
        // offset 168 of the state block.
        Self { ip_offset: 168 }
    }
}

/// Convenience builder for superblocks, mainly for tests, benches and demos.
///
/// Temps are allocated on demand; every produced block satisfies the flat
/// operand discipline the instrumenter expects.
#[derive(Clone, Debug, Default)]
pub struct BlockBuilder {
    temp_types: Vec<IrType>,
    stmts: Vec<Stmt>,
}

impl BlockBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh(&mut self, ty: IrType) -> Temp {
        let t = Temp(self.temp_types.len() as u32);
        self.temp_types.push(ty);
        t
    }

    /// Type of an already-allocated temp.
    #[must_use]
    pub fn ty_of(&self, t: Temp) -> IrType {
        self.temp_types[t.index()]
    }

    fn ty_of_expr(&self, e: &Expr) -> IrType {
        match e {
            Expr::Const(c) => c.ty(),
            Expr::RdTmp(t) => self.ty_of(*t),
            _ => panic!("operand expressions must be flat"),
        }
    }

    fn unop_ty(&self, op: IrOp, arg: &Expr) -> IrType {
        match op {
            IrOp::SqrtF32Lo | IrOp::SqrtF64Lo => self.ty_of_expr(arg),
            IrOp::NegF32 | IrOp::AbsF32 => IrType::F32,
            IrOp::NegF64 | IrOp::AbsF64 | IrOp::F32ToF64 | IrOp::ReinterpI64AsF64 => IrType::F64,
            IrOp::ReinterpF64AsI64
            | IrOp::V128To64
            | IrOp::V128HiTo64
            | IrOp::U32ToU64 => IrType::I64,
            IrOp::U32ToV128 | IrOp::U64ToV128 => IrType::V128,
            IrOp::I64To32 | IrOp::I64HiTo32 => IrType::I32,
            IrOp::SinF64 | IrOp::CosF64 | IrOp::TanF64 => IrType::F64,
            _ => panic!("unop_ty: {op:?} is not a unary operation"),
        }
    }

    fn binop_ty(&self, op: IrOp, arg1: &Expr, arg2: &Expr) -> IrType {
        match op {
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
            | IrOp::MaxF64Lo => self.ty_of_expr(arg1),
            IrOp::CmpF64 => IrType::I32,
            IrOp::F64ToF32 | IrOp::RoundF64ToF32 => IrType::F32,
            IrOp::F64ToI16S => IrType::I16,
            IrOp::F64ToI32S | IrOp::F64ToI32U => IrType::I32,
            IrOp::F64ToI64S | IrOp::F64ToI64U | IrOp::I32HLToI64 | IrOp::Add64 | IrOp::Xor64 => {
                IrType::I64
            }
            IrOp::Add32 => IrType::I32,
            IrOp::I64HLToV128 => IrType::V128,
            IrOp::SinF64 | IrOp::CosF64 | IrOp::TanF64 | IrOp::Exp2M1F64 => IrType::F64,
            _ => {
                let _ = arg2;
                panic!("binop_ty: {op:?} is not a binary operation")
            }
        }
    }

    /// Appends an instruction marker.
    pub fn imark(&mut self, addr: InsnAddr) {
        self.stmts.push(Stmt::IMark { addr, len: 4 });
    }

    /// Materializes a constant into a temp.
    pub fn konst(&mut self, c: IrConst) -> Temp {
        let t = self.fresh(c.ty());
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::Const(c),
        });
        t
    }

    /// Appends a memory load.
    pub fn load(&mut self, ty: IrType, addr: Expr) -> Temp {
        let t = self.fresh(ty);
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::Load {
                ty,
                addr: Box::new(addr),
            },
        });
        t
    }

    /// Appends a memory store.
    pub fn store(&mut self, addr: Expr, data: Expr) {
        self.stmts.push(Stmt::Store { addr, data });
    }

    /// Appends a guest register read.
    pub fn get(&mut self, ty: IrType, offset: RegOffset) -> Temp {
        let t = self.fresh(ty);
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::Get { offset, ty },
        });
        t
    }

    /// Appends a guest register write.
    pub fn put(&mut self, offset: RegOffset, data: Expr) {
        self.stmts.push(Stmt::Put { offset, data });
    }

    /// Appends a circular register read.
    pub fn get_i(&mut self, ty: IrType, descr: RegArray, ix: Expr, bias: i32) -> Temp {
        let t = self.fresh(ty);
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::GetI {
                descr,
                ix: Box::new(ix),
                bias,
            },
        });
        t
    }

    /// Appends a circular register write.
    pub fn put_i(&mut self, descr: RegArray, ix: Expr, bias: i32, data: Expr) {
        self.stmts.push(Stmt::PutI {
            descr,
            ix,
            bias,
            data,
        });
    }

    /// Appends a unary operation.
    pub fn unop(&mut self, op: IrOp, arg: Expr) -> Temp {
        let t = self.fresh(self.unop_ty(op, &arg));
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::Unop {
                op,
                arg: Box::new(arg),
            },
        });
        t
    }

    /// Appends a binary operation.
    pub fn binop(&mut self, op: IrOp, arg1: Expr, arg2: Expr) -> Temp {
        let t = self.fresh(self.binop_ty(op, &arg1, &arg2));
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::Binop {
                op,
                arg1: Box::new(arg1),
                arg2: Box::new(arg2),
            },
        });
        t
    }

    /// Appends a rounded ternary operation; `rm` is the rounding mode.
    pub fn triop(&mut self, op: IrOp, rm: Expr, arg2: Expr, arg3: Expr) -> Temp {
        let ty = match op {
            IrOp::AddF64 | IrOp::SubF64 | IrOp::MulF64 | IrOp::DivF64 => IrType::F64,
            IrOp::AddF32 | IrOp::SubF32 | IrOp::MulF32 | IrOp::DivF32 => IrType::F32,
            _ => panic!("triop: {op:?} is not a ternary operation"),
        };
        let t = self.fresh(ty);
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::Triop {
                op,
                arg1: Box::new(rm),
                arg2: Box::new(arg2),
                arg3: Box::new(arg3),
            },
        });
        t
    }

    /// Appends a conditional select.
    pub fn mux(&mut self, cond: Temp, if_false: Expr, if_true: Expr) -> Temp {
        let ty = self.ty_of_expr(&if_false);
        let t = self.fresh(ty);
        self.stmts.push(Stmt::WrTmp {
            tmp: t,
            data: Expr::Mux {
                cond: Box::new(Expr::RdTmp(cond)),
                if_false: Box::new(if_false),
                if_true: Box::new(if_true),
            },
        });
        t
    }

    /// Appends a conditional exit.
    pub fn exit(&mut self, guard: Expr, dst: InsnAddr) {
        self.stmts.push(Stmt::Exit { guard, dst });
    }

    /// Finishes the block.
    #[must_use]
    pub fn build(self) -> Block {
        Block {
            temp_types: self.temp_types,
            stmts: self.stmts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_ops_are_not_unsupported() {
        for op in [
            IrOp::F32ToF64,
            IrOp::F64ToF32,
            IrOp::ReinterpI64AsF64,
            IrOp::V128To64,
            IrOp::I64HLToV128,
        ] {
            assert!(op.is_pass_through());
            assert!(!op.is_unsupported_fp());
        }
    }

    #[test]
    fn precision_classification() {
        assert_eq!(IrOp::AddF32Lo.precision(), FpPrec::Single);
        assert_eq!(IrOp::AddF64Lo.precision(), FpPrec::Double);
        assert_eq!(IrOp::AddF64.precision(), FpPrec::Double);
        assert_eq!(IrOp::CmpF64.precision(), FpPrec::Double);
        assert_eq!(IrOp::F64ToI32S.precision(), FpPrec::Double);
    }

    #[test]
    fn builder_allocates_flat_blocks() {
        let mut b = BlockBuilder::new();
        b.imark(0x1000);
        let x = b.konst(IrConst::F64(1.5));
        let y = b.konst(IrConst::F64(2.5));
        let s = b.binop(IrOp::AddF64Lo, Expr::tmp(x), Expr::tmp(y));
        b.store(Expr::Const(IrConst::U64(0x8000)), Expr::tmp(s));
        let block = b.build();
        assert_eq!(block.n_temps(), 3);
        assert_eq!(block.temp_types[s.index()], IrType::F64);
    }
}
