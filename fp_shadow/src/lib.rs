// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! `fp_shadow`: a shadow-value propagation engine for floating-point
//! accuracy debugging.
//!
//! A dynamic binary instrumentation host hands the engine translated guest
//! superblocks; the engine instruments them once ([`instrument`]) and then,
//! as the guest executes, maintains for every floating-point value a
//! parallel shadow in three precisions: a high-precision shadow (default 120
//! bits, MPFR-backed), a guest-precision "middle" value, and a
//! guest-precision simulated original with IEEE subnormal emulation.
//! Comparing the channels against the guest's own IEEE results detects and
//! localizes large relative errors, catastrophic cancellations,
//! precision-specific operations, and divergent control flow.
//!
//! The host framework itself is out of scope; [`machine::Machine`] is a
//! minimal reference stand-in used by the tests, benches and demos.
//!
//! ## Example
//!
//! ```
//! use fp_shadow::client::{self, ClientRequest};
//! use fp_shadow::context::ToolContext;
//! use fp_shadow::ir::{BlockBuilder, Expr, IrConst, IrOp, IrType};
//! use fp_shadow::machine::Machine;
//! use fp_shadow::options::ToolOptions;
//!
//! // double a = 1.0e8 + 1.0e-8; double b = a - 1.0e8;
//! let mut b = BlockBuilder::new();
//! b.imark(0x40_0000);
//! let big = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1000)));
//! let tiny = b.load(IrType::F64, Expr::Const(IrConst::U64(0x1008)));
//! let a = b.binop(IrOp::AddF64Lo, Expr::tmp(big), Expr::tmp(tiny));
//! b.imark(0x40_0004);
//! let diff = b.binop(IrOp::SubF64Lo, Expr::tmp(a), Expr::tmp(big));
//! b.store(Expr::Const(IrConst::U64(0x1010)), Expr::tmp(diff));
//! let block = b.build();
//!
//! let mut ctx = ToolContext::new(ToolOptions::default());
//! let mut machine = Machine::new();
//! machine.set_f64(0x1000, 1.0e8);
//! machine.set_f64(0x1008, 1.0e-8);
//! machine.run(&mut ctx, &block);
//!
//! // The guest's difference is pure rounding noise; the shadow knows the
//! // true value is 1.0e-8 and flags the large relative error.
//! assert_eq!(machine.get_f64(0x1010), Some((1.0e8 + 1.0e-8) - 1.0e8));
//! let reply = client::handle_request(
//!     &mut ctx,
//!     &mut machine,
//!     &ClientRequest::ErrorGreater {
//!         addr: 0x1010,
//!         bound: 1e-7,
//!     },
//! );
//! assert_eq!(reply, client::ClientReply::Word(1));
//! ```

#![warn(missing_docs)]

pub(crate) mod analysis;
pub mod client;
pub mod context;
pub mod diagnostics;
pub mod eval;
pub mod host;
pub mod instrument;
pub mod ir;
pub mod machine;
pub mod numeric;
pub mod options;
pub mod report;
pub mod scratch;
pub mod store;
pub mod transfer;
