// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Runs a classic catastrophic cancellation through the engine and prints
//! the full diagnostics the client-request channel returns.

use fp_shadow::client::{self, ClientReply, ClientRequest};
use fp_shadow::context::ToolContext;
use fp_shadow::ir::{BlockBuilder, Expr, IrConst, IrOp, IrType};
use fp_shadow::machine::Machine;
use fp_shadow::options::ToolOptions;

fn main() {
    env_logger::init();

    // float a = 1.0e8f + 1.0e-8f; float b = a - 1.0e8f;
    let mut b = BlockBuilder::new();
    b.imark(0x40_0000);
    let big = b.load(IrType::F32, Expr::Const(IrConst::U64(0x1000)));
    let tiny = b.load(IrType::F32, Expr::Const(IrConst::U64(0x1004)));
    let a = b.binop(IrOp::AddF32Lo, Expr::tmp(big), Expr::tmp(tiny));
    b.store(Expr::Const(IrConst::U64(0x1008)), Expr::tmp(a));
    b.imark(0x40_0004);
    let diff = b.binop(IrOp::SubF32Lo, Expr::tmp(a), Expr::tmp(big));
    b.store(Expr::Const(IrConst::U64(0x100C)), Expr::tmp(diff));
    let block = b.build();

    let mut ctx = ToolContext::new(ToolOptions::default());
    let mut machine = Machine::new();
    machine.add_symbol(0x40_0004, "cancel.c:2 (compute_b)");
    machine.set_f32(0x1000, 1.0e8);
    machine.set_f32(0x1004, 1.0e-8);
    machine.run(&mut ctx, &block);

    let reply = client::handle_request(
        &mut ctx,
        &mut machine,
        &ClientRequest::PrintError {
            name: "b".into(),
            addr: 0x100C,
        },
    );
    if let ClientReply::Text(text) = reply {
        print!("{text}");
    }
}
