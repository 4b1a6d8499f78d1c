// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! State-transfer handlers.
//!
//! These callbacks move shadow values between carriers when the guest moves
//! data: loads and stores, register reads and writes (flat and circular),
//! and conditional selects. Storing anything untracked over a carrier
//! deactivates its shadow; temp staleness is handled by block versioning
//! alone.

use crate::context::ToolContext;
use crate::ir::{GuestAddr, RegOffset, Temp, ThreadId};
use crate::store::MAX_REGISTERS;

/// Load `tmp <- mem[addr]`: copies an active memory shadow into the temp.
pub fn process_load(ctx: &mut ToolContext, tmp: Temp, addr: GuestAddr) {
    if !ctx.analyze {
        return;
    }
    let blk = ctx.blocks_executed;
    let sim = ctx.opts.simulate_original;
    ctx.store.copy_mem_to_temp(addr, tmp, blk, sim);
}

/// Store `mem[addr] <- tmp`: copies a present temp shadow into memory and
/// captures the stored guest value; an untracked store deactivates the
/// address's shadow instead. Tracked stores feed every active stage.
pub fn process_store(ctx: &mut ToolContext, addr: GuestAddr, data: Option<Temp>) {
    let blk = ctx.blocks_executed;
    let sim = ctx.opts.simulate_original;

    let mut wrote = false;
    if ctx.analyze {
        if let Some(tmp) = data {
            if ctx.store.copy_temp_to_mem(tmp, blk, addr, sim) {
                wrote = true;
                let org = ctx.scratch.store.org;
                if let Some(sv) = ctx.store.mem_mut(addr) {
                    sv.org = Some(org);
                }
                if ctx.diag.active_stages > 0 {
                    let (store, diag) = (&ctx.store, &mut ctx.diag);
                    if let Some(sv) = store.mem(addr) {
                        if sv.active {
                            diag.update_stages(addr, org, &sv.value);
                        }
                    }
                }
            }
        }
    }

    if !wrote {
        if let Some(current) = ctx.store.mem_mut(addr) {
            current.active = false;
        }
    }
}

/// Get `tmp <- reg[offset]`: copies an active register shadow into the temp.
pub fn process_get(ctx: &mut ToolContext, tid: ThreadId, offset: RegOffset, tmp: Temp) {
    if !ctx.analyze {
        return;
    }
    let blk = ctx.blocks_executed;
    let sim = ctx.opts.simulate_original;
    ctx.store.copy_reg_to_temp(tid, offset, tmp, blk, sim);
}

/// Put `reg[offset] <- tmp`: copies a present temp shadow into the register
/// slot; an untracked write deactivates the slot's shadow instead.
pub fn process_put(ctx: &mut ToolContext, tid: ThreadId, offset: RegOffset, data: Option<Temp>) {
    let blk = ctx.blocks_executed;
    let sim = ctx.opts.simulate_original;

    let mut wrote = false;
    if ctx.analyze {
        if let Some(tmp) = data {
            wrote = ctx.store.copy_temp_to_reg(tmp, blk, tid, offset, sim);
        }
    }

    if !wrote {
        if let Some(current) = ctx.store.reg_mut(tid, offset) {
            current.active = false;
        }
    }
}

/// Resolves a circular register access to a flat byte offset:
/// `base + (ix + bias) mod n_elems`, with the runtime index taken from the
/// circular-access scratch record.
fn circular_offset(ctx: &ToolContext, base: RegOffset, n_elems: u32) -> RegOffset {
    let ix = i64::from(ctx.scratch.circ.ix);
    let bias = i64::from(ctx.scratch.circ.bias);
    let offset = i64::from(base) + (ix + bias).rem_euclid(i64::from(n_elems));
    assert!(
        (0..i64::from(MAX_REGISTERS)).contains(&offset),
        "circular register offset {offset} out of range"
    );
    offset as RegOffset
}

/// GetI: circular-register read, resolved to a flat get.
pub fn process_get_i(ctx: &mut ToolContext, tid: ThreadId, base: RegOffset, n_elems: u32, tmp: Temp) {
    if !ctx.analyze {
        return;
    }
    let offset = circular_offset(ctx, base, n_elems);
    process_get(ctx, tid, offset, tmp);
}

/// PutI: circular-register write, resolved to a flat put.
pub fn process_put_i(
    ctx: &mut ToolContext,
    tid: ThreadId,
    base: RegOffset,
    n_elems: u32,
    data: Option<Temp>,
) {
    let offset = circular_offset(ctx, base, n_elems);
    process_put(ctx, tid, offset, data);
}

/// Mux: the result temp takes the shadow of whichever side the guest
/// condition selected; a constant or untracked selected side yields none.
pub fn process_mux(ctx: &mut ToolContext) {
    if !ctx.analyze {
        return;
    }
    let blk = ctx.blocks_executed;
    let sim = ctx.opts.simulate_original;
    let mux = ctx.scratch.mux;

    let selected = if mux.cond { mux.expr_x } else { mux.expr0 };
    let Some(src) = selected else {
        return;
    };
    ctx.store.copy_temp_to_temp(src, mux.wr_tmp, blk, sim);
}
