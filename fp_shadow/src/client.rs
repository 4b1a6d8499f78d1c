// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The client-request interface.
//!
//! Guest programs embed inline marker sequences the host decodes into
//! [`ClientRequest`] values: an in-process command channel for querying and
//! manipulating shadow state from inside the program under analysis. Each
//! command carries a stable tag under the `FD` tool namespace so the guest
//! side can be compiled independently of the engine.

use std::path::Path;

use rug::{Assign, Float};

use crate::context::ToolContext;
use crate::host::GuestHost;
use crate::ir::GuestAddr;
use crate::numeric;
use crate::report;
use crate::store::GuestValue;

/// Value-kind selector for [`ClientRequest::PrintValues`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    /// IEEE binary32.
    Float,
    /// IEEE binary64.
    Double,
}

/// A decoded client request.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientRequest {
    /// Print full diagnostics for the shadow value at an address.
    PrintError {
        /// Caller-supplied variable name.
        name: String,
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// As `PrintError`, but only when the relative error is nonzero.
    CondPrintError {
        /// Caller-supplied variable name.
        name: String,
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Dump the dependency graph of the shadow value at an address.
    DumpErrorGraph {
        /// Output file path.
        path: String,
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// As `DumpErrorGraph`, but only when the relative error is nonzero.
    CondDumpErrorGraph {
        /// Output file path.
        path: String,
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Open an iteration of a stage.
    BeginStage(u32),
    /// Close an iteration of a stage.
    EndStage(u32),
    /// Discard a stage's state.
    ClearStage(u32),
    /// Compare the relative error at an address against a bound.
    ErrorGreater {
        /// Guest address of the value.
        addr: GuestAddr,
        /// Error bound.
        bound: f64,
    },
    /// Deactivate every shadow value.
    Reset,
    /// Copy the shadow into the middle channel at guest precision.
    InsertShadow {
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Copy the middle channel into the shadow.
    SetShadow {
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Reseed the shadow from the guest's IEEE bytes.
    OriginalToShadow {
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Write the shadow back over the guest's IEEE bytes.
    ShadowToOriginal {
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Overwrite the guest's IEEE bytes with the bytes at `src`.
    SetOriginal {
        /// Guest address of the value.
        addr: GuestAddr,
        /// Guest address of the replacement bytes.
        src: GuestAddr,
    },
    /// Copy shadow and middle channels between two memory shadows.
    SetShadowBy {
        /// Destination guest address.
        dst: GuestAddr,
        /// Source guest address.
        src: GuestAddr,
    },
    /// Render the relative error at an address as text.
    GetRelativeError {
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Render the shadow value at an address as text.
    GetShadow {
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Print the paired original and shadow values.
    PrintValues {
        /// Caller-supplied variable name.
        name: String,
        /// Value width.
        kind: ValueKind,
        /// Guest address of the value.
        addr: GuestAddr,
    },
    /// Turn analysis on.
    Begin,
    /// Turn analysis off (unless `--ignore-end=yes`).
    End,
    /// Start a PSO detection run.
    PsoBeginRun,
    /// End a PSO detection run.
    PsoEndRun,
    /// Start a fresh guest instance for the PSO per-instance latch.
    PsoBeginInstance,
    /// Query whether PSO detection has converged.
    IsPsoFinished,
}

/// Stable request tags under the host's user-request mechanism.
pub mod tags {
    /// Tool namespace base: `('F' << 24) | ('D' << 16)`.
    pub const BASE: u32 = (b'F' as u32) << 24 | (b'D' as u32) << 16;

    /// `PRINT_ERROR(name, addr)`.
    pub const PRINT_ERROR: u32 = BASE;
    /// `COND_PRINT_ERROR(name, addr)`.
    pub const COND_PRINT_ERROR: u32 = BASE + 1;
    /// `DUMP_ERROR_GRAPH(file, addr)`.
    pub const DUMP_ERROR_GRAPH: u32 = BASE + 2;
    /// `COND_DUMP_ERROR_GRAPH(file, addr)`.
    pub const COND_DUMP_ERROR_GRAPH: u32 = BASE + 3;
    /// `BEGIN_STAGE(i)`.
    pub const BEGIN_STAGE: u32 = BASE + 4;
    /// `END_STAGE(i)`.
    pub const END_STAGE: u32 = BASE + 5;
    /// `CLEAR_STAGE(i)`.
    pub const CLEAR_STAGE: u32 = BASE + 6;
    /// `ERROR_GREATER(addr, &bound)`.
    pub const ERROR_GREATER: u32 = BASE + 7;
    /// `RESET()`.
    pub const RESET: u32 = BASE + 8;
    /// `INSERT_SHADOW(addr)`.
    pub const INSERT_SHADOW: u32 = BASE + 9;
    /// `SET_SHADOW(addr)`.
    pub const SET_SHADOW: u32 = BASE + 10;
    /// `ORIGINAL_TO_SHADOW(addr)`.
    pub const ORIGINAL_TO_SHADOW: u32 = BASE + 11;
    /// `SHADOW_TO_ORIGINAL(addr)`.
    pub const SHADOW_TO_ORIGINAL: u32 = BASE + 12;
    /// `SET_ORIGINAL(addr, src)`.
    pub const SET_ORIGINAL: u32 = BASE + 13;
    /// `SET_SHADOW_BY(dst, src)`.
    pub const SET_SHADOW_BY: u32 = BASE + 14;
    /// `GET_RELATIVE_ERROR(addr, buf)`.
    pub const GET_RELATIVE_ERROR: u32 = BASE + 15;
    /// `GET_SHADOW(addr, buf)`.
    pub const GET_SHADOW: u32 = BASE + 16;
    /// `PRINT_VALUES(name, type, addr)`.
    pub const PRINT_VALUES: u32 = BASE + 17;
    /// `BEGIN()`.
    pub const BEGIN: u32 = BASE + 18;
    /// `END()`.
    pub const END: u32 = BASE + 19;
    /// `PSO_BEGIN_RUN()`.
    pub const PSO_BEGIN_RUN: u32 = BASE + 20;
    /// `PSO_END_RUN()`.
    pub const PSO_END_RUN: u32 = BASE + 21;
    /// `PSO_BEGIN_INSTANCE()`.
    pub const PSO_BEGIN_INSTANCE: u32 = BASE + 22;
    /// `IS_PSO_FINISHED()`.
    pub const IS_PSO_FINISHED: u32 = BASE + 23;
}

impl ClientRequest {
    /// The request's wire tag.
    #[must_use]
    pub fn tag(&self) -> u32 {
        match self {
            Self::PrintError { .. } => tags::PRINT_ERROR,
            Self::CondPrintError { .. } => tags::COND_PRINT_ERROR,
            Self::DumpErrorGraph { .. } => tags::DUMP_ERROR_GRAPH,
            Self::CondDumpErrorGraph { .. } => tags::COND_DUMP_ERROR_GRAPH,
            Self::BeginStage(_) => tags::BEGIN_STAGE,
            Self::EndStage(_) => tags::END_STAGE,
            Self::ClearStage(_) => tags::CLEAR_STAGE,
            Self::ErrorGreater { .. } => tags::ERROR_GREATER,
            Self::Reset => tags::RESET,
            Self::InsertShadow { .. } => tags::INSERT_SHADOW,
            Self::SetShadow { .. } => tags::SET_SHADOW,
            Self::OriginalToShadow { .. } => tags::ORIGINAL_TO_SHADOW,
            Self::ShadowToOriginal { .. } => tags::SHADOW_TO_ORIGINAL,
            Self::SetOriginal { .. } => tags::SET_ORIGINAL,
            Self::SetShadowBy { .. } => tags::SET_SHADOW_BY,
            Self::GetRelativeError { .. } => tags::GET_RELATIVE_ERROR,
            Self::GetShadow { .. } => tags::GET_SHADOW,
            Self::PrintValues { .. } => tags::PRINT_VALUES,
            Self::Begin => tags::BEGIN,
            Self::End => tags::END,
            Self::PsoBeginRun => tags::PSO_BEGIN_RUN,
            Self::PsoEndRun => tags::PSO_END_RUN,
            Self::PsoBeginInstance => tags::PSO_BEGIN_INSTANCE,
            Self::IsPsoFinished => tags::IS_PSO_FINISHED,
        }
    }
}

/// The engine's answer to a client request.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientReply {
    /// No return value.
    None,
    /// A machine word.
    Word(u64),
    /// Text destined for a guest-supplied buffer or the log.
    Text(String),
}

// Relative error of a memory shadow against its captured guest result.
fn mem_rel_error(ctx: &ToolContext, addr: GuestAddr) -> Option<Float> {
    let sv = ctx.store.mem(addr)?;
    let org = sv.org?;
    let mut org_f = Float::new(ctx.opts.precision);
    org.assign_to(&mut org_f);
    let mut rel = Float::new(ctx.opts.precision);
    numeric::relative_error(&mut rel, &sv.value, &org_f);
    Some(rel)
}

fn format_error<H: GuestHost>(
    ctx: &ToolContext,
    host: &H,
    name: &str,
    addr: GuestAddr,
    conditional: bool,
) -> Option<String> {
    let Some(sv) = ctx.store.mem(addr) else {
        return Some(format!("no shadow value exists for {name}\n"));
    };
    let Some(org) = sv.org else {
        return Some(format!("no shadow value exists for {name}\n"));
    };
    let type_name = if org.is_f32() { "float" } else { "double" };

    let mut org_f = Float::new(ctx.opts.precision);
    org.assign_to(&mut org_f);
    let mut rel = Float::new(ctx.opts.precision);
    numeric::relative_error(&mut rel, &sv.value, &org_f);
    if conditional && rel.is_zero() {
        return None;
    }
    let mut diff = Float::new(ctx.opts.precision);
    diff.assign(&sv.value - &org_f);

    let mut out = String::new();
    out.push_str(&format!("({type_name}) {name} PRINT ERROR OF: {addr:#x}\n"));
    out.push_str(&format!(
        "({type_name}) {name} ORIGINAL:         {}\n",
        numeric::display_string(&org_f)
    ));
    out.push_str(&format!(
        "({type_name}) {name} SHADOW VALUE:     {}\n",
        numeric::display_string(&sv.value)
    ));
    out.push_str(&format!(
        "({type_name}) {name} MIDDLE:           {}\n",
        numeric::display_string(&sv.mid_value)
    ));
    out.push_str(&format!(
        "({type_name}) {name} SIMULATE:         {}\n",
        numeric::display_string(&sv.ori_value)
    ));
    out.push_str(&format!(
        "({type_name}) {name} ABSOLUTE ERROR:   {}\n",
        numeric::display_string(&diff)
    ));
    out.push_str(&format!(
        "({type_name}) {name} RELATIVE ERROR:   {}\n",
        numeric::display_string(&rel)
    ));
    out.push_str(&format!(
        "({type_name}) {name} CANCELED BITS:    {}\n",
        sv.canceled
    ));
    out.push_str(&format!(
        "({type_name}) {name} Last operation: {}\n",
        host.describe(sv.origin)
    ));
    if sv.canceled > 0 && sv.cancel_origin > 0 {
        out.push_str(&format!(
            "({type_name}) {name} Cancellation origin: {}\n",
            host.describe(sv.cancel_origin)
        ));
    }
    out.push_str(&format!(
        "({type_name}) {name} Operation count (max path): {}\n",
        sv.op_count
    ));
    Some(out)
}

/// Handles one client request.
pub fn handle_request<H: GuestHost>(
    ctx: &mut ToolContext,
    host: &mut H,
    request: &ClientRequest,
) -> ClientReply {
    match request {
        ClientRequest::PrintError { name, addr } => {
            match format_error(ctx, host, name, *addr, false) {
                Some(text) => ClientReply::Text(text),
                None => ClientReply::None,
            }
        }
        ClientRequest::CondPrintError { name, addr } => {
            match format_error(ctx, host, name, *addr, true) {
                Some(text) => ClientReply::Text(text),
                None => ClientReply::None,
            }
        }
        ClientRequest::DumpErrorGraph { path, addr } => {
            if let Err(err) = report::dump_graph(ctx, host, Path::new(path), *addr, false, false) {
                log::warn!("graph dump to {path} failed: {err}");
            }
            ClientReply::None
        }
        ClientRequest::CondDumpErrorGraph { path, addr } => {
            if let Err(err) = report::dump_graph(ctx, host, Path::new(path), *addr, true, false) {
                log::warn!("graph dump to {path} failed: {err}");
            }
            ClientReply::None
        }
        ClientRequest::BeginStage(num) => {
            ctx.diag.stage_start(*num as usize);
            ClientReply::None
        }
        ClientRequest::EndStage(num) => {
            let (diag, store) = (&mut ctx.diag, &ctx.store);
            diag.stage_end(*num as usize, store);
            ClientReply::None
        }
        ClientRequest::ClearStage(num) => {
            ctx.diag.stage_clear(*num as usize);
            ClientReply::None
        }
        ClientRequest::ErrorGreater { addr, bound } => {
            let greater = match mem_rel_error(ctx, *addr) {
                Some(rel) => rel >= *bound,
                None => {
                    log::info!("error bound query: no shadow value at {addr:#x}");
                    false
                }
            };
            ClientReply::Word(u64::from(greater))
        }
        ClientRequest::Reset => {
            ctx.store.reset_all();
            ClientReply::None
        }
        ClientRequest::InsertShadow { addr } => {
            if let Some(sv) = ctx.store.mem_mut(*addr) {
                let Some(org) = sv.org else {
                    panic!("shadow value without captured guest result");
                };
                sv.mid_value.set_prec(org.prec_bits());
                let value = sv.value.clone();
                sv.mid_value.assign(&value);
            }
            ClientReply::None
        }
        ClientRequest::SetShadow { addr } => {
            if let Some(sv) = ctx.store.mem_mut(*addr) {
                let mid = sv.mid_value.clone();
                sv.value.assign(&mid);
            }
            ClientReply::None
        }
        ClientRequest::OriginalToShadow { addr } => {
            if let Some(sv) = ctx.store.mem_mut(*addr) {
                let Some(org) = sv.org else {
                    panic!("shadow value without captured guest result");
                };
                let guest = if org.is_f32() {
                    host.read_f32(*addr).map(GuestValue::F32)
                } else {
                    host.read_f64(*addr).map(GuestValue::F64)
                };
                if let Some(guest) = guest {
                    guest.assign_to(&mut sv.value);
                    sv.mid_value.set_prec(guest.prec_bits());
                    guest.assign_to(&mut sv.mid_value);
                }
            }
            ClientReply::None
        }
        ClientRequest::ShadowToOriginal { addr } => {
            if let Some(sv) = ctx.store.mem(*addr) {
                let Some(org) = sv.org else {
                    panic!("shadow value without captured guest result");
                };
                if org.is_f32() {
                    host.write_f32(*addr, sv.value.to_f32());
                } else {
                    host.write_f64(*addr, sv.value.to_f64());
                }
            }
            ClientReply::None
        }
        ClientRequest::SetOriginal { addr, src } => {
            if let Some(sv) = ctx.store.mem_mut(*addr) {
                let Some(org) = sv.org else {
                    panic!("shadow value without captured guest result");
                };
                if org.is_f32() {
                    if let Some(value) = host.read_f32(*src) {
                        host.write_f32(*addr, value);
                        sv.mid_value.set_prec(24);
                        sv.mid_value.assign(value);
                    }
                } else if let Some(value) = host.read_f64(*src) {
                    host.write_f64(*addr, value);
                    sv.mid_value.set_prec(53);
                    sv.mid_value.assign(value);
                }
            }
            ClientReply::None
        }
        ClientRequest::SetShadowBy { dst, src } => {
            let src_channels = ctx
                .store
                .mem(*src)
                .map(|sv| (sv.value.clone(), sv.mid_value.clone()));
            if let (Some(sv), Some((value, mid))) = (ctx.store.mem_mut(*dst), src_channels) {
                sv.value.assign(&value);
                sv.mid_value.assign(&mid);
            }
            ClientReply::None
        }
        ClientRequest::GetRelativeError { addr } => match mem_rel_error(ctx, *addr) {
            Some(rel) => ClientReply::Text(numeric::exp_string(&rel)),
            None => ClientReply::Text("0.0e+0".into()),
        },
        ClientRequest::GetShadow { addr } => match ctx.store.mem(*addr) {
            Some(sv) => ClientReply::Text(numeric::exp_string(&sv.value)),
            None => ClientReply::Text("noshadow".into()),
        },
        ClientRequest::PrintValues { name, kind, addr } => {
            let type_name = match kind {
                ValueKind::Float => "float",
                ValueKind::Double => "double",
            };
            let original = match kind {
                ValueKind::Float => host.read_f32(*addr).map(|v| {
                    let f = Float::with_val(ctx.opts.precision, v);
                    numeric::exp_string(&f)
                }),
                ValueKind::Double => host.read_f64(*addr).map(|v| {
                    let f = Float::with_val(ctx.opts.precision, v);
                    numeric::exp_string(&f)
                }),
            };
            let shadow = match ctx.store.mem(*addr) {
                Some(sv) => numeric::exp_string(&sv.value),
                None => "noshadow".into(),
            };
            ClientReply::Text(format!(
                "({type_name}) {name} ORIGINAL VALUE: {}\n({type_name}) {name} SHADOW VALUE:   {shadow}\n",
                original.unwrap_or_else(|| "unreadable".into())
            ))
        }
        ClientRequest::Begin => {
            ctx.analyze = true;
            ClientReply::None
        }
        ClientRequest::End => {
            if !ctx.opts.ignore_end {
                ctx.analyze = false;
            }
            ClientReply::None
        }
        ClientRequest::PsoBeginRun => {
            ctx.diag.begin_run();
            ClientReply::None
        }
        ClientRequest::PsoEndRun => {
            if ctx.diag.end_run() {
                if let Err(err) = report::dump_pso(ctx, host) {
                    log::warn!("writing the PSO log failed: {err}");
                }
            }
            ClientReply::None
        }
        ClientRequest::PsoBeginInstance => {
            ctx.diag.begin_instance();
            ClientReply::None
        }
        ClientRequest::IsPsoFinished => {
            ClientReply::Word(u64::from(ctx.diag.is_pso_finished()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_dense_and_stable() {
        assert_eq!(tags::PRINT_ERROR, tags::BASE);
        assert_eq!(tags::IS_PSO_FINISHED, tags::BASE + 23);
        assert_eq!(ClientRequest::Reset.tag(), tags::RESET);
        assert_eq!(
            ClientRequest::ErrorGreater {
                addr: 0,
                bound: 0.0
            }
            .tag(),
            tags::ERROR_GREATER
        );
    }
}
