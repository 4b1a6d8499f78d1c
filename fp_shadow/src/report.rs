// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Report sinks.
//!
//! At guest exit (and on demand through client requests) the engine writes
//! plain-text report files next to the guest executable: shadow-value dumps
//! ordered three ways, per-origin mean-error tables, stage reports, the PSO
//! log, and `.vcg` dependency-graph dumps. File names carry the smallest
//! positive integer suffix that does not collide with an existing file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use hashbrown::HashSet;
use rug::{Assign, Float};

use crate::context::ToolContext;
use crate::diagnostics::{Diagnostics, MAX_STAGES};
use crate::host::GuestHost;
use crate::ir::InsnAddr;
use crate::numeric;
use crate::store::ShadowValue;

/// Records per report file.
pub const MAX_ENTRIES_PER_FILE: usize = 10000;

/// Recursion depth cap of the graph walk.
pub const MAX_LEVEL_OF_GRAPH: u32 = 10;

/// Graph dumps per report file.
pub const MAX_DUMPED_GRAPHS: usize = 10;

/// Cancelled-bits threshold of the canceled-values report.
pub const CANCEL_LIMIT: i64 = 10;

/// Smallest non-colliding numbered sibling of `base` + `suffix`.
#[must_use]
pub fn numbered_path(base: &Path, suffix: &str) -> PathBuf {
    let mut n = 1_u32;
    loop {
        let candidate = PathBuf::from(format!("{}{}_{}", base.display(), suffix, n));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn write_header<W: Write>(w: &mut W, ctx: &ToolContext) -> io::Result<()> {
    writeln!(
        w,
        "lane semantics: scalar lane 0 only; multi-lane vector operations are not shadowed"
    )?;
    if !ctx.diag.unsupported.is_empty() {
        let mut ops: Vec<String> = ctx
            .diag
            .unsupported
            .iter()
            .map(|op| format!("{op:?}"))
            .collect();
        ops.sort();
        writeln!(w, "Unsupported operations detected: {}", ops.join(", "))?;
    }
    writeln!(w)
}

fn rel_error_of(ctx: &ToolContext, sv: &ShadowValue) -> Option<Float> {
    let org = sv.org?;
    let mut org_f = Float::new(ctx.opts.precision);
    org.assign_to(&mut org_f);
    let mut rel = Float::new(ctx.opts.precision);
    numeric::relative_error(&mut rel, &sv.value, &org_f);
    Some(rel)
}

fn svs_equal(a: &ShadowValue, b: &ShadowValue) -> bool {
    a.op_count == b.op_count
        && a.origin == b.origin
        && a.canceled == b.canceled
        && a.cancel_origin == b.cancel_origin
        && a.org == b.org
        && a.value == b.value
}

// Snapshot of all memory shadows, ordered by descending dependency depth
// then key, with adjacent duplicates collapsed.
fn memory_snapshot(ctx: &ToolContext) -> Vec<ShadowValue> {
    let mut values: Vec<ShadowValue> = ctx.store.memory_values().cloned().collect();
    values.sort_by(|a, b| b.op_count.cmp(&a.op_count).then(a.key.cmp(&b.key)));
    values.dedup_by(|a, b| svs_equal(a, b));
    values
}

fn write_shadow_value<W: Write, H: GuestHost>(
    w: &mut W,
    ctx: &ToolContext,
    host: &H,
    sv: &ShadowValue,
    num: usize,
) -> io::Result<()> {
    let Some(org) = sv.org else {
        return Ok(());
    };
    let type_name = if org.is_f32() { "float" } else { "double" };
    let mut org_f = Float::new(ctx.opts.precision);
    org.assign_to(&mut org_f);
    let mut rel = Float::new(ctx.opts.precision);
    numeric::relative_error(&mut rel, &sv.value, &org_f);
    let mut diff = Float::new(ctx.opts.precision);
    diff.assign(&sv.value - &org_f);

    writeln!(w, "{num}: {:#x} of type {type_name}", sv.key)?;
    writeln!(w, "    original:         {}", numeric::display_string(&org_f))?;
    writeln!(
        w,
        "    shadow value:     {}",
        numeric::display_string(&sv.value)
    )?;
    writeln!(w, "    absolute error:   {}", numeric::display_string(&diff))?;
    writeln!(w, "    relative error:   {}", numeric::display_string(&rel))?;
    writeln!(w, "    maximum number of canceled bits: {}", sv.canceled)?;
    if sv.canceled > 0 && sv.cancel_origin > 0 {
        writeln!(
            w,
            "    origin of maximum cancellation: {}",
            host.describe(sv.cancel_origin)
        )?;
    }
    writeln!(w, "    last operation: {}", host.describe(sv.origin))?;
    writeln!(w, "    operation count (max path): {}", sv.op_count)
}

fn write_footer<W: Write>(
    w: &mut W,
    ctx: &ToolContext,
    written: usize,
    skipped_library: usize,
    detail: &str,
) -> io::Result<()> {
    writeln!(
        w,
        "{written}{} shadow values are in this file",
        if written == MAX_ENTRIES_PER_FILE {
            " (maximum number written to file)"
        } else {
            ""
        }
    )?;
    if skipped_library > 0 {
        writeln!(w, "{skipped_library} are skipped because they are from a library")?;
    }
    writeln!(w, "{detail}")?;
    writeln!(
        w,
        "total number of floating-point operations: {}",
        ctx.stats.fp_ops
    )?;
    writeln!(w, "number of executed blocks: {}", ctx.blocks_executed)
}

fn skip_library<H: GuestHost>(ctx: &ToolContext, host: &H, origin: InsnAddr) -> bool {
    ctx.opts.ignore_libraries && host.in_library(origin)
}

fn write_memory_rel_error<H: GuestHost>(ctx: &mut ToolContext, host: &H) -> io::Result<()> {
    let path = numbered_path(&ctx.exe, "_shadow_values_relative_error");
    let mut w = BufWriter::new(File::create(&path)?);
    write_header(&mut w, ctx)?;

    let values = memory_snapshot(ctx);
    let mut with_error = 0_usize;
    let mut skipped_library = 0_usize;
    let mut written = 0_usize;
    let mut graphs = 0_usize;
    for (i, sv) in values.iter().enumerate() {
        let has_error = rel_error_of(ctx, sv).is_some_and(|rel| !rel.is_zero());
        if has_error {
            with_error += 1;
            if skip_library(ctx, host, sv.origin) {
                skipped_library += 1;
                continue;
            }
            if written < MAX_ENTRIES_PER_FILE {
                written += 1;
                write_shadow_value(&mut w, ctx, host, sv, i + 1)?;
                if graphs < MAX_DUMPED_GRAPHS {
                    let graph_path = PathBuf::from(format!(
                        "{}_{}_{}.vcg",
                        ctx.exe.display(),
                        graphs + 1,
                        i
                    ));
                    if dump_graph(ctx, host, &graph_path, sv.key, true, true)? {
                        writeln!(w, "    graph dumped: {}", graph_path.display())?;
                        graphs += 1;
                    }
                }
                writeln!(w)?;
            }
        } else if !ctx.opts.ignore_accurate && written < MAX_ENTRIES_PER_FILE {
            written += 1;
            write_shadow_value(&mut w, ctx, host, sv, i + 1)?;
            writeln!(w)?;
        }
    }

    let detail = format!(
        "{with_error} out of {} shadow values have an error\n{graphs} graph(s) have been dumped",
        values.len()
    );
    write_footer(&mut w, ctx, written, skipped_library, &detail)?;
    log::info!("shadow values written to {}", path.display());
    Ok(())
}

fn write_memory_canceled<H: GuestHost>(ctx: &ToolContext, host: &H) -> io::Result<()> {
    let path = numbered_path(&ctx.exe, "_shadow_values_canceled");
    let mut w = BufWriter::new(File::create(&path)?);
    write_header(&mut w, ctx)?;

    let values = memory_snapshot(ctx);
    let mut over_limit = 0_usize;
    let mut skipped_library = 0_usize;
    let mut written = 0_usize;
    for (i, sv) in values.iter().enumerate() {
        if sv.canceled > CANCEL_LIMIT {
            over_limit += 1;
            if skip_library(ctx, host, sv.origin) {
                skipped_library += 1;
                continue;
            }
            if written < MAX_ENTRIES_PER_FILE {
                written += 1;
                write_shadow_value(&mut w, ctx, host, sv, i + 1)?;
                writeln!(w)?;
            }
        } else if !ctx.opts.ignore_accurate && written < MAX_ENTRIES_PER_FILE {
            written += 1;
            write_shadow_value(&mut w, ctx, host, sv, i + 1)?;
            writeln!(w)?;
        }
    }

    let detail = format!(
        "{over_limit} out of {} shadow values have more than {CANCEL_LIMIT} canceled bits",
        values.len()
    );
    write_footer(&mut w, ctx, written, skipped_library, &detail)?;
    log::info!("canceled shadow values written to {}", path.display());
    Ok(())
}

fn write_memory_special<H: GuestHost>(ctx: &ToolContext, host: &H) -> io::Result<()> {
    let path = numbered_path(&ctx.exe, "_shadow_values_special");
    let mut w = BufWriter::new(File::create(&path)?);
    write_header(&mut w, ctx)?;

    let values = memory_snapshot(ctx);
    let mut specials = 0_usize;
    let mut skipped_library = 0_usize;
    let mut written = 0_usize;
    for (i, sv) in values.iter().enumerate() {
        let special = sv.org.is_some_and(|org| !org.as_f64().is_finite());
        if special {
            specials += 1;
            if skip_library(ctx, host, sv.origin) {
                skipped_library += 1;
                continue;
            }
            if written < MAX_ENTRIES_PER_FILE {
                written += 1;
                write_shadow_value(&mut w, ctx, host, sv, i + 1)?;
                writeln!(w)?;
            }
        } else if !ctx.opts.ignore_accurate && written < MAX_ENTRIES_PER_FILE {
            written += 1;
            write_shadow_value(&mut w, ctx, host, sv, i + 1)?;
            writeln!(w)?;
        }
    }

    let detail = format!(
        "{specials} out of {} shadow values are special (NaN, +Inf, or -Inf)",
        values.len()
    );
    write_footer(&mut w, ctx, written, skipped_library, &detail)?;
    log::info!("special shadow values written to {}", path.display());
    Ok(())
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum MeanOrder {
    Addr,
    Canceled,
    Introduced,
}

fn write_mean_values<H: GuestHost>(
    ctx: &ToolContext,
    host: &H,
    suffix: &str,
    order: MeanOrder,
) -> io::Result<()> {
    if !ctx.opts.mean_error {
        return Ok(());
    }
    let path = numbered_path(&ctx.exe, suffix);
    let mut w = BufWriter::new(File::create(&path)?);
    write_header(&mut w, ctx)?;

    let diag = &ctx.diag;
    let mut entries: Vec<(InsnAddr, &crate::diagnostics::MeanValue)> = diag
        .mean_values
        .iter()
        .map(|(addr, mv)| (*addr, mv))
        .collect();
    match order {
        MeanOrder::Addr => entries.sort_by_key(|(addr, _)| *addr),
        MeanOrder::Canceled => entries.sort_by(|(_, a), (_, b)| {
            b.badness_max
                .cmp(&a.badness_max)
                .then(b.canceled_max.cmp(&a.canceled_max))
        }),
        MeanOrder::Introduced => {
            entries.sort_by(|(ka, a), (kb, b)| {
                let ia = diag.introduced_error(a, *ka);
                let ib = diag.introduced_error(b, *kb);
                ib.partial_cmp(&ia).unwrap_or(std::cmp::Ordering::Equal)
            });
        }
    }

    let for_canceled = order == MeanOrder::Canceled;
    let mut written = 0_usize;
    let mut skipped = 0_usize;
    let mut skipped_library = 0_usize;
    for (addr, mv) in &entries {
        if ctx.opts.ignore_accurate && !for_canceled && mv.sum.is_zero() {
            skipped += 1;
            continue;
        }
        if ctx.opts.ignore_accurate && for_canceled && mv.canceled_max == 0 {
            skipped += 1;
            continue;
        }
        if skip_library(ctx, host, *addr) {
            skipped_library += 1;
            continue;
        }
        if written >= MAX_ENTRIES_PER_FILE {
            continue;
        }
        written += 1;

        let mut mean = Float::new(ctx.opts.precision);
        mean.assign(&mv.sum / mv.count);
        writeln!(w, "{} {:?} ({})", host.describe(*addr), mv.op, mv.count)?;
        writeln!(w, "    avg error: {}", numeric::display_string(&mean))?;
        writeln!(w, "    max error: {}", numeric::display_string(&mv.max))?;
        if mv.overflow {
            writeln!(w, "    canceled bits - max: {}, avg: overflow", mv.canceled_max)?;
        } else {
            writeln!(
                w,
                "    canceled bits - max: {}, avg: {}",
                mv.canceled_max,
                mv.canceled_sum / mv.count as i64
            )?;
        }
        if ctx.opts.bad_cancellations {
            let denom = mv.count * mv.badness_max.max(0) as u64;
            let avg = if denom == 0 {
                0.0
            } else {
                mv.badness_sum as f64 / denom as f64 * 100.0
            };
            writeln!(
                w,
                "    cancellation badness - max: {}, avg (sum/(count*max)): {avg:.2}%",
                mv.badness_max
            )?;
        }
        let introduced = diag.introduced_error(mv, *addr);
        if introduced > 0 {
            writeln!(
                w,
                "    introduced error (max path): {}",
                numeric::display_string(&introduced)
            )?;
        } else {
            writeln!(w, "    no error has been introduced (max path)")?;
        }
        writeln!(
            w,
            "    origin of the arguments (max path): {:#x}, {:#x}",
            mv.arg1, mv.arg2
        )?;
        writeln!(w)?;
    }

    writeln!(
        w,
        "{written}{} out of {} operations are listed in this file",
        if written == MAX_ENTRIES_PER_FILE {
            " (maximum number written to file)"
        } else {
            ""
        },
        entries.len()
    )?;
    if skipped > 0 {
        if for_canceled {
            writeln!(w, "{skipped} operations have been skipped because no bits were canceled")?;
        } else {
            writeln!(w, "{skipped} operations have been skipped because they are accurate")?;
        }
    }
    if skipped_library > 0 {
        writeln!(w, "{skipped_library} operations have been skipped because they are in a library")?;
    }
    log::info!("mean errors written to {}", path.display());
    Ok(())
}

fn write_stage_reports(ctx: &ToolContext) -> io::Result<()> {
    if !ctx.diag.has_stage_reports() {
        return Ok(());
    }
    let path = numbered_path(&ctx.exe, "_stage_reports");
    let mut w = BufWriter::new(File::create(&path)?);
    write_header(&mut w, ctx)?;

    let mut reports_written = 0_usize;
    let mut total_reports = 0_usize;
    let mut num_stages = 0_usize;
    'stages: for num in 0..MAX_STAGES {
        let Some(reports) = ctx.diag.stage_report(num) else {
            continue;
        };
        num_stages += 1;

        let mut entries: Vec<(u64, &crate::diagnostics::StageReport)> =
            reports.iter().map(|(addr, r)| (*addr, r)).collect();
        entries.sort_by(|(ka, a), (kb, b)| {
            b.count
                .cmp(&a.count)
                .then(b.iter_min.cmp(&a.iter_min))
                .then(b.iter_max.cmp(&a.iter_max))
                .then(b.origin.cmp(&a.origin))
                .then(ka.cmp(kb))
        });
        total_reports += entries.len();

        writeln!(w, "Stage {num}:")?;
        writeln!(w)?;
        let mut previous: Option<&crate::diagnostics::StageReport> = None;
        for (addr, report) in entries {
            if reports_written > MAX_ENTRIES_PER_FILE {
                break 'stages;
            }
            // Collapse duplicate records from neighbouring addresses.
            if previous.is_some_and(|p| {
                p.count == report.count
                    && p.iter_min == report.iter_min
                    && p.iter_max == report.iter_max
                    && p.origin == report.origin
            }) {
                total_reports -= 1;
                continue;
            }
            previous = Some(report);
            reports_written += 1;

            writeln!(w, "({num}) {addr:#x} ({})", report.count)?;
            writeln!(w, "    executions: [{}, {}]", report.iter_min, report.iter_max)?;
            writeln!(w, "    origin: {:#x}", report.origin)?;
            writeln!(w)?;
        }
        writeln!(w)?;
    }

    writeln!(
        w,
        "{reports_written} out of {total_reports} reports are listed in this file"
    )?;
    writeln!(
        w,
        "{num_stages} stage{} produced reports",
        if num_stages == 1 { "" } else { "s" }
    )?;
    log::info!("stage reports written to {}", path.display());
    Ok(())
}

/// Writes the detected-PSO log next to the guest executable.
pub fn dump_pso<H: GuestHost>(ctx: &ToolContext, host: &H) -> io::Result<()> {
    let path = numbered_path(&ctx.exe, "_pso.log");
    let mut w = BufWriter::new(File::create(&path)?);
    let mut origins: Vec<InsnAddr> = ctx.diag.detected_pso.keys().copied().collect();
    origins.sort_unstable();
    for origin in origins {
        writeln!(w, "{}", host.describe(origin))?;
    }
    log::info!("PSO log written to {}", path.display());
    Ok(())
}

// Maps an introduced-error magnitude to a graph color index: greener for
// small errors, redder for large ones.
fn error_color(introduced: &Float) -> i32 {
    if introduced.cmp0() != Some(std::cmp::Ordering::Greater) {
        return 150;
    }
    let exp = introduced.get_exp().unwrap_or(-8).clamp(-8, 1);
    149 - (9 + (exp - 1)) * 10
}

#[allow(clippy::too_many_arguments)]
fn write_origin_graph<W: Write, H: GuestHost>(
    diag: &mut Diagnostics,
    host: &H,
    ignore_libraries: bool,
    w: &mut W,
    old_addr: InsnAddr,
    origin: InsnAddr,
    level: u32,
    edge_color: i32,
    care_visited: bool,
    seen: &mut HashSet<InsnAddr>,
) -> io::Result<()> {
    if level > MAX_LEVEL_OF_GRAPH {
        if care_visited {
            if let Some(mv) = diag.mean_values.get_mut(&old_addr) {
                mv.visited = true;
            }
        }
        return Ok(());
    }

    if level <= 1 {
        writeln!(w, "graph: {{")?;
        writeln!(w, "title: \"Created with FpShadow\"")?;
        writeln!(w, "classname 1 : \"FpShadow\"")?;
        for i in 50..150 {
            writeln!(w, "colorentry {i} : 255 {} 0", (255 * (i - 50)) / 100)?;
        }
        for i in 150..250 {
            writeln!(w, "colorentry {i} : {} 255 0", (255 * (i - 150)) / 100)?;
        }
        seen.clear();
    }

    let Some(mv) = diag.mean_values.get_mut(&origin) else {
        // An origin without statistics is a leaf the walk cannot expand.
        writeln!(
            w,
            "node: {{ title: \"{origin:#x}\" label: \"{}\" color: 1 }}",
            host.describe(origin)
        )?;
        return Ok(());
    };
    if care_visited {
        mv.visited = true;
    }
    let (op, count, arg1, arg2) = (mv.op, mv.count, mv.arg1, mv.arg2);
    let mv_snapshot = mv.clone();

    let cycle = seen.contains(&origin);
    if !cycle {
        let introduced = diag.introduced_error(&mv_snapshot, origin);
        let color = if level > 1 { error_color(&introduced) } else { 1 };

        let mut mean = Float::new(mv_snapshot.sum.prec());
        mean.assign(&mv_snapshot.sum / count);
        let canceled_avg = if mv_snapshot.overflow {
            "overflow".into()
        } else {
            format!("{}", mv_snapshot.canceled_sum / count as i64)
        };
        writeln!(
            w,
            "node: {{ title: \"{origin:#x}\" label: \"{op:?}\" color: {color} \
             info1: \"{} ({count})\" info2: \"avg: {}, max: {}\" \
             info3: \"canceled - avg: {canceled_avg}, max: {}\" }}",
            host.describe(origin),
            numeric::short_string(&mean),
            numeric::short_string(&mv_snapshot.max),
            mv_snapshot.canceled_max
        )?;
    }

    if level > 1 {
        let introduced = diag.introduced_error(&mv_snapshot, origin);
        writeln!(
            w,
            "edge: {{ sourcename: \"{origin:#x}\" targetname: \"{old_addr:#x}\" \
             label: \"{}\" class: 1 color : {edge_color} }}",
            numeric::short_string(&introduced)
        )?;
    }

    if cycle {
        return Ok(());
    }
    seen.insert(origin);

    let skip = |addr: InsnAddr| ignore_libraries && host.in_library(addr);
    if arg1 != 0 && arg2 != 0 {
        let (e1, e2) = {
            let m1 = diag
                .mean_values
                .get(&arg1)
                .unwrap_or_else(|| panic!("no mean value for operand origin {arg1:#x}"));
            let m2 = diag
                .mean_values
                .get(&arg2)
                .unwrap_or_else(|| panic!("no mean value for operand origin {arg2:#x}"));
            (
                Float::with_val(m1.max.prec(), m1.max.abs_ref()),
                Float::with_val(m2.max.prec(), m2.max.abs_ref()),
            )
        };
        let left_greater = e1 >= e2;
        let mut gap = Float::new(e1.prec());
        gap.assign(&e1 - &e2);
        gap.abs_mut();
        let red = error_color(&gap).min(120);
        let green = red + 100;
        if !skip(arg1) {
            write_origin_graph(
                diag,
                host,
                ignore_libraries,
                w,
                origin,
                arg1,
                level + 1,
                if left_greater { red } else { green },
                care_visited,
                seen,
            )?;
        }
        if !skip(arg2) {
            write_origin_graph(
                diag,
                host,
                ignore_libraries,
                w,
                origin,
                arg2,
                level + 1,
                if left_greater { green } else { red },
                care_visited,
                seen,
            )?;
        }
    } else if arg1 != 0 {
        if !skip(arg1) {
            write_origin_graph(
                diag,
                host,
                ignore_libraries,
                w,
                origin,
                arg1,
                level + 1,
                1,
                care_visited,
                seen,
            )?;
        }
    } else if arg2 != 0 && !skip(arg2) {
        write_origin_graph(
            diag,
            host,
            ignore_libraries,
            w,
            origin,
            arg2,
            level + 1,
            1,
            care_visited,
            seen,
        )?;
    }
    Ok(())
}

/// Dumps the dependency graph rooted at the shadow value of `addr` to
/// `path` in VCG form. Returns whether a graph was written.
pub fn dump_graph<H: GuestHost>(
    ctx: &mut ToolContext,
    host: &H,
    path: &Path,
    addr: u64,
    conditional: bool,
    care_visited: bool,
) -> io::Result<bool> {
    let Some(sv) = ctx.store.mem(addr) else {
        log::info!("graph dump: no shadow value at {addr:#x}");
        return Ok(false);
    };
    let origin = sv.origin;

    if care_visited {
        if let Some(mv) = ctx.diag.mean_values.get(&origin) {
            if mv.visited {
                return Ok(false);
            }
        }
    }
    if ctx.opts.ignore_libraries && host.in_library(origin) {
        return Ok(false);
    }
    if let Some(rel) = rel_error_of(ctx, sv) {
        if conditional && rel.is_zero() {
            return Ok(false);
        }
    }

    let mut w = BufWriter::new(File::create(path)?);
    let mut seen = HashSet::new();
    let ignore_libraries = ctx.opts.ignore_libraries;
    write_origin_graph(
        &mut ctx.diag,
        host,
        ignore_libraries,
        &mut w,
        0,
        origin,
        1,
        1,
        care_visited,
        &mut seen,
    )?;
    writeln!(w, "}}")?;
    log::info!("graph dumped to {}", path.display());
    Ok(true)
}

/// Writes every report file at guest exit.
pub fn write_all_reports<H: GuestHost>(ctx: &mut ToolContext, host: &H) -> io::Result<()> {
    write_memory_rel_error(ctx, host)?;
    write_memory_canceled(ctx, host)?;
    write_memory_special(ctx, host)?;
    write_mean_values(ctx, host, "_mean_errors_addr", MeanOrder::Addr)?;
    if ctx.opts.bad_cancellations {
        write_mean_values(ctx, host, "_mean_errors_canceled", MeanOrder::Canceled)?;
    }
    write_mean_values(ctx, host, "_mean_errors_intro", MeanOrder::Introduced)?;
    write_stage_reports(ctx)?;
    Ok(())
}
