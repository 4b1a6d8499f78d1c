// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The engine context.
//!
//! One [`ToolContext`] exists per process, created at host init and torn
//! down at fini. It owns every table the callbacks touch, so nothing in the
//! engine relies on ambient module state; the host threads the context
//! through instrumentation and every runtime callback.

use std::io;
use std::path::PathBuf;

use crate::diagnostics::Diagnostics;
use crate::host::GuestHost;
use crate::ir::GuestLayout;
use crate::options::ToolOptions;
use crate::report;
use crate::scratch::Scratch;
use crate::store::ShadowStore;

/// Run statistics, logged at fini.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Superblocks instrumented.
    pub sb_counter: u64,
    /// Statements seen by the instrumenter.
    pub total_ins: u64,
    /// FP operations evaluated.
    pub fp_ops: u64,
    /// High-water mark of temps per block.
    pub max_temps: u32,
    /// Register reads seen.
    pub get_count: u64,
    /// Register reads whose shadow tracking was elided.
    pub gets_ignored: u64,
    /// Register writes seen.
    pub put_count: u64,
    /// Register writes whose shadow tracking was elided.
    pub puts_ignored: u64,
    /// Loads seen.
    pub load_count: u64,
    /// Loads skipped (constant address).
    pub loads_ignored: u64,
    /// Stores seen.
    pub store_count: u64,
    /// Stores with untracked constant data.
    pub stores_ignored: u64,
}

/// Process-wide engine state.
#[derive(Debug)]
pub struct ToolContext {
    /// Tool options, fixed after init.
    pub opts: ToolOptions,
    /// Guest register layout facts.
    pub layout: GuestLayout,
    /// The shadow-value store.
    pub store: ShadowStore,
    /// Diagnostic accumulators.
    pub diag: Diagnostics,
    /// Per-op scratch records.
    pub scratch: Scratch,
    /// Run statistics.
    pub stats: Stats,
    /// Count of executed superblocks; the version stamp for temp shadows.
    pub blocks_executed: u64,
    /// Runtime analysis switch, toggled by the BEGIN/END client requests.
    pub analyze: bool,
    /// Guest executable path; report files are numbered siblings of it.
    pub exe: PathBuf,
}

impl ToolContext {
    /// Creates the context for one guest run.
    #[must_use]
    pub fn new(opts: ToolOptions) -> Self {
        let analyze = opts.analyze_all;
        let store = ShadowStore::new(opts.precision);
        let diag = Diagnostics::new(opts.precision, opts.detect_pso);
        Self {
            opts,
            layout: GuestLayout::default(),
            store,
            diag,
            scratch: Scratch::default(),
            stats: Stats::default(),
            blocks_executed: 0,
            analyze,
            exe: PathBuf::from("guest"),
        }
    }

    /// Tears the engine down at guest exit: writes the report files next to
    /// the guest executable, logs run statistics, and releases all shadow
    /// state.
    pub fn fini<H: GuestHost>(&mut self, host: &H) -> io::Result<()> {
        report::write_all_reports(self, host)?;

        log::debug!(
            "blocks: instrumented {}, executed {}, statements {}",
            self.stats.sb_counter,
            self.blocks_executed,
            self.stats.total_ins
        );
        log::debug!(
            "shadow values: allocated {}, freed {}, live {}",
            self.store.allocs,
            self.store.frees,
            self.store.live()
        );
        log::debug!("floating-point operations: {}", self.stats.fp_ops);
        log::debug!("max temps per block: {}", self.stats.max_temps);
        log::debug!(
            "get: {} ({} elided), put: {} ({} elided), load: {} ({} skipped), store: {} ({} untracked)",
            self.stats.get_count,
            self.stats.gets_ignored,
            self.stats.put_count,
            self.stats.puts_ignored,
            self.stats.load_count,
            self.stats.loads_ignored,
            self.stats.store_count,
            self.stats.stores_ignored
        );

        self.store.teardown();
        Ok(())
    }
}
