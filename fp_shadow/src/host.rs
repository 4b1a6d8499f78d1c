// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Host services contract.
//!
//! The DBI framework owns the guest: its memory, its symbol tables, and the
//! mapping from instruction addresses to source locations. The engine only
//! needs a narrow slice of that, captured by [`GuestHost`]. Client requests
//! and report sinks are the only consumers; the hot evaluation path never
//! calls back into the host.

use crate::ir::{GuestAddr, InsnAddr};

/// Services the embedding host provides to the engine.
pub trait GuestHost {
    /// Reads an IEEE binary32 from guest memory.
    fn read_f32(&self, addr: GuestAddr) -> Option<f32>;

    /// Reads an IEEE binary64 from guest memory.
    fn read_f64(&self, addr: GuestAddr) -> Option<f64>;

    /// Writes an IEEE binary32 to guest memory.
    fn write_f32(&mut self, addr: GuestAddr, value: f32);

    /// Writes an IEEE binary64 to guest memory.
    fn write_f64(&mut self, addr: GuestAddr, value: f64);

    /// Human-readable description of a guest instruction address
    /// (symbol+offset, file:line when known).
    fn describe(&self, addr: InsnAddr) -> String;

    /// Whether the instruction address belongs to a shared library. Used by
    /// the `--ignore-libraries` filters.
    fn in_library(&self, _addr: InsnAddr) -> bool {
        false
    }
}
