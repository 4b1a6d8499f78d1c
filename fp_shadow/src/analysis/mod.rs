// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-block dataflow analyses for the instrumenter.

pub(crate) mod importance;
pub(crate) mod substitute;
