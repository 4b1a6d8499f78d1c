// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Benchmarks for the `fp_shadow` engine live in `benches/`.
