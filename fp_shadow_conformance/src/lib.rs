// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance tests for the `fp_shadow` engine live in `tests/`.
