// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Diagnostic accumulators.
//!
//! Everything the engine learns while the guest runs lands here: per-origin
//! error statistics, stage-iteration divergence, detected precision-specific
//! operations, branch-divergence sites, and the set of floating-point
//! operations the engine saw but does not shadow.

use core::cmp::Ordering;

use hashbrown::{HashMap, HashSet};
use rug::{Assign, Float};

use crate::ir::{GuestAddr, InsnAddr, IrOp};
use crate::numeric;
use crate::store::{GuestValue, ShadowStore, ShadowValue};

/// Number of stage slots.
pub const MAX_STAGES: usize = 100;

const PSO_INFLATION_THRESHOLD: f64 = 1.0e6;
const PSO_OV_ZERO_BOUND: f64 = 1e-9;
const PSO_SV_ZERO_BOUND: f64 = 1e-15;
const PSO_PERCENTAGE_THRESHOLD: f64 = 0.7;
const PSO_FALSE_POSITIVE_PERCENTAGE: f64 = 0.1;

/// Per-origin error statistics.
#[derive(Clone, Debug)]
pub struct MeanValue {
    /// The operation evaluated at this origin.
    pub op: IrOp,
    /// Number of evaluations.
    pub count: u64,
    /// Running sum of relative error.
    pub sum: Float,
    /// Maximum relative error.
    pub max: Float,
    /// Running sum of cancelled bits (wraps; see `overflow`).
    pub canceled_sum: i64,
    /// Maximum cancelled bits in one evaluation.
    pub canceled_max: i64,
    /// Running sum of cancellation badness.
    pub badness_sum: u64,
    /// Maximum cancellation badness in one evaluation.
    pub badness_max: i64,
    /// Origin of the first operand on the maximum-error run.
    pub arg1: InsnAddr,
    /// Origin of the second operand on the maximum-error run.
    pub arg2: InsnAddr,
    /// Scratch flag for the graph walk.
    pub visited: bool,
    /// The cancelled-bits sum wrapped.
    pub overflow: bool,
}

/// One address's divergence record inside a stage.
#[derive(Clone, Debug)]
pub struct StageReport {
    /// Divergences observed.
    pub count: u32,
    /// Stage iteration of the first divergence.
    pub iter_min: u32,
    /// Stage iteration of the latest divergence.
    pub iter_max: u32,
    /// Producing origin of the address's shadow value, when known.
    pub origin: InsnAddr,
}

/// Per-address sample inside one stage iteration.
#[derive(Clone, Debug)]
struct StageValue {
    rel_error: Float,
}

#[derive(Clone, Debug)]
struct Stage {
    active: bool,
    count: u32,
    old_vals: Option<HashMap<GuestAddr, StageValue>>,
    new_vals: Option<HashMap<GuestAddr, StageValue>>,
    limits: HashMap<GuestAddr, Float>,
}

/// Inflation counters for one origin during a PSO detection run.
#[derive(Copy, Clone, Debug, Default)]
pub struct ErrorCount {
    /// Evaluations whose inflation crossed the threshold.
    pub err_cnt: u32,
    /// Of those, evaluations on effectively-zero values.
    pub ov_cnt: u32,
    /// All evaluations.
    pub total_cnt: u32,
}

/// A detected precision-specific operation.
#[derive(Copy, Clone, Debug)]
pub struct PsOperation {
    /// The errors at this origin mostly occur on effectively-zero values.
    pub false_positive: bool,
}

/// All diagnostic state, owned by the context.
#[derive(Debug)]
pub struct Diagnostics {
    prec: u32,
    detect_pso: bool,
    /// Per-origin statistics keyed by guest instruction address.
    pub mean_values: HashMap<InsnAddr, MeanValue>,
    stages: Vec<Option<Stage>>,
    stage_reports: Vec<Option<HashMap<GuestAddr, StageReport>>>,
    /// Number of stages currently inside a begin/end bracket.
    pub active_stages: u32,
    error_map: Option<HashMap<InsnAddr, ErrorCount>>,
    /// Origins confirmed as precision-specific operations.
    pub detected_pso: HashMap<InsnAddr, PsOperation>,
    find_first_pso: bool,
    /// No new candidates were found in the last detection run.
    pub finish_pso: bool,
    /// FP operations seen but not shadowed.
    pub unsupported: HashSet<IrOp>,
    divergence_sites: HashMap<InsnAddr, u64>,
}

impl Diagnostics {
    /// Creates empty accumulators. `prec` sizes the working floats,
    /// `detect_pso` gates the detector.
    #[must_use]
    pub fn new(prec: u32, detect_pso: bool) -> Self {
        let mut stages = Vec::with_capacity(MAX_STAGES);
        stages.resize_with(MAX_STAGES, || None);
        let mut stage_reports = Vec::with_capacity(MAX_STAGES);
        stage_reports.resize_with(MAX_STAGES, || None);
        Self {
            prec,
            detect_pso,
            mean_values: HashMap::new(),
            stages,
            stage_reports,
            active_stages: 0,
            error_map: None,
            detected_pso: HashMap::new(),
            find_first_pso: false,
            finish_pso: false,
            unsupported: HashSet::new(),
            divergence_sites: HashMap::new(),
        }
    }

    /// Folds one evaluation into the origin's statistics.
    #[allow(clippy::too_many_arguments)]
    pub fn update_mean_value(
        &mut self,
        key: InsnAddr,
        op: IrOp,
        shadow: &Float,
        org: GuestValue,
        canceled: i64,
        arg1: InsnAddr,
        arg2: InsnAddr,
        badness: i64,
    ) {
        let mut org_f = Float::new(self.prec);
        org.assign_to(&mut org_f);
        let mut rel = Float::new(self.prec);
        numeric::relative_error(&mut rel, shadow, &org_f);

        match self.mean_values.get_mut(&key) {
            None => {
                self.mean_values.insert(
                    key,
                    MeanValue {
                        op,
                        count: 1,
                        sum: rel.clone(),
                        max: rel,
                        canceled_sum: canceled,
                        canceled_max: canceled,
                        badness_sum: badness as u64,
                        badness_max: badness,
                        arg1,
                        arg2,
                        visited: false,
                        overflow: false,
                    },
                );
            }
            Some(mv) => {
                mv.count += 1;
                mv.sum += &rel;

                let old_sum = mv.canceled_sum;
                mv.canceled_sum = mv.canceled_sum.wrapping_add(canceled);
                if old_sum > mv.canceled_sum {
                    mv.overflow = true;
                }

                mv.badness_sum += badness as u64;

                if rel > mv.max {
                    mv.max.assign(&rel);
                    mv.arg1 = arg1;
                    mv.arg2 = arg2;
                }
                if canceled > mv.canceled_max {
                    mv.canceled_max = canceled;
                }
                if badness > mv.badness_max {
                    mv.badness_max = badness;
                }
            }
        }
    }

    /// Residual error this origin adds beyond its operands' maxima (§4.5).
    ///
    /// The parent entries are structurally required: a recorded operand
    /// origin without a mean value is a broken invariant and aborts.
    #[must_use]
    pub fn introduced_error(&self, mv: &MeanValue, key: InsnAddr) -> Float {
        let max_err = Float::with_val(self.prec, mv.max.abs_ref());
        let parent = |addr: InsnAddr| -> Float {
            let p = self
                .mean_values
                .get(&addr)
                .unwrap_or_else(|| panic!("no mean value for operand origin {addr:#x}"));
            Float::with_val(self.prec, p.max.abs_ref())
        };

        if mv.arg1 != 0 && mv.arg2 != 0 {
            if mv.arg1 == key && mv.arg2 == key {
                return max_err;
            }
            let err1 = parent(mv.arg1);
            let err2 = parent(mv.arg2);
            if err1 > err2 {
                if max_err > err1 || max_err > err2 {
                    if mv.arg1 == key {
                        max_err
                    } else {
                        max_err - err1
                    }
                } else {
                    max_err - err2
                }
            } else if max_err > err2 || max_err > err1 {
                if mv.arg2 == key {
                    max_err
                } else {
                    max_err - err2
                }
            } else {
                max_err - err1
            }
        } else if mv.arg1 != 0 {
            if mv.arg1 == key {
                max_err
            } else {
                max_err - parent(mv.arg1)
            }
        } else if mv.arg2 != 0 {
            if mv.arg2 == key {
                max_err
            } else {
                max_err - parent(mv.arg2)
            }
        } else {
            max_err
        }
    }

    // ---- stages ----

    /// Opens an iteration of stage `num`.
    pub fn stage_start(&mut self, num: usize) {
        assert!(num < MAX_STAGES, "stage {num} out of range");
        if let Some(stage) = &mut self.stages[num] {
            assert!(!stage.active, "stage {num} started twice");
            stage.active = true;
            stage.count += 1;
        } else {
            self.stages[num] = Some(Stage {
                active: true,
                count: 1,
                old_vals: None,
                new_vals: None,
                limits: HashMap::new(),
            });
        }
        if let Some(stage) = &mut self.stages[num] {
            stage.new_vals = Some(HashMap::new());
        }
        self.active_stages += 1;
    }

    /// Closes an iteration of stage `num`, pairing this iteration's values
    /// with the previous one's and reporting divergences that exceed the
    /// running per-address limit.
    pub fn stage_end(&mut self, num: usize, store: &ShadowStore) {
        assert!(num < MAX_STAGES, "stage {num} out of range");
        let Some(stage) = &mut self.stages[num] else {
            panic!("stage {num} ended but never started");
        };
        assert!(stage.active, "stage {num} ended while inactive");

        let iteration = stage.count;
        if let (Some(new_vals), Some(old_vals)) = (&stage.new_vals, &stage.old_vals) {
            let mut diff = Float::new(self.prec);
            for (addr, new_val) in new_vals {
                let Some(mate) = old_vals.get(addr) else {
                    log::debug!("stage {num}: no mate for {addr:#x}");
                    continue;
                };

                diff.assign(&mate.rel_error - &new_val.rel_error);
                diff.abs_mut();

                let exceeds = match stage.limits.get(addr) {
                    Some(limit) => diff > *limit,
                    None => !diff.is_zero(),
                };
                if exceeds {
                    stage.limits.insert(*addr, diff.clone());

                    let reports =
                        self.stage_reports[num].get_or_insert_with(HashMap::new);
                    match reports.get_mut(addr) {
                        Some(report) => {
                            report.count += 1;
                            report.iter_max = iteration;
                        }
                        None => {
                            let origin =
                                store.mem(*addr).map_or(0, |sv| sv.origin);
                            reports.insert(
                                *addr,
                                StageReport {
                                    count: 1,
                                    iter_min: iteration,
                                    iter_max: iteration,
                                    origin,
                                },
                            );
                        }
                    }
                }
            }
        }

        stage.active = false;
        stage.old_vals = stage.new_vals.take();
        self.active_stages -= 1;
    }

    /// Discards all state of stage `num`.
    pub fn stage_clear(&mut self, num: usize) {
        assert!(num < MAX_STAGES, "stage {num} out of range");
        self.stages[num] = None;
    }

    /// Folds a tracked store into every active stage's current iteration,
    /// keeping the largest relative error per address.
    pub fn update_stages(&mut self, addr: GuestAddr, org: GuestValue, shadow: &Float) {
        let mut org_f = Float::new(self.prec);
        org.assign_to(&mut org_f);
        let mut rel = Float::new(self.prec);
        numeric::relative_error(&mut rel, shadow, &org_f);

        for stage in self.stages.iter_mut().flatten() {
            if !stage.active {
                continue;
            }
            let Some(new_vals) = &mut stage.new_vals else {
                continue;
            };
            match new_vals.get_mut(&addr) {
                Some(entry) => {
                    if rel.cmp_abs(&entry.rel_error) == Some(Ordering::Greater) {
                        entry.rel_error.assign(&rel);
                    }
                }
                None => {
                    new_vals.insert(
                        addr,
                        StageValue {
                            rel_error: rel.clone(),
                        },
                    );
                }
            }
        }
    }

    /// The reports accumulated for stage `num`, if any.
    #[must_use]
    pub fn stage_report(&self, num: usize) -> Option<&HashMap<GuestAddr, StageReport>> {
        self.stage_reports.get(num)?.as_ref()
    }

    /// Whether any stage produced reports.
    #[must_use]
    pub fn has_stage_reports(&self) -> bool {
        self.stage_reports.iter().any(Option::is_some)
    }

    // ---- precision-specific operations ----

    /// Relative error of an operand against its captured guest result. Reads
    /// as zero outside an active detection run.
    pub fn operand_rel_error(&self, sv: Option<&ShadowValue>, rel: &mut Float) {
        if !self.detect_pso || self.finish_pso {
            rel.assign(0);
            return;
        }
        match sv {
            Some(sv) => self.rel_vs_org(sv, rel),
            None => rel.assign(0),
        }
    }

    fn rel_vs_org(&self, sv: &ShadowValue, rel: &mut Float) {
        let Some(org) = sv.org else {
            panic!("shadow value without captured guest result");
        };
        let mut org_f = Float::new(self.prec);
        org.assign_to(&mut org_f);
        numeric::relative_error(rel, &sv.value, &org_f);
    }

    /// Starts a detection run.
    pub fn begin_run(&mut self) {
        if !self.detect_pso {
            return;
        }
        log::info!("precision-specific operation detection run started");
        self.error_map = Some(HashMap::new());
        self.finish_pso = false;
    }

    /// Ends a detection run: promotes candidates, purges false positives
    /// once the detector converges. Returns `true` on convergence.
    pub fn end_run(&mut self) -> bool {
        if !self.detect_pso {
            return false;
        }
        self.finish_pso = true;
        if let Some(map) = self.error_map.take() {
            for (key, cnt) in &map {
                if f64::from(cnt.err_cnt)
                    > f64::from(cnt.total_cnt) * PSO_PERCENTAGE_THRESHOLD
                {
                    let false_positive = f64::from(cnt.ov_cnt) / f64::from(cnt.total_cnt)
                        > PSO_FALSE_POSITIVE_PERCENTAGE;
                    self.detected_pso
                        .insert(*key, PsOperation { false_positive });
                    self.finish_pso = false;
                    log::info!(
                        "precision-specific operation at {key:#x}: total {}, error {}, near-zero {}",
                        cnt.total_cnt,
                        cnt.err_cnt,
                        cnt.ov_cnt
                    );
                }
            }
        }
        log::info!("precision-specific operation detection run ended");
        if self.finish_pso {
            let false_positives: Vec<InsnAddr> = self
                .detected_pso
                .iter()
                .filter(|(_, p)| p.false_positive)
                .map(|(k, _)| *k)
                .collect();
            for key in false_positives {
                log::info!("dropping near-zero candidate {key:#x}");
                self.detected_pso.remove(&key);
            }
            for key in self.detected_pso.keys() {
                log::info!("probable precision-specific operation at {key:#x}");
            }
        }
        self.finish_pso
    }

    /// Starts a fresh guest instance: the next threshold crossing counts
    /// again.
    pub fn begin_instance(&mut self) {
        if !self.detect_pso {
            return;
        }
        self.find_first_pso = false;
    }

    /// Whether the detector has converged (trivially true when disabled).
    #[must_use]
    pub fn is_pso_finished(&self) -> bool {
        if !self.detect_pso {
            return true;
        }
        self.finish_pso
    }

    /// Feeds one evaluation to the detector: the operands' worst relative
    /// error versus the result's. Only the first threshold crossing per
    /// guest instance is counted.
    pub fn analyze_pso(&mut self, input_rel: &Float, result: &ShadowValue) {
        if self.find_first_pso || !self.detect_pso || self.finish_pso {
            return;
        }

        let mut out_rel = Float::new(self.prec);
        self.rel_vs_org(result, &mut out_rel);

        let mut inflation = Float::new(self.prec);
        if !matches!(input_rel.cmp0(), Some(Ordering::Equal)) {
            inflation.assign(&out_rel / input_rel);
            inflation.abs_mut();
        } else if !matches!(out_rel.cmp0(), Some(Ordering::Equal)) {
            inflation.assign(&out_rel);
        }

        let Some(org) = result.org else {
            panic!("shadow value without captured guest result");
        };
        let org_abs = org.as_f64().abs();

        if self.detected_pso.contains_key(&result.origin) {
            // Already being fixed at this origin; nothing to learn.
            return;
        }
        let Some(map) = &mut self.error_map else {
            return;
        };
        let cnt = map.entry(result.origin).or_default();
        if inflation >= PSO_INFLATION_THRESHOLD {
            let mut shadow_abs = Float::new(self.prec);
            shadow_abs.assign(result.value.abs_ref());
            if org_abs < PSO_OV_ZERO_BOUND && shadow_abs < PSO_SV_ZERO_BOUND {
                cnt.ov_cnt += 1;
            }
            cnt.err_cnt += 1;
            cnt.total_cnt += 1;
            self.find_first_pso = true;
        } else {
            cnt.total_cnt += 1;
        }
    }

    // ---- misc ----

    /// Records a shadow-vs-original branch disagreement. Returns `true` the
    /// first time the site diverges.
    pub fn note_branch_divergence(&mut self, addr: InsnAddr) -> bool {
        let count = self.divergence_sites.entry(addr).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Number of distinct sites whose comparison ever diverged.
    #[must_use]
    pub fn branch_divergence_sites(&self) -> usize {
        self.divergence_sites.len()
    }

    /// Records a floating-point operation the engine does not shadow.
    pub fn record_unsupported(&mut self, op: IrOp) {
        self.unsupported.insert(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Temp;

    fn sv_with(prec: u32, value: f64, org: f64, origin: InsnAddr) -> ShadowValue {
        let mut store = ShadowStore::new(prec);
        let sv = store.set_temp(Temp(0), 1);
        sv.value.assign(value);
        sv.org = Some(GuestValue::F64(org));
        sv.origin = origin;
        sv.clone()
    }

    #[test]
    fn mean_value_tracks_count_max_and_sum() {
        let mut diag = Diagnostics::new(120, false);
        let shadow = Float::with_val(120, 2.0);
        diag.update_mean_value(0x10, IrOp::AddF64Lo, &shadow, GuestValue::F64(1.0), 3, 1, 2, 0);
        diag.update_mean_value(0x10, IrOp::AddF64Lo, &shadow, GuestValue::F64(2.0), 7, 5, 6, 2);
        let mv = &diag.mean_values[&0x10];
        assert_eq!(mv.count, 2);
        assert_eq!(mv.canceled_max, 7);
        assert_eq!(mv.badness_max, 2);
        // Max error run was the first one (rel 0.5), so operand origins stay.
        assert_eq!((mv.arg1, mv.arg2), (1, 2));
        assert_eq!(mv.max, 0.5);
    }

    #[test]
    fn stage_reports_first_divergence() {
        let mut diag = Diagnostics::new(120, false);
        let store = ShadowStore::new(120);
        let shadow = Float::with_val(120, 1.0);

        diag.stage_start(0);
        diag.update_stages(0x1000, GuestValue::F64(1.0), &shadow);
        diag.stage_end(0, &store);

        diag.stage_start(0);
        // Second iteration: the stored value drifted by 2^-40.
        let drifted = Float::with_val(120, 1.0 + (2.0_f64).powi(-40));
        diag.update_stages(0x1000, GuestValue::F64(1.0), &drifted);
        diag.stage_end(0, &store);

        let reports = diag.stage_report(0).unwrap();
        let report = &reports[&0x1000];
        assert_eq!(report.count, 1);
        assert_eq!(report.iter_min, 2);
        assert_eq!(report.iter_max, 2);
    }

    #[test]
    fn pso_candidate_promoted_after_run() {
        let mut diag = Diagnostics::new(120, true);
        diag.begin_run();
        let sv = sv_with(120, 1.0 + 1e-3, 1.0, 0x40);
        let input_rel = Float::with_val(120, 1e-12);
        for _ in 0..10 {
            diag.begin_instance();
            diag.analyze_pso(&input_rel, &sv);
        }
        assert!(!diag.end_run());
        assert!(diag.detected_pso.contains_key(&0x40));
        // A second run with no new candidates converges.
        diag.begin_run();
        assert!(diag.end_run());
        assert!(diag.is_pso_finished());
    }

    #[test]
    fn per_instance_latch_counts_once() {
        let mut diag = Diagnostics::new(120, true);
        diag.begin_run();
        let sv = sv_with(120, 1.0 + 1e-3, 1.0, 0x40);
        let input_rel = Float::with_val(120, 1e-12);
        diag.begin_instance();
        diag.analyze_pso(&input_rel, &sv);
        diag.analyze_pso(&input_rel, &sv);
        let cnt = diag.error_map.as_ref().unwrap()[&0x40];
        assert_eq!(cnt.err_cnt, 1);
        assert_eq!(cnt.total_cnt, 1);
    }

    #[test]
    fn branch_divergence_notice_is_per_site() {
        let mut diag = Diagnostics::new(120, false);
        assert!(diag.note_branch_divergence(0x99));
        assert!(!diag.note_branch_divergence(0x99));
        assert!(diag.note_branch_divergence(0x9A));
    }
}
