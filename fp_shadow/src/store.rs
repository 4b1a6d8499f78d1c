// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The shadow-value store.
//!
//! Shadow values live on three kinds of carrier: block-local temporaries
//! (present only while their version stamp matches the block counter),
//! per-thread guest register slots, and guest memory addresses. Register and
//! memory entries are never freed while the engine runs; deactivation flips
//! `active` so the allocation can be revived by the next tracked write.

use hashbrown::HashMap;
use rug::{Assign, Float};

use crate::ir::{GuestAddr, InsnAddr, RegOffset, Temp, ThreadId};

/// Upper bound on temps per superblock.
pub const MAX_TEMPS: usize = 1000;

/// Upper bound on guest register byte offsets.
pub const MAX_REGISTERS: u32 = 1000;

/// The guest's own IEEE result, captured when a shadow value is produced.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GuestValue {
    /// A binary32 result.
    F32(f32),
    /// A binary64 result.
    F64(f64),
}

impl GuestValue {
    /// Whether this is a binary32 value.
    #[must_use]
    pub fn is_f32(self) -> bool {
        matches!(self, Self::F32(_))
    }

    /// Nominal precision of the captured value.
    #[must_use]
    pub fn prec_bits(self) -> u32 {
        match self {
            Self::F32(_) => 24,
            Self::F64(_) => 53,
        }
    }

    /// Assigns the captured value into `dst` (at `dst`'s precision).
    pub fn assign_to(self, dst: &mut Float) {
        match self {
            Self::F32(v) => dst.assign(v),
            Self::F64(v) => dst.assign(v),
        }
    }

    /// Builds a float of the value at its nominal precision.
    #[must_use]
    pub fn to_float(self) -> Float {
        match self {
            Self::F32(v) => Float::with_val(24, v),
            Self::F64(v) => Float::with_val(53, v),
        }
    }

    /// The value widened to `f64`.
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::F32(v) => f64::from(v),
            Self::F64(v) => v,
        }
    }
}

/// A shadow value: three parallel precisions plus provenance metadata.
#[derive(Clone, Debug)]
pub struct ShadowValue {
    /// Carrier key: temp index, register offset, or memory address.
    pub key: u64,
    /// Whether the entry corresponds to live guest state at its carrier.
    pub active: bool,
    /// For temp carriers: the block count stamped at the last write.
    pub version: u64,
    /// High-precision shadow (guest precision in simulate-original mode).
    pub value: Float,
    /// Guest-precision shadow ("what the guest would compute if fixed").
    pub mid_value: Float,
    /// Guest-precision shadow with IEEE subnormal emulation.
    pub ori_value: Float,
    /// Length of the longest dependency path of FP operations.
    pub op_count: u64,
    /// Guest instruction address of the producing operation.
    pub origin: InsnAddr,
    /// Maximum bits cancelled anywhere along the dependency path.
    pub canceled: i64,
    /// Address at which `canceled` was maximal.
    pub cancel_origin: InsnAddr,
    /// The guest's own IEEE result at creation.
    pub org: Option<GuestValue>,
}

impl ShadowValue {
    fn new(key: u64, prec: u32) -> Self {
        Self {
            key,
            active: true,
            version: 0,
            value: Float::new(prec),
            mid_value: Float::new(prec),
            ori_value: Float::new(prec),
            op_count: 0,
            origin: 0,
            canceled: 0,
            cancel_origin: 0,
            org: None,
        }
    }

    /// Deep-copies numeric and metadata fields from `src`.
    ///
    /// `active` and `version` are never touched; the carrier's lifetime is
    /// the destination's own business. In simulate-original mode the channel
    /// precisions follow the source.
    pub fn copy_from(&mut self, src: &ShadowValue, simulate_original: bool) {
        if simulate_original {
            self.value.set_prec(src.value.prec());
            self.mid_value.set_prec(src.mid_value.prec());
            self.ori_value.set_prec(src.ori_value.prec());
        }
        self.value.assign(&src.value);
        self.mid_value.assign(&src.mid_value);
        self.ori_value.assign(&src.ori_value);
        self.op_count = src.op_count;
        self.origin = src.origin;
        self.canceled = src.canceled;
        self.cancel_origin = src.cancel_origin;
        self.org = src.org;
    }
}

/// Owner of all shadow state, keyed by carrier.
#[derive(Debug)]
pub struct ShadowStore {
    prec: u32,
    temps: Vec<Option<Box<ShadowValue>>>,
    registers: HashMap<(ThreadId, RegOffset), Box<ShadowValue>>,
    memory: HashMap<GuestAddr, Box<ShadowValue>>,
    /// Shadow values allocated since init.
    pub allocs: u64,
    /// Shadow values freed since init.
    pub frees: u64,
}

impl ShadowStore {
    /// Creates an empty store whose fresh entries use `prec` bits.
    #[must_use]
    pub fn new(prec: u32) -> Self {
        let mut temps = Vec::with_capacity(MAX_TEMPS);
        temps.resize_with(MAX_TEMPS, || None);
        Self {
            prec,
            temps,
            registers: HashMap::new(),
            memory: HashMap::new(),
            allocs: 0,
            frees: 0,
        }
    }

    /// Number of currently allocated shadow values.
    #[must_use]
    pub fn live(&self) -> u64 {
        self.allocs - self.frees
    }

    /// The shadow value of a temp, present iff its version stamp matches the
    /// current block count.
    #[must_use]
    pub fn temp(&self, t: Temp, current_block: u64) -> Option<&ShadowValue> {
        let sv = self.temps.get(t.index())?.as_deref()?;
        (sv.version == current_block).then_some(sv)
    }

    /// Mutable variant of [`ShadowStore::temp`].
    pub fn temp_mut(&mut self, t: Temp, current_block: u64) -> Option<&mut ShadowValue> {
        let sv = self.temps.get_mut(t.index())?.as_deref_mut()?;
        (sv.version == current_block).then_some(sv)
    }

    /// Revives or allocates the shadow value of a temp, stamping it with the
    /// current block count.
    pub fn set_temp(&mut self, t: Temp, current_block: u64) -> &mut ShadowValue {
        assert!(t.index() < MAX_TEMPS, "temp {t} out of range");
        let prec = self.prec;
        let allocs = &mut self.allocs;
        let sv = &mut **self.temps[t.index()].get_or_insert_with(|| {
            *allocs += 1;
            Box::new(ShadowValue::new(u64::from(t.0), prec))
        });
        sv.active = true;
        sv.version = current_block;
        sv
    }

    /// The shadow value at a register slot, active or not.
    #[must_use]
    pub fn reg(&self, tid: ThreadId, offset: RegOffset) -> Option<&ShadowValue> {
        self.registers.get(&(tid, offset)).map(|sv| &**sv)
    }

    /// Mutable variant of [`ShadowStore::reg`].
    pub fn reg_mut(&mut self, tid: ThreadId, offset: RegOffset) -> Option<&mut ShadowValue> {
        self.registers.get_mut(&(tid, offset)).map(|sv| &mut **sv)
    }

    /// The register slot, allocating an inactive entry on first use.
    pub fn ensure_reg(&mut self, tid: ThreadId, offset: RegOffset) -> &mut ShadowValue {
        assert!(offset < MAX_REGISTERS, "register offset {offset} out of range");
        let prec = self.prec;
        let allocs = &mut self.allocs;
        let sv = self.registers.entry((tid, offset)).or_insert_with(|| {
            *allocs += 1;
            Box::new(ShadowValue::new(u64::from(offset), prec))
        });
        &mut **sv
    }

    /// The shadow value at a memory address, active or not.
    #[must_use]
    pub fn mem(&self, addr: GuestAddr) -> Option<&ShadowValue> {
        self.memory.get(&addr).map(|sv| &**sv)
    }

    /// Mutable variant of [`ShadowStore::mem`].
    pub fn mem_mut(&mut self, addr: GuestAddr) -> Option<&mut ShadowValue> {
        self.memory.get_mut(&addr).map(|sv| &mut **sv)
    }

    /// The memory entry, allocating on first tracked write.
    pub fn ensure_mem(&mut self, addr: GuestAddr) -> &mut ShadowValue {
        let prec = self.prec;
        let allocs = &mut self.allocs;
        let sv = self.memory.entry(addr).or_insert_with(|| {
            *allocs += 1;
            Box::new(ShadowValue::new(addr, prec))
        });
        &mut **sv
    }

    /// Iterates all memory-keyed shadow values.
    pub fn memory_values(&self) -> impl Iterator<Item = &ShadowValue> {
        self.memory.values().map(|sv| &**sv)
    }

    /// Copies an active memory shadow into a temp. Returns `false` (and
    /// creates nothing) when the address has no active entry.
    pub fn copy_mem_to_temp(
        &mut self,
        addr: GuestAddr,
        dst: Temp,
        current_block: u64,
        simulate_original: bool,
    ) -> bool {
        if !self.memory.get(&addr).is_some_and(|sv| sv.active) {
            return false;
        }
        self.set_temp(dst, current_block);
        let ShadowStore { temps, memory, .. } = self;
        let (Some(src), Some(dst_sv)) = (memory.get(&addr), temps[dst.index()].as_deref_mut())
        else {
            return false;
        };
        dst_sv.copy_from(src, simulate_original);
        true
    }

    /// Copies an active register shadow into a temp. Returns `false` (and
    /// creates nothing) when the slot has no active entry.
    pub fn copy_reg_to_temp(
        &mut self,
        tid: ThreadId,
        offset: RegOffset,
        dst: Temp,
        current_block: u64,
        simulate_original: bool,
    ) -> bool {
        if !self
            .registers
            .get(&(tid, offset))
            .is_some_and(|sv| sv.active)
        {
            return false;
        }
        self.set_temp(dst, current_block);
        let ShadowStore {
            temps, registers, ..
        } = self;
        let (Some(src), Some(dst_sv)) = (
            registers.get(&(tid, offset)),
            temps[dst.index()].as_deref_mut(),
        ) else {
            return false;
        };
        dst_sv.copy_from(src, simulate_original);
        true
    }

    /// Copies a present temp shadow into a memory entry, allocating and
    /// activating it. Returns `false` when the temp has no present shadow.
    pub fn copy_temp_to_mem(
        &mut self,
        src: Temp,
        current_block: u64,
        addr: GuestAddr,
        simulate_original: bool,
    ) -> bool {
        if self.temp(src, current_block).is_none() {
            return false;
        }
        self.ensure_mem(addr);
        let ShadowStore { temps, memory, .. } = self;
        let (Some(src_sv), Some(dst_sv)) = (temps[src.index()].as_deref(), memory.get_mut(&addr))
        else {
            return false;
        };
        dst_sv.copy_from(src_sv, simulate_original);
        dst_sv.active = true;
        true
    }

    /// Copies a present temp shadow into a register slot, allocating and
    /// activating it. Returns `false` when the temp has no present shadow.
    pub fn copy_temp_to_reg(
        &mut self,
        src: Temp,
        current_block: u64,
        tid: ThreadId,
        offset: RegOffset,
        simulate_original: bool,
    ) -> bool {
        if self.temp(src, current_block).is_none() {
            return false;
        }
        self.ensure_reg(tid, offset);
        let ShadowStore {
            temps, registers, ..
        } = self;
        let (Some(src_sv), Some(dst_sv)) = (
            temps[src.index()].as_deref(),
            registers.get_mut(&(tid, offset)),
        ) else {
            return false;
        };
        dst_sv.copy_from(src_sv, simulate_original);
        dst_sv.active = true;
        true
    }

    /// Copies a present temp shadow into another temp.
    pub fn copy_temp_to_temp(
        &mut self,
        src: Temp,
        dst: Temp,
        current_block: u64,
        simulate_original: bool,
    ) -> bool {
        let Some(src_sv) = self.temp(src, current_block) else {
            return false;
        };
        let snapshot = src_sv.clone();
        let dst_sv = self.set_temp(dst, current_block);
        dst_sv.copy_from(&snapshot, simulate_original);
        true
    }

    /// Deactivates every carrier: registers and memory entries go inactive,
    /// temp stamps are cleared so no temp reads as present.
    pub fn reset_all(&mut self) {
        for sv in self.registers.values_mut() {
            sv.active = false;
        }
        for slot in self.temps.iter_mut().flatten() {
            slot.version = 0;
        }
        for sv in self.memory.values_mut() {
            sv.active = false;
        }
    }

    /// Frees every entry. After this the alloc/free counters balance.
    pub fn teardown(&mut self) {
        for slot in self.temps.iter_mut() {
            if slot.take().is_some() {
                self.frees += 1;
            }
        }
        self.frees += self.registers.len() as u64;
        self.registers.clear();
        self.frees += self.memory.len() as u64;
        self.memory.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_presence_follows_block_version() {
        let mut store = ShadowStore::new(120);
        let t = Temp(3);
        store.set_temp(t, 7);
        assert!(store.temp(t, 7).is_some());
        assert!(store.temp(t, 8).is_none());
        // Revival stamps the new block.
        store.set_temp(t, 8);
        assert!(store.temp(t, 8).is_some());
        assert_eq!(store.allocs, 1);
    }

    #[test]
    fn copy_preserves_destination_lifetime() {
        let mut store = ShadowStore::new(120);
        let src = store.set_temp(Temp(0), 1);
        src.value.assign(1.25);
        src.op_count = 4;
        src.org = Some(GuestValue::F64(1.25));
        let snapshot = store.temp(Temp(0), 1).unwrap().clone();

        let dst = store.ensure_mem(0x1000);
        dst.active = false;
        dst.version = 99;
        dst.copy_from(&snapshot, false);
        assert!(!dst.active);
        assert_eq!(dst.version, 99);
        assert_eq!(dst.op_count, 4);
        assert_eq!(dst.value, 1.25);
    }

    #[test]
    fn reset_deactivates_everything() {
        let mut store = ShadowStore::new(120);
        store.set_temp(Temp(1), 5);
        store.ensure_reg(0, 16).active = true;
        store.ensure_mem(0x2000).active = true;
        store.reset_all();
        assert!(store.temp(Temp(1), 5).is_none());
        assert!(!store.reg(0, 16).unwrap().active);
        assert!(!store.mem(0x2000).unwrap().active);
    }

    #[test]
    fn teardown_balances_alloc_accounting() {
        let mut store = ShadowStore::new(120);
        store.set_temp(Temp(0), 1);
        store.ensure_reg(0, 8);
        store.ensure_mem(0x1000);
        assert_eq!(store.live(), 3);
        store.teardown();
        assert_eq!(store.live(), 0);
        assert_eq!(store.allocs, 3);
        assert_eq!(store.frees, 3);
    }
}
