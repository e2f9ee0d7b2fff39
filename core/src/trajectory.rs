//! Trajectories: the unit of statistics collection.
//!
//! A trajectory owns one staffing box (the sub-range of staffing vectors it
//! still represents), one statistics accumulator, and the split-eligibility
//! bitmap that tells the replication whether the next arrival could resolve
//! differently across the box. Splitting partitions the box along one call
//! type's pool preference order; the partition walk narrows bounds exactly
//! so that every child's arrival outcome is uniform across its box.

use crate::counters::CallCounters;
use crate::model::{CtmcModel, Transition};
use crate::staffing::StaffingBox;
use crate::types::{CallType, PoolIndex, TransitionIndex};

/// Splitting policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMode {
    /// Explore the full combinatorial staffing lattice.
    Full,
    /// Restrict splitting to the configurations needed for one-sided
    /// finite-difference (subgradient) estimation: the first time a
    /// trajectory's box splits, every other still-open pool collapses to
    /// its lower bound, so the tracked configurations grow linearly.
    SubgradientOnly,
}

/// A finished trajectory, detached from its replication for aggregation.
#[derive(Debug, Clone)]
pub struct FinishedTrajectory {
    pub bounds: StaffingBox,
    pub counters: CallCounters,
    pub num_split: u32,
    pub num_merge: u32,
    pub split_transition: TransitionIndex,
}

#[derive(Debug, Clone)]
pub struct Trajectory {
    bounds: StaffingBox,
    /// `can_split[i]`: pool i's range still brackets a routing threshold
    /// for the current occupancy (`lower[i] ≤ busy[i] ≤ upper[i]`).
    can_split: Vec<bool>,
    num_can_split: usize,
    /// Pools with `lower < upper`.
    num_diff_staffings: usize,
    counters: CallCounters,
    num_split: u32,
    num_merge: u32,
    /// Transition index at which this lineage last diverged (0 for the
    /// root trajectory).
    split_transition: TransitionIndex,
    /// Pool this lineage committed to when it last diverged.
    split_pool: Option<PoolIndex>,
    mode: SplitMode,
}

impl Trajectory {
    pub fn new<M: CtmcModel>(bounds: StaffingBox, model: &M, mode: SplitMode) -> Self {
        let mut tr = Self {
            can_split: vec![false; bounds.num_pools()],
            num_can_split: 0,
            num_diff_staffings: 0,
            counters: CallCounters::new(model.num_call_types(), model.num_pools()),
            num_split: 0,
            num_merge: 0,
            split_transition: 0,
            split_pool: None,
            mode,
            bounds,
        };
        tr.refresh_eligibility(model);
        tr
    }

    pub fn bounds(&self) -> &StaffingBox {
        &self.bounds
    }

    pub fn counters(&self) -> &CallCounters {
        &self.counters
    }

    pub fn num_split(&self) -> u32 {
        self.num_split
    }

    pub fn num_merge(&self) -> u32 {
        self.num_merge
    }

    pub fn split_transition(&self) -> TransitionIndex {
        self.split_transition
    }

    pub fn split_pool(&self) -> Option<PoolIndex> {
        self.split_pool
    }

    pub fn num_diff_staffings(&self) -> usize {
        self.num_diff_staffings
    }

    pub fn bump_merge(&mut self) {
        self.num_merge += 1;
    }

    /// Record one applied transition into the owned accumulator.
    pub fn observe(&mut self, t: &Transition, total_queued: u32) {
        self.counters.observe(t, total_queued);
    }

    /// Recompute the eligibility bitmap against the current shared state.
    pub fn refresh_eligibility<M: CtmcModel>(&mut self, model: &M) {
        self.num_can_split = 0;
        for pool in 0..self.bounds.num_pools() {
            let busy = model.busy_in_pool(pool);
            let open = self.bounds.lower().level(pool) <= busy
                && busy <= self.bounds.upper().level(pool);
            self.can_split[pool] = open;
            if open {
                self.num_can_split += 1;
            }
        }
        self.num_diff_staffings = self.bounds.num_open();
    }

    /// O(1) pre-check: could any pool split on some arrival right now?
    pub fn can_split_any(&self) -> bool {
        self.num_can_split > 0
    }

    /// Could an arrival of this call type resolve differently across the
    /// box? Walks the preference order, stopping at the first pool whose
    /// occupancy forces routing there for the entire box.
    pub fn can_split_for<M: CtmcModel>(&self, model: &M, call_type: CallType) -> bool {
        for &pool in model.pools_for(call_type) {
            if model.busy_in_pool(pool) < self.bounds.lower().level(pool) {
                // served here under every staffing in the box
                return false;
            }
            if self.can_split[pool] {
                return true;
            }
        }
        false
    }

    /// Partition this trajectory for an arrival of `call_type`.
    ///
    /// Returns one optional child per pool plus a final "else"
    /// (queued/blocked) slot. The parent is consumed; the child at the slot
    /// where the walk terminated receives it by move and keeps its
    /// `num_split` count, every diverging child is a deep copy with
    /// `num_split` incremented.
    pub fn split<M: CtmcModel>(
        mut self,
        model: &M,
        call_type: CallType,
        now: TransitionIndex,
    ) -> Vec<Option<Trajectory>> {
        let np = model.num_pools();
        let mut slots: Vec<Option<Trajectory>> =
            std::iter::repeat_with(|| None).take(np + 1).collect();
        let collapse = self.mode == SplitMode::SubgradientOnly && self.bounds.num_open() > 1;

        let mut divergent: Vec<(PoolIndex, StaffingBox)> = Vec::new();
        let mut terminal: Option<(PoolIndex, StaffingBox)> = None;

        for &pool in model.pools_for(call_type) {
            let needed = model.busy_in_pool(pool) + 1;
            if needed > self.bounds.upper().level(pool) {
                // never served here inside the box
                continue;
            }
            let mut child_box = self.bounds.clone();
            child_box.raise_lower(pool, needed);
            if needed <= self.bounds.lower().level(pool) {
                // chosen at or below this occupancy under every staffing
                // left in the box: deterministic outcome, walk ends
                terminal = Some((pool, child_box));
                break;
            }
            divergent.push((pool, child_box));
            // the not-routed-here continuation excludes staffing levels
            // that would have routed here
            self.bounds.cut_upper(pool, needed - 1);
        }

        for (pool, mut child_box) in divergent {
            if collapse {
                for other in 0..np {
                    if other != pool && child_box.width(other) > 0 {
                        child_box.pin_to_lower(other);
                    }
                }
            }
            slots[pool] = Some(self.diverging_child(child_box, pool, now));
        }

        match terminal {
            Some((pool, child_box)) => {
                slots[pool] = Some(self.into_continuation(child_box));
            }
            None => {
                let remaining = self.bounds.clone();
                slots[np] = Some(self.into_continuation(remaining));
            }
        }
        slots
    }

    /// A freshly diverging child: deep-copied accumulator, incremented
    /// split count.
    fn diverging_child(
        &self,
        bounds: StaffingBox,
        pool: PoolIndex,
        now: TransitionIndex,
    ) -> Trajectory {
        Trajectory {
            can_split: vec![false; bounds.num_pools()],
            num_can_split: 0,
            num_diff_staffings: bounds.num_open(),
            counters: self.counters.clone(),
            num_split: self.num_split + 1,
            num_merge: self.num_merge,
            split_transition: now,
            split_pool: Some(pool),
            mode: self.mode,
            bounds,
        }
    }

    /// The continuation child: the parent moves in, counters and split
    /// count untouched.
    fn into_continuation(mut self, bounds: StaffingBox) -> Trajectory {
        self.num_diff_staffings = bounds.num_open();
        self.bounds = bounds;
        self
    }

    pub fn finish(self) -> FinishedTrajectory {
        FinishedTrajectory {
            bounds: self.bounds,
            counters: self.counters,
            num_split: self.num_split,
            num_merge: self.num_merge,
            split_transition: self.split_transition,
        }
    }
}
