//! Replications: the unit of simulated advance.
//!
//! A replication wraps one CTMC state handle and the trajectories currently
//! sharing it. It advances one transition at a time; when an arrival's
//! destination depends on an undetermined staffing choice it partitions its
//! trajectories into children, one per feasible outcome. The incremental
//! state hash is the merge pre-check and is verified against a full
//! recompute after every mutation: a mismatch means silent state
//! corruption and aborts the sample path.

use crate::error::{SimError, SimResult};
use crate::model::{CtmcModel, Pending, Transition};
use crate::staffing::StaffingBox;
use crate::trajectory::{SplitMode, Trajectory};
use crate::types::{CallType, PoolIndex, TransitionIndex};

/// Outcome of one consuming advance step.
pub enum AdvanceResult<M: CtmcModel> {
    /// No split: the replication mutated and moves on.
    Advanced(Replication<M>),
    /// The replication partitioned into children, one per arrival outcome.
    /// The parent state moved into exactly one of them; the rest are deep
    /// copies.
    Split(Vec<Replication<M>>),
}

pub struct Replication<M: CtmcModel> {
    ctmc: M,
    trajectories: Vec<Trajectory>,
    /// Incremental state-component hash. The full hash adds
    /// `transitions_done × step coefficient` on top.
    base_hash: u64,
    queue_nonempty: Vec<bool>,
    num_nonempty_queues: usize,
    /// Minimum `num_split` over the trajectories; merge-priority key and
    /// split ownership tie-break.
    min_num_split: u32,
    /// Enclosing box of the trajectories' staffing boxes.
    bounds: StaffingBox,
    last_transition: Transition,
}

impl<M: CtmcModel> Replication<M> {
    /// Root replication of a sample path: one trajectory spanning the full
    /// staffing box.
    pub fn new(ctmc: M, bounds: StaffingBox, mode: SplitMode) -> SimResult<Self> {
        bounds.check_pools(ctmc.num_pools())?;
        for pool in 0..ctmc.num_pools() {
            let upper = bounds.upper().level(pool);
            let capacity = ctmc.max_staffing(pool);
            if upper > capacity {
                return Err(SimError::UpperAboveCapacity {
                    pool,
                    upper,
                    capacity,
                });
            }
            debug_assert!(
                ctmc.busy_in_pool(pool) <= bounds.lower().level(pool),
                "initial occupancy above the lower staffing bound"
            );
        }
        let base_hash = ctmc.state_hash().wrapping_sub(
            ctmc.transitions_done()
                .wrapping_mul(ctmc.step_hash_coeff()),
        );
        let trajectory = Trajectory::new(bounds.clone(), &ctmc, mode);
        let mut rep = Self {
            trajectories: vec![trajectory],
            base_hash,
            queue_nonempty: vec![false; ctmc.num_call_types()],
            num_nonempty_queues: 0,
            min_num_split: 0,
            bounds,
            last_transition: Transition::False,
            ctmc,
        };
        rep.refresh_queue_cache();
        Ok(rep)
    }

    pub fn model(&self) -> &M {
        &self.ctmc
    }

    pub fn trajectories(&self) -> &[Trajectory] {
        &self.trajectories
    }

    pub fn into_trajectories(self) -> Vec<Trajectory> {
        self.trajectories
    }

    pub fn is_exhausted(&self) -> bool {
        self.trajectories.is_empty()
    }

    pub fn min_num_split(&self) -> u32 {
        self.min_num_split
    }

    pub fn bounds(&self) -> &StaffingBox {
        &self.bounds
    }

    pub fn last_transition(&self) -> Transition {
        self.last_transition
    }

    pub fn transitions_done(&self) -> TransitionIndex {
        self.ctmc.transitions_done()
    }

    /// Full incremental hash: state component plus the transition-count
    /// term. Always equals `model().state_hash()`; this is the merge
    /// pre-check.
    pub fn hash(&self) -> u64 {
        self.base_hash.wrapping_add(
            self.ctmc
                .transitions_done()
                .wrapping_mul(self.ctmc.step_hash_coeff()),
        )
    }

    pub fn set_arrival_rate(&mut self, call_type: CallType, rate: f64) {
        self.ctmc.set_arrival_rate(call_type, rate);
    }

    /// The pool this replication's base lineage committed to, if any; the
    /// grouping key of the subgradient merge scan.
    pub fn divergence_pool(&self) -> Option<PoolIndex> {
        self.trajectories
            .iter()
            .min_by_key(|t| t.num_split())
            .and_then(|t| t.split_pool())
    }

    /// Advance by exactly one transition, consuming the replication.
    pub fn advance(mut self, bits: u64) -> SimResult<AdvanceResult<M>> {
        let now = self.ctmc.transitions_done();

        // Fast path: no arrival can originate a routing choice, either
        // because every queue is non-empty (arrivals must join their
        // queue) or because the single trajectory has no open window.
        let fast = self.num_nonempty_queues == self.ctmc.num_call_types()
            || (self.trajectories.len() == 1 && !self.trajectories[0].can_split_any());
        if fast {
            let staffing = self.trajectories[0].bounds().lower().clone();
            let t = self.ctmc.next_transition(bits, &staffing);
            self.apply_observed(&t)?;
            return Ok(AdvanceResult::Advanced(self));
        }

        match self.ctmc.next_transition_with_false(bits) {
            Pending::Done(t) => {
                self.apply_observed(&t)?;
                Ok(AdvanceResult::Advanced(self))
            }
            Pending::Arrival { call_type } => {
                let ambiguous = self
                    .trajectories
                    .iter()
                    .any(|tr| tr.can_split_for(&self.ctmc, call_type));
                if !ambiguous {
                    // every trajectory routes this arrival identically
                    let staffing = self.trajectories[0].bounds().lower().clone();
                    let t = self.ctmc.resolve_arrival(call_type, &staffing);
                    self.apply_observed(&t)?;
                    return Ok(AdvanceResult::Advanced(self));
                }
                self.split_arrival(call_type, now)
            }
        }
    }

    /// Partition the trajectories by arrival outcome and build one child
    /// replication per non-empty outcome group.
    fn split_arrival(
        mut self,
        call_type: CallType,
        now: TransitionIndex,
    ) -> SimResult<AdvanceResult<M>> {
        let np = self.ctmc.num_pools();
        let mut slots: Vec<Vec<Trajectory>> =
            std::iter::repeat_with(Vec::new).take(np + 1).collect();
        let drained: Vec<Trajectory> = self.trajectories.drain(..).collect();
        for tr in drained {
            for (slot, child) in tr.split(&self.ctmc, call_type, now).into_iter().enumerate() {
                if let Some(child) = child {
                    slots[slot].push(child);
                }
            }
        }

        let mut groups: Vec<(usize, Vec<Trajectory>)> = slots
            .into_iter()
            .enumerate()
            .filter(|(_, g)| !g.is_empty())
            .collect();
        if groups.is_empty() {
            return Err(SimError::EmptySplit { transition: now });
        }

        if groups.len() == 1 {
            // every trajectory landed in the same outcome: not a real
            // split, mutate in place
            let (slot, group) = groups.remove(0);
            self.trajectories = group;
            let t = self.apply_arrival(slot, call_type);
            self.apply_observed(&t)?;
            return Ok(AdvanceResult::Advanced(self));
        }

        // The group holding the globally smallest split count receives the
        // parent state by move; every other group gets a deep copy of the
        // pre-arrival state.
        let keeper_idx = groups
            .iter()
            .enumerate()
            .min_by_key(|(_, (_, g))| {
                g.iter().map(Trajectory::num_split).min().unwrap_or(u32::MAX)
            })
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        let mut built: Vec<Option<Replication<M>>> = (0..groups.len()).map(|_| None).collect();
        for idx in 0..groups.len() {
            if idx == keeper_idx {
                continue;
            }
            let slot = groups[idx].0;
            let group = std::mem::take(&mut groups[idx].1);
            let mut child = Replication {
                ctmc: self.ctmc.duplicate(),
                trajectories: group,
                base_hash: self.base_hash,
                queue_nonempty: self.queue_nonempty.clone(),
                num_nonempty_queues: self.num_nonempty_queues,
                min_num_split: 0,
                bounds: self.bounds.clone(),
                last_transition: self.last_transition,
            };
            let t = child.apply_arrival(slot, call_type);
            child.apply_observed(&t)?;
            built[idx] = Some(child);
        }

        let keeper_slot = groups[keeper_idx].0;
        self.trajectories = std::mem::take(&mut groups[keeper_idx].1);
        let t = self.apply_arrival(keeper_slot, call_type);
        self.apply_observed(&t)?;
        built[keeper_idx] = Some(self);

        let children: Vec<Replication<M>> = built.into_iter().flatten().collect();
        log::debug!(
            "split at transition {now}: call type {call_type}, {} children",
            children.len()
        );
        Ok(AdvanceResult::Split(children))
    }

    /// Resolve a pending arrival for one outcome slot.
    fn apply_arrival(&mut self, slot: usize, call_type: CallType) -> Transition {
        if slot < self.ctmc.num_pools() {
            self.ctmc.serve_arrival(call_type, slot);
            Transition::ArrivalServed {
                call_type,
                pool: slot,
            }
        } else {
            self.ctmc.queue_arrival(call_type)
        }
    }

    /// Fold one applied transition into the hash, the statistics of every
    /// trajectory, and the cached derived state; then verify hash
    /// consistency.
    fn apply_observed(&mut self, t: &Transition) -> SimResult<()> {
        self.base_hash = self.hash_after(t);
        let total_queued = self.ctmc.total_queued();
        for tr in &mut self.trajectories {
            tr.observe(t, total_queued);
        }
        for tr in &mut self.trajectories {
            tr.refresh_eligibility(&self.ctmc);
        }
        self.refresh_queue_cache();
        self.refresh_derived();
        self.last_transition = *t;
        self.verify_hash()
    }

    fn hash_after(&self, t: &Transition) -> u64 {
        match *t {
            Transition::ArrivalServed { pool, .. } => self
                .base_hash
                .wrapping_add(self.ctmc.pool_hash_coeff(pool)),
            Transition::ArrivalQueued { call_type } => self
                .base_hash
                .wrapping_add(self.ctmc.queue_hash_coeff(call_type)),
            Transition::EndServiceIdle { pool } => self
                .base_hash
                .wrapping_sub(self.ctmc.pool_hash_coeff(pool)),
            Transition::EndServiceDequeue { dequeued, .. } => self
                .base_hash
                .wrapping_sub(self.ctmc.queue_hash_coeff(dequeued)),
            Transition::Abandonment { call_type } => self
                .base_hash
                .wrapping_sub(self.ctmc.queue_hash_coeff(call_type)),
            Transition::ArrivalBlocked { .. } | Transition::False => self.base_hash,
        }
    }

    fn refresh_queue_cache(&mut self) {
        self.num_nonempty_queues = 0;
        for k in 0..self.ctmc.num_call_types() {
            let nonempty = self.ctmc.queue_len(k) > 0;
            self.queue_nonempty[k] = nonempty;
            if nonempty {
                self.num_nonempty_queues += 1;
            }
        }
    }

    fn refresh_derived(&mut self) {
        self.min_num_split = self
            .trajectories
            .iter()
            .map(Trajectory::num_split)
            .min()
            .unwrap_or(u32::MAX);
        if let Some(first) = self.trajectories.first() {
            let mut union = first.bounds().clone();
            for tr in &self.trajectories[1..] {
                union = union.union(tr.bounds());
            }
            self.bounds = union;
        }
    }

    fn verify_hash(&self) -> SimResult<()> {
        let recomputed = self.ctmc.state_hash();
        let incremental = self.hash();
        if incremental != recomputed {
            return Err(SimError::HashMismatch {
                transition: self.ctmc.transitions_done(),
                incremental,
                recomputed,
            });
        }
        Ok(())
    }

    /// Union another replication's trajectories into this one. The loser is
    /// left empty and must be discarded by the caller.
    pub fn absorb(&mut self, loser: &mut Replication<M>) {
        for tr in &mut self.trajectories {
            tr.bump_merge();
        }
        for tr in &mut loser.trajectories {
            tr.bump_merge();
        }
        self.trajectories.append(&mut loser.trajectories);
        self.refresh_derived();
    }
}
