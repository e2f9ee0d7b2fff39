//! CTMC transition model.
//!
//! The engine consumes the model through [`CtmcModel`]: an opaque, clonable,
//! incrementally hashable state advanced one uniformized jump at a time.
//! Arrivals are the only transitions whose outcome depends on staffing, so
//! the trait generates them unresolved on the split path and lets the engine
//! resolve each branch against its own staffing range.
//!
//! [`CallCenterCtmc`] is the concrete multi-type, multi-pool model: Poisson
//! arrivals per call type, exponential service per agent, exponential
//! patience per queued call, finite queues, and a fixed pool preference
//! order per call type. Uniformization folds all rate slack into false
//! transitions, so every jump consumes exactly one block of random bits.

use crate::staffing::StaffingVector;
use crate::types::{CallType, PoolIndex, TransitionIndex};
use serde::{Deserialize, Serialize};

/// One uniformized CTMC jump, after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Arrival taken immediately by an idle agent.
    ArrivalServed { call_type: CallType, pool: PoolIndex },
    /// Arrival joined its queue.
    ArrivalQueued { call_type: CallType },
    /// Arrival found its queue full and was lost.
    ArrivalBlocked { call_type: CallType },
    /// Service completion; no waiting call for the freed agent.
    EndServiceIdle { pool: PoolIndex },
    /// Service completion; the freed agent immediately takes a queued call.
    EndServiceDequeue { pool: PoolIndex, dequeued: CallType },
    /// A queued call ran out of patience.
    Abandonment { call_type: CallType },
    /// Uniformization self-loop: no visible state change, still counted for
    /// correct timing.
    False,
}

impl Transition {
    /// Transition types after which a merge scan is worthwhile: they can
    /// only shrink future divergence between replications.
    pub fn shrinks_divergence(&self) -> bool {
        matches!(
            self,
            Transition::EndServiceIdle { .. }
                | Transition::EndServiceDequeue { .. }
                | Transition::Abandonment { .. }
        )
    }
}

/// Generation outcome before arrival resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    /// An arrival whose destination may depend on staffing; generated but
    /// not yet applied to the state.
    Arrival { call_type: CallType },
    /// Any other transition, already applied.
    Done(Transition),
}

/// The CTMC state handle the engine advances, splits and merges.
///
/// `Clone` is the deep-copy contract: after `duplicate()`, parent and child
/// share no mutable sub-structure. `PartialEq` is full observable-state
/// equality, the merge confirmation check.
pub trait CtmcModel: Clone + PartialEq {
    fn num_pools(&self) -> usize;
    fn num_call_types(&self) -> usize;
    fn max_staffing(&self, pool: PoolIndex) -> u32;
    fn busy_in_pool(&self, pool: PoolIndex) -> u32;
    fn queue_len(&self, call_type: CallType) -> u32;
    fn total_queued(&self) -> u32;

    /// Ordered candidate pools for a call type.
    fn pools_for(&self, call_type: CallType) -> &[PoolIndex];

    /// Uniformization constant Λ: the fixed total jump rate.
    fn total_jump_rate(&self) -> f64;

    /// Change one call type's arrival rate. The rate must stay within the
    /// uniformization envelope fixed at construction.
    fn set_arrival_rate(&mut self, call_type: CallType, rate: f64);

    /// Generate the next transition from one block of random bits and apply
    /// it, resolving any arrival against the given staffing vector. False
    /// transitions are returned and counted like any other.
    fn next_transition(&mut self, bits: u64, staffing: &StaffingVector) -> Transition;

    /// Extended generator for the split path: arrivals come back unresolved
    /// and unapplied, everything else (false transitions included) is
    /// applied as usual.
    fn next_transition_with_false(&mut self, bits: u64) -> Pending;

    /// Resolve a pending arrival against a concrete staffing vector.
    fn resolve_arrival(&mut self, call_type: CallType, staffing: &StaffingVector) -> Transition;

    /// Force a pending arrival into service at a specific pool.
    fn serve_arrival(&mut self, call_type: CallType, pool: PoolIndex);

    /// Force a pending arrival into its queue, or block it when full.
    fn queue_arrival(&mut self, call_type: CallType) -> Transition;

    /// Full hash of the observable state, recomputed from scratch. Includes
    /// the `transitions_done × step coefficient` term.
    fn state_hash(&self) -> u64;
    fn pool_hash_coeff(&self, pool: PoolIndex) -> u64;
    fn queue_hash_coeff(&self, call_type: CallType) -> u64;
    fn step_hash_coeff(&self) -> u64;

    fn transitions_done(&self) -> TransitionIndex;

    /// Explicit deep-copy. The returned value is independent and fully
    /// owned.
    fn duplicate(&self) -> Self {
        self.clone()
    }

    fn state_eq(&self, other: &Self) -> bool {
        self == other
    }
}

// Salts for the incremental state hash. The mixing is the splitmix64
// finalizer, so coefficients for neighbouring indices are uncorrelated.
const POOL_SALT: u64 = 0x9e37_79b9_7f4a_7c15;
const QUEUE_SALT: u64 = 0xc2b2_ae3d_27d4_eb4f;
const STEP_SALT: u64 = 0x1656_67b1_9e37_79f9;

fn mix(mut z: u64) -> u64 {
    z ^= z >> 30;
    z = z.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z ^= z >> 27;
    z = z.wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Static parameters of the call-center CTMC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtmcParams {
    /// Physical agent capacity per pool (the uniformization staffing cap).
    pub max_staffing: Vec<u32>,
    /// Service rate per busy agent, per pool.
    pub service_rate: Vec<f64>,
    /// Initial arrival rate per call type; also the uniformization envelope
    /// a rate schedule may never exceed.
    pub arrival_rate: Vec<f64>,
    /// Patience (abandonment) rate per queued call, per call type.
    pub patience_rate: Vec<f64>,
    /// Queue capacity per call type.
    pub queue_capacity: Vec<u32>,
    /// Pool preference order per call type.
    pub type_to_pool: Vec<Vec<PoolIndex>>,
    /// Dequeue priority per pool: which queues a freed agent checks, in
    /// order.
    pub pool_to_type: Vec<Vec<CallType>>,
}

impl CtmcParams {
    pub fn num_pools(&self) -> usize {
        self.max_staffing.len()
    }

    pub fn num_call_types(&self) -> usize {
        self.arrival_rate.len()
    }
}

/// Multi-type, multi-pool call-center CTMC under uniformization.
#[derive(Debug, Clone, PartialEq)]
pub struct CallCenterCtmc {
    params: CtmcParams,
    /// Current arrival rate per call type (≤ the envelope in `params`).
    arrival_rate: Vec<f64>,
    busy: Vec<u32>,
    queue: Vec<u32>,
    transitions: TransitionIndex,
    jump_rate: f64,
}

impl CallCenterCtmc {
    /// Build the model in the empty state (no busy agents, empty queues).
    pub fn new(params: CtmcParams) -> Self {
        let jump_rate = params.arrival_rate.iter().sum::<f64>()
            + params
                .max_staffing
                .iter()
                .zip(&params.service_rate)
                .map(|(&s, &mu)| s as f64 * mu)
                .sum::<f64>()
            + params
                .queue_capacity
                .iter()
                .zip(&params.patience_rate)
                .map(|(&h, &nu)| h as f64 * nu)
                .sum::<f64>();
        let busy = vec![0; params.num_pools()];
        let queue = vec![0; params.num_call_types()];
        let arrival_rate = params.arrival_rate.clone();
        Self {
            params,
            arrival_rate,
            busy,
            queue,
            transitions: 0,
            jump_rate,
        }
    }

    pub fn params(&self) -> &CtmcParams {
        &self.params
    }

    /// Map one block of random bits onto [0, Λ).
    fn draw(&self, bits: u64) -> f64 {
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64) * self.jump_rate
    }

    /// Generate the next jump. Arrivals are returned unresolved; all other
    /// jumps are applied. Always advances the transition counter.
    fn generate(&mut self, bits: u64) -> Pending {
        self.transitions += 1;
        let mut u = self.draw(bits);

        for k in 0..self.params.num_call_types() {
            let envelope = self.params.arrival_rate[k];
            if u < envelope {
                if u < self.arrival_rate[k] {
                    return Pending::Arrival { call_type: k };
                }
                // thinned arrival: current rate below the envelope
                return Pending::Done(Transition::False);
            }
            u -= envelope;
        }

        for pool in 0..self.params.num_pools() {
            let mu = self.params.service_rate[pool];
            let band = self.params.max_staffing[pool] as f64 * mu;
            if u < band {
                let slot = (u / mu) as u32;
                if slot < self.busy[pool] {
                    return Pending::Done(self.end_service(pool));
                }
                return Pending::Done(Transition::False);
            }
            u -= band;
        }

        for k in 0..self.params.num_call_types() {
            let nu = self.params.patience_rate[k];
            let band = self.params.queue_capacity[k] as f64 * nu;
            if u < band {
                let slot = (u / nu) as u32;
                if slot < self.queue[k] {
                    self.queue[k] -= 1;
                    return Pending::Done(Transition::Abandonment { call_type: k });
                }
                return Pending::Done(Transition::False);
            }
            u -= band;
        }

        // numeric tail of the last band
        Pending::Done(Transition::False)
    }

    fn end_service(&mut self, pool: PoolIndex) -> Transition {
        self.busy[pool] -= 1;
        for &k in &self.params.pool_to_type[pool] {
            if self.queue[k] > 0 {
                self.queue[k] -= 1;
                self.busy[pool] += 1;
                return Transition::EndServiceDequeue { pool, dequeued: k };
            }
        }
        Transition::EndServiceIdle { pool }
    }
}

impl CtmcModel for CallCenterCtmc {
    fn num_pools(&self) -> usize {
        self.params.num_pools()
    }

    fn num_call_types(&self) -> usize {
        self.params.num_call_types()
    }

    fn max_staffing(&self, pool: PoolIndex) -> u32 {
        self.params.max_staffing[pool]
    }

    fn busy_in_pool(&self, pool: PoolIndex) -> u32 {
        self.busy[pool]
    }

    fn queue_len(&self, call_type: CallType) -> u32 {
        self.queue[call_type]
    }

    fn total_queued(&self) -> u32 {
        self.queue.iter().sum()
    }

    fn pools_for(&self, call_type: CallType) -> &[PoolIndex] {
        &self.params.type_to_pool[call_type]
    }

    fn total_jump_rate(&self) -> f64 {
        self.jump_rate
    }

    fn set_arrival_rate(&mut self, call_type: CallType, rate: f64) {
        debug_assert!(
            rate <= self.params.arrival_rate[call_type],
            "rate {rate} above uniformization envelope for type {call_type}"
        );
        self.arrival_rate[call_type] = rate;
    }

    fn next_transition(&mut self, bits: u64, staffing: &StaffingVector) -> Transition {
        match self.generate(bits) {
            Pending::Arrival { call_type } => self.resolve_arrival(call_type, staffing),
            Pending::Done(t) => t,
        }
    }

    fn next_transition_with_false(&mut self, bits: u64) -> Pending {
        self.generate(bits)
    }

    fn resolve_arrival(&mut self, call_type: CallType, staffing: &StaffingVector) -> Transition {
        for p in 0..self.params.type_to_pool[call_type].len() {
            let pool = self.params.type_to_pool[call_type][p];
            if self.busy[pool] < staffing.level(pool) {
                self.serve_arrival(call_type, pool);
                return Transition::ArrivalServed { call_type, pool };
            }
        }
        self.queue_arrival(call_type)
    }

    fn serve_arrival(&mut self, call_type: CallType, pool: PoolIndex) {
        debug_assert!(self.busy[pool] < self.params.max_staffing[pool]);
        let _ = call_type;
        self.busy[pool] += 1;
    }

    fn queue_arrival(&mut self, call_type: CallType) -> Transition {
        if self.queue[call_type] < self.params.queue_capacity[call_type] {
            self.queue[call_type] += 1;
            Transition::ArrivalQueued { call_type }
        } else {
            Transition::ArrivalBlocked { call_type }
        }
    }

    fn state_hash(&self) -> u64 {
        let mut h = 0u64;
        for (pool, &b) in self.busy.iter().enumerate() {
            h = h.wrapping_add((b as u64).wrapping_mul(self.pool_hash_coeff(pool)));
        }
        for (k, &q) in self.queue.iter().enumerate() {
            h = h.wrapping_add((q as u64).wrapping_mul(self.queue_hash_coeff(k)));
        }
        h.wrapping_add(self.transitions.wrapping_mul(self.step_hash_coeff()))
    }

    fn pool_hash_coeff(&self, pool: PoolIndex) -> u64 {
        mix(POOL_SALT.wrapping_add(pool as u64))
    }

    fn queue_hash_coeff(&self, call_type: CallType) -> u64 {
        mix(QUEUE_SALT.wrapping_add(call_type as u64))
    }

    fn step_hash_coeff(&self) -> u64 {
        mix(STEP_SALT)
    }

    fn transitions_done(&self) -> TransitionIndex {
        self.transitions
    }
}

/// One scheduled arrival-rate change, applied when the sample path reaches
/// `at_transition`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateChange {
    pub at_transition: TransitionIndex,
    pub call_type: CallType,
    pub rate: f64,
}

/// Transition-indexed schedule of arrival-rate changes, kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSchedule {
    changes: Vec<RateChange>,
}

impl RateSchedule {
    pub fn new(mut changes: Vec<RateChange>) -> Self {
        changes.sort_by_key(|c| c.at_transition);
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &[RateChange] {
        &self.changes
    }

    /// Changes due exactly at `transition`, advancing the caller's cursor.
    pub fn due_at<'a>(&'a self, cursor: &mut usize, transition: TransitionIndex) -> &'a [RateChange] {
        let start = *cursor;
        while *cursor < self.changes.len() && self.changes[*cursor].at_transition <= transition {
            *cursor += 1;
        }
        &self.changes[start..*cursor]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_pool_params() -> CtmcParams {
        CtmcParams {
            max_staffing: vec![4, 5],
            service_rate: vec![1.0, 0.8],
            arrival_rate: vec![3.0],
            patience_rate: vec![0.5],
            queue_capacity: vec![10],
            type_to_pool: vec![vec![0, 1]],
            pool_to_type: vec![vec![0], vec![0]],
        }
    }

    #[test]
    fn jump_rate_is_the_uniformization_sum() {
        let m = CallCenterCtmc::new(two_pool_params());
        // 3.0 + 4·1.0 + 5·0.8 + 10·0.5 = 16.0
        assert!((m.total_jump_rate() - 16.0).abs() < 1e-12);
    }

    #[test]
    fn arrival_resolution_follows_preference_order() {
        let mut m = CallCenterCtmc::new(two_pool_params());
        let staffing = StaffingVector::new(vec![1, 1]);
        m.serve_arrival(0, 0);
        // pool 0 full at this staffing, pool 1 idle
        let t = m.resolve_arrival(0, &staffing);
        assert_eq!(
            t,
            Transition::ArrivalServed {
                call_type: 0,
                pool: 1
            }
        );
        // both pools full: queued
        let t = m.resolve_arrival(0, &staffing);
        assert_eq!(t, Transition::ArrivalQueued { call_type: 0 });
        assert_eq!(m.queue_len(0), 1);
    }

    #[test]
    fn freed_agent_dequeues_waiting_call() {
        let mut m = CallCenterCtmc::new(two_pool_params());
        m.serve_arrival(0, 0);
        m.queue_arrival(0);
        let t = m.end_service(0);
        assert_eq!(
            t,
            Transition::EndServiceDequeue {
                pool: 0,
                dequeued: 0
            }
        );
        assert_eq!(m.busy_in_pool(0), 1);
        assert_eq!(m.queue_len(0), 0);
    }

    #[test]
    fn state_hash_tracks_state_and_transition_count() {
        let mut a = CallCenterCtmc::new(two_pool_params());
        let b = a.duplicate();
        assert_eq!(a.state_hash(), b.state_hash());
        a.serve_arrival(0, 0);
        assert_ne!(a.state_hash(), b.state_hash());
        let before = a.state_hash();
        let expected = before.wrapping_add(a.step_hash_coeff());
        a.transitions += 1;
        assert_eq!(a.state_hash(), expected);
    }

    #[test]
    fn schedule_cursor_yields_due_changes_once() {
        let sched = RateSchedule::new(vec![
            RateChange {
                at_transition: 5,
                call_type: 0,
                rate: 1.0,
            },
            RateChange {
                at_transition: 2,
                call_type: 0,
                rate: 2.0,
            },
        ]);
        let mut cursor = 0;
        assert!(sched.due_at(&mut cursor, 1).is_empty());
        assert_eq!(sched.due_at(&mut cursor, 2).len(), 1);
        assert!(sched.due_at(&mut cursor, 3).is_empty());
        assert_eq!(sched.due_at(&mut cursor, 5).len(), 1);
        assert!(sched.due_at(&mut cursor, 99).is_empty());
    }
}
