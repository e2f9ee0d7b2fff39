//! Per-trajectory statistics accumulator.
//!
//! RULE: a `CallCounters` is a value owned by exactly one trajectory at a
//! time. Splitting deep-copies it (plain `Clone`); no two trajectories ever
//! hold views over one accumulator. `merge_from` exists only for the
//! aggregation layer, which unions finished trajectories into
//! per-configuration buckets.

use crate::model::Transition;
use crate::types::CallType;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallCounters {
    /// Arrivals per call type, however they were resolved.
    pub arrivals: Vec<u64>,
    /// Arrivals taken by an idle agent with no wait.
    pub served: Vec<u64>,
    /// Arrivals that joined their queue.
    pub queued: Vec<u64>,
    /// Arrivals lost to a full queue.
    pub blocked: Vec<u64>,
    /// Queued calls that ran out of patience.
    pub abandoned: Vec<u64>,
    /// Queued calls eventually taken by a freed agent.
    pub dequeued: Vec<u64>,
    /// Service completions per pool.
    pub completions: Vec<u64>,
    /// Σ over transitions of the total queued-call count; divided by
    /// `transitions` this is the time-averaged queue length under
    /// uniformization.
    pub queue_integral: u64,
    /// Transitions observed, false transitions included.
    pub transitions: u64,
}

impl CallCounters {
    pub fn new(num_call_types: usize, num_pools: usize) -> Self {
        Self {
            arrivals: vec![0; num_call_types],
            served: vec![0; num_call_types],
            queued: vec![0; num_call_types],
            blocked: vec![0; num_call_types],
            abandoned: vec![0; num_call_types],
            dequeued: vec![0; num_call_types],
            completions: vec![0; num_pools],
            queue_integral: 0,
            transitions: 0,
        }
    }

    /// Record one transition. `total_queued` is the queue occupancy after
    /// the transition was applied.
    pub fn observe(&mut self, t: &Transition, total_queued: u32) {
        self.transitions += 1;
        self.queue_integral += total_queued as u64;
        match *t {
            Transition::ArrivalServed { call_type, .. } => {
                self.arrivals[call_type] += 1;
                self.served[call_type] += 1;
            }
            Transition::ArrivalQueued { call_type } => {
                self.arrivals[call_type] += 1;
                self.queued[call_type] += 1;
            }
            Transition::ArrivalBlocked { call_type } => {
                self.arrivals[call_type] += 1;
                self.blocked[call_type] += 1;
            }
            Transition::EndServiceIdle { pool } => {
                self.completions[pool] += 1;
            }
            Transition::EndServiceDequeue { pool, dequeued } => {
                self.completions[pool] += 1;
                self.dequeued[dequeued] += 1;
            }
            Transition::Abandonment { call_type } => {
                self.abandoned[call_type] += 1;
            }
            Transition::False => {}
        }
    }

    /// Trivial union, used when crediting a finished trajectory to a
    /// configuration bucket.
    pub fn merge_from(&mut self, other: &CallCounters) {
        for (a, b) in self.arrivals.iter_mut().zip(&other.arrivals) {
            *a += b;
        }
        for (a, b) in self.served.iter_mut().zip(&other.served) {
            *a += b;
        }
        for (a, b) in self.queued.iter_mut().zip(&other.queued) {
            *a += b;
        }
        for (a, b) in self.blocked.iter_mut().zip(&other.blocked) {
            *a += b;
        }
        for (a, b) in self.abandoned.iter_mut().zip(&other.abandoned) {
            *a += b;
        }
        for (a, b) in self.dequeued.iter_mut().zip(&other.dequeued) {
            *a += b;
        }
        for (a, b) in self.completions.iter_mut().zip(&other.completions) {
            *a += b;
        }
        self.queue_integral += other.queue_integral;
        self.transitions += other.transitions;
    }

    pub fn total_arrivals(&self) -> u64 {
        self.arrivals.iter().sum()
    }

    /// Fraction of arrivals of one type answered with no wait.
    pub fn service_level(&self, call_type: CallType) -> f64 {
        if self.arrivals[call_type] == 0 {
            return 0.0;
        }
        self.served[call_type] as f64 / self.arrivals[call_type] as f64
    }

    /// Fraction of arrivals of one type that abandoned.
    pub fn abandonment_rate(&self, call_type: CallType) -> f64 {
        if self.arrivals[call_type] == 0 {
            return 0.0;
        }
        self.abandoned[call_type] as f64 / self.arrivals[call_type] as f64
    }

    /// Time-averaged total queue length.
    pub fn mean_queue_length(&self) -> f64 {
        if self.transitions == 0 {
            return 0.0;
        }
        self.queue_integral as f64 / self.transitions as f64
    }
}
