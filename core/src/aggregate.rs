//! Per-configuration statistics aggregation.
//!
//! Every staffing vector actually visited gets a lazily-created bucket. A
//! finished trajectory is credited to each vector its box still covers:
//! the box partition invariant guarantees each vector is covered by exactly
//! one trajectory per sample path, so nothing is lost or double-counted.

use crate::counters::CallCounters;
use crate::error::{SimError, SimResult};
use crate::staffing::StaffingVector;
use crate::trajectory::FinishedTrajectory;
use serde::Serialize;
use std::collections::BTreeMap;

/// Per-path diagnostics handed to the aggregator after every sample path.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PathStats {
    /// The drawn transition budget of the path.
    pub transitions: u64,
    /// Highest number of simultaneously live replications.
    pub peak_live: usize,
    /// Time-averaged live-replication count (uniformized time).
    pub avg_live: f64,
    pub merges: u64,
    pub splits: u64,
}

/// Accumulated statistics for one staffing vector.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigBucket {
    pub counters: CallCounters,
    pub num_split: u64,
    pub num_merge: u64,
    /// Σ of the starting transition of each trajectory credited here.
    pub start_transition_sum: u64,
    /// Trajectories credited to this bucket.
    pub trajectories: u64,
}

impl ConfigBucket {
    fn new(num_call_types: usize, num_pools: usize) -> Self {
        Self {
            counters: CallCounters::new(num_call_types, num_pools),
            num_split: 0,
            num_merge: 0,
            start_transition_sum: 0,
            trajectories: 0,
        }
    }
}

/// Scalar summary of one outer run, serializable for reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub paths: u64,
    pub avg_transition_budget: f64,
    pub avg_live_replications: f64,
    pub avg_merges: f64,
    pub avg_splits: f64,
    /// Average transition index at which configuration-specific
    /// trajectories came into being.
    pub avg_start_transition: f64,
    pub configurations: u64,
}

pub struct ConfigAggregator {
    num_call_types: usize,
    num_pools: usize,
    buckets: BTreeMap<StaffingVector, ConfigBucket>,
    /// The staffing vector the "current" statistics view points at.
    current: Option<StaffingVector>,
    paths: u64,
    transition_sum: u64,
    avg_live_sum: f64,
    merge_sum: u64,
    split_sum: u64,
}

impl ConfigAggregator {
    pub fn new(num_call_types: usize, num_pools: usize) -> Self {
        Self {
            num_call_types,
            num_pools,
            buckets: BTreeMap::new(),
            current: None,
            paths: 0,
            transition_sum: 0,
            avg_live_sum: 0.0,
            merge_sum: 0,
            split_sum: 0,
        }
    }

    /// Credit one finished trajectory to every staffing vector in
    /// `vectors`. The caller decides coverage (full lattice or axis family).
    pub fn credit(&mut self, vectors: &[StaffingVector], tr: &FinishedTrajectory) {
        let (num_call_types, num_pools) = (self.num_call_types, self.num_pools);
        for v in vectors {
            let bucket = self
                .buckets
                .entry(v.clone())
                .or_insert_with(|| ConfigBucket::new(num_call_types, num_pools));
            bucket.counters.merge_from(&tr.counters);
            bucket.num_split += tr.num_split as u64;
            bucket.num_merge += tr.num_merge as u64;
            bucket.start_transition_sum += tr.split_transition;
            bucket.trajectories += 1;
        }
    }

    pub fn record_path(&mut self, stats: &PathStats) {
        self.paths += 1;
        self.transition_sum += stats.transitions;
        self.avg_live_sum += stats.avg_live;
        self.merge_sum += stats.merges;
        self.split_sum += stats.splits;
    }

    /// Statistics for one previously visited staffing vector.
    pub fn statistics_for(&self, v: &StaffingVector) -> Option<&CallCounters> {
        self.buckets.get(v).map(|b| &b.counters)
    }

    pub fn bucket(&self, v: &StaffingVector) -> Option<&ConfigBucket> {
        self.buckets.get(v)
    }

    /// Switch the current statistics view to a visited vector, without
    /// resimulating. Signals `NotSimulated` for unknown vectors.
    pub fn set_staffing(&mut self, v: &StaffingVector) -> SimResult<()> {
        if !self.buckets.contains_key(v) {
            return Err(SimError::NotSimulated {
                vector: v.levels().to_vec(),
            });
        }
        self.current = Some(v.clone());
        Ok(())
    }

    pub fn current_staffing(&self) -> Option<&StaffingVector> {
        self.current.as_ref()
    }

    pub fn current_statistics(&self) -> Option<&CallCounters> {
        self.current.as_ref().and_then(|v| self.statistics_for(v))
    }

    pub fn staffings(&self) -> impl Iterator<Item = &StaffingVector> {
        self.buckets.keys()
    }

    pub fn num_configurations(&self) -> u64 {
        self.buckets.len() as u64
    }

    /// Reset everything at the start of a new outer run.
    pub fn reset(&mut self) {
        self.buckets.clear();
        self.current = None;
        self.paths = 0;
        self.transition_sum = 0;
        self.avg_live_sum = 0.0;
        self.merge_sum = 0;
        self.split_sum = 0;
    }

    pub fn summary(&self) -> RunSummary {
        let paths = self.paths.max(1) as f64;
        let (start_sum, traj_sum) = self
            .buckets
            .values()
            .fold((0u64, 0u64), |(s, t), b| {
                (s + b.start_transition_sum, t + b.trajectories)
            });
        RunSummary {
            paths: self.paths,
            avg_transition_budget: self.transition_sum as f64 / paths,
            avg_live_replications: self.avg_live_sum / paths,
            avg_merges: self.merge_sum as f64 / paths,
            avg_splits: self.split_sum as f64 / paths,
            avg_start_transition: if traj_sum == 0 {
                0.0
            } else {
                start_sum as f64 / traj_sum as f64
            },
            configurations: self.num_configurations(),
        }
    }
}
