//! Sample-path driver: the outer advance loop.
//!
//! One sample path draws a Poisson transition budget, advances every live
//! replication in lockstep on a shared stream of random bits, lets
//! replications split, scans for merges after transitions that can only
//! shrink future divergence, and finally flushes every finished trajectory
//! into the per-configuration aggregator.

use crate::aggregate::{ConfigAggregator, PathStats, RunSummary};
use crate::error::SimResult;
use crate::merge::{grouped_scan, pairwise_scan};
use crate::model::{CtmcModel, RateSchedule};
use crate::replication::{AdvanceResult, Replication};
use crate::rng::{RngBank, StreamSlot};
use crate::staffing::{axis_vectors, StaffingBox};
use crate::trajectory::SplitMode;

/// Which merge scan the driver runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    Pairwise,
    Grouped,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Time horizon of one sample path. The transition budget is drawn
    /// from Poisson(jump_rate × horizon): the budget being random is
    /// required for the outer estimator, not a convenience.
    pub horizon: f64,
    pub mode: SplitMode,
    pub merge_strategy: MergeStrategy,
    pub seed: u64,
}

impl DriverConfig {
    pub fn new(horizon: f64, mode: SplitMode, seed: u64) -> Self {
        let merge_strategy = match mode {
            SplitMode::Full => MergeStrategy::Pairwise,
            SplitMode::SubgradientOnly => MergeStrategy::Grouped,
        };
        Self {
            horizon,
            mode,
            merge_strategy,
            seed,
        }
    }
}

/// Continuous-time accumulator for the live-replication count. Under
/// uniformization every transition has the same expected holding time, so
/// the integral is transition-weighted.
struct LiveAccumulator {
    integral: u64,
    count: u64,
    since: u64,
    peak: usize,
}

impl LiveAccumulator {
    fn new() -> Self {
        Self {
            integral: 0,
            count: 1,
            since: 0,
            peak: 1,
        }
    }

    fn on_change(&mut self, step: u64, count: usize) {
        self.peak = self.peak.max(count);
        if count as u64 != self.count {
            self.integral += self.count * (step - self.since);
            self.since = step;
            self.count = count as u64;
        }
    }

    fn finish(mut self, budget: u64) -> (f64, usize) {
        if budget == 0 {
            return (self.count as f64, self.peak);
        }
        self.integral += self.count * (budget - self.since);
        (self.integral as f64 / budget as f64, self.peak)
    }
}

pub struct SamplePathDriver<M: CtmcModel> {
    /// Pristine initial state, duplicated for every path.
    model: M,
    bounds: StaffingBox,
    schedule: RateSchedule,
    config: DriverConfig,
    rng: RngBank,
    aggregator: ConfigAggregator,
}

impl<M: CtmcModel> SamplePathDriver<M> {
    pub fn new(
        model: M,
        bounds: StaffingBox,
        schedule: RateSchedule,
        config: DriverConfig,
    ) -> SimResult<Self> {
        bounds.check_pools(model.num_pools())?;
        let aggregator = ConfigAggregator::new(model.num_call_types(), model.num_pools());
        let rng = RngBank::new(config.seed);
        Ok(Self {
            model,
            bounds,
            schedule,
            config,
            rng,
            aggregator,
        })
    }

    pub fn aggregator(&self) -> &ConfigAggregator {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut ConfigAggregator {
        &mut self.aggregator
    }

    /// Draw the transition budget for one path index without running it.
    pub fn draw_budget(&self, path_index: u64) -> u64 {
        let mut rng = self.rng.for_stream(StreamSlot::Budget, path_index);
        rng.poisson(self.model.total_jump_rate() * self.config.horizon)
    }

    /// Run `num_paths` independent sample paths and summarize.
    pub fn run(&mut self, num_paths: u64) -> SimResult<RunSummary> {
        for path in 0..num_paths {
            let stats = self.run_path(path)?;
            log::debug!(
                "path {path}: {} transitions, peak {} live, {} splits, {} merges",
                stats.transitions,
                stats.peak_live,
                stats.splits,
                stats.merges
            );
        }
        Ok(self.aggregator.summary())
    }

    /// Advance one full sample path and flush its trajectories.
    pub fn run_path(&mut self, path_index: u64) -> SimResult<PathStats> {
        let budget = self.draw_budget(path_index);
        let mut bits = self.rng.for_stream(StreamSlot::Transitions, path_index);

        let mut live = vec![Replication::new(
            self.model.duplicate(),
            self.bounds.clone(),
            self.config.mode,
        )?];
        let mut accumulator = LiveAccumulator::new();
        let mut cursor = 0usize;
        let mut merges = 0u64;
        let mut splits = 0u64;

        for step in 0..budget {
            for change in self.schedule.due_at(&mut cursor, step) {
                for rep in &mut live {
                    rep.set_arrival_rate(change.call_type, change.rate);
                }
            }

            // one shared block of bits per transition index: every
            // replication consumes the same randomness
            let block = bits.next_u64();
            let mut advanced = Vec::with_capacity(live.len());
            let mut shrank = false;
            for rep in live.drain(..) {
                match rep.advance(block)? {
                    AdvanceResult::Advanced(r) => {
                        shrank |= r.last_transition().shrinks_divergence();
                        advanced.push(r);
                    }
                    AdvanceResult::Split(children) => {
                        splits += 1;
                        advanced.extend(children);
                    }
                }
            }
            live = advanced;

            if shrank && live.len() > 1 {
                let merged = match self.config.merge_strategy {
                    MergeStrategy::Pairwise => pairwise_scan(&mut live),
                    MergeStrategy::Grouped => grouped_scan(&mut live),
                };
                merges += merged as u64;
            }
            accumulator.on_change(step + 1, live.len());
        }

        let (avg_live, peak_live) = accumulator.finish(budget);
        let base = self.bounds.lower().clone();
        for rep in live {
            for tr in rep.into_trajectories() {
                let finished = tr.finish();
                let vectors = match self.config.mode {
                    SplitMode::Full => finished.bounds.vectors(),
                    SplitMode::SubgradientOnly => axis_vectors(&finished.bounds, &base),
                };
                self.aggregator.credit(&vectors, &finished);
            }
        }

        let stats = PathStats {
            transitions: budget,
            peak_live,
            avg_live,
            merges,
            splits,
        };
        self.aggregator.record_path(&stats);
        Ok(stats)
    }
}
