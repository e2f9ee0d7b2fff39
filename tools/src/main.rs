//! staffsim-runner: headless staffing-evaluation runner.
//!
//! Usage:
//!   staffsim-runner --seed 12345 --paths 200 --horizon 8.0 --mode full
//!   staffsim-runner --config experiment.json --report out.json

use anyhow::{bail, Context, Result};
use staffsim_core::aggregate::RunSummary;
use staffsim_core::driver::{DriverConfig, SamplePathDriver};
use staffsim_core::model::{CallCenterCtmc, CtmcParams, RateChange, RateSchedule};
use staffsim_core::staffing::{StaffingBox, StaffingVector};
use staffsim_core::trajectory::SplitMode;
use std::env;
use std::fs;

#[derive(serde::Deserialize)]
struct ExperimentConfig {
    params: CtmcParams,
    /// Defaults to all zeros.
    lower_staffing: Option<Vec<u32>>,
    /// Defaults to the model maximum per pool.
    upper_staffing: Option<Vec<u32>>,
    #[serde(default)]
    rate_changes: Vec<RateChange>,
}

#[derive(serde::Serialize)]
struct Report {
    seed: u64,
    paths: u64,
    horizon: f64,
    mode: String,
    summary: RunSummary,
    configurations: Vec<ConfigReport>,
}

#[derive(serde::Serialize)]
struct ConfigReport {
    staffing: Vec<u32>,
    arrivals: u64,
    service_level: Vec<f64>,
    abandonment_rate: Vec<f64>,
    mean_queue_length: f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let paths = parse_arg(&args, "--paths", 100u64);
    let horizon = parse_arg(&args, "--horizon", 8.0f64);
    let mode_name = args
        .windows(2)
        .find(|w| w[0] == "--mode")
        .map(|w| w[1].as_str())
        .unwrap_or("full");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str());
    let report_path = args
        .windows(2)
        .find(|w| w[0] == "--report")
        .map(|w| w[1].as_str());

    let mode = match mode_name {
        "full" => SplitMode::Full,
        "subgradient" => SplitMode::SubgradientOnly,
        other => bail!("unknown mode '{other}' (expected 'full' or 'subgradient')"),
    };

    let experiment = match config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading experiment config {path}"))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing experiment config {path}"))?
        }
        None => default_experiment(),
    };

    let num_pools = experiment.params.num_pools();
    let num_call_types = experiment.params.num_call_types();
    let lower = StaffingVector::new(
        experiment
            .lower_staffing
            .unwrap_or_else(|| vec![0; num_pools]),
    );
    let upper = StaffingVector::new(
        experiment
            .upper_staffing
            .unwrap_or_else(|| experiment.params.max_staffing.clone()),
    );
    let bounds = StaffingBox::new(lower, upper)?;

    println!("staffsim-runner");
    println!("  seed:     {seed}");
    println!("  paths:    {paths}");
    println!("  horizon:  {horizon}");
    println!("  mode:     {mode_name}");
    println!("  box:      {} .. {}", bounds.lower(), bounds.upper());
    println!();

    let model = CallCenterCtmc::new(experiment.params);
    let schedule = RateSchedule::new(experiment.rate_changes);
    let mut driver = SamplePathDriver::new(
        model,
        bounds,
        schedule,
        DriverConfig::new(horizon, mode, seed),
    )?;

    let summary = driver.run(paths)?;
    log::info!(
        "run finished: {} configurations over {} paths",
        summary.configurations,
        summary.paths
    );
    print_summary(&summary);

    let configurations = collect_configurations(&driver, num_call_types);
    print_configurations(&configurations);

    if let Some(path) = report_path {
        let report = Report {
            seed,
            paths,
            horizon,
            mode: mode_name.to_string(),
            summary,
            configurations,
        };
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("writing report {path}"))?;
        println!("\nreport written to {path}");
    }

    Ok(())
}

fn collect_configurations(
    driver: &SamplePathDriver<CallCenterCtmc>,
    num_call_types: usize,
) -> Vec<ConfigReport> {
    driver
        .aggregator()
        .staffings()
        .map(|staffing| {
            let counters = driver
                .aggregator()
                .statistics_for(staffing)
                .expect("every listed staffing has a bucket");
            ConfigReport {
                staffing: staffing.levels().to_vec(),
                arrivals: counters.total_arrivals(),
                service_level: (0..num_call_types).map(|k| counters.service_level(k)).collect(),
                abandonment_rate: (0..num_call_types)
                    .map(|k| counters.abandonment_rate(k))
                    .collect(),
                mean_queue_length: counters.mean_queue_length(),
            }
        })
        .collect()
}

fn print_summary(summary: &RunSummary) {
    println!("== run summary ==");
    println!("  paths:                  {}", summary.paths);
    println!("  avg transition budget:  {:.1}", summary.avg_transition_budget);
    println!("  avg live replications:  {:.3}", summary.avg_live_replications);
    println!("  avg splits per path:    {:.3}", summary.avg_splits);
    println!("  avg merges per path:    {:.3}", summary.avg_merges);
    println!("  avg start transition:   {:.1}", summary.avg_start_transition);
    println!("  configurations:         {}", summary.configurations);
    println!();
}

fn print_configurations(configurations: &[ConfigReport]) {
    println!("== per-configuration statistics ==");
    for cfg in configurations {
        let levels: Vec<String> = cfg.service_level.iter().map(|s| format!("{s:.3}")).collect();
        let abandons: Vec<String> = cfg
            .abandonment_rate
            .iter()
            .map(|a| format!("{a:.3}"))
            .collect();
        println!(
            "  {:?}  arrivals {:>7}  service level [{}]  abandonment [{}]  mean queue {:.2}",
            cfg.staffing,
            cfg.arrivals,
            levels.join(", "),
            abandons.join(", "),
            cfg.mean_queue_length
        );
    }
}

/// A small two-type, two-pool call center used when no config is given.
fn default_experiment() -> ExperimentConfig {
    ExperimentConfig {
        params: CtmcParams {
            max_staffing: vec![4, 5],
            service_rate: vec![1.0, 0.8],
            arrival_rate: vec![3.5, 2.5],
            patience_rate: vec![0.5, 0.3],
            queue_capacity: vec![10, 10],
            type_to_pool: vec![vec![0, 1], vec![1]],
            pool_to_type: vec![vec![0], vec![1, 0]],
        },
        lower_staffing: Some(vec![2, 2]),
        upper_staffing: Some(vec![4, 4]),
        rate_changes: Vec::new(),
    }
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
