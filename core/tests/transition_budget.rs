//! Per-path transition budgets must follow Poisson(jump_rate × horizon):
//! chi-square goodness of fit over many drawn budgets, plus a sanity check
//! that the budget actually varies between paths.

use staffsim_core::driver::{DriverConfig, SamplePathDriver};
use staffsim_core::model::{CallCenterCtmc, CtmcModel, CtmcParams, RateSchedule};
use staffsim_core::staffing::{StaffingBox, StaffingVector};
use staffsim_core::trajectory::SplitMode;

fn params() -> CtmcParams {
    CtmcParams {
        max_staffing: vec![2, 2],
        service_rate: vec![1.0, 1.0],
        arrival_rate: vec![4.0],
        patience_rate: vec![0.5],
        queue_capacity: vec![4],
        type_to_pool: vec![vec![0, 1]],
        pool_to_type: vec![vec![0], vec![0]],
    }
}

fn build_driver(horizon: f64) -> SamplePathDriver<CallCenterCtmc> {
    let bounds = StaffingBox::new(
        StaffingVector::new(vec![1, 1]),
        StaffingVector::new(vec![2, 2]),
    )
    .expect("valid bounds");
    SamplePathDriver::new(
        CallCenterCtmc::new(params()),
        bounds,
        RateSchedule::default(),
        DriverConfig::new(horizon, SplitMode::Full, 0x0DDB_A11),
    )
    .expect("valid driver")
}

/// Poisson pmf computed iteratively.
fn poisson_pmf(lambda: f64, upto: usize) -> Vec<f64> {
    let mut pmf = Vec::with_capacity(upto + 1);
    let mut p = (-lambda).exp();
    pmf.push(p);
    for k in 1..=upto {
        p *= lambda / k as f64;
        pmf.push(p);
    }
    pmf
}

#[test]
fn budgets_pass_a_chi_square_goodness_of_fit() {
    const NUM_PATHS: u64 = 4000;
    let horizon = 0.75;
    let driver = build_driver(horizon);
    let model = CallCenterCtmc::new(params());
    let lambda = model.total_jump_rate() * horizon;

    let budgets: Vec<u64> = (0..NUM_PATHS).map(|p| driver.draw_budget(p)).collect();

    // sample mean within 4 standard errors of λ
    let mean = budgets.iter().sum::<u64>() as f64 / NUM_PATHS as f64;
    let std_err = (lambda / NUM_PATHS as f64).sqrt();
    assert!(
        (mean - lambda).abs() < 4.0 * std_err,
        "sample mean {mean:.3} too far from λ = {lambda:.3}"
    );

    // greedy binning: consecutive counts merged until expected ≥ 5
    let upto = (lambda + 10.0 * lambda.sqrt()).ceil() as usize;
    let pmf = poisson_pmf(lambda, upto);
    let mut observed_by_count = vec![0u64; upto + 2];
    for &b in &budgets {
        let idx = (b as usize).min(upto + 1);
        observed_by_count[idx] += 1;
    }

    let mut bins: Vec<(f64, u64)> = Vec::new();
    let mut acc_p = 0.0;
    let mut acc_o = 0u64;
    for k in 0..=upto {
        acc_p += pmf[k];
        acc_o += observed_by_count[k];
        if acc_p * NUM_PATHS as f64 >= 5.0 {
            bins.push((acc_p, acc_o));
            acc_p = 0.0;
            acc_o = 0;
        }
    }
    // fold the remainder and the far tail into the last bin so every bin
    // keeps an expectation well above zero
    let tail_p = (1.0 - bins.iter().map(|(p, _)| p).sum::<f64>() - acc_p).max(0.0);
    let last = bins.last_mut().expect("at least one bin");
    last.0 += acc_p + tail_p;
    last.1 += acc_o + observed_by_count[upto + 1];

    let chi2: f64 = bins
        .iter()
        .map(|&(p, o)| {
            let expected = p * NUM_PATHS as f64;
            let diff = o as f64 - expected;
            diff * diff / expected
        })
        .sum();
    let df = (bins.len() - 1) as f64;
    let threshold = df + 4.5 * (2.0 * df).sqrt();
    assert!(
        chi2 < threshold,
        "chi-square {chi2:.2} above threshold {threshold:.2} (df = {df}); \
         budgets do not look Poisson({lambda:.2})"
    );
}

#[test]
fn budget_is_random_across_paths_and_reproducible_per_path() {
    let driver = build_driver(2.0);
    let first: Vec<u64> = (0..32).map(|p| driver.draw_budget(p)).collect();
    let second: Vec<u64> = (0..32).map(|p| driver.draw_budget(p)).collect();
    assert_eq!(first, second, "budget draws must be reproducible");
    assert!(
        first.windows(2).any(|w| w[0] != w[1]),
        "budgets must vary across paths"
    );
}
