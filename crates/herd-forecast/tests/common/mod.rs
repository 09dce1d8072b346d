//! Rosters and configuration shared by the job integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use herd_forecast::ForecastConfig;
use herd_sim::{Animal, AnimalId, HerdRoster, ReproStatus, ScenarioParams};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// `n` milking cows calved 10..=100 days before 2024-01-01, plus a few
/// pregnant heifers so calvings occur inside short horizons.
pub fn herd(n: u64) -> Arc<HerdRoster> {
    let report = d(2024, 1, 1);
    let mut animals: Vec<Animal> = (0..n)
        .map(|i| {
            let dim = 10 + (i % 10) as i64 * 10;
            Animal::milking_cow(
                AnimalId(i + 1),
                d(2019, 1 + (i % 12) as u32, 1),
                1 + (i % 4) as u32,
                report - chrono::Duration::days(dim),
            )
        })
        .collect();
    for i in 0..(n / 5) {
        let mut heifer = Animal::new(AnimalId(10_000 + i), d(2022, 6, 1), ReproStatus::PregnantHeifer);
        heifer.insemination_date = Some(d(2023, 6, 1) + chrono::Duration::days(i as i64 * 3));
        heifer.expected_calving_date = Some(d(2024, 3, 10) + chrono::Duration::days(i as i64 * 3));
        animals.push(heifer);
    }
    Arc::new(HerdRoster::new(report, animals))
}

pub fn config() -> ForecastConfig {
    ForecastConfig::default()
        .with_workers(2)
        .with_batch_size(4)
        .with_max_concurrent_jobs(2)
        .with_heartbeat_interval(Duration::from_secs(60))
        .with_stuck_job_timeout(Duration::from_secs(600))
}

pub fn small_params(mc_runs: u32) -> ScenarioParams {
    ScenarioParams {
        horizon_months: 12,
        mc_runs,
        seed: 2024,
        ..Default::default()
    }
}

/// A job that takes far longer than any test timeout.
pub fn heavy_params() -> ScenarioParams {
    ScenarioParams {
        horizon_months: 120,
        mc_runs: 500,
        ..Default::default()
    }
}
