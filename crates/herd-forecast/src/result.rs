//! Forecast Result and the ensemble accumulator that assembles it.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use herd_sim::{
    DimMode, Engine, EventTally, HerdSnapshot, Mode, PurchasePolicyKind, SimulationRun,
};
use serde::{Deserialize, Serialize};

use crate::percentile::quantiles;

/// Percentile herd composition at one date. Counts are rounded quantiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub date: NaiveDate,
    pub milking_count: u32,
    pub dry_count: u32,
    pub heifer_count: u32,
    pub pregnant_heifer_count: u32,
    pub avg_days_in_milk: Option<f64>,
}

/// Report-date point followed by one point per horizon month.
pub type ForecastSeries = Vec<ForecastPoint>;

/// Expected event counts for one month, `round(sum / runs)` per bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsByMonth {
    pub date: NaiveDate,
    pub calvings: u32,
    pub dryoffs: u32,
    pub conceptions: u32,
    pub culls: u32,
    pub purchases_in: u32,
    pub heifer_intros: u32,
    pub heifer_births: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    pub engine: String,
    pub mode: Mode,
    pub dim_mode: DimMode,
    pub purchase_policy: PurchasePolicyKind,
    pub confidence_central: f64,
    pub lower_quantile: f64,
    pub upper_quantile: f64,
    pub completed_runs: u32,
    pub base_seed: u64,
    pub scenario_digest: String,
    pub simulation_version: String,
    pub assumptions: Vec<String>,
    pub warnings: Vec<String>,
}

/// Aggregated outcome of a forecast job.
///
/// `series_p10` and `series_p90` hold the lower and upper quantiles given by
/// `confidence_central`; with the default of 0.8 they are p10 and p90.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub series_p10: ForecastSeries,
    pub series_p50: ForecastSeries,
    pub series_p90: ForecastSeries,
    pub events: Vec<EventsByMonth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub future_point: Option<ForecastPoint>,
    pub meta: ResultMeta,
}

#[derive(Debug, Clone, Default)]
struct MonthSamples {
    milking: Vec<f64>,
    dry: Vec<f64>,
    heifer: Vec<f64>,
    pregnant_heifer: Vec<f64>,
    avg_dim: Vec<f64>,
}

impl MonthSamples {
    fn push(&mut self, snap: &HerdSnapshot) {
        self.milking.push(f64::from(snap.milking));
        self.dry.push(f64::from(snap.dry));
        self.heifer.push(f64::from(snap.heifer));
        self.pregnant_heifer.push(f64::from(snap.pregnant_heifer));
        if let Some(dim) = snap.avg_days_in_milk.filter(|v| v.is_finite()) {
            self.avg_dim.push(dim);
        }
    }
}

/// Per-month sample sets folded from completed runs.
#[derive(Debug, Clone)]
pub struct Ensemble {
    initial: HerdSnapshot,
    dates: Vec<NaiveDate>,
    samples: Vec<MonthSamples>,
    event_sums: Vec<[u64; 7]>,
    run_warnings: BTreeSet<String>,
    completed: u32,
    lower_q: f64,
    upper_q: f64,
    future_date: Option<NaiveDate>,
    meta: ResultMeta,
}

impl Ensemble {
    pub fn new(engine: &Engine, simulation_version: &str) -> Self {
        let scenario = engine.scenario();
        let params = scenario.params();
        let (lower_q, upper_q) = params.band_quantiles();
        let months = scenario.months().len();

        Self {
            initial: engine.initial_snapshot().clone(),
            dates: scenario.months().to_vec(),
            samples: vec![MonthSamples::default(); months],
            event_sums: vec![[0; 7]; months],
            run_warnings: BTreeSet::new(),
            completed: 0,
            lower_q,
            upper_q,
            future_date: params.future_date,
            meta: ResultMeta {
                engine: "agent_based_monthly".to_string(),
                mode: params.mode,
                dim_mode: params.dim_mode,
                purchase_policy: params.purchase_policy,
                confidence_central: params.confidence_central,
                lower_quantile: lower_q,
                upper_quantile: upper_q,
                completed_runs: 0,
                base_seed: scenario.seed(),
                scenario_digest: scenario.digest(),
                simulation_version: simulation_version.to_string(),
                assumptions: engine.assumptions(),
                warnings: engine.warnings().to_vec(),
            },
        }
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    /// Fold one realization into the per-month samples.
    pub fn add(&mut self, run: &SimulationRun) {
        for (i, (snap, tally)) in run.months().enumerate() {
            if let Some(samples) = self.samples.get_mut(i) {
                samples.push(snap);
            }
            if let Some(sums) = self.event_sums.get_mut(i) {
                for (sum, n) in sums.iter_mut().zip(tally_buckets(tally)) {
                    *sum += u64::from(n);
                }
            }
        }
        self.run_warnings.extend(run.warnings.iter().cloned());
        self.completed += 1;
    }

    /// Reduce the runs folded so far to a result.
    pub fn assemble(&self) -> ForecastResult {
        let mut lower = Vec::with_capacity(self.dates.len() + 1);
        let mut median = Vec::with_capacity(self.dates.len() + 1);
        let mut upper = Vec::with_capacity(self.dates.len() + 1);

        let start = point_from_snapshot(&self.initial);
        lower.push(start.clone());
        median.push(start.clone());
        upper.push(start);

        let qs = [self.lower_q, 0.5, self.upper_q];
        for (date, samples) in self.dates.iter().zip(&self.samples) {
            let [lo, mid, hi] = band_points(*date, samples, &qs);
            lower.push(lo);
            median.push(mid);
            upper.push(hi);
        }

        let runs = u64::from(self.completed.max(1));
        let events = self
            .dates
            .iter()
            .zip(&self.event_sums)
            .map(|(date, sums)| {
                let avg = |i: usize| ((sums[i] as f64) / (runs as f64)).round() as u32;
                EventsByMonth {
                    date: *date,
                    calvings: avg(0),
                    dryoffs: avg(1),
                    conceptions: avg(2),
                    culls: avg(3),
                    purchases_in: avg(4),
                    heifer_intros: avg(5),
                    heifer_births: avg(6),
                }
            })
            .collect();

        let future_point = self
            .future_date
            .and_then(|date| median.iter().find(|p| p.date == date).cloned());

        let mut meta = self.meta.clone();
        meta.completed_runs = self.completed;
        for warning in &self.run_warnings {
            if !meta.warnings.contains(warning) {
                meta.warnings.push(warning.clone());
            }
        }

        ForecastResult {
            series_p10: lower,
            series_p50: median,
            series_p90: upper,
            events,
            future_point,
            meta,
        }
    }
}

fn tally_buckets(t: &EventTally) -> [u32; 7] {
    [
        t.calvings,
        t.dryoffs,
        t.conceptions,
        t.culls,
        t.purchases_in,
        t.heifer_intros,
        t.heifer_births,
    ]
}

fn point_from_snapshot(snap: &HerdSnapshot) -> ForecastPoint {
    ForecastPoint {
        date: snap.date,
        milking_count: snap.milking,
        dry_count: snap.dry,
        heifer_count: snap.heifer,
        pregnant_heifer_count: snap.pregnant_heifer,
        avg_days_in_milk: snap.avg_days_in_milk.map(round_tenth),
    }
}

fn band_points(date: NaiveDate, samples: &MonthSamples, qs: &[f64; 3]) -> [ForecastPoint; 3] {
    let counts = |values: &[f64]| -> [u32; 3] {
        let mut values = values.to_vec();
        match quantiles(&mut values, qs) {
            Some(q) => [round_count(q[0]), round_count(q[1]), round_count(q[2])],
            None => [0; 3],
        }
    };
    let milking = counts(&samples.milking);
    let dry = counts(&samples.dry);
    let heifer = counts(&samples.heifer);
    let pregnant = counts(&samples.pregnant_heifer);

    let mut dim_values = samples.avg_dim.clone();
    let dim = quantiles(&mut dim_values, qs);

    let point = |i: usize| ForecastPoint {
        date,
        milking_count: milking[i],
        dry_count: dry[i],
        heifer_count: heifer[i],
        pregnant_heifer_count: pregnant[i],
        avg_days_in_milk: dim.as_ref().map(|q| round_tenth(q[i])),
    };
    [point(0), point(1), point(2)]
}

fn round_count(value: f64) -> u32 {
    value.round().max(0.0) as u32
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
