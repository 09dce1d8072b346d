//! The agent-based simulation engine.
//!
//! [`Engine::prepare`] does the per-roster work once (normalization,
//! empirical statistics, sampler fitting, cull-hazard estimation);
//! [`Engine::run`] then produces one realization per seed. Every draw in a
//! run comes from a single `ChaCha8Rng` seeded with the run seed, and animals
//! are visited in a fixed order, so a run is a pure function of
//! `(roster, scenario, seed)`.
//!
//! Within a month the transitions are applied in this order:
//! calving, dry-off, insemination, culling, purchases.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::animal::{Animal, AnimalId, Origin, ReproStatus};
use crate::calendar::{add_days, days_between};
use crate::culling::{CullModel, ESTIMATION_WINDOW_DAYS};
use crate::empirical::EmpiricalStats;
use crate::error::Result;
use crate::params::{ModelCoefficients, PurchasePolicyKind, Scenario};
use crate::purchase::{Arrival, ArrivalKind, CalvingSpec, PurchaseLog, PurchasePolicy, TickView};
use crate::roster::HerdRoster;
use crate::sampler::ReproductionModel;
use crate::snapshot::{EventTally, HerdSnapshot};

/// Window after the report date over which overdue services are spread.
const OVERDUE_SERVICE_SPREAD_DAYS: i64 = 30;
const AVG_MONTH_DAYS: f64 = 30.4375;

/// One realization: a snapshot and a tally per horizon month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRun {
    pub seed: u64,
    /// Composition on the report date.
    pub initial: HerdSnapshot,
    pub snapshots: Vec<HerdSnapshot>,
    pub tallies: Vec<EventTally>,
    pub purchases: PurchaseLog,
    /// Clamped probabilities and similar data conditions met during the run.
    pub warnings: Vec<String>,
}

impl SimulationRun {
    /// `(snapshot, tally)` per month, in calendar order.
    pub fn months(&self) -> impl Iterator<Item = (&HerdSnapshot, &EventTally)> {
        self.snapshots.iter().zip(self.tallies.iter())
    }
}

/// Run one realization without keeping the prepared engine.
pub fn simulate(roster: &HerdRoster, scenario: &Scenario, seed: u64) -> Result<SimulationRun> {
    Engine::prepare(roster, scenario.clone()).run(seed)
}

/// Per-roster state shared read-only by every run of a scenario.
#[derive(Debug, Clone)]
pub struct Engine {
    scenario: Scenario,
    herd: Vec<Animal>,
    initial: HerdSnapshot,
    model: ReproductionModel,
    culls: CullModel,
    warnings: Vec<String>,
    first_free_id: u64,
}

impl Engine {
    pub fn prepare(roster: &HerdRoster, scenario: Scenario) -> Self {
        let params = scenario.params();
        let normalized = roster.normalize();
        let mut warnings = normalized.warnings;

        let stats = EmpiricalStats::from_roster(roster);
        let (model, sampler_warnings) = ReproductionModel::build(params.mode, &stats, &params.model);
        warnings.extend(sampler_warnings);

        let culls = CullModel::estimate(roster, &params.culling, params.model.population_regulation);

        if normalized.animals.is_empty() {
            warnings.push(format!(
                "roster has no live animals on {}; forecast is empty",
                roster.report_date
            ));
        }

        let initial = HerdSnapshot::capture(roster.report_date, params.dim_mode, &normalized.animals);
        let first_free_id = roster
            .animals
            .iter()
            .map(|a| a.id.0)
            .max()
            .map_or(1, |max| max.saturating_add(1));

        debug!(
            live = normalized.animals.len(),
            mode = %params.mode,
            policy = %params.purchase_policy,
            warnings = warnings.len(),
            "simulation engine prepared"
        );

        Self {
            scenario,
            herd: normalized.animals,
            initial,
            model,
            culls,
            warnings,
            first_free_id,
        }
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn initial_snapshot(&self) -> &HerdSnapshot {
        &self.initial
    }

    /// Warnings raised while preparing the roster and the model.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn reproduction_model(&self) -> &ReproductionModel {
        &self.model
    }

    pub fn cull_model(&self) -> &CullModel {
        &self.culls
    }

    /// Human-readable modelling assumptions for result metadata.
    pub fn assumptions(&self) -> Vec<String> {
        let p = self.scenario.params();
        let m = &p.model;
        let mut out = vec![
            "monthly time step; transitions applied as calving, dry-off, insemination, culling, purchases".to_string(),
            format!("{} reproduction distributions", p.mode),
            format!(
                "gestation {}..={} days (mean {}, sd {})",
                m.gestation_lo, m.gestation_hi, m.gestation_mean, m.gestation_std
            ),
            format!("voluntary waiting period {} days", m.voluntary_waiting_period),
            format!("conception rate per service {}", m.conception_rate),
            format!("female calf probability {}", m.heifer_birth_prob),
            format!(
                "open cows culled {} days after the voluntary waiting period",
                m.max_service_period_after_vwp
            ),
        ];
        if p.culling.estimate_from_roster {
            out.push(format!(
                "monthly cull hazards estimated from the last {} days of roster history, fallback {}",
                ESTIMATION_WINDOW_DAYS,
                p.culling.fallback_monthly_hazard
            ));
        } else {
            out.push(format!(
                "constant monthly cull hazard {}",
                p.culling.fallback_monthly_hazard
            ));
        }
        if (m.population_regulation - 1.0).abs() > f64::EPSILON {
            out.push(format!("cull hazards scaled by {}", m.population_regulation));
        }
        out.push(match p.purchase_policy {
            PurchasePolicyKind::Manual => {
                format!("{} scheduled purchase lots", p.purchases.len())
            }
            PurchasePolicyKind::AutoCounter => format!(
                "culled animals replaced at ratio {}",
                p.replacement.replacement_ratio
            ),
            PurchasePolicyKind::AutoForecast => format!(
                "replacements ordered {} days ahead to hold the report-date milking count",
                p.lead_time_days
            ),
        });
        out
    }

    /// Simulate one realization.
    pub fn run(&self, seed: u64) -> Result<SimulationRun> {
        let months = self.scenario.months();
        let mut state = RunState::new(self, seed)?;
        let mut snapshots = Vec::with_capacity(months.len());
        let mut tallies = Vec::with_capacity(months.len());

        let dim_mode = self.scenario.params().dim_mode;
        for (index, &month) in months.iter().enumerate() {
            let tally = state.tick(index, month)?;
            snapshots.push(HerdSnapshot::capture(month, dim_mode, &state.animals));
            tallies.push(tally);
        }

        debug!(
            seed,
            months = months.len(),
            live_end = state.animals.len(),
            "simulation run finished"
        );

        Ok(SimulationRun {
            seed,
            initial: self.initial.clone(),
            snapshots,
            tallies,
            purchases: state.log,
            warnings: state.warnings.into_iter().collect(),
        })
    }
}

/// Mutable state of one realization.
struct RunState<'e> {
    engine: &'e Engine,
    rng: ChaCha8Rng,
    animals: Vec<Animal>,
    next_id: u64,
    policy: PurchasePolicy,
    log: PurchaseLog,
    warnings: BTreeSet<String>,
}

impl<'e> RunState<'e> {
    fn new(engine: &'e Engine, seed: u64) -> Result<Self> {
        let mut state = Self {
            engine,
            rng: ChaCha8Rng::seed_from_u64(seed),
            animals: engine.herd.clone(),
            next_id: engine.first_free_id,
            policy: PurchasePolicy::for_scenario(&engine.scenario, engine.initial.milking),
            log: PurchaseLog::default(),
            warnings: BTreeSet::new(),
        };
        state.plan_roster_dry_offs()?;
        Ok(state)
    }

    fn report_date(&self) -> NaiveDate {
        self.engine.scenario.report_date()
    }

    /// Pregnant lactating roster cows need a dry-off date.
    fn plan_roster_dry_offs(&mut self) -> Result<()> {
        let report = self.report_date();
        let gestation_mean = self.engine.scenario.params().model.gestation_mean.round() as i64;
        let Self {
            engine, rng, animals, ..
        } = self;

        for a in animals.iter_mut() {
            if a.status != ReproStatus::PregnantMilking {
                continue;
            }
            let Some(calving) = a.expected_calving_date else {
                continue;
            };
            a.planned_dry_date = match a.dry_off_date.filter(|d| *d > report) {
                Some(recorded) => Some(recorded),
                None => {
                    let conception = a
                        .insemination_date
                        .unwrap_or_else(|| add_days(calving, -gestation_mean));
                    Some(plan_dry_off(&engine.model, rng, conception, calving)?)
                }
            };
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> AnimalId {
        let id = AnimalId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    fn tick(&mut self, index: usize, month: NaiveDate) -> Result<EventTally> {
        let mut tally = EventTally::default();
        self.calve(month, &mut tally);
        self.dry_off(month, &mut tally);
        self.inseminate(month, &mut tally)?;
        self.cull(month, &mut tally);
        self.replenish(index, month, &mut tally)?;
        Ok(tally)
    }

    fn calve(&mut self, month: NaiveDate, tally: &mut EventTally) {
        let female_prob = self.engine.scenario.params().model.heifer_birth_prob;
        let mut births = Vec::new();

        for a in self.animals.iter_mut() {
            let Some(due) = a.expected_calving_date else {
                continue;
            };
            if due > month {
                continue;
            }
            a.calve(due);
            tally.calvings += 1;
            if self.rng.gen::<f64>() < female_prob {
                births.push(due);
            }
        }

        for born in births {
            let id = self.allocate_id();
            self.animals
                .push(Animal::new(id, born, ReproStatus::OpenHeifer).with_origin(Origin::Born));
            tally.heifer_births += 1;
        }
    }

    fn dry_off(&mut self, month: NaiveDate, tally: &mut EventTally) {
        for a in self.animals.iter_mut() {
            if a.status != ReproStatus::PregnantMilking {
                continue;
            }
            if let Some(dry) = a.planned_dry_date.filter(|d| *d <= month) {
                a.status = ReproStatus::Dry;
                a.dry_off_date = Some(dry);
                a.planned_dry_date = None;
                tally.dryoffs += 1;
            }
        }
    }

    fn inseminate(&mut self, month: NaiveDate, tally: &mut EventTally) -> Result<()> {
        let report = self.report_date();
        let coeffs = &self.engine.scenario.params().model;
        let model = &self.engine.model;
        let rng = &mut self.rng;

        for a in self.animals.iter_mut() {
            if a.status == ReproStatus::InseminatedHeifer {
                let served = a.insemination_date.unwrap_or(report);
                if rng.gen::<f64>() < coeffs.conception_rate {
                    conceive(model, rng, a, served)?;
                    tally.conceptions += 1;
                    continue;
                }
                a.status = ReproStatus::OpenHeifer;
                let retry = add_days(served, i64::from(coeffs.return_to_service_days));
                a.planned_service_date = Some(not_before_report(rng, retry, report));
            }

            if !a.is_open() {
                continue;
            }
            if a.planned_service_date.is_none() {
                let planned = plan_service(model, coeffs, rng, a, report)?;
                a.planned_service_date = Some(not_before_report(rng, planned, report));
            }

            while let Some(planned) = a.planned_service_date.filter(|d| *d <= month) {
                a.insemination_date = Some(planned);
                if rng.gen::<f64>() < coeffs.conception_rate {
                    conceive(model, rng, a, planned)?;
                    tally.conceptions += 1;
                    break;
                }
                a.planned_service_date =
                    Some(add_days(planned, i64::from(coeffs.return_to_service_days)));
            }
        }
        Ok(())
    }

    fn cull(&mut self, month: NaiveDate, tally: &mut EventTally) {
        let coeffs = &self.engine.scenario.params().model;
        let open_limit =
            i64::from(coeffs.voluntary_waiting_period) + i64::from(coeffs.max_service_period_after_vwp);
        let culls = &self.engine.culls;
        let mut kept = Vec::with_capacity(self.animals.len());

        for a in self.animals.drain(..) {
            if a.status == ReproStatus::PregnantHeifer {
                kept.push(a);
                continue;
            }

            let (p, raw) = culls.monthly_probability(&a, month);
            if let Some(raw) = raw {
                self.warnings.insert(format!(
                    "cull probability {raw:.3} for group {} clamped to [0, 1]",
                    culls.group_of(&a, month)
                ));
            }
            let drawn = self.rng.gen::<f64>() < p;

            let reproductive = a.is_open()
                && a.parity > 0
                && a.last_calving_date
                    .is_some_and(|calved| days_between(calved, month) > open_limit);

            if drawn || reproductive {
                tally.culls += 1;
            } else {
                kept.push(a);
            }
        }
        self.animals = kept;
    }

    fn replenish(&mut self, index: usize, month: NaiveDate, tally: &mut EventTally) -> Result<()> {
        let projected_milking = match self.policy.projection_date(month) {
            Some(at) => project_milking(&self.animals, &self.engine.culls, month, at),
            None => 0.0,
        };
        let arrivals = self.policy.on_tick(TickView {
            index,
            date: month,
            culls: tally.culls,
            projected_milking,
        });

        let policy = self.policy.kind();
        for arrival in arrivals {
            self.log.record(&arrival, policy);
            for _ in 0..arrival.count {
                let heifer = self.purchased_heifer(&arrival)?;
                self.animals.push(heifer);
            }
            match arrival.kind {
                ArrivalKind::Purchase => tally.purchases_in += arrival.count,
                ArrivalKind::Introduction => tally.heifer_intros += arrival.count,
            }
        }
        Ok(())
    }

    fn purchased_heifer(&mut self, arrival: &Arrival) -> Result<Animal> {
        let coeffs = &self.engine.scenario.params().model;
        let gestation_mean = coeffs.gestation_mean.round() as i64;

        let calving = match arrival.calving {
            CalvingSpec::On(date) => date,
            CalvingSpec::DaysPregnant(days) => {
                add_days(arrival.date, (gestation_mean - i64::from(days)).max(1))
            }
            CalvingSpec::Draw => {
                let days = self
                    .engine
                    .model
                    .purchased_days_to_calving
                    .sample(&mut self.rng)?;
                add_days(arrival.date, days.max(1))
            }
        }
        .max(add_days(arrival.date, 1));

        let conception = add_days(calving, -gestation_mean);
        let service_age =
            (i64::from(coeffs.insem_age_min_days) + i64::from(coeffs.insem_age_max_days)) / 2;
        let origin = match arrival.kind {
            ArrivalKind::Purchase => Origin::Purchased,
            ArrivalKind::Introduction => Origin::Introduced,
        };

        let mut heifer = Animal::new(
            self.allocate_id(),
            add_days(conception, -service_age),
            ReproStatus::PregnantHeifer,
        )
        .with_origin(origin);
        heifer.insemination_date = Some(conception);
        heifer.expected_calving_date = Some(calving);
        Ok(heifer)
    }
}

fn not_before_report(rng: &mut ChaCha8Rng, planned: NaiveDate, report: NaiveDate) -> NaiveDate {
    if planned > report {
        planned
    } else {
        add_days(report, rng.gen_range(1..=OVERDUE_SERVICE_SPREAD_DAYS))
    }
}

fn plan_service(
    model: &ReproductionModel,
    coeffs: &ModelCoefficients,
    rng: &mut ChaCha8Rng,
    a: &Animal,
    report: NaiveDate,
) -> Result<NaiveDate> {
    if a.status.is_heifer() {
        let age = model.heifer_age.sample(rng)?.clamp(
            i64::from(coeffs.insem_age_min_days),
            i64::from(coeffs.insem_age_max_days),
        );
        return Ok(add_days(a.birth_date, age));
    }
    let period = model
        .service_period
        .sample(rng)?
        .max(i64::from(coeffs.voluntary_waiting_period));
    Ok(add_days(a.last_calving_date.unwrap_or(report), period))
}

fn conceive(
    model: &ReproductionModel,
    rng: &mut ChaCha8Rng,
    a: &mut Animal,
    served: NaiveDate,
) -> Result<()> {
    let gestation = model.gestation.sample(rng)?;
    let calving = add_days(served, gestation.max(1));
    a.insemination_date = Some(served);
    a.expected_calving_date = Some(calving);
    a.planned_service_date = None;
    match a.status {
        ReproStatus::OpenHeifer | ReproStatus::InseminatedHeifer => {
            a.status = ReproStatus::PregnantHeifer;
        }
        ReproStatus::Milking => {
            a.status = ReproStatus::PregnantMilking;
            a.planned_dry_date = Some(plan_dry_off(model, rng, served, calving)?);
        }
        _ => {}
    }
    Ok(())
}

fn plan_dry_off(
    model: &ReproductionModel,
    rng: &mut ChaCha8Rng,
    conception: NaiveDate,
    calving: NaiveDate,
) -> Result<NaiveDate> {
    let days = model.conception_to_dry.sample(rng)?.max(1);
    Ok(add_days(conception, days).min(add_days(calving, -1)))
}

/// Expected number of animals lactating on `at`, weighted by the chance of
/// surviving culling until then.
fn project_milking(animals: &[Animal], culls: &CullModel, from: NaiveDate, at: NaiveDate) -> f64 {
    let months_ahead = (days_between(from, at).max(0) as f64 / AVG_MONTH_DAYS).ceil() as i32;
    animals
        .iter()
        .filter(|a| match a.status {
            ReproStatus::Milking | ReproStatus::PregnantMilking => {
                match (a.planned_dry_date, a.expected_calving_date) {
                    (Some(dry), Some(calving)) => dry > at || calving <= at,
                    _ => true,
                }
            }
            ReproStatus::Dry | ReproStatus::PregnantHeifer => {
                a.expected_calving_date.is_some_and(|c| c <= at)
            }
            ReproStatus::OpenHeifer | ReproStatus::InseminatedHeifer => false,
        })
        .map(|a| {
            if a.status == ReproStatus::PregnantHeifer {
                1.0
            } else {
                let (p, _) = culls.monthly_probability(a, from);
                (1.0 - p).powi(months_ahead)
            }
        })
        .sum()
}
