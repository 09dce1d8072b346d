//! Scenario parameters and their validation.
//!
//! [`ScenarioParams`] is the loosely-constructed wire shape (every field has a
//! default). [`Scenario`] is the validated, immutable form the engine accepts;
//! the only way to obtain one is [`Scenario::new`].

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::calendar::{is_month_start, month_starts_next};
use crate::error::ValidationError;
use crate::roster::HerdRoster;

/// Reproduction distributions used by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Resample observed intervals from the roster.
    #[default]
    Empirical,
    /// Fit parametric distributions to the observed intervals.
    Theoretical,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Empirical => f.write_str("empirical"),
            Mode::Theoretical => f.write_str("theoretical"),
        }
    }
}

/// Source of days-in-milk for roster cows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimMode {
    /// Count from `last_calving_date`.
    #[default]
    FromCalving,
    /// Start from the days-in-milk recorded on the roster and advance it by
    /// the days since the report date. Cows without a recorded value, and
    /// any cow after its next calving, fall back to `from_calving`.
    FromDatasetField,
}

impl std::fmt::Display for DimMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DimMode::FromCalving => f.write_str("from_calving"),
            DimMode::FromDatasetField => f.write_str("from_dataset_field"),
        }
    }
}

/// Replacement purchase policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchasePolicyKind {
    #[default]
    Manual,
    AutoCounter,
    AutoForecast,
}

impl std::fmt::Display for PurchasePolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchasePolicyKind::Manual => f.write_str("manual"),
            PurchasePolicyKind::AutoCounter => f.write_str("auto_counter"),
            PurchasePolicyKind::AutoForecast => f.write_str("auto_forecast"),
        }
    }
}

/// How animals are grouped for cull-hazard estimation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CullGrouping {
    #[default]
    Lactation,
    /// Lactation crossed with the coarse status of the animal.
    LactationStatus,
    AgeBand,
}

/// Named numeric coefficients of the reproduction model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelCoefficients {
    pub insem_age_min_days: u32,
    pub insem_age_max_days: u32,
    /// Minimum days after calving before a cow may be served.
    pub voluntary_waiting_period: u32,
    /// Open cows this many days past the waiting period are culled.
    pub max_service_period_after_vwp: u32,
    pub service_period_mean_days: f64,
    pub service_period_std_days: f64,
    /// Probability that a single service results in pregnancy.
    pub conception_rate: f64,
    pub return_to_service_days: u32,
    pub gestation_lo: u32,
    pub gestation_hi: u32,
    pub gestation_mean: f64,
    pub gestation_std: f64,
    /// Multiplier applied to every cull hazard.
    pub population_regulation: f64,
    /// Probability that a calf is female and joins the herd.
    pub heifer_birth_prob: f64,
    pub purchased_days_to_calving_lo: u32,
    pub purchased_days_to_calving_hi: u32,
}

impl Default for ModelCoefficients {
    fn default() -> Self {
        Self {
            insem_age_min_days: 365,
            insem_age_max_days: 395,
            voluntary_waiting_period: 50,
            max_service_period_after_vwp: 300,
            service_period_mean_days: 115.0,
            service_period_std_days: 10.0,
            conception_rate: 1.0,
            return_to_service_days: 21,
            gestation_lo: 275,
            gestation_hi: 280,
            gestation_mean: 277.5,
            gestation_std: 2.0,
            population_regulation: 1.0,
            heifer_birth_prob: 0.5,
            purchased_days_to_calving_lo: 1,
            purchased_days_to_calving_hi: 280,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CullingParams {
    /// Estimate monthly hazards from roster history instead of using the
    /// fallback everywhere.
    pub estimate_from_roster: bool,
    pub grouping: CullGrouping,
    pub fallback_monthly_hazard: f64,
    pub age_band_years: u32,
}

impl Default for CullingParams {
    fn default() -> Self {
        Self {
            estimate_from_roster: true,
            grouping: CullGrouping::Lactation,
            fallback_monthly_hazard: 0.008,
            age_band_years: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplacementParams {
    /// Replacement heifers introduced per culled animal (`auto_counter`).
    pub replacement_ratio: f64,
}

impl Default for ReplacementParams {
    fn default() -> Self {
        Self {
            replacement_ratio: 1.0,
        }
    }
}

/// One scheduled purchase of pregnant heifers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PurchaseItem {
    pub date_in: NaiveDate,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_calving_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_pregnant: Option<u32>,
}

/// Upper bounds enforced on externally supplied scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioLimits {
    pub max_horizon_months: u32,
    pub max_mc_runs: u32,
}

impl Default for ScenarioLimits {
    fn default() -> Self {
        Self {
            max_horizon_months: 120,
            max_mc_runs: 500,
        }
    }
}

/// Scenario parameters as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioParams {
    pub horizon_months: u32,
    pub mc_runs: u32,
    pub seed: u64,
    pub mode: Mode,
    pub dim_mode: DimMode,
    pub purchase_policy: PurchasePolicyKind,
    /// Days between ordering and arrival (`auto_forecast`).
    pub lead_time_days: u32,
    /// Mass of the central band; 0.8 frames it with p10/p90.
    pub confidence_central: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub future_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_date: Option<NaiveDate>,
    pub model: ModelCoefficients,
    pub culling: CullingParams,
    pub replacement: ReplacementParams,
    pub purchases: Vec<PurchaseItem>,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            horizon_months: 36,
            mc_runs: 1,
            seed: 42,
            mode: Mode::Empirical,
            dim_mode: DimMode::FromCalving,
            purchase_policy: PurchasePolicyKind::Manual,
            lead_time_days: 90,
            confidence_central: 0.8,
            future_date: None,
            report_date: None,
            model: ModelCoefficients::default(),
            culling: CullingParams::default(),
            replacement: ReplacementParams::default(),
            purchases: Vec::new(),
        }
    }
}

impl ScenarioParams {
    /// Lower and upper quantiles framing the central band.
    pub fn band_quantiles(&self) -> (f64, f64) {
        let tail = (1.0 - self.confidence_central) / 2.0;
        (tail, 1.0 - tail)
    }
}

/// A validated, immutable scenario bound to a roster's report date.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    params: ScenarioParams,
    report_date: NaiveDate,
    months: Vec<NaiveDate>,
}

impl Scenario {
    /// Validate `params` against `roster` and `limits`.
    pub fn new(
        params: ScenarioParams,
        roster: &HerdRoster,
        limits: &ScenarioLimits,
    ) -> Result<Self, ValidationError> {
        let report_date = roster.report_date;
        if let Some(given) = params.report_date {
            if given != report_date {
                return Err(ValidationError::ReportDateMismatch {
                    given,
                    roster: report_date,
                });
            }
        }

        if params.horizon_months == 0 || params.horizon_months > limits.max_horizon_months {
            return Err(ValidationError::HorizonOutOfRange {
                value: params.horizon_months,
                max: limits.max_horizon_months,
            });
        }
        if params.mc_runs == 0 || params.mc_runs > limits.max_mc_runs {
            return Err(ValidationError::McRunsOutOfRange {
                value: params.mc_runs,
                max: limits.max_mc_runs,
            });
        }
        if params.lead_time_days == 0 {
            return Err(ValidationError::NonPositiveLeadTime);
        }
        check_bounds("confidence_central", params.confidence_central, 0.5, 0.99)?;

        validate_model(&params.model)?;
        validate_culling(&params.culling)?;
        check_bounds(
            "replacement_ratio",
            params.replacement.replacement_ratio,
            0.0,
            1.0,
        )?;

        let months = month_starts_next(report_date, params.horizon_months).map_err(|_| {
            ValidationError::HorizonBeyondCalendar {
                report_date,
                months: params.horizon_months,
            }
        })?;
        let horizon_end = months.last().copied().unwrap_or(report_date);

        if !params.purchases.is_empty() && params.purchase_policy != PurchasePolicyKind::Manual {
            return Err(ValidationError::PurchasesRequireManualPolicy);
        }
        for (index, item) in params.purchases.iter().enumerate() {
            validate_purchase(index, item, report_date, horizon_end, &params.model)?;
        }

        if let Some(date) = params.future_date {
            if !is_month_start(date) {
                return Err(ValidationError::FutureDateNotMonthStart { date });
            }
            let start = months.first().copied().unwrap_or(report_date);
            if date < start || date > horizon_end {
                return Err(ValidationError::FutureDateOutOfRange {
                    date,
                    start,
                    end: horizon_end,
                });
            }
        }

        let mut seen = BTreeSet::new();
        for animal in &roster.animals {
            if !seen.insert(animal.id) {
                return Err(ValidationError::DuplicateAnimal(animal.id.0));
            }
        }

        Ok(Self {
            params,
            report_date,
            months,
        })
    }

    pub fn params(&self) -> &ScenarioParams {
        &self.params
    }

    pub fn report_date(&self) -> NaiveDate {
        self.report_date
    }

    /// Tick dates: the first day of each month in the horizon.
    pub fn months(&self) -> &[NaiveDate] {
        &self.months
    }

    pub fn horizon_end(&self) -> NaiveDate {
        self.months.last().copied().unwrap_or(self.report_date)
    }

    pub fn mc_runs(&self) -> u32 {
        self.params.mc_runs
    }

    pub fn seed(&self) -> u64 {
        self.params.seed
    }

    /// Seed of the `index`-th Monte Carlo run.
    pub fn run_seed(&self, index: u32) -> u64 {
        self.params
            .seed
            .wrapping_add(u64::from(index).wrapping_mul(RUN_SEED_STRIDE))
    }

    /// SHA-256 hex of the canonical JSON of the parameters.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(&self.params).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

/// Distance between consecutive run seeds.
pub const RUN_SEED_STRIDE: u64 = 9973;

fn check_bounds(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= lo && value <= hi {
        Ok(())
    } else {
        Err(ValidationError::OutOfBounds {
            field,
            value,
            lo,
            hi,
        })
    }
}

fn check_range(field: &'static str, min: f64, max: f64) -> Result<(), ValidationError> {
    if min <= max {
        Ok(())
    } else {
        Err(ValidationError::InvertedRange { field, min, max })
    }
}

fn validate_model(m: &ModelCoefficients) -> Result<(), ValidationError> {
    check_range(
        "insem_age_days",
        f64::from(m.insem_age_min_days),
        f64::from(m.insem_age_max_days),
    )?;
    check_range(
        "gestation_days",
        f64::from(m.gestation_lo),
        f64::from(m.gestation_hi),
    )?;
    check_range(
        "purchased_days_to_calving",
        f64::from(m.purchased_days_to_calving_lo),
        f64::from(m.purchased_days_to_calving_hi),
    )?;
    check_bounds(
        "gestation_mean",
        m.gestation_mean,
        f64::from(m.gestation_lo),
        f64::from(m.gestation_hi),
    )?;
    check_bounds("gestation_std", m.gestation_std, 0.0, 30.0)?;
    check_bounds("service_period_mean_days", m.service_period_mean_days, 1.0, 600.0)?;
    check_bounds("service_period_std_days", m.service_period_std_days, 0.0, 200.0)?;
    check_bounds("conception_rate", m.conception_rate, 0.0, 1.0)?;
    check_bounds("heifer_birth_prob", m.heifer_birth_prob, 0.0, 1.0)?;
    check_bounds("population_regulation", m.population_regulation, 0.0, 10.0)?;
    if m.gestation_lo == 0 {
        return Err(ValidationError::OutOfBounds {
            field: "gestation_lo",
            value: 0.0,
            lo: 1.0,
            hi: f64::from(m.gestation_hi),
        });
    }
    if m.return_to_service_days == 0 {
        return Err(ValidationError::OutOfBounds {
            field: "return_to_service_days",
            value: 0.0,
            lo: 1.0,
            hi: 365.0,
        });
    }
    Ok(())
}

fn validate_culling(c: &CullingParams) -> Result<(), ValidationError> {
    check_bounds("fallback_monthly_hazard", c.fallback_monthly_hazard, 0.0, 0.2)?;
    check_bounds("age_band_years", f64::from(c.age_band_years), 1.0, 10.0)
}

fn validate_purchase(
    index: usize,
    item: &PurchaseItem,
    report_date: NaiveDate,
    horizon_end: NaiveDate,
    model: &ModelCoefficients,
) -> Result<(), ValidationError> {
    if item.count == 0 || item.count > 5000 {
        return Err(ValidationError::InvalidPurchase {
            index,
            reason: format!("count must be within 1..=5000, got {}", item.count),
        });
    }
    if item.date_in < report_date || item.date_in > horizon_end {
        return Err(ValidationError::InvalidPurchase {
            index,
            reason: format!(
                "date_in {} is outside {}..={}",
                item.date_in, report_date, horizon_end
            ),
        });
    }
    match (item.expected_calving_date, item.days_pregnant) {
        (Some(_), Some(_)) => Err(ValidationError::AmbiguousPurchaseGestation { index }),
        (Some(calving), None) if calving <= item.date_in => Err(ValidationError::InvalidPurchase {
            index,
            reason: format!(
                "expected_calving_date {} must be after date_in {}",
                calving, item.date_in
            ),
        }),
        (None, Some(days)) if days > model.gestation_hi => Err(ValidationError::InvalidPurchase {
            index,
            reason: format!(
                "days_pregnant {} exceeds gestation_hi {}",
                days, model.gestation_hi
            ),
        }),
        _ => Ok(()),
    }
}
