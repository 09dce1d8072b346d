//! Integer-valued day samplers and the reproduction model built from them.

use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};

use crate::empirical::EmpiricalStats;
use crate::error::{Result, SimError};
use crate::params::{Mode, ModelCoefficients};

/// A distribution over whole days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntSampler {
    /// Uniform choice among observed values (duplicates weight the choice).
    Empirical { values: Vec<u32> },
    TruncatedNormal { mu: f64, sigma: f64, lo: i64, hi: i64 },
    LogNormal {
        mu_ln: f64,
        sigma_ln: f64,
        lo: i64,
        hi: i64,
    },
    /// Truncated-normal peak with probability `p_peak`, uniform tail otherwise.
    Mixture {
        p_peak: f64,
        mu_peak: f64,
        sigma_peak: f64,
        peak_lo: i64,
        peak_hi: i64,
        tail_lo: i64,
        tail_hi: i64,
    },
    /// Inclusive on both ends.
    Uniform { lo: i64, hi: i64 },
}

impl IntSampler {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Result<i64> {
        match self {
            IntSampler::Empirical { values } => {
                if values.is_empty() {
                    return Err(SimError::Sampler("empirical sampler has no values".into()));
                }
                Ok(i64::from(values[rng.gen_range(0..values.len())]))
            }
            IntSampler::TruncatedNormal { mu, sigma, lo, hi } => {
                truncated_normal(rng, *mu, *sigma, *lo, *hi)
            }
            IntSampler::LogNormal {
                mu_ln,
                sigma_ln,
                lo,
                hi,
            } => {
                let dist = LogNormal::new(*mu_ln, *sigma_ln)
                    .map_err(|e| SimError::Sampler(format!("lognormal: {e}")))?;
                Ok(clamp_round(dist.sample(rng), *lo, *hi))
            }
            IntSampler::Mixture {
                p_peak,
                mu_peak,
                sigma_peak,
                peak_lo,
                peak_hi,
                tail_lo,
                tail_hi,
            } => {
                if rng.gen::<f64>() < *p_peak {
                    truncated_normal(rng, *mu_peak, *sigma_peak, *peak_lo, *peak_hi)
                } else {
                    uniform(rng, *tail_lo, *tail_hi)
                }
            }
            IntSampler::Uniform { lo, hi } => uniform(rng, *lo, *hi),
        }
    }
}

fn truncated_normal<R: Rng>(rng: &mut R, mu: f64, sigma: f64, lo: i64, hi: i64) -> Result<i64> {
    let dist = Normal::new(mu, sigma).map_err(|e| SimError::Sampler(format!("normal: {e}")))?;
    Ok(clamp_round(dist.sample(rng), lo, hi))
}

fn uniform<R: Rng>(rng: &mut R, lo: i64, hi: i64) -> Result<i64> {
    if lo > hi {
        return Err(SimError::Sampler(format!("uniform bounds inverted: {lo} > {hi}")));
    }
    Ok(rng.gen_range(lo..=hi))
}

fn clamp_round(x: f64, lo: i64, hi: i64) -> i64 {
    if !x.is_finite() {
        return lo;
    }
    (x.round() as i64).clamp(lo, hi.max(lo))
}

/// Lognormal parameters `(mu_ln, sigma_ln, lo, hi)` matching the sample mean
/// and variance of `values`.
pub fn fit_lognormal(values: &[u32]) -> Option<(f64, f64, i64, i64)> {
    let lo = i64::from(*values.iter().min()?);
    let hi = i64::from(*values.iter().max()?);
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| (f64::from(v) - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0).max(1.0);
    if mean <= 0.0 {
        return Some((0.0, 1.0, lo, hi));
    }
    let sigma2 = (1.0 + var / (mean * mean)).ln();
    let sigma = sigma2.max(1e-9).sqrt();
    let mu = mean.ln() - 0.5 * sigma2;
    Some((mu, sigma, lo, hi))
}

/// Days counted as the peak of the conception-to-dry distribution.
const DRY_PEAK_MIN: u32 = 200;

fn fit_dry_mixture(values: &[u32]) -> IntSampler {
    let (peak, tail): (Vec<u32>, Vec<u32>) = values.iter().partition(|&&v| v >= DRY_PEAK_MIN);
    let p_peak = peak.len() as f64 / values.len().max(1) as f64;

    let (mu_peak, sigma_peak, peak_lo, peak_hi) = if peak.is_empty() {
        (220.0, 5.0, 210, 239)
    } else {
        let n = peak.len() as f64;
        let mean = peak.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let var = peak
            .iter()
            .map(|&v| (f64::from(v) - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0).max(1.0);
        let lo = peak.iter().min().copied().unwrap_or(DRY_PEAK_MIN);
        let hi = peak.iter().max().copied().unwrap_or(DRY_PEAK_MIN);
        (mean, var.sqrt().max(1.0), i64::from(lo), i64::from(hi))
    };

    let (tail_lo, tail_hi) = match (tail.iter().min(), tail.iter().max()) {
        (Some(&lo), Some(&hi)) => (i64::from(lo), i64::from(hi.min(DRY_PEAK_MIN - 1))),
        _ => (34, 199),
    };

    IntSampler::Mixture {
        p_peak,
        mu_peak,
        sigma_peak,
        peak_lo,
        peak_hi,
        tail_lo,
        tail_hi,
    }
}

/// Every distribution the engine draws days from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReproductionModel {
    /// Heifer age at first service.
    pub heifer_age: IntSampler,
    /// Calving to service.
    pub service_period: IntSampler,
    pub conception_to_dry: IntSampler,
    pub gestation: IntSampler,
    /// Days until calving of an automatically purchased pregnant heifer.
    pub purchased_days_to_calving: IntSampler,
}

impl ReproductionModel {
    /// Build samplers for `mode`, falling back to configured defaults where
    /// the roster has no observations. Fallbacks are reported as warnings.
    pub fn build(
        mode: Mode,
        stats: &EmpiricalStats,
        coefficients: &ModelCoefficients,
    ) -> (Self, Vec<String>) {
        let c = coefficients;
        let mut warnings = Vec::new();

        let default_age = IntSampler::Uniform {
            lo: i64::from(c.insem_age_min_days),
            hi: i64::from(c.insem_age_max_days),
        };
        let vwp = i64::from(c.voluntary_waiting_period);
        let default_service = IntSampler::TruncatedNormal {
            mu: c.service_period_mean_days,
            sigma: c.service_period_std_days,
            lo: vwp,
            hi: vwp + i64::from(c.max_service_period_after_vwp),
        };
        let default_dry = IntSampler::TruncatedNormal {
            mu: 220.0,
            sigma: 10.0,
            lo: 34,
            hi: 239,
        };

        let mut pick = |name: &str, fitted: Option<IntSampler>, default: IntSampler| {
            fitted.unwrap_or_else(|| {
                warnings.push(format!(
                    "no observed {name} in roster; using the default distribution"
                ));
                default
            })
        };

        let ages = stats.heifer_insem_ages.as_slice();
        let periods = stats.service_periods.as_slice();
        let to_dry = stats.conception_to_dry.as_slice();

        let (heifer_age, service_period, conception_to_dry) = match mode {
            Mode::Empirical => {
                let fit = |v: &[u32]| {
                    (!v.is_empty()).then(|| IntSampler::Empirical { values: v.to_vec() })
                };
                (
                    pick("heifer service ages", fit(ages), default_age),
                    pick("service periods", fit(periods), default_service),
                    pick("conception-to-dry intervals", fit(to_dry), default_dry),
                )
            }
            Mode::Theoretical => {
                let fit = |v: &[u32]| {
                    fit_lognormal(v).map(|(mu_ln, sigma_ln, lo, hi)| IntSampler::LogNormal {
                        mu_ln,
                        sigma_ln,
                        lo,
                        hi,
                    })
                };
                let dry = (!to_dry.is_empty()).then(|| fit_dry_mixture(to_dry));
                (
                    pick("heifer service ages", fit(ages), default_age),
                    pick("service periods", fit(periods), default_service),
                    pick("conception-to-dry intervals", dry, default_dry),
                )
            }
        };

        let model = Self {
            heifer_age,
            service_period,
            conception_to_dry,
            gestation: IntSampler::TruncatedNormal {
                mu: c.gestation_mean,
                sigma: c.gestation_std,
                lo: i64::from(c.gestation_lo),
                hi: i64::from(c.gestation_hi),
            },
            purchased_days_to_calving: IntSampler::Uniform {
                lo: i64::from(c.purchased_days_to_calving_lo),
                hi: i64::from(c.purchased_days_to_calving_hi),
            },
        };
        (model, warnings)
    }
}
