//! Monthly cull hazards per animal group.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};

use crate::animal::{Animal, ReproStatus};
use crate::calendar::add_days;
use crate::params::{CullGrouping, CullingParams};
use crate::roster::HerdRoster;

/// Look-back window for hazard estimation.
pub const ESTIMATION_WINDOW_DAYS: i64 = 730;
/// Months covered by the estimation window.
const WINDOW_MONTHS: f64 = 24.0;
/// Groups with fewer animals than this use the fallback hazard.
pub const MIN_GROUP_SIZE: usize = 30;
/// Upper bound on an estimated monthly hazard.
pub const MAX_ESTIMATED_HAZARD: f64 = 0.2;
/// Lactating cows at or below this many days in milk count as fresh.
pub const FRESH_COW_DAYS: i64 = 30;

/// Coarse status used by [`CullGrouping::LactationStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatusGroup {
    Heifer,
    Fresh,
    Inseminated,
    Pregnant,
    Dry,
    Other,
}

impl StatusGroup {
    pub fn of(animal: &Animal, on: NaiveDate) -> Self {
        match animal.status {
            s if s.is_heifer() => StatusGroup::Heifer,
            ReproStatus::Dry => StatusGroup::Dry,
            ReproStatus::PregnantMilking => StatusGroup::Pregnant,
            _ if animal.is_pregnant() => StatusGroup::Pregnant,
            _ if animal.insemination_date.is_some() => StatusGroup::Inseminated,
            _ => match animal.days_in_milk(on) {
                Some(dim) if dim <= FRESH_COW_DAYS => StatusGroup::Fresh,
                _ => StatusGroup::Other,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StatusGroup::Heifer => "heifer",
            StatusGroup::Fresh => "fresh",
            StatusGroup::Inseminated => "inseminated",
            StatusGroup::Pregnant => "pregnant",
            StatusGroup::Dry => "dry",
            StatusGroup::Other => "other",
        }
    }
}

/// Hazard group of an animal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CullGroup {
    /// Parity, with 4 standing for "4 or more".
    Lactation(u8),
    LactationStatus(u8, StatusGroup),
    /// Band index; the band spans `[index * width, (index + 1) * width)` years.
    AgeBand { index: u32, width: u32 },
}

impl fmt::Display for CullGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CullGroup::Lactation(n) if *n >= 4 => f.write_str("L4+"),
            CullGroup::Lactation(n) => write!(f, "L{n}"),
            CullGroup::LactationStatus(n, status) => {
                write!(f, "{}|{}", CullGroup::Lactation(*n), status.as_str())
            }
            CullGroup::AgeBand { index, width } => {
                write!(f, "age_{}-{}", index * width, (index + 1) * width)
            }
        }
    }
}

impl Serialize for CullGroup {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Monthly cull hazards, optionally estimated from roster history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CullModel {
    grouping: CullGrouping,
    age_band_years: u32,
    fallback: f64,
    regulation: f64,
    hazards: BTreeMap<CullGroup, f64>,
}

impl CullModel {
    /// Use `fallback` for every group.
    pub fn fallback_only(params: &CullingParams, regulation: f64) -> Self {
        Self {
            grouping: params.grouping,
            age_band_years: params.age_band_years.max(1),
            fallback: params.fallback_monthly_hazard,
            regulation,
            hazards: BTreeMap::new(),
        }
    }

    /// Estimate per-group hazards from culls archived within the two years
    /// before the report date, against animals alive on the report date.
    pub fn estimate(roster: &HerdRoster, params: &CullingParams, regulation: f64) -> Self {
        let mut model = Self::fallback_only(params, regulation);
        if !params.estimate_from_roster {
            return model;
        }

        let report = roster.report_date;
        let window_start = add_days(report, -ESTIMATION_WINDOW_DAYS);
        let mut counts: BTreeMap<CullGroup, (usize, usize)> = BTreeMap::new();

        for animal in &roster.animals {
            let group = model.group_of(animal, report);
            let entry = counts.entry(group).or_insert((0, 0));
            match animal.archive_date {
                Some(archived) if archived > report => entry.0 += 1,
                None => entry.0 += 1,
                Some(archived) if archived >= window_start => entry.1 += 1,
                Some(_) => {}
            }
        }

        for (group, (alive, culled)) in counts {
            let hazard = if alive + culled < MIN_GROUP_SIZE {
                model.fallback
            } else {
                let exposure = ((alive as f64 + 0.5 * culled as f64) * WINDOW_MONTHS).max(1.0);
                (culled as f64 / exposure).clamp(0.0, MAX_ESTIMATED_HAZARD)
            };
            model.hazards.insert(group, hazard);
        }
        model
    }

    pub fn group_of(&self, animal: &Animal, on: NaiveDate) -> CullGroup {
        match self.grouping {
            CullGrouping::Lactation => CullGroup::Lactation(lactation_bucket(animal)),
            CullGrouping::LactationStatus => {
                CullGroup::LactationStatus(lactation_bucket(animal), StatusGroup::of(animal, on))
            }
            CullGrouping::AgeBand => {
                let years = (animal.age_days(on).max(0) as f64) / 365.25;
                let index = (years / f64::from(self.age_band_years)).floor() as u32;
                CullGroup::AgeBand {
                    index,
                    width: self.age_band_years,
                }
            }
        }
    }

    /// Estimated (unregulated) monthly hazard for `animal`.
    pub fn base_hazard(&self, animal: &Animal, on: NaiveDate) -> f64 {
        self.hazards
            .get(&self.group_of(animal, on))
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Monthly cull probability after population regulation, clamped to
    /// `[0, 1]`. The second value is the unclamped product when clamping
    /// was necessary.
    pub fn monthly_probability(&self, animal: &Animal, on: NaiveDate) -> (f64, Option<f64>) {
        let raw = self.base_hazard(animal, on) * self.regulation;
        if (0.0..=1.0).contains(&raw) {
            (raw, None)
        } else {
            (raw.clamp(0.0, 1.0), Some(raw))
        }
    }

    pub fn hazards(&self) -> &BTreeMap<CullGroup, f64> {
        &self.hazards
    }

    pub fn fallback(&self) -> f64 {
        self.fallback
    }
}

fn lactation_bucket(animal: &Animal) -> u8 {
    u8::try_from(animal.parity.min(4)).unwrap_or(4)
}
