//! Individual animal agents.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::days_between;
use crate::params::DimMode;

/// Stable identity of an animal within one roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimalId(pub u64);

impl std::fmt::Display for AnimalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reproductive status of an animal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReproStatus {
    /// Heifer that has not been served.
    OpenHeifer,
    /// Heifer that has been served; pregnancy not yet confirmed.
    InseminatedHeifer,
    PregnantHeifer,
    /// Lactating, not pregnant.
    Milking,
    Dry,
    PregnantMilking,
}

impl ReproStatus {
    /// Whether an animal in this status is lactating.
    pub fn is_milking(self) -> bool {
        matches!(self, ReproStatus::Milking | ReproStatus::PregnantMilking)
    }

    /// Whether the animal has not calved yet.
    pub fn is_heifer(self) -> bool {
        matches!(
            self,
            ReproStatus::OpenHeifer | ReproStatus::InseminatedHeifer | ReproStatus::PregnantHeifer
        )
    }
}

impl std::fmt::Display for ReproStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReproStatus::OpenHeifer => "open_heifer",
            ReproStatus::InseminatedHeifer => "inseminated_heifer",
            ReproStatus::PregnantHeifer => "pregnant_heifer",
            ReproStatus::Milking => "milking",
            ReproStatus::Dry => "dry",
            ReproStatus::PregnantMilking => "pregnant_milking",
        };
        f.write_str(s)
    }
}

/// How an animal entered the herd.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[default]
    Roster,
    Born,
    Purchased,
    Introduced,
}

/// One simulated animal.
///
/// Roster animals are cloned into every run; the engine mutates only its
/// private copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Animal {
    pub id: AnimalId,
    pub birth_date: NaiveDate,
    pub status: ReproStatus,

    /// Number of completed calvings.
    #[serde(default)]
    pub parity: u32,

    #[serde(default)]
    pub last_calving_date: Option<NaiveDate>,

    /// Date of the last (successful or pending) service.
    #[serde(default)]
    pub insemination_date: Option<NaiveDate>,

    #[serde(default)]
    pub expected_calving_date: Option<NaiveDate>,

    #[serde(default)]
    pub dry_off_date: Option<NaiveDate>,

    /// Date the animal left the herd. History-only when on or before the
    /// report date.
    #[serde(default)]
    pub archive_date: Option<NaiveDate>,

    #[serde(default)]
    pub origin: Origin,

    /// Days in milk as recorded on the report date.
    #[serde(default, rename = "days_in_milk")]
    pub recorded_days_in_milk: Option<u32>,

    /// Date and value the recorded days-in-milk counts from. Set during
    /// roster normalization; cleared at the next calving.
    #[serde(skip)]
    pub(crate) dim_anchor: Option<(NaiveDate, i64)>,

    /// Next planned service, set by the engine.
    #[serde(skip)]
    pub(crate) planned_service_date: Option<NaiveDate>,

    /// Planned dry-off for a pregnant lactating cow, set by the engine.
    #[serde(skip)]
    pub(crate) planned_dry_date: Option<NaiveDate>,
}

impl Animal {
    /// A new animal with no reproductive history.
    pub fn new(id: AnimalId, birth_date: NaiveDate, status: ReproStatus) -> Self {
        Self {
            id,
            birth_date,
            status,
            parity: 0,
            last_calving_date: None,
            insemination_date: None,
            expected_calving_date: None,
            dry_off_date: None,
            archive_date: None,
            origin: Origin::Roster,
            recorded_days_in_milk: None,
            dim_anchor: None,
            planned_service_date: None,
            planned_dry_date: None,
        }
    }

    /// A lactating cow that calved on `last_calving`.
    pub fn milking_cow(
        id: AnimalId,
        birth_date: NaiveDate,
        parity: u32,
        last_calving: NaiveDate,
    ) -> Self {
        Self {
            parity: parity.max(1),
            last_calving_date: Some(last_calving),
            ..Self::new(id, birth_date, ReproStatus::Milking)
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    pub fn age_days(&self, on: NaiveDate) -> i64 {
        days_between(self.birth_date, on)
    }

    /// Days since the last calving for a lactating animal.
    pub fn days_in_milk(&self, on: NaiveDate) -> Option<i64> {
        if !self.status.is_milking() {
            return None;
        }
        self.last_calving_date
            .map(|calved| days_between(calved, on).max(0))
    }

    /// Days in milk under `mode`.
    pub fn days_in_milk_by(&self, mode: DimMode, on: NaiveDate) -> Option<i64> {
        match (mode, self.dim_anchor) {
            (DimMode::FromDatasetField, Some((anchor, value))) if self.status.is_milking() => {
                Some((value + days_between(anchor, on)).max(0))
            }
            _ => self.days_in_milk(on),
        }
    }

    pub fn is_milking(&self) -> bool {
        self.status.is_milking()
    }

    /// Whether a calving is scheduled.
    pub fn is_pregnant(&self) -> bool {
        self.expected_calving_date.is_some()
    }

    /// Whether the animal is still in the herd on `date`.
    pub fn is_alive_on(&self, date: NaiveDate) -> bool {
        self.archive_date.map_or(true, |archived| archived > date)
    }

    /// Whether the animal is open and eligible to be scheduled for service.
    pub(crate) fn is_open(&self) -> bool {
        !self.is_pregnant()
            && matches!(
                self.status,
                ReproStatus::OpenHeifer | ReproStatus::Milking | ReproStatus::Dry
            )
    }

    /// Transition to a fresh lactation after calving on `date`.
    pub(crate) fn calve(&mut self, date: NaiveDate) {
        self.status = ReproStatus::Milking;
        self.parity += 1;
        self.last_calving_date = Some(date);
        self.insemination_date = None;
        self.expected_calving_date = None;
        self.dry_off_date = None;
        self.dim_anchor = None;
        self.planned_service_date = None;
        self.planned_dry_date = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_days_in_milk_only_for_lactating() {
        let cow = Animal::milking_cow(AnimalId(1), d(2020, 1, 1), 2, d(2024, 1, 1));
        assert_eq!(cow.days_in_milk(d(2024, 2, 1)), Some(31));

        let heifer = Animal::new(AnimalId(2), d(2023, 1, 1), ReproStatus::OpenHeifer);
        assert_eq!(heifer.days_in_milk(d(2024, 2, 1)), None);
    }

    #[test]
    fn test_recorded_dim_until_next_calving() {
        let mut cow = Animal::milking_cow(AnimalId(1), d(2023, 1, 1), 1, d(2025, 12, 1));
        cow.dim_anchor = Some((d(2026, 2, 9), 200));

        let on = d(2026, 3, 1);
        assert_eq!(cow.days_in_milk_by(DimMode::FromCalving, on), Some(90));
        assert_eq!(cow.days_in_milk_by(DimMode::FromDatasetField, on), Some(220));

        cow.calve(d(2026, 3, 1));
        let later = d(2026, 3, 11);
        assert_eq!(cow.days_in_milk_by(DimMode::FromDatasetField, later), Some(10));
    }

    #[test]
    fn test_recorded_dim_field_name() {
        let json = r#"{"id": 7, "birth_date": "2023-01-01", "status": "milking",
                       "parity": 1, "last_calving_date": "2025-12-01", "days_in_milk": 200}"#;
        let cow: Animal = serde_json::from_str(json).unwrap();
        assert_eq!(cow.recorded_days_in_milk, Some(200));
        assert_eq!(cow.dim_anchor, None);
    }

    #[test]
    fn test_calve_resets_pregnancy() {
        let mut a = Animal::new(AnimalId(3), d(2022, 1, 1), ReproStatus::PregnantHeifer);
        a.insemination_date = Some(d(2023, 4, 1));
        a.expected_calving_date = Some(d(2024, 1, 5));
        a.calve(d(2024, 1, 5));

        assert_eq!(a.status, ReproStatus::Milking);
        assert_eq!(a.parity, 1);
        assert_eq!(a.last_calving_date, Some(d(2024, 1, 5)));
        assert!(!a.is_pregnant());
    }

    #[test]
    fn test_alive_on_archive_boundary() {
        let mut a = Animal::new(AnimalId(4), d(2020, 1, 1), ReproStatus::Dry);
        a.archive_date = Some(d(2024, 1, 1));
        assert!(a.is_alive_on(d(2023, 12, 31)));
        assert!(!a.is_alive_on(d(2024, 1, 1)));
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&ReproStatus::PregnantMilking).unwrap();
        assert_eq!(json, "\"pregnant_milking\"");
    }
}
