//! The initial herd roster supplied by the ingestion collaborator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::animal::{Animal, ReproStatus};
use crate::calendar::add_days;
use crate::params::DimMode;
use crate::snapshot::HerdSnapshot;

/// Gestation assumed when only a service date is known.
const INFERRED_GESTATION_DAYS: i64 = 280;

/// Immutable roster of animals as of `report_date`.
///
/// Animals archived on or before the report date are history: they feed
/// empirical statistics and cull-hazard estimation but are never simulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerdRoster {
    pub report_date: NaiveDate,
    pub animals: Vec<Animal>,
}

/// Live animals ready for simulation plus the data fixes applied to them.
#[derive(Debug, Clone, Default)]
pub struct NormalizedHerd {
    pub animals: Vec<Animal>,
    pub warnings: Vec<String>,
}

impl HerdRoster {
    pub fn new(report_date: NaiveDate, animals: Vec<Animal>) -> Self {
        Self {
            report_date,
            animals,
        }
    }

    /// Build a roster whose report date is inferred from the animals'
    /// factual dates. `None` when there is nothing to infer from.
    pub fn with_inferred_report_date(animals: Vec<Animal>) -> Option<Self> {
        let report_date = latest_factual_date(&animals)?;
        Some(Self::new(report_date, animals))
    }

    /// Latest birth, archive, calving, service or dry-off date in the roster.
    pub fn default_report_date(&self) -> Option<NaiveDate> {
        latest_factual_date(&self.animals)
    }

    /// Animals still in the herd on the report date.
    pub fn live_animals(&self) -> impl Iterator<Item = &Animal> {
        self.animals
            .iter()
            .filter(move |a| a.is_alive_on(self.report_date))
    }

    pub fn live_count(&self) -> usize {
        self.live_animals().count()
    }

    /// Copy the live animals and repair incomplete records.
    pub fn normalize(&self) -> NormalizedHerd {
        let report = self.report_date;
        let mut fresh_fixes = 0usize;
        let mut inferred_calvings = 0usize;
        let mut opened = 0usize;
        let mut overdue = 0usize;

        let mut animals = Vec::with_capacity(self.animals.len());
        for source in self.live_animals() {
            let mut a = source.clone();
            a.dim_anchor = a.recorded_days_in_milk.map(|v| (report, i64::from(v)));

            if a.status.is_milking() && a.last_calving_date.is_none() {
                a.last_calving_date = Some(report);
                fresh_fixes += 1;
            }

            let expects_pregnancy = matches!(
                a.status,
                ReproStatus::PregnantHeifer | ReproStatus::PregnantMilking | ReproStatus::Dry
            );
            if expects_pregnancy && a.expected_calving_date.is_none() {
                match a.insemination_date {
                    Some(served) => {
                        a.expected_calving_date = Some(add_days(served, INFERRED_GESTATION_DAYS));
                        inferred_calvings += 1;
                    }
                    None => {
                        a.status = match a.status {
                            ReproStatus::PregnantHeifer => ReproStatus::OpenHeifer,
                            ReproStatus::PregnantMilking => ReproStatus::Milking,
                            other => other,
                        };
                        opened += 1;
                    }
                }
            }

            if a.expected_calving_date.is_some() {
                a.status = match a.status {
                    ReproStatus::OpenHeifer | ReproStatus::InseminatedHeifer => {
                        ReproStatus::PregnantHeifer
                    }
                    ReproStatus::Milking => ReproStatus::PregnantMilking,
                    other => other,
                };
            }

            if let Some(calving) = a.expected_calving_date {
                if calving <= report {
                    a.expected_calving_date = Some(add_days(report, 1));
                    overdue += 1;
                }
            }

            animals.push(a);
        }

        let mut warnings = Vec::new();
        if fresh_fixes > 0 {
            warnings.push(format!(
                "{fresh_fixes} milking animals without last_calving_date treated as fresh on {report}"
            ));
        }
        if inferred_calvings > 0 {
            warnings.push(format!(
                "{inferred_calvings} pregnant animals without expected_calving_date: inferred as service date + {INFERRED_GESTATION_DAYS} days"
            ));
        }
        if opened > 0 {
            warnings.push(format!(
                "{opened} animals marked pregnant or dry without service data treated as open"
            ));
        }
        if overdue > 0 {
            warnings.push(format!(
                "{overdue} expected calving dates on or before {report} moved into the first simulated month"
            ));
        }

        NormalizedHerd { animals, warnings }
    }

    /// Herd composition on the report date.
    pub fn initial_snapshot(&self, dim_mode: DimMode) -> HerdSnapshot {
        let herd = self.normalize();
        HerdSnapshot::capture(self.report_date, dim_mode, &herd.animals)
    }
}

fn latest_factual_date(animals: &[Animal]) -> Option<NaiveDate> {
    animals
        .iter()
        .flat_map(|a| {
            [
                Some(a.birth_date),
                a.archive_date,
                a.last_calving_date,
                a.insemination_date,
                a.dry_off_date,
            ]
        })
        .flatten()
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animal::AnimalId;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_history_animals_are_not_live() {
        let mut archived = Animal::milking_cow(AnimalId(2), d(2018, 1, 1), 3, d(2022, 1, 1));
        archived.archive_date = Some(d(2023, 6, 1));
        let roster = HerdRoster::new(
            d(2024, 1, 1),
            vec![
                Animal::milking_cow(AnimalId(1), d(2020, 1, 1), 2, d(2023, 11, 1)),
                archived,
            ],
        );
        assert_eq!(roster.live_count(), 1);
        assert_eq!(roster.normalize().animals.len(), 1);
    }

    #[test]
    fn test_normalize_repairs_missing_dates() {
        let report = d(2024, 1, 1);
        let mut no_calving = Animal::new(AnimalId(1), d(2020, 1, 1), ReproStatus::Milking);
        no_calving.parity = 1;

        let mut served = Animal::new(AnimalId(2), d(2022, 1, 1), ReproStatus::PregnantHeifer);
        served.insemination_date = Some(d(2023, 6, 1));

        let unknown = Animal::new(AnimalId(3), d(2022, 1, 1), ReproStatus::PregnantHeifer);

        let mut overdue = Animal::new(AnimalId(4), d(2022, 1, 1), ReproStatus::PregnantHeifer);
        overdue.expected_calving_date = Some(d(2023, 12, 20));

        let roster = HerdRoster::new(report, vec![no_calving, served, unknown, overdue]);
        let herd = roster.normalize();

        assert_eq!(herd.animals[0].last_calving_date, Some(report));
        assert_eq!(herd.animals[1].expected_calving_date, Some(d(2024, 3, 7)));
        assert_eq!(herd.animals[2].status, ReproStatus::OpenHeifer);
        assert_eq!(herd.animals[3].expected_calving_date, Some(d(2024, 1, 2)));
        assert_eq!(herd.warnings.len(), 4);
    }

    #[test]
    fn test_default_report_date_is_latest_fact() {
        let mut cow = Animal::milking_cow(AnimalId(1), d(2020, 1, 1), 2, d(2023, 11, 1));
        cow.insemination_date = Some(d(2023, 12, 28));
        let roster = HerdRoster::with_inferred_report_date(vec![cow]).unwrap();
        assert_eq!(roster.report_date, d(2023, 12, 28));
        assert!(HerdRoster::with_inferred_report_date(Vec::new()).is_none());
    }

    #[test]
    fn test_initial_snapshot() {
        let roster = HerdRoster::new(
            d(2024, 1, 1),
            vec![
                Animal::milking_cow(AnimalId(1), d(2020, 1, 1), 2, d(2023, 12, 1)),
                Animal::new(AnimalId(2), d(2023, 1, 1), ReproStatus::OpenHeifer),
            ],
        );
        let snap = roster.initial_snapshot(DimMode::FromCalving);
        assert_eq!(snap.date, d(2024, 1, 1));
        assert_eq!(snap.milking, 1);
        assert_eq!(snap.heifer, 1);
        assert_eq!(snap.avg_days_in_milk, Some(31.0));
    }

    #[test]
    fn test_recorded_dim_larger_than_calving_dim() {
        let mut cow = Animal::milking_cow(AnimalId(1), d(2023, 1, 1), 1, d(2025, 12, 1));
        cow.recorded_days_in_milk = Some(200);
        let roster = HerdRoster::new(d(2026, 2, 9), vec![cow]);

        let from_calving = roster.initial_snapshot(DimMode::FromCalving);
        let from_dataset = roster.initial_snapshot(DimMode::FromDatasetField);
        assert_eq!(from_calving.avg_days_in_milk, Some(70.0));
        assert_eq!(from_dataset.avg_days_in_milk, Some(200.0));
    }
}
