//! Per-month aggregates produced by one realization.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::animal::{Animal, ReproStatus};
use crate::params::DimMode;

/// Point-in-time herd composition for one realization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerdSnapshot {
    pub date: NaiveDate,
    pub milking: u32,
    pub dry: u32,
    /// Open and inseminated heifers.
    pub heifer: u32,
    pub pregnant_heifer: u32,
    /// `None` when no animal is lactating.
    pub avg_days_in_milk: Option<f64>,
}

impl HerdSnapshot {
    /// Aggregate the given live animals as of `date`.
    pub fn capture<'a, I>(date: NaiveDate, dim_mode: DimMode, animals: I) -> Self
    where
        I: IntoIterator<Item = &'a Animal>,
    {
        let mut snap = HerdSnapshot {
            date,
            milking: 0,
            dry: 0,
            heifer: 0,
            pregnant_heifer: 0,
            avg_days_in_milk: None,
        };
        let mut dim_sum = 0i64;
        let mut dim_n = 0i64;

        for animal in animals {
            match animal.status {
                ReproStatus::Milking | ReproStatus::PregnantMilking => {
                    snap.milking += 1;
                    if let Some(dim) = animal.days_in_milk_by(dim_mode, date) {
                        dim_sum += dim;
                        dim_n += 1;
                    }
                }
                ReproStatus::Dry => snap.dry += 1,
                ReproStatus::OpenHeifer | ReproStatus::InseminatedHeifer => snap.heifer += 1,
                ReproStatus::PregnantHeifer => snap.pregnant_heifer += 1,
            }
        }

        if dim_n > 0 {
            snap.avg_days_in_milk = Some(dim_sum as f64 / dim_n as f64);
        }
        snap
    }

    /// Total animals represented by this snapshot.
    pub fn total(&self) -> u32 {
        self.milking + self.dry + self.heifer + self.pregnant_heifer
    }
}

/// Counts of state transitions that happened during one simulated month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTally {
    pub calvings: u32,
    pub dryoffs: u32,
    pub conceptions: u32,
    pub culls: u32,
    pub purchases_in: u32,
    pub heifer_intros: u32,
    pub heifer_births: u32,
}

impl EventTally {
    /// Animals that joined the herd this month.
    pub fn arrivals(&self) -> u32 {
        self.heifer_births + self.purchases_in + self.heifer_intros
    }

    /// Element-wise accumulate into `self` (used for ensemble sums).
    pub fn accumulate(&mut self, other: &EventTally) {
        self.calvings += other.calvings;
        self.dryoffs += other.dryoffs;
        self.conceptions += other.conceptions;
        self.culls += other.culls;
        self.purchases_in += other.purchases_in;
        self.heifer_intros += other.heifer_intros;
        self.heifer_births += other.heifer_births;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animal::AnimalId;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_capture_counts_each_status_once() {
        let on = d(2024, 3, 1);
        let animals = vec![
            Animal::milking_cow(AnimalId(1), d(2020, 1, 1), 2, d(2024, 1, 1)),
            Animal::milking_cow(AnimalId(2), d(2020, 1, 1), 1, d(2024, 2, 1)),
            Animal::new(AnimalId(3), d(2019, 1, 1), ReproStatus::Dry),
            Animal::new(AnimalId(4), d(2023, 1, 1), ReproStatus::OpenHeifer),
            Animal::new(AnimalId(5), d(2023, 1, 1), ReproStatus::InseminatedHeifer),
            Animal::new(AnimalId(6), d(2022, 6, 1), ReproStatus::PregnantHeifer),
        ];
        let snap = HerdSnapshot::capture(on, DimMode::FromCalving, &animals);

        assert_eq!(snap.milking, 2);
        assert_eq!(snap.dry, 1);
        assert_eq!(snap.heifer, 2);
        assert_eq!(snap.pregnant_heifer, 1);
        assert_eq!(snap.total(), 6);
        // (60 + 29) / 2
        assert_eq!(snap.avg_days_in_milk, Some(44.5));
    }

    #[test]
    fn test_capture_without_milking_has_no_dim() {
        let animals = vec![Animal::new(AnimalId(1), d(2023, 1, 1), ReproStatus::OpenHeifer)];
        let snap = HerdSnapshot::capture(d(2024, 1, 1), DimMode::FromCalving, &animals);
        assert_eq!(snap.avg_days_in_milk, None);
    }

    #[test]
    fn test_tally_accumulate() {
        let mut sum = EventTally::default();
        let one = EventTally {
            calvings: 2,
            culls: 1,
            heifer_births: 1,
            ..Default::default()
        };
        sum.accumulate(&one);
        sum.accumulate(&one);
        assert_eq!(sum.calvings, 4);
        assert_eq!(sum.culls, 2);
        assert_eq!(sum.arrivals(), 2);
    }
}
