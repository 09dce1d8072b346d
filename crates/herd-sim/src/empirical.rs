//! Reproductive intervals observed in the roster.

use serde::{Deserialize, Serialize};

use crate::calendar::days_between;
use crate::roster::HerdRoster;

/// Intervals (in days) extracted from every roster record, history included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalStats {
    /// Age at first successful service.
    pub heifer_insem_ages: Vec<u32>,
    /// Calving to successful service.
    pub service_periods: Vec<u32>,
    /// Successful service to dry-off.
    pub conception_to_dry: Vec<u32>,
}

impl EmpiricalStats {
    pub fn from_roster(roster: &HerdRoster) -> Self {
        let mut stats = Self::default();
        for a in &roster.animals {
            let Some(served) = a.insemination_date else {
                continue;
            };

            if a.parity == 0 {
                if let Some(age) = positive_days(days_between(a.birth_date, served)) {
                    stats.heifer_insem_ages.push(age);
                }
            } else if let Some(calved) = a.last_calving_date {
                if let Some(sp) = positive_days(days_between(calved, served)) {
                    stats.service_periods.push(sp);
                }
            }

            if let Some(dried) = a.dry_off_date {
                if let Some(dtd) = positive_days(days_between(served, dried)) {
                    stats.conception_to_dry.push(dtd);
                }
            }
        }
        stats
    }

    pub fn is_empty(&self) -> bool {
        self.heifer_insem_ages.is_empty()
            && self.service_periods.is_empty()
            && self.conception_to_dry.is_empty()
    }
}

fn positive_days(days: i64) -> Option<u32> {
    if days > 0 {
        u32::try_from(days).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animal::{Animal, AnimalId, ReproStatus};
    use chrono::NaiveDate;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_extracts_each_interval_kind() {
        let mut heifer = Animal::new(AnimalId(1), d(2022, 1, 1), ReproStatus::PregnantHeifer);
        heifer.insemination_date = Some(d(2023, 1, 11));

        let mut cow = Animal::milking_cow(AnimalId(2), d(2019, 1, 1), 2, d(2023, 1, 1));
        cow.status = ReproStatus::Dry;
        cow.insemination_date = Some(d(2023, 4, 11));
        cow.dry_off_date = Some(d(2023, 11, 17));

        let mut bad = Animal::milking_cow(AnimalId(3), d(2019, 1, 1), 1, d(2023, 6, 1));
        bad.insemination_date = Some(d(2023, 5, 1));

        let roster = HerdRoster::new(d(2024, 1, 1), vec![heifer, cow, bad]);
        let stats = EmpiricalStats::from_roster(&roster);

        assert_eq!(stats.heifer_insem_ages, vec![375]);
        assert_eq!(stats.service_periods, vec![100]);
        assert_eq!(stats.conception_to_dry, vec![220]);
    }

    #[test]
    fn test_empty_roster_yields_empty_stats() {
        let stats = EmpiricalStats::from_roster(&HerdRoster::new(d(2024, 1, 1), Vec::new()));
        assert!(stats.is_empty());
    }
}
