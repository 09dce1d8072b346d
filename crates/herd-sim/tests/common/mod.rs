//! Synthetic rosters shared by the integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use herd_sim::{Animal, AnimalId, HerdRoster, ReproStatus};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub fn report_date() -> NaiveDate {
    d(2024, 1, 1)
}

/// `n` milking cows, parities 1..=4, calved 10..=100 days before the report.
pub fn milking_herd(n: u64) -> HerdRoster {
    let report = report_date();
    let animals = (0..n)
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
    HerdRoster::new(report, animals)
}

/// A mixed herd: milking cows, dry cows close to calving, pregnant and open
/// heifers, plus two years of culled history.
pub fn mixed_herd() -> HerdRoster {
    let report = report_date();
    let mut roster = milking_herd(60);
    let mut next = 1000u64;
    let mut id = || {
        next += 1;
        AnimalId(next)
    };

    for i in 0..15i64 {
        let mut dry = Animal::milking_cow(id(), d(2018, 5, 1), 3, d(2023, 2, 1));
        dry.status = ReproStatus::Dry;
        dry.insemination_date = Some(d(2023, 4, 20) + chrono::Duration::days(i * 3));
        dry.dry_off_date = Some(d(2023, 11, 20));
        dry.expected_calving_date = Some(d(2024, 1, 25) + chrono::Duration::days(i * 3));
        roster.animals.push(dry);
    }
    for i in 0..20i64 {
        let mut h = Animal::new(id(), d(2022, 9, 1), ReproStatus::PregnantHeifer);
        h.insemination_date = Some(d(2023, 9, 10) + chrono::Duration::days(i * 5));
        h.expected_calving_date = Some(d(2024, 6, 15) + chrono::Duration::days(i * 5));
        roster.animals.push(h);
    }
    for i in 0..25i64 {
        roster
            .animals
            .push(Animal::new(id(), d(2023, 2, 1) + chrono::Duration::days(i * 7), ReproStatus::OpenHeifer));
    }
    for i in 0..30u32 {
        let mut gone = Animal::milking_cow(id(), d(2017, 3, 1), 1 + i % 5, d(2022, 3, 1));
        gone.archive_date = Some(d(2022, 3 + i % 10, 5 + i % 20));
        roster.animals.push(gone);
    }
    assert_eq!(roster.report_date, report);
    roster
}
