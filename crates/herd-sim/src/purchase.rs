//! Replacement purchase policies.
//!
//! A policy owns per-run state (fractional deficits, outstanding orders) and
//! is consulted once per tick after culling.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::add_days;
use crate::params::{PurchaseItem, PurchasePolicyKind, Scenario};

/// Tally bucket credited by an arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalKind {
    /// Scheduled purchase (`purchases_in`).
    Purchase,
    /// Automatic replacement (`heifer_intros`).
    Introduction,
}

/// How the calving date of arriving pregnant heifers is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalvingSpec {
    On(NaiveDate),
    DaysPregnant(u32),
    /// Draw from the purchased-animal days-to-calving bounds.
    Draw,
}

/// A group of pregnant heifers joining the herd this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Arrival {
    pub date: NaiveDate,
    pub count: u32,
    pub kind: ArrivalKind,
    pub calving: CalvingSpec,
}

/// One purchase made during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub date: NaiveDate,
    pub count: u32,
    pub policy: PurchasePolicyKind,
    pub kind: ArrivalKind,
}

/// Every purchase of one run, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PurchaseLog {
    pub records: Vec<PurchaseRecord>,
}

impl PurchaseLog {
    pub fn record(&mut self, arrival: &Arrival, policy: PurchasePolicyKind) {
        self.records.push(PurchaseRecord {
            date: arrival.date,
            count: arrival.count,
            policy,
            kind: arrival.kind,
        });
    }

    pub fn total(&self) -> u64 {
        self.records.iter().map(|r| u64::from(r.count)).sum()
    }
}

/// What the policy may observe at a tick.
#[derive(Debug, Clone, Copy)]
pub struct TickView {
    pub index: usize,
    pub date: NaiveDate,
    pub culls: u32,
    /// Expected milking head count `lead_time_days` after `date`, before any
    /// outstanding order. Only computed for `auto_forecast`.
    pub projected_milking: f64,
}

/// Per-run purchase policy state.
#[derive(Debug, Clone)]
pub enum PurchasePolicy {
    Manual {
        /// Arrivals keyed by tick index.
        schedule: BTreeMap<usize, Vec<PurchaseItem>>,
    },
    AutoCounter {
        ratio: f64,
        deficit: f64,
    },
    AutoForecast {
        target: u32,
        lead_time_days: u32,
        months: Vec<NaiveDate>,
        /// Ordered head count keyed by arrival tick index.
        outstanding: BTreeMap<usize, u32>,
    },
}

impl PurchasePolicy {
    /// Fresh policy state for one run. `initial_milking` is the target head
    /// count for `auto_forecast`.
    pub fn for_scenario(scenario: &Scenario, initial_milking: u32) -> Self {
        let params = scenario.params();
        match params.purchase_policy {
            PurchasePolicyKind::Manual => {
                let mut schedule: BTreeMap<usize, Vec<PurchaseItem>> = BTreeMap::new();
                for item in &params.purchases {
                    if let Some(index) = scenario.months().iter().position(|m| *m >= item.date_in) {
                        schedule.entry(index).or_default().push(item.clone());
                    }
                }
                PurchasePolicy::Manual { schedule }
            }
            PurchasePolicyKind::AutoCounter => PurchasePolicy::AutoCounter {
                ratio: params.replacement.replacement_ratio,
                deficit: 0.0,
            },
            PurchasePolicyKind::AutoForecast => PurchasePolicy::AutoForecast {
                target: initial_milking,
                lead_time_days: params.lead_time_days,
                months: scenario.months().to_vec(),
                outstanding: BTreeMap::new(),
            },
        }
    }

    pub fn kind(&self) -> PurchasePolicyKind {
        match self {
            PurchasePolicy::Manual { .. } => PurchasePolicyKind::Manual,
            PurchasePolicy::AutoCounter { .. } => PurchasePolicyKind::AutoCounter,
            PurchasePolicy::AutoForecast { .. } => PurchasePolicyKind::AutoForecast,
        }
    }

    /// Date `auto_forecast` projects the herd to from `date`.
    pub fn projection_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        match self {
            PurchasePolicy::AutoForecast { lead_time_days, .. } => {
                Some(add_days(date, i64::from(*lead_time_days)))
            }
            _ => None,
        }
    }

    /// Arrivals for this tick; also places new orders.
    pub fn on_tick(&mut self, view: TickView) -> Vec<Arrival> {
        match self {
            PurchasePolicy::Manual { schedule } => schedule
                .remove(&view.index)
                .unwrap_or_default()
                .into_iter()
                .map(|item| Arrival {
                    date: item.date_in,
                    count: item.count,
                    kind: ArrivalKind::Purchase,
                    calving: match (item.expected_calving_date, item.days_pregnant) {
                        (Some(date), _) => CalvingSpec::On(date),
                        (None, Some(days)) => CalvingSpec::DaysPregnant(days),
                        (None, None) => CalvingSpec::Draw,
                    },
                })
                .collect(),

            PurchasePolicy::AutoCounter { ratio, deficit } => {
                *deficit += f64::from(view.culls) * *ratio;
                let whole = deficit.floor();
                *deficit -= whole;
                let count = whole as u32;
                if count == 0 {
                    return Vec::new();
                }
                vec![Arrival {
                    date: view.date,
                    count,
                    kind: ArrivalKind::Introduction,
                    calving: CalvingSpec::Draw,
                }]
            }

            PurchasePolicy::AutoForecast {
                target,
                lead_time_days,
                months,
                outstanding,
            } => {
                let mut arrivals = Vec::new();
                if let Some(count) = outstanding.remove(&view.index) {
                    arrivals.push(Arrival {
                        date: view.date,
                        count,
                        kind: ArrivalKind::Introduction,
                        calving: CalvingSpec::Draw,
                    });
                }

                let pending: u32 = outstanding.values().sum();
                let gap = f64::from(*target) - view.projected_milking - f64::from(pending);
                if gap > 0.0 {
                    let due = add_days(view.date, i64::from(*lead_time_days));
                    let arrival_index = months
                        .iter()
                        .enumerate()
                        .skip(view.index + 1)
                        .find(|(_, m)| **m >= due)
                        .map(|(i, _)| i);
                    if let Some(index) = arrival_index {
                        *outstanding.entry(index).or_insert(0) += gap.ceil() as u32;
                    }
                }
                arrivals
            }
        }
    }
}
