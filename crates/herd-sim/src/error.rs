//! Error taxonomy for the simulation layer.

use chrono::NaiveDate;

/// Malformed or mutually inconsistent scenario parameters or roster data.
///
/// Raised synchronously while building a [`crate::Scenario`]; a scenario that
/// fails validation never reaches the simulation engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("horizon_months must be within 1..={max}, got {value}")]
    HorizonOutOfRange { value: u32, max: u32 },

    #[error("mc_runs must be within 1..={max}, got {value}")]
    McRunsOutOfRange { value: u32, max: u32 },

    #[error("{field} must satisfy min <= max, got {min} > {max}")]
    InvertedRange {
        field: &'static str,
        min: f64,
        max: f64,
    },

    #[error("{field} must be within [{lo}, {hi}], got {value}")]
    OutOfBounds {
        field: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
    },

    #[error("lead_time_days must be positive")]
    NonPositiveLeadTime,

    #[error("purchase list is only allowed under the manual purchase policy")]
    PurchasesRequireManualPolicy,

    #[error("purchase #{index}: provide either expected_calving_date or days_pregnant, not both")]
    AmbiguousPurchaseGestation { index: usize },

    #[error("purchase #{index}: {reason}")]
    InvalidPurchase { index: usize, reason: String },

    #[error("future_date {date} must be the first day of a month")]
    FutureDateNotMonthStart { date: NaiveDate },

    #[error("future_date {date} is outside the forecast horizon {start}..={end}")]
    FutureDateOutOfRange {
        date: NaiveDate,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("horizon of {months} months from {report_date} exceeds the supported calendar")]
    HorizonBeyondCalendar { report_date: NaiveDate, months: u32 },

    #[error("report_date {given} does not match the roster report date {roster}")]
    ReportDateMismatch { given: NaiveDate, roster: NaiveDate },

    #[error("duplicate animal id {0} in roster")]
    DuplicateAnimal(u64),
}

/// Structural failures inside a single simulation run.
///
/// Data conditions the engine can clamp or default never surface here; they
/// are recorded as run warnings instead.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("calendar overflow while advancing past {0}")]
    CalendarOverflow(NaiveDate),

    #[error("sampler misconfigured: {0}")]
    Sampler(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::HorizonOutOfRange {
            value: 0,
            max: 120,
        };
        assert!(err.to_string().contains("horizon_months"));

        let err = ValidationError::InvertedRange {
            field: "insem_age_days",
            min: 400.0,
            max: 365.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("insem_age_days"));
        assert!(msg.contains("400"));
    }

    #[test]
    fn test_sim_error_wraps_validation() {
        let err: SimError = ValidationError::NonPositiveLeadTime.into();
        assert!(err.to_string().contains("lead_time_days"));
    }
}
