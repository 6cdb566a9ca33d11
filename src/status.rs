//! Lifecycle status derivation.
//!
//! Status is never stored. It is a pure function of the medication's date
//! fields and an explicit `today`, so every caller sees the same answer
//! for the same instant and tests can pin the clock.

use chrono::{Days, NaiveDate};

use crate::models::enums::MedicationStatus;

/// The end date actually used for expiry: the explicit `end_date` when
/// set, otherwise `start_date + duration_days`. Permanent medications
/// have no end regardless of what the columns hold.
pub fn effective_end_date(
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    duration_days: Option<u32>,
    is_permanent: bool,
) -> Option<NaiveDate> {
    if is_permanent {
        return None;
    }
    end_date.or_else(|| {
        duration_days.and_then(|days| start_date.checked_add_days(Days::new(u64::from(days))))
    })
}

/// Derive the lifecycle status as of `today`.
///
/// upcoming — start date strictly in the future;
/// expired  — non-permanent and effective end strictly in the past;
/// active   — everything else, including records with no resolvable end.
pub fn derive_status(
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    duration_days: Option<u32>,
    is_permanent: bool,
    today: NaiveDate,
) -> MedicationStatus {
    if start_date > today {
        return MedicationStatus::Upcoming;
    }
    if is_permanent {
        return MedicationStatus::Active;
    }
    match effective_end_date(start_date, end_date, duration_days, false) {
        Some(end) if end < today => MedicationStatus::Expired,
        _ => MedicationStatus::Active,
    }
}
