use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{MedicationForm, MedicationStatus};

/// A medication row as stored. `taken_today_count` is a denormalized
/// snapshot of the dose ledger; the ledger stays the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub dosage: String,
    pub form: MedicationForm,
    pub frequency: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_permanent: bool,
    pub is_active: bool,
    pub daily_doses: u32,
    pub duration_days: Option<u32>,
    pub times_per_day: Vec<String>,
    pub notes: Option<String>,
    pub taken_today_count: u32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// A medication as returned to callers: stored fields plus the derived
/// lifecycle status and today's clamped dose aggregate. For permanent
/// medications, `end_date` and `duration_days` are always `None` here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub dosage: String,
    pub form: MedicationForm,
    pub frequency: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_permanent: bool,
    pub is_active: bool,
    pub daily_doses: u32,
    pub duration_days: Option<u32>,
    pub times_per_day: Vec<String>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub status: MedicationStatus,
    pub taken_today: TakenToday,
}

/// Input for creating a medication. `form` defaults to tablet and
/// `daily_doses` to 1 when not supplied.
#[derive(Debug, Clone, Deserialize)]
pub struct NewMedication {
    pub user_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub dosage: String,
    pub form: Option<MedicationForm>,
    pub frequency: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_permanent: bool,
    pub daily_doses: Option<u32>,
    pub duration_days: Option<u32>,
    pub times_per_day: Vec<String>,
    pub notes: Option<String>,
}

/// Partial update. Only the fields present are written; everything else
/// is left untouched. `taken_today_count` rides along in the same UPDATE
/// so the snapshot merge is a single statement.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MedicationUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub dosage: Option<String>,
    pub form: Option<MedicationForm>,
    pub frequency: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_permanent: Option<bool>,
    pub is_active: Option<bool>,
    pub daily_doses: Option<u32>,
    pub duration_days: Option<u32>,
    pub times_per_day: Option<Vec<String>>,
    pub notes: Option<String>,
    pub taken_today_count: Option<u32>,
}

impl MedicationUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.dosage.is_none()
            && self.form.is_none()
            && self.frequency.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.is_permanent.is_none()
            && self.is_active.is_none()
            && self.daily_doses.is_none()
            && self.duration_days.is_none()
            && self.times_per_day.is_none()
            && self.notes.is_none()
            && self.taken_today_count.is_none()
    }
}

/// One "dose taken" event in the append-only ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseEvent {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub date: NaiveDate,
    pub taken: bool,
    pub taken_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Today's dose aggregate, clamped at the prescribed maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakenToday {
    pub count: u32,
    pub total: u32,
    pub remaining: u32,
}

impl TakenToday {
    /// Aggregate the ledger view for one day. Extra events beyond
    /// `daily_doses` are clamped, never rejected.
    pub fn aggregate(daily_doses: u32, taken_events: u32) -> Self {
        let count = taken_events.min(daily_doses);
        Self {
            count,
            total: daily_doses,
            remaining: daily_doses.saturating_sub(count),
        }
    }

    pub fn none_taken(daily_doses: u32) -> Self {
        Self::aggregate(daily_doses, 0)
    }
}

/// Per-user counts by derived status, for the dashboard header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MedicationStats {
    pub total: u32,
    pub active: u32,
    pub upcoming: u32,
    pub expired: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_clamps_at_daily_doses() {
        for k in 0..=6u32 {
            let agg = TakenToday::aggregate(2, k);
            assert_eq!(agg.count, k.min(2));
            assert_eq!(agg.total, 2);
            assert_eq!(agg.remaining, 2u32.saturating_sub(k));
        }
    }

    #[test]
    fn aggregate_zero_events() {
        let agg = TakenToday::none_taken(3);
        assert_eq!(agg, TakenToday { count: 0, total: 3, remaining: 3 });
    }

    #[test]
    fn update_is_empty() {
        assert!(MedicationUpdate::default().is_empty());
        let update = MedicationUpdate {
            dosage: Some("10mg".into()),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }
}
