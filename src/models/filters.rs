use chrono::NaiveDate;

use super::enums::MedicationStatus;

/// Filter for medication reads. Statuses match the derived status;
/// date bounds apply to `start_date` / `end_date`. `force_refresh`
/// bypasses the read cache for this call only.
#[derive(Debug, Clone, Default)]
pub struct MedicationFilter {
    pub status: Option<Vec<MedicationStatus>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub force_refresh: bool,
}
