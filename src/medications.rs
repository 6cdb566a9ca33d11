//! Medication lifecycle service.
//!
//! Orchestrates the repository, the status deriver, the dose ledger and
//! the per-user read cache. All mutations check ownership first and
//! invalidate the owner's cache entry on success; reads go through the
//! cache with a 5 minute TTL.

use chrono::Duration;
use rusqlite::Connection;
use uuid::Uuid;

use crate::cache::MedicationCache;
use crate::clock::{Clock, SystemClock};
use crate::config::CLEANUP_GRACE_DAYS;
use crate::db::repository::{
    count_taken_on, delete_medication, get_all_medications, get_medication,
    get_medication_owner, get_medications_for_user, get_nonpermanent_medications,
    insert_dose_event, insert_medication, set_taken_snapshot, taken_counts_for_user,
    update_medication_fields,
};
use crate::db::DatabaseError;
use crate::models::enums::MedicationForm;
use crate::models::{
    DoseEvent, Medication, MedicationFilter, MedicationRecord, MedicationStats,
    MedicationStatus, MedicationUpdate, NewMedication, TakenToday,
};
use crate::status::{derive_status, effective_end_date};

/// Errors from medication operations.
///
/// `Validation`, `PermissionDenied` and `NotFound` messages are shown to
/// the user verbatim; `Storage` carries the underlying message and the
/// caller decides whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum MedicationError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("You do not have permission to modify this medication")]
    PermissionDenied,
    #[error("Medication {0} not found")]
    NotFound(Uuid),
    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Medication repository with a read-through cache and an injected clock.
///
/// Cache state is process-lifetime only. There is no record-level locking:
/// concurrent updates to one record race at the storage layer and the
/// last write wins, which is acceptable for human-paced edits.
pub struct MedicationService<C: Clock = SystemClock> {
    cache: MedicationCache,
    clock: C,
}

impl MedicationService<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MedicationService<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MedicationService<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            cache: MedicationCache::new(),
            clock,
        }
    }

    /// Create a medication. The effective end date is resolved up front:
    /// a non-permanent course without an explicit end gets
    /// `start_date + duration_days`; permanent medications store neither
    /// an end date nor a duration.
    pub fn create(
        &mut self,
        conn: &Connection,
        input: NewMedication,
    ) -> Result<Medication, MedicationError> {
        validate_new(&input)?;

        let now = self.clock.now();
        let daily_doses = input.daily_doses.unwrap_or(1);
        let (end_date, duration_days) = if input.is_permanent {
            (None, None)
        } else {
            let end = input.end_date.or_else(|| {
                effective_end_date(input.start_date, None, input.duration_days, false)
            });
            (end, input.duration_days)
        };

        let record = MedicationRecord {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            name: input.name,
            description: input.description,
            dosage: input.dosage,
            form: input.form.unwrap_or(MedicationForm::Tablet),
            frequency: input.frequency,
            start_date: input.start_date,
            end_date,
            is_permanent: input.is_permanent,
            is_active: true,
            daily_doses,
            duration_days,
            times_per_day: input.times_per_day,
            notes: input.notes,
            taken_today_count: 0,
            created_at: now,
            updated_at: now,
        };

        insert_medication(conn, &record)?;
        self.cache.invalidate(Some(&record.user_id));
        tracing::debug!(medication_id = %record.id, "Medication created");

        Ok(view_of(record, now.date(), 0))
    }

    /// Read a user's medications through the cache. The cache always
    /// holds the full processed list for the user; status and date
    /// filters are applied to it per call.
    pub fn get(
        &mut self,
        conn: &Connection,
        user_id: &Uuid,
        filter: &MedicationFilter,
    ) -> Result<Vec<Medication>, MedicationError> {
        let now = self.clock.now();

        if !filter.force_refresh {
            if let Some(cached) = self.cache.get(user_id, now) {
                return Ok(apply_filter(cached, filter));
            }
        }

        let records = get_medications_for_user(conn, user_id)?;
        let counts = taken_counts_for_user(conn, user_id, now.date())?;

        let medications: Vec<Medication> = records
            .into_iter()
            .map(|record| {
                let taken = counts.get(&record.id).copied().unwrap_or(0);
                view_of(record, now.date(), taken)
            })
            .collect();

        let result = apply_filter(&medications, filter);
        self.cache.set(*user_id, medications, now);
        Ok(result)
    }

    /// Apply a partial update after verifying ownership. The allowed
    /// fields and the dose snapshot merge in one UPDATE statement.
    pub fn update(
        &mut self,
        conn: &Connection,
        id: &Uuid,
        update: &MedicationUpdate,
        requesting_user: &Uuid,
    ) -> Result<Medication, MedicationError> {
        if let Some(0) = update.daily_doses {
            return Err(MedicationError::Validation(
                "daily_doses must be at least 1".into(),
            ));
        }

        let owner = self.check_ownership(conn, id, requesting_user)?;

        // An empty update has nothing to write; skip the statement so
        // updated_at is not touched.
        if update.is_empty() {
            return self.fetch_view(conn, id);
        }

        let now = self.clock.now();
        let affected = update_medication_fields(conn, id, update, now)?;
        if affected == 0 {
            return Err(MedicationError::NotFound(*id));
        }

        self.cache.invalidate(Some(&owner));
        self.fetch_view(conn, id)
    }

    /// Delete a medication after verifying ownership. Dose events are
    /// removed with it.
    pub fn delete(
        &mut self,
        conn: &Connection,
        id: &Uuid,
        requesting_user: &Uuid,
    ) -> Result<(), MedicationError> {
        let owner = self.check_ownership(conn, id, requesting_user)?;

        let affected = delete_medication(conn, id)?;
        if affected == 0 {
            return Err(MedicationError::NotFound(*id));
        }

        self.cache.invalidate(Some(&owner));
        tracing::debug!(medication_id = %id, "Medication deleted");
        Ok(())
    }

    /// Record one taken dose: append a ledger event dated today, then
    /// recompute the clamped snapshot from the ledger and persist it.
    /// Extra doses beyond `daily_doses` still land in the ledger; only
    /// the view clamps.
    pub fn mark_dose_taken(
        &mut self,
        conn: &Connection,
        id: &Uuid,
        user_id: &Uuid,
    ) -> Result<Medication, MedicationError> {
        let record = get_medication(conn, id)?.ok_or(MedicationError::NotFound(*id))?;
        if record.user_id != *user_id {
            return Err(MedicationError::PermissionDenied);
        }

        let now = self.clock.now();
        let today = now.date();

        insert_dose_event(
            conn,
            &DoseEvent {
                id: Uuid::new_v4(),
                medication_id: *id,
                date: today,
                taken: true,
                taken_at: Some(now),
                notes: None,
                created_at: now,
                updated_at: now,
            },
        )?;

        // Ledger is the source of truth; the snapshot is recomputed from
        // it on every append, never incremented blindly.
        let ledger_count = count_taken_on(conn, id, today)?;
        let clamped = ledger_count.min(record.daily_doses);
        set_taken_snapshot(conn, id, clamped, now)?;

        self.cache.invalidate(Some(user_id));
        self.fetch_view(conn, id)
    }

    /// Unscoped maintenance sweep: delete non-permanent medications whose
    /// effective end date is more than [`CLEANUP_GRACE_DAYS`] in the past.
    /// Best-effort — a failed deletion is logged and the sweep continues.
    /// Returns the number of successful deletions.
    pub fn cleanup_expired(&mut self, conn: &Connection) -> Result<usize, MedicationError> {
        let today = self.clock.now().date();
        let cutoff = today - Duration::days(CLEANUP_GRACE_DAYS);

        let candidates: Vec<MedicationRecord> = get_nonpermanent_medications(conn)?
            .into_iter()
            .filter(|med| {
                effective_end_date(med.start_date, med.end_date, med.duration_days, false)
                    .is_some_and(|end| end < cutoff)
            })
            .collect();

        if candidates.is_empty() {
            return Ok(0);
        }

        let attempted = candidates.len();
        let mut deleted = 0;
        for med in candidates {
            match delete_medication(conn, &med.id) {
                Ok(_) => {
                    tracing::info!(medication_id = %med.id, name = %med.name, "Deleted expired medication");
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(medication_id = %med.id, "Failed to delete expired medication: {e}");
                }
            }
        }

        if deleted > 0 {
            // The sweep is not owner-scoped, so drop every cached list.
            self.cache.invalidate(None);
        }
        tracing::info!("Cleanup sweep deleted {deleted} of {attempted} expired medications");
        Ok(deleted)
    }

    /// Counts by derived status for the dashboard header.
    pub fn stats(
        &mut self,
        conn: &Connection,
        user_id: &Uuid,
    ) -> Result<MedicationStats, MedicationError> {
        let medications = self.get(conn, user_id, &MedicationFilter::default())?;

        let mut stats = MedicationStats {
            total: medications.len() as u32,
            ..Default::default()
        };
        for med in &medications {
            match med.status {
                MedicationStatus::Active => stats.active += 1,
                MedicationStatus::Upcoming => stats.upcoming += 1,
                MedicationStatus::Expired => stats.expired += 1,
            }
        }
        Ok(stats)
    }

    /// Repair pass for snapshot drift: recompute every medication's
    /// `taken_today_count` from the ledger and rewrite the ones that
    /// disagree. Returns how many rows were repaired.
    pub fn recompute_dose_snapshots(
        &mut self,
        conn: &Connection,
    ) -> Result<usize, MedicationError> {
        let now = self.clock.now();
        let today = now.date();

        let mut repaired = 0;
        for med in get_all_medications(conn)? {
            let ledger_count = count_taken_on(conn, &med.id, today)?;
            let clamped = ledger_count.min(med.daily_doses);
            if clamped != med.taken_today_count {
                set_taken_snapshot(conn, &med.id, clamped, now)?;
                repaired += 1;
            }
        }

        if repaired > 0 {
            tracing::info!("Repaired {repaired} drifted dose snapshots");
            self.cache.invalidate(None);
        }
        Ok(repaired)
    }

    /// Drop one user's cache entry, or the whole cache when no user is
    /// given.
    pub fn invalidate_cache(&mut self, user_id: Option<&Uuid>) {
        self.cache.invalidate(user_id);
    }

    /// Ownership gate for mutations. Missing record maps to `NotFound`,
    /// a mismatched owner to `PermissionDenied`; either way nothing has
    /// been written yet.
    fn check_ownership(
        &self,
        conn: &Connection,
        id: &Uuid,
        requesting_user: &Uuid,
    ) -> Result<Uuid, MedicationError> {
        let owner =
            get_medication_owner(conn, id)?.ok_or(MedicationError::NotFound(*id))?;
        if owner != *requesting_user {
            return Err(MedicationError::PermissionDenied);
        }
        Ok(owner)
    }

    /// Re-fetch one record and build its caller view with fresh status
    /// and dose aggregate.
    fn fetch_view(&self, conn: &Connection, id: &Uuid) -> Result<Medication, MedicationError> {
        let today = self.clock.now().date();
        let record = get_medication(conn, id)?.ok_or(MedicationError::NotFound(*id))?;
        let taken = count_taken_on(conn, id, today)?;
        Ok(view_of(record, today, taken))
    }
}

fn validate_new(input: &NewMedication) -> Result<(), MedicationError> {
    if input.name.trim().is_empty() {
        return Err(MedicationError::Validation("name is required".into()));
    }
    if input.dosage.trim().is_empty() {
        return Err(MedicationError::Validation("dosage is required".into()));
    }
    if input.frequency.trim().is_empty() {
        return Err(MedicationError::Validation("frequency is required".into()));
    }
    if let Some(0) = input.daily_doses {
        return Err(MedicationError::Validation(
            "daily_doses must be at least 1".into(),
        ));
    }
    if !input.is_permanent && input.end_date.is_none() && input.duration_days.is_none() {
        return Err(MedicationError::Validation(
            "a non-permanent medication needs an end date or a duration".into(),
        ));
    }
    Ok(())
}

/// Build the caller-facing view: derived status, clamped dose aggregate,
/// and end date fields blanked for permanent medications.
fn view_of(record: MedicationRecord, today: chrono::NaiveDate, taken_events: u32) -> Medication {
    let status = derive_status(
        record.start_date,
        record.end_date,
        record.duration_days,
        record.is_permanent,
        today,
    );
    let taken_today = TakenToday::aggregate(record.daily_doses, taken_events);

    Medication {
        id: record.id,
        user_id: record.user_id,
        name: record.name,
        description: record.description,
        dosage: record.dosage,
        form: record.form,
        frequency: record.frequency,
        start_date: record.start_date,
        end_date: if record.is_permanent { None } else { record.end_date },
        is_permanent: record.is_permanent,
        is_active: record.is_active,
        daily_doses: record.daily_doses,
        duration_days: if record.is_permanent { None } else { record.duration_days },
        times_per_day: record.times_per_day,
        notes: record.notes,
        created_at: record.created_at,
        updated_at: record.updated_at,
        status,
        taken_today,
    }
}

fn apply_filter(medications: &[Medication], filter: &MedicationFilter) -> Vec<Medication> {
    medications
        .iter()
        .filter(|med| {
            if let Some(statuses) = &filter.status {
                if !statuses.contains(&med.status) {
                    return false;
                }
            }
            if let Some(from) = filter.date_from {
                if med.start_date < from {
                    return false;
                }
            }
            if let Some(to) = filter.date_to {
                // Open-ended courses have no end to compare against.
                match med.end_date {
                    Some(end) if end <= to => {}
                    _ => return false,
                }
            }
            true
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use rusqlite::{params, Connection};

    use super::*;
    use crate::clock::FixedClock;
    use crate::config::CACHE_TTL;
    use crate::db::repository::get_dose_events_on;
    use crate::db::sqlite::open_memory_database;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn setup() -> (Connection, MedicationService<FixedClock>) {
        let conn = open_memory_database().unwrap();
        let service = MedicationService::with_clock(FixedClock::at(t0()));
        (conn, service)
    }

    fn new_medication(user_id: Uuid, name: &str) -> NewMedication {
        NewMedication {
            user_id,
            name: name.into(),
            description: None,
            dosage: "500mg".into(),
            form: None,
            frequency: "twice daily".into(),
            start_date: t0().date(),
            end_date: None,
            is_permanent: false,
            daily_doses: Some(2),
            duration_days: Some(5),
            times_per_day: vec!["08:00".into(), "20:00".into()],
            notes: None,
        }
    }

    #[test]
    fn create_resolves_end_date_from_duration() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        let med = service.create(&conn, new_medication(user, "Amoxicillin")).unwrap();

        assert_eq!(med.status, MedicationStatus::Active);
        assert_eq!(med.end_date, Some(t0().date() + Duration::days(5)));
        assert_eq!(med.form, MedicationForm::Tablet);
        assert_eq!(med.taken_today, TakenToday { count: 0, total: 2, remaining: 2 });
    }

    #[test]
    fn create_explicit_end_date_wins_over_duration() {
        let (conn, mut service) = setup();
        let mut input = new_medication(Uuid::new_v4(), "Amoxicillin");
        input.end_date = Some(t0().date() + Duration::days(3));
        input.duration_days = Some(30);

        let med = service.create(&conn, input).unwrap();
        assert_eq!(med.end_date, Some(t0().date() + Duration::days(3)));
    }

    #[test]
    fn create_permanent_blanks_end_fields() {
        let (conn, mut service) = setup();
        let mut input = new_medication(Uuid::new_v4(), "Levothyroxine");
        input.is_permanent = true;
        input.end_date = Some(t0().date() - Duration::days(30));
        input.duration_days = Some(3);

        let med = service.create(&conn, input).unwrap();
        assert_eq!(med.end_date, None);
        assert_eq!(med.duration_days, None);
        assert_eq!(med.status, MedicationStatus::Active);
    }

    #[test]
    fn create_future_start_is_upcoming() {
        let (conn, mut service) = setup();
        let mut input = new_medication(Uuid::new_v4(), "Later");
        input.start_date = t0().date() + Duration::days(10);

        let med = service.create(&conn, input).unwrap();
        assert_eq!(med.status, MedicationStatus::Upcoming);
    }

    #[test]
    fn create_rejects_missing_required_fields() {
        let (conn, mut service) = setup();

        let mut input = new_medication(Uuid::new_v4(), "  ");
        let err = service.create(&conn, input.clone()).unwrap_err();
        assert!(matches!(err, MedicationError::Validation(_)));

        input = new_medication(Uuid::new_v4(), "Ok");
        input.dosage = "".into();
        assert!(matches!(
            service.create(&conn, input).unwrap_err(),
            MedicationError::Validation(_)
        ));

        input = new_medication(Uuid::new_v4(), "Ok");
        input.frequency = " ".into();
        assert!(matches!(
            service.create(&conn, input).unwrap_err(),
            MedicationError::Validation(_)
        ));
    }

    #[test]
    fn create_rejects_nonpermanent_without_any_end() {
        let (conn, mut service) = setup();
        let mut input = new_medication(Uuid::new_v4(), "Endless");
        input.end_date = None;
        input.duration_days = None;

        let err = service.create(&conn, input).unwrap_err();
        assert!(matches!(err, MedicationError::Validation(_)));
    }

    #[test]
    fn create_rejects_zero_daily_doses() {
        let (conn, mut service) = setup();
        let mut input = new_medication(Uuid::new_v4(), "Zero");
        input.daily_doses = Some(0);

        let err = service.create(&conn, input).unwrap_err();
        assert!(matches!(err, MedicationError::Validation(_)));
    }

    #[test]
    fn get_serves_from_cache_within_ttl() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Metformin")).unwrap();

        // Populate the cache.
        let first = service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        assert_eq!(first.len(), 1);

        // Change the row behind the service's back.
        conn.execute(
            "UPDATE medications SET name = 'Renamed' WHERE id = ?1",
            params![med.id.to_string()],
        )
        .unwrap();

        // Inside the TTL the stale cached name is returned.
        service.clock.advance(CACHE_TTL - Duration::minutes(1));
        let cached = service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        assert_eq!(cached[0].name, "Metformin");

        // Past the TTL the read falls through to storage.
        service.clock.advance(Duration::minutes(2));
        let fresh = service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        assert_eq!(fresh[0].name, "Renamed");
    }

    #[test]
    fn force_refresh_bypasses_cache() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Metformin")).unwrap();

        service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        conn.execute(
            "UPDATE medications SET name = 'Renamed' WHERE id = ?1",
            params![med.id.to_string()],
        )
        .unwrap();

        let filter = MedicationFilter { force_refresh: true, ..Default::default() };
        let fresh = service.get(&conn, &user, &filter).unwrap();
        assert_eq!(fresh[0].name, "Renamed");
    }

    #[test]
    fn every_write_invalidates_the_owner_cache() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Metformin")).unwrap();
        service.get(&conn, &user, &MedicationFilter::default()).unwrap();

        // update
        let update = MedicationUpdate { name: Some("Renamed".into()), ..Default::default() };
        service.update(&conn, &med.id, &update, &user).unwrap();
        let after_update = service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        assert_eq!(after_update[0].name, "Renamed");

        // mark dose taken
        service.mark_dose_taken(&conn, &med.id, &user).unwrap();
        let after_dose = service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        assert_eq!(after_dose[0].taken_today.count, 1);

        // delete
        service.delete(&conn, &med.id, &user).unwrap();
        let after_delete = service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        assert!(after_delete.is_empty());
    }

    #[test]
    fn update_by_non_owner_is_denied_and_writes_nothing() {
        let (conn, mut service) = setup();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let med = service.create(&conn, new_medication(owner, "Metformin")).unwrap();

        let update = MedicationUpdate { name: Some("Hijacked".into()), ..Default::default() };
        let err = service.update(&conn, &med.id, &update, &intruder).unwrap_err();
        assert!(matches!(err, MedicationError::PermissionDenied));

        let unchanged = service
            .get(&conn, &owner, &MedicationFilter { force_refresh: true, ..Default::default() })
            .unwrap();
        assert_eq!(unchanged[0].name, "Metformin");
    }

    #[test]
    fn delete_by_non_owner_is_denied_and_deletes_nothing() {
        let (conn, mut service) = setup();
        let owner = Uuid::new_v4();
        let intruder = Uuid::new_v4();
        let med = service.create(&conn, new_medication(owner, "Metformin")).unwrap();

        let err = service.delete(&conn, &med.id, &intruder).unwrap_err();
        assert!(matches!(err, MedicationError::PermissionDenied));
        assert!(get_medication(&conn, &med.id).unwrap().is_some());
    }

    #[test]
    fn operations_on_missing_record_are_not_found() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let ghost = Uuid::new_v4();

        let update = MedicationUpdate { name: Some("x".into()), ..Default::default() };
        assert!(matches!(
            service.update(&conn, &ghost, &update, &user).unwrap_err(),
            MedicationError::NotFound(id) if id == ghost
        ));
        assert!(matches!(
            service.delete(&conn, &ghost, &user).unwrap_err(),
            MedicationError::NotFound(_)
        ));
        assert!(matches!(
            service.mark_dose_taken(&conn, &ghost, &user).unwrap_err(),
            MedicationError::NotFound(_)
        ));
    }

    #[test]
    fn empty_update_writes_nothing() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Metformin")).unwrap();
        let before = get_medication(&conn, &med.id).unwrap().unwrap();

        service.clock.advance(Duration::minutes(10));
        let view = service.update(&conn, &med.id, &MedicationUpdate::default(), &user).unwrap();
        assert_eq!(view.name, "Metformin");

        let after = get_medication(&conn, &med.id).unwrap().unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn update_rejects_zero_daily_doses() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Metformin")).unwrap();

        let update = MedicationUpdate { daily_doses: Some(0), ..Default::default() };
        let err = service.update(&conn, &med.id, &update, &user).unwrap_err();
        assert!(matches!(err, MedicationError::Validation(_)));
    }

    #[test]
    fn dose_scenario_clamps_view_but_keeps_ledger() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        // start today, 5 day course, 2 doses per day
        let med = service.create(&conn, new_medication(user, "Amoxicillin")).unwrap();
        assert_eq!(med.status, MedicationStatus::Active);
        assert_eq!(med.end_date, Some(t0().date() + Duration::days(5)));

        let after_one = service.mark_dose_taken(&conn, &med.id, &user).unwrap();
        assert_eq!(after_one.taken_today, TakenToday { count: 1, total: 2, remaining: 1 });

        let after_two = service.mark_dose_taken(&conn, &med.id, &user).unwrap();
        assert_eq!(after_two.taken_today, TakenToday { count: 2, total: 2, remaining: 0 });

        // Third dose: view stays clamped, ledger keeps all three events.
        let after_three = service.mark_dose_taken(&conn, &med.id, &user).unwrap();
        assert_eq!(after_three.taken_today, TakenToday { count: 2, total: 2, remaining: 0 });

        let events = get_dose_events_on(&conn, &med.id, t0().date()).unwrap();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn mark_dose_by_non_owner_is_denied() {
        let (conn, mut service) = setup();
        let owner = Uuid::new_v4();
        let med = service.create(&conn, new_medication(owner, "Metformin")).unwrap();

        let err = service.mark_dose_taken(&conn, &med.id, &Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, MedicationError::PermissionDenied));
        assert!(get_dose_events_on(&conn, &med.id, t0().date()).unwrap().is_empty());
    }

    #[test]
    fn dose_count_resets_on_the_next_day() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Amoxicillin")).unwrap();

        service.mark_dose_taken(&conn, &med.id, &user).unwrap();
        service.mark_dose_taken(&conn, &med.id, &user).unwrap();

        service.clock.advance(Duration::days(1));
        let filter = MedicationFilter { force_refresh: true, ..Default::default() };
        let next_day = service.get(&conn, &user, &filter).unwrap();
        assert_eq!(next_day[0].taken_today, TakenToday { count: 0, total: 2, remaining: 2 });
    }

    #[test]
    fn cleanup_deletes_only_long_expired_nonpermanent() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        // A: ended 8 days ago — swept.
        let mut a = new_medication(user, "A");
        a.start_date = t0().date() - Duration::days(30);
        a.end_date = Some(t0().date() - Duration::days(8));
        a.duration_days = None;
        let a = service.create(&conn, a).unwrap();

        // B: ended 3 days ago — inside the grace window.
        let mut b = new_medication(user, "B");
        b.start_date = t0().date() - Duration::days(30);
        b.end_date = Some(t0().date() - Duration::days(3));
        b.duration_days = None;
        let b = service.create(&conn, b).unwrap();

        // C: permanent with a nominal end 30 days ago — never swept.
        let mut c = new_medication(user, "C");
        c.start_date = t0().date() - Duration::days(60);
        c.is_permanent = true;
        let c = service.create(&conn, c).unwrap();
        // Plant a stale nominal end date to prove it is ignored.
        conn.execute(
            "UPDATE medications SET end_date = ?1 WHERE id = ?2",
            params![(t0().date() - Duration::days(30)).to_string(), c.id.to_string()],
        )
        .unwrap();

        let deleted = service.cleanup_expired(&conn).unwrap();
        assert_eq!(deleted, 1);
        assert!(get_medication(&conn, &a.id).unwrap().is_none());
        assert!(get_medication(&conn, &b.id).unwrap().is_some());
        assert!(get_medication(&conn, &c.id).unwrap().is_some());

        // Idempotent: nothing left to sweep.
        assert_eq!(service.cleanup_expired(&conn).unwrap(), 0);
    }

    #[test]
    fn cleanup_resolves_end_from_duration() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        // Started 20 days ago with a 5 day course: effective end 15 days ago.
        let mut input = new_medication(user, "DurationOnly");
        input.start_date = t0().date() - Duration::days(20);
        input.end_date = None;
        input.duration_days = Some(5);
        let med = service.create(&conn, input).unwrap();

        assert_eq!(service.cleanup_expired(&conn).unwrap(), 1);
        assert!(get_medication(&conn, &med.id).unwrap().is_none());
    }

    #[test]
    fn cleanup_continues_past_a_failing_delete() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        let mut pinned = new_medication(user, "Pinned");
        pinned.start_date = t0().date() - Duration::days(40);
        pinned.end_date = Some(t0().date() - Duration::days(20));
        pinned.duration_days = None;
        let pinned = service.create(&conn, pinned).unwrap();

        let mut doomed = new_medication(user, "Doomed");
        doomed.start_date = t0().date() - Duration::days(40);
        doomed.end_date = Some(t0().date() - Duration::days(20));
        doomed.duration_days = None;
        let doomed = service.create(&conn, doomed).unwrap();

        // Make one candidate's DELETE fail at the storage layer.
        conn.execute_batch(&format!(
            "CREATE TRIGGER pin_row BEFORE DELETE ON medications
             WHEN OLD.id = '{}'
             BEGIN SELECT RAISE(ABORT, 'row is pinned'); END;",
            pinned.id
        ))
        .unwrap();

        // The sweep swallows the failure and reports only the successes.
        let deleted = service.cleanup_expired(&conn).unwrap();
        assert_eq!(deleted, 1);
        assert!(get_medication(&conn, &pinned.id).unwrap().is_some());
        assert!(get_medication(&conn, &doomed.id).unwrap().is_none());
    }

    #[test]
    fn cleanup_clears_every_cached_list() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        let mut input = new_medication(user, "Old");
        input.start_date = t0().date() - Duration::days(30);
        input.end_date = Some(t0().date() - Duration::days(10));
        input.duration_days = None;
        service.create(&conn, input).unwrap();
        service.get(&conn, &user, &MedicationFilter::default()).unwrap();

        service.cleanup_expired(&conn).unwrap();
        let after = service.get(&conn, &user, &MedicationFilter::default()).unwrap();
        assert!(after.is_empty());
    }

    #[test]
    fn status_filter_matches_derived_status() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        service.create(&conn, new_medication(user, "Current")).unwrap();

        let mut future = new_medication(user, "Future");
        future.start_date = t0().date() + Duration::days(7);
        service.create(&conn, future).unwrap();

        let mut past = new_medication(user, "Past");
        past.start_date = t0().date() - Duration::days(10);
        past.end_date = Some(t0().date() - Duration::days(2));
        past.duration_days = None;
        service.create(&conn, past).unwrap();

        let filter = MedicationFilter {
            status: Some(vec![MedicationStatus::Active]),
            ..Default::default()
        };
        let active = service.get(&conn, &user, &filter).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "Current");

        let filter = MedicationFilter {
            status: Some(vec![MedicationStatus::Upcoming, MedicationStatus::Expired]),
            ..Default::default()
        };
        let rest = service.get(&conn, &user, &filter).unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn date_filters_bound_the_result() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        let mut early = new_medication(user, "Early");
        early.start_date = t0().date() - Duration::days(20);
        early.end_date = Some(t0().date() - Duration::days(1));
        early.duration_days = None;
        service.create(&conn, early).unwrap();

        service.create(&conn, new_medication(user, "Recent")).unwrap();

        let filter = MedicationFilter {
            date_from: Some(t0().date() - Duration::days(5)),
            ..Default::default()
        };
        let recent = service.get(&conn, &user, &filter).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "Recent");

        let filter = MedicationFilter {
            date_to: Some(t0().date()),
            ..Default::default()
        };
        let ended_by_now = service.get(&conn, &user, &filter).unwrap();
        assert_eq!(ended_by_now.len(), 1);
        assert_eq!(ended_by_now[0].name, "Early");
    }

    #[test]
    fn stats_count_by_derived_status() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();

        service.create(&conn, new_medication(user, "ActiveOne")).unwrap();
        service.create(&conn, new_medication(user, "ActiveTwo")).unwrap();

        let mut future = new_medication(user, "Future");
        future.start_date = t0().date() + Duration::days(3);
        service.create(&conn, future).unwrap();

        let mut past = new_medication(user, "Past");
        past.start_date = t0().date() - Duration::days(10);
        past.end_date = Some(t0().date() - Duration::days(2));
        past.duration_days = None;
        service.create(&conn, past).unwrap();

        let stats = service.stats(&conn, &user).unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.upcoming, 1);
        assert_eq!(stats.expired, 1);
    }

    #[test]
    fn snapshot_repair_fixes_drift() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Metformin")).unwrap();
        service.mark_dose_taken(&conn, &med.id, &user).unwrap();

        // Corrupt the snapshot directly.
        conn.execute(
            "UPDATE medications SET taken_today_count = 9 WHERE id = ?1",
            params![med.id.to_string()],
        )
        .unwrap();

        let repaired = service.recompute_dose_snapshots(&conn).unwrap();
        assert_eq!(repaired, 1);
        let record = get_medication(&conn, &med.id).unwrap().unwrap();
        assert_eq!(record.taken_today_count, 1);

        // Second pass finds nothing to repair.
        assert_eq!(service.recompute_dose_snapshots(&conn).unwrap(), 0);
    }

    #[test]
    fn permanent_view_blanks_end_fields_even_if_stored() {
        let (conn, mut service) = setup();
        let user = Uuid::new_v4();
        let med = service.create(&conn, new_medication(user, "Course")).unwrap();

        // Flip to permanent; the stored end_date/duration linger but the
        // view must hide them.
        let update = MedicationUpdate { is_permanent: Some(true), ..Default::default() };
        let updated = service.update(&conn, &med.id, &update, &user).unwrap();
        assert_eq!(updated.end_date, None);
        assert_eq!(updated.duration_days, None);
        assert_eq!(updated.status, MedicationStatus::Active);
    }

    #[test]
    fn error_messages_are_user_presentable() {
        let err = MedicationError::PermissionDenied;
        assert_eq!(
            err.to_string(),
            "You do not have permission to modify this medication"
        );

        let id = Uuid::new_v4();
        assert_eq!(
            MedicationError::NotFound(id).to_string(),
            format!("Medication {id} not found")
        );
    }
}
