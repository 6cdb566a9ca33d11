use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::DoseEvent;

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Append one ledger event. Events are never updated afterwards.
pub fn insert_dose_event(conn: &Connection, dose: &DoseEvent) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medication_doses (id, medication_id, date, taken, taken_at, notes,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            dose.id.to_string(),
            dose.medication_id.to_string(),
            dose.date.to_string(),
            dose.taken as i32,
            dose.taken_at.map(|t| t.format(DATETIME_FMT).to_string()),
            dose.notes,
            dose.created_at.format(DATETIME_FMT).to_string(),
            dose.updated_at.format(DATETIME_FMT).to_string(),
        ],
    )?;
    Ok(())
}

/// Number of taken events for one medication on one calendar day.
/// This is the unclamped ledger truth; clamping happens in the view.
pub fn count_taken_on(
    conn: &Connection,
    medication_id: &Uuid,
    date: NaiveDate,
) -> Result<u32, DatabaseError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM medication_doses
         WHERE medication_id = ?1 AND date = ?2 AND taken = 1",
        params![medication_id.to_string(), date.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Taken-event counts for every medication of one user on one day,
/// grouped in a single query so list reads stay one round trip.
pub fn taken_counts_for_user(
    conn: &Connection,
    user_id: &Uuid,
    date: NaiveDate,
) -> Result<HashMap<Uuid, u32>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT d.medication_id, COUNT(*)
         FROM medication_doses d
         INNER JOIN medications m ON m.id = d.medication_id
         WHERE m.user_id = ?1 AND d.date = ?2 AND d.taken = 1
         GROUP BY d.medication_id",
    )?;
    let rows = stmt.query_map(params![user_id.to_string(), date.to_string()], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
    })?;

    let mut counts = HashMap::new();
    for row in rows {
        let (id, count) = row?;
        let id = Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?;
        counts.insert(id, count);
    }
    Ok(counts)
}

/// All ledger events for one medication on one day, oldest first.
pub fn get_dose_events_on(
    conn: &Connection,
    medication_id: &Uuid,
    date: NaiveDate,
) -> Result<Vec<DoseEvent>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, medication_id, date, taken, taken_at, notes, created_at, updated_at
         FROM medication_doses
         WHERE medication_id = ?1 AND date = ?2
         ORDER BY created_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(params![medication_id.to_string(), date.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i32>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (id, med_id, date, taken, taken_at, notes, created_at, updated_at) = row?;
        events.push(DoseEvent {
            id: Uuid::parse_str(&id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            medication_id: Uuid::parse_str(&med_id)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            taken: taken != 0,
            taken_at: taken_at.and_then(|t| NaiveDateTime::parse_from_str(&t, DATETIME_FMT).ok()),
            notes,
            created_at: NaiveDateTime::parse_from_str(&created_at, DATETIME_FMT)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
            updated_at: NaiveDateTime::parse_from_str(&updated_at, DATETIME_FMT)
                .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        });
    }
    Ok(events)
}
