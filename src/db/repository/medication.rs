use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::MedicationForm;
use crate::models::{MedicationRecord, MedicationUpdate};

const MEDICATION_COLUMNS: &str =
    "id, user_id, name, description, dosage, form, frequency, start_date, end_date,
     is_permanent, is_active, daily_doses, duration_days, times_per_day, notes,
     taken_today_count, created_at, updated_at";

const DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn insert_medication(conn: &Connection, med: &MedicationRecord) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, user_id, name, description, dosage, form, frequency,
         start_date, end_date, is_permanent, is_active, daily_doses, duration_days,
         times_per_day, notes, taken_today_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            med.id.to_string(),
            med.user_id.to_string(),
            med.name,
            med.description,
            med.dosage,
            med.form.as_str(),
            med.frequency,
            med.start_date.to_string(),
            med.end_date.map(|d| d.to_string()),
            med.is_permanent as i32,
            med.is_active as i32,
            med.daily_doses,
            med.duration_days,
            encode_times(&med.times_per_day)?,
            med.notes,
            med.taken_today_count,
            med.created_at.format(DATETIME_FMT).to_string(),
            med.updated_at.format(DATETIME_FMT).to_string(),
        ],
    )?;
    Ok(())
}

pub fn get_medication(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<MedicationRecord>, DatabaseError> {
    let sql = format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1");
    let result = conn.query_row(&sql, params![id.to_string()], |row| {
        Ok(medication_row_from_rusqlite(row))
    });

    match result {
        Ok(row) => Ok(Some(medication_from_row(row?)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// Owner lookup for permission checks — avoids materializing the record.
pub fn get_medication_owner(
    conn: &Connection,
    id: &Uuid,
) -> Result<Option<Uuid>, DatabaseError> {
    let result = conn.query_row(
        "SELECT user_id FROM medications WHERE id = ?1",
        params![id.to_string()],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(owner) => Ok(Some(
            Uuid::parse_str(&owner).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        )),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DatabaseError::from(e)),
    }
}

/// All medications for one user, newest first.
pub fn get_medications_for_user(
    conn: &Connection,
    user_id: &Uuid,
) -> Result<Vec<MedicationRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications
         WHERE user_id = ?1 ORDER BY created_at DESC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id.to_string()], |row| {
        Ok(medication_row_from_rusqlite(row))
    })?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row??)?);
    }
    Ok(meds)
}

/// All non-permanent medications, across users. Used by the cleanup sweep,
/// which resolves effective end dates in Rust before deleting.
pub fn get_nonpermanent_medications(
    conn: &Connection,
) -> Result<Vec<MedicationRecord>, DatabaseError> {
    let sql =
        format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE is_permanent = 0");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok(medication_row_from_rusqlite(row)))?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row??)?);
    }
    Ok(meds)
}

/// All medications, across users. Used by the snapshot repair pass.
pub fn get_all_medications(conn: &Connection) -> Result<Vec<MedicationRecord>, DatabaseError> {
    let sql = format!("SELECT {MEDICATION_COLUMNS} FROM medications");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| Ok(medication_row_from_rusqlite(row)))?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row??)?);
    }
    Ok(meds)
}

/// Apply a partial update as a single UPDATE statement. The dose snapshot
/// (`taken_today_count`) merges in the same statement, so a field update
/// and a snapshot write never race each other. Returns rows affected
/// (0 when the id does not exist).
pub fn update_medication_fields(
    conn: &Connection,
    id: &Uuid,
    update: &MedicationUpdate,
    now: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let mut sql = String::from("UPDATE medications SET updated_at = ?1");
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(now.format(DATETIME_FMT).to_string())];
    let mut param_idx = 2;

    let mut push = |sql: &mut String, column: &str, value: Box<dyn rusqlite::types::ToSql>| {
        sql.push_str(&format!(", {column} = ?{param_idx}"));
        params_vec.push(value);
        param_idx += 1;
    };

    if let Some(name) = &update.name {
        push(&mut sql, "name", Box::new(name.clone()));
    }
    if let Some(description) = &update.description {
        push(&mut sql, "description", Box::new(description.clone()));
    }
    if let Some(dosage) = &update.dosage {
        push(&mut sql, "dosage", Box::new(dosage.clone()));
    }
    if let Some(form) = &update.form {
        push(&mut sql, "form", Box::new(form.as_str()));
    }
    if let Some(frequency) = &update.frequency {
        push(&mut sql, "frequency", Box::new(frequency.clone()));
    }
    if let Some(start_date) = &update.start_date {
        push(&mut sql, "start_date", Box::new(start_date.to_string()));
    }
    if let Some(end_date) = &update.end_date {
        push(&mut sql, "end_date", Box::new(end_date.to_string()));
    }
    if let Some(is_permanent) = update.is_permanent {
        push(&mut sql, "is_permanent", Box::new(is_permanent as i32));
    }
    if let Some(is_active) = update.is_active {
        push(&mut sql, "is_active", Box::new(is_active as i32));
    }
    if let Some(daily_doses) = update.daily_doses {
        push(&mut sql, "daily_doses", Box::new(daily_doses));
    }
    if let Some(duration_days) = update.duration_days {
        push(&mut sql, "duration_days", Box::new(duration_days));
    }
    if let Some(times) = &update.times_per_day {
        push(&mut sql, "times_per_day", Box::new(encode_times(times)?));
    }
    if let Some(notes) = &update.notes {
        push(&mut sql, "notes", Box::new(notes.clone()));
    }
    if let Some(count) = update.taken_today_count {
        push(&mut sql, "taken_today_count", Box::new(count));
    }

    sql.push_str(&format!(" WHERE id = ?{param_idx}"));
    params_vec.push(Box::new(id.to_string()));

    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|p| p.as_ref()).collect();

    let affected = conn.execute(&sql, params_refs.as_slice())?;
    Ok(affected)
}

/// Write only the recomputed dose snapshot. Returns rows affected.
pub fn set_taken_snapshot(
    conn: &Connection,
    id: &Uuid,
    count: u32,
    now: NaiveDateTime,
) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "UPDATE medications SET taken_today_count = ?1, updated_at = ?2 WHERE id = ?3",
        params![count, now.format(DATETIME_FMT).to_string(), id.to_string()],
    )?;
    Ok(affected)
}

/// Delete a medication; dose events go with it via ON DELETE CASCADE.
/// Returns rows affected (0 when the id does not exist).
pub fn delete_medication(conn: &Connection, id: &Uuid) -> Result<usize, DatabaseError> {
    let affected = conn.execute(
        "DELETE FROM medications WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(affected)
}

fn encode_times(times: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(times).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

// Internal row type for MedicationRecord mapping
struct MedicationRow {
    id: String,
    user_id: String,
    name: String,
    description: Option<String>,
    dosage: String,
    form: String,
    frequency: String,
    start_date: String,
    end_date: Option<String>,
    is_permanent: i32,
    is_active: i32,
    daily_doses: u32,
    duration_days: Option<u32>,
    times_per_day: String,
    notes: Option<String>,
    taken_today_count: u32,
    created_at: String,
    updated_at: String,
}

fn medication_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<MedicationRow, rusqlite::Error> {
    Ok(MedicationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        dosage: row.get(4)?,
        form: row.get(5)?,
        frequency: row.get(6)?,
        start_date: row.get(7)?,
        end_date: row.get(8)?,
        is_permanent: row.get(9)?,
        is_active: row.get(10)?,
        daily_doses: row.get(11)?,
        duration_days: row.get(12)?,
        times_per_day: row.get(13)?,
        notes: row.get(14)?,
        taken_today_count: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn medication_from_row(row: MedicationRow) -> Result<MedicationRecord, DatabaseError> {
    Ok(MedicationRecord {
        id: Uuid::parse_str(&row.id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        user_id: Uuid::parse_str(&row.user_id)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        name: row.name,
        description: row.description,
        dosage: row.dosage,
        form: MedicationForm::from_str(&row.form)?,
        frequency: row.frequency,
        start_date: NaiveDate::parse_from_str(&row.start_date, "%Y-%m-%d")
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        end_date: row
            .end_date
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        is_permanent: row.is_permanent != 0,
        is_active: row.is_active != 0,
        daily_doses: row.daily_doses,
        duration_days: row.duration_days,
        times_per_day: serde_json::from_str(&row.times_per_day).unwrap_or_default(),
        notes: row.notes,
        taken_today_count: row.taken_today_count,
        created_at: NaiveDateTime::parse_from_str(&row.created_at, DATETIME_FMT)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
        updated_at: NaiveDateTime::parse_from_str(&row.updated_at, DATETIME_FMT)
            .map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))?,
    })
}
