use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_date, format_ts, parse_date, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

const MEDICATION_COLUMNS: &str =
    "id, care_recipient_id, name, form, dosage, route, frequency_type, frequency_detail,
     start_date, end_date, criticality, is_prn, is_high_alert, grace_period_minutes,
     notify_patient, notify_nurse, notify_supervisor, notify_family, escalation_enabled,
     status, created_at, updated_at";

pub fn insert_medication(conn: &Connection, med: &Medication) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO medications (id, care_recipient_id, name, form, dosage, route, frequency_type,
         frequency_detail, start_date, end_date, criticality, is_prn, is_high_alert,
         grace_period_minutes, notify_patient, notify_nurse, notify_supervisor, notify_family,
         escalation_enabled, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
        params![
            med.id.to_string(),
            med.care_recipient_id.to_string(),
            med.name,
            med.form,
            med.dosage,
            med.route,
            med.frequency_type.as_str(),
            med.frequency_detail,
            format_date(&med.start_date),
            med.end_date.as_ref().map(format_date),
            med.criticality.as_str(),
            med.is_prn as i32,
            med.is_high_alert as i32,
            med.grace_period_minutes,
            med.notify_patient as i32,
            med.notify_nurse as i32,
            med.notify_supervisor as i32,
            med.notify_family as i32,
            med.escalation_enabled as i32,
            med.status.as_str(),
            format_ts(&med.created_at),
            format_ts(&med.updated_at),
        ],
    )?;
    Ok(())
}

/// Overwrite every editable column of an existing medication.
pub fn update_medication(conn: &Connection, med: &Medication) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET name = ?2, form = ?3, dosage = ?4, route = ?5,
         frequency_type = ?6, frequency_detail = ?7, start_date = ?8, end_date = ?9,
         criticality = ?10, is_prn = ?11, is_high_alert = ?12, grace_period_minutes = ?13,
         notify_patient = ?14, notify_nurse = ?15, notify_supervisor = ?16, notify_family = ?17,
         escalation_enabled = ?18, status = ?19, updated_at = ?20
         WHERE id = ?1",
        params![
            med.id.to_string(),
            med.name,
            med.form,
            med.dosage,
            med.route,
            med.frequency_type.as_str(),
            med.frequency_detail,
            format_date(&med.start_date),
            med.end_date.as_ref().map(format_date),
            med.criticality.as_str(),
            med.is_prn as i32,
            med.is_high_alert as i32,
            med.grace_period_minutes,
            med.notify_patient as i32,
            med.notify_nurse as i32,
            med.notify_supervisor as i32,
            med.notify_family as i32,
            med.escalation_enabled as i32,
            med.status.as_str(),
            format_ts(&med.updated_at),
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "medication".into(),
            id: med.id.to_string(),
        });
    }
    Ok(())
}

pub fn get_medication(conn: &Connection, id: &Uuid) -> Result<Medication, DatabaseError> {
    let sql = format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], medication_row_from_rusqlite)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity_type: "medication".into(),
                id: id.to_string(),
            },
            other => DatabaseError::Sqlite(other),
        })?;
    medication_from_row(row)
}

pub fn get_active_medications(conn: &Connection) -> Result<Vec<Medication>, DatabaseError> {
    let sql = format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications WHERE status = 'active' ORDER BY created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], medication_row_from_rusqlite)?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row?)?);
    }
    Ok(meds)
}

pub fn get_medications_for_recipient(
    conn: &Connection,
    care_recipient_id: &Uuid,
) -> Result<Vec<Medication>, DatabaseError> {
    let sql = format!(
        "SELECT {MEDICATION_COLUMNS} FROM medications WHERE care_recipient_id = ?1 ORDER BY name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![care_recipient_id.to_string()], medication_row_from_rusqlite)?;

    let mut meds = Vec::new();
    for row in rows {
        meds.push(medication_from_row(row?)?);
    }
    Ok(meds)
}

pub fn set_medication_status(
    conn: &Connection,
    id: &Uuid,
    status: MedicationStatus,
    updated_at: &chrono::NaiveDateTime,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE medications SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), format_ts(updated_at)],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "medication".into(),
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Hard delete. Fails with a constraint violation when doses reference the row.
pub fn delete_medication(conn: &Connection, id: &Uuid) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM medications WHERE id = ?1", params![id.to_string()])
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DatabaseError::ConstraintViolation(format!("medication {id} still has doses"))
            }
            other => DatabaseError::Sqlite(other),
        })?;
    Ok(())
}

// Internal row type for Medication mapping
struct MedicationRow {
    id: String,
    care_recipient_id: String,
    name: String,
    form: Option<String>,
    dosage: String,
    route: Option<String>,
    frequency_type: String,
    frequency_detail: String,
    start_date: String,
    end_date: Option<String>,
    criticality: String,
    is_prn: i32,
    is_high_alert: i32,
    grace_period_minutes: i64,
    notify_patient: i32,
    notify_nurse: i32,
    notify_supervisor: i32,
    notify_family: i32,
    escalation_enabled: i32,
    status: String,
    created_at: String,
    updated_at: String,
}

fn medication_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<MedicationRow, rusqlite::Error> {
    Ok(MedicationRow {
        id: row.get(0)?,
        care_recipient_id: row.get(1)?,
        name: row.get(2)?,
        form: row.get(3)?,
        dosage: row.get(4)?,
        route: row.get(5)?,
        frequency_type: row.get(6)?,
        frequency_detail: row.get(7)?,
        start_date: row.get(8)?,
        end_date: row.get(9)?,
        criticality: row.get(10)?,
        is_prn: row.get(11)?,
        is_high_alert: row.get(12)?,
        grace_period_minutes: row.get(13)?,
        notify_patient: row.get(14)?,
        notify_nurse: row.get(15)?,
        notify_supervisor: row.get(16)?,
        notify_family: row.get(17)?,
        escalation_enabled: row.get(18)?,
        status: row.get(19)?,
        created_at: row.get(20)?,
        updated_at: row.get(21)?,
    })
}

fn medication_from_row(row: MedicationRow) -> Result<Medication, DatabaseError> {
    Ok(Medication {
        id: parse_uuid(&row.id)?,
        care_recipient_id: parse_uuid(&row.care_recipient_id)?,
        name: row.name,
        form: row.form,
        dosage: row.dosage,
        route: row.route,
        frequency_type: FrequencyType::from_str(&row.frequency_type)?,
        frequency_detail: row.frequency_detail,
        start_date: parse_date(&row.start_date)?,
        end_date: row.end_date.as_deref().map(parse_date).transpose()?,
        criticality: Criticality::from_str(&row.criticality)?,
        is_prn: row.is_prn != 0,
        is_high_alert: row.is_high_alert != 0,
        grace_period_minutes: row.grace_period_minutes,
        notify_patient: row.notify_patient != 0,
        notify_nurse: row.notify_nurse != 0,
        notify_supervisor: row.notify_supervisor != 0,
        notify_family: row.notify_family != 0,
        escalation_enabled: row.escalation_enabled != 0,
        status: MedicationStatus::from_str(&row.status)?,
        created_at: parse_ts(&row.created_at)?,
        updated_at: parse_ts(&row.updated_at)?,
    })
}
