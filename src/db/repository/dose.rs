use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{format_ts, parse_opt_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::*;
use crate::models::*;

const DOSE_COLUMNS: &str =
    "d.id, d.medication_id, d.scheduled_at, d.status, d.resolved_at, d.resolved_by, d.notes,
     d.missed_reason, d.side_effect_severity, d.side_effect_description, d.escalation_level,
     d.reminder_sent, d.reminder_audiences, d.created_at";

/// Grace deadline of a dose, computed in SQL from its medication.
const GRACE_DEADLINE_SQL: &str =
    "datetime(d.scheduled_at, '+' || m.grace_period_minutes || ' minutes')";

/// Insert a `scheduled` dose unless one already exists for the same instant.
/// Returns true when a row was created.
pub fn insert_dose_if_absent(
    conn: &Connection,
    medication_id: &Uuid,
    scheduled_at: &NaiveDateTime,
    created_at: &NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO doses (id, medication_id, scheduled_at, status, created_at)
         VALUES (?1, ?2, ?3, 'scheduled', ?4)",
        params![
            Uuid::new_v4().to_string(),
            medication_id.to_string(),
            format_ts(scheduled_at),
            format_ts(created_at),
        ],
    )?;
    Ok(inserted == 1)
}

/// Insert a fully-formed dose row (ad hoc PRN administrations).
pub fn insert_dose(conn: &Connection, dose: &Dose) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO doses (id, medication_id, scheduled_at, status, resolved_at, resolved_by,
         notes, missed_reason, side_effect_severity, side_effect_description, escalation_level,
         reminder_sent, reminder_audiences, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            dose.id.to_string(),
            dose.medication_id.to_string(),
            format_ts(&dose.scheduled_at),
            dose.status.as_str(),
            dose.resolved_at.as_ref().map(format_ts),
            dose.resolved_by,
            dose.notes,
            dose.missed_reason,
            dose.side_effect_severity.map(|s| s.as_str()),
            dose.side_effect_description,
            dose.escalation_level.as_i64(),
            dose.reminder_sent as i32,
            dose.reminder_audiences,
            format_ts(&dose.created_at),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DatabaseError::ConstraintViolation(format!(
                "a dose already exists for medication {} at {}",
                dose.medication_id,
                format_ts(&dose.scheduled_at)
            ))
        }
        other => DatabaseError::Sqlite(other),
    })?;
    Ok(())
}

pub fn get_dose(conn: &Connection, id: &Uuid) -> Result<Dose, DatabaseError> {
    let sql = format!("SELECT {DOSE_COLUMNS} FROM doses d WHERE d.id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], dose_row_from_rusqlite)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity_type: "dose".into(),
                id: id.to_string(),
            },
            other => DatabaseError::Sqlite(other),
        })?;
    dose_from_row(row)
}

pub fn get_dose_at(
    conn: &Connection,
    medication_id: &Uuid,
    scheduled_at: &NaiveDateTime,
) -> Result<Option<Dose>, DatabaseError> {
    let sql = format!(
        "SELECT {DOSE_COLUMNS} FROM doses d WHERE d.medication_id = ?1 AND d.scheduled_at = ?2"
    );
    let row = conn
        .query_row(
            &sql,
            params![medication_id.to_string(), format_ts(scheduled_at)],
            dose_row_from_rusqlite,
        )
        .optional()?;
    row.map(dose_from_row).transpose()
}

/// Doses of a medication with `from <= scheduled_at < to`, ascending.
pub fn get_doses_for_medication(
    conn: &Connection,
    medication_id: &Uuid,
    from: &NaiveDateTime,
    to: &NaiveDateTime,
) -> Result<Vec<Dose>, DatabaseError> {
    let sql = format!(
        "SELECT {DOSE_COLUMNS} FROM doses d
         WHERE d.medication_id = ?1 AND d.scheduled_at >= ?2 AND d.scheduled_at < ?3
         ORDER BY d.scheduled_at ASC"
    );
    query_doses(
        conn,
        &sql,
        params![medication_id.to_string(), format_ts(from), format_ts(to)],
    )
}

pub fn count_doses_for_medication(conn: &Connection, medication_id: &Uuid) -> Result<u32, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM doses WHERE medication_id = ?1",
        params![medication_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Unresolved doses of a medication scheduled strictly after `after`.
pub fn get_future_unresolved_doses(
    conn: &Connection,
    medication_id: &Uuid,
    after: &NaiveDateTime,
) -> Result<Vec<Dose>, DatabaseError> {
    let sql = format!(
        "SELECT {DOSE_COLUMNS} FROM doses d
         WHERE d.medication_id = ?1 AND d.scheduled_at > ?2
           AND d.status IN ('scheduled', 'due', 'late')
         ORDER BY d.scheduled_at ASC"
    );
    query_doses(conn, &sql, params![medication_id.to_string(), format_ts(after)])
}

/// Column values written when a dose is resolved or corrected.
#[derive(Debug, Clone)]
pub struct DoseResolution {
    pub status: DoseStatus,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolved_by: Option<String>,
    pub notes: Option<String>,
    pub missed_reason: Option<String>,
    pub side_effect_severity: Option<SideEffectSeverity>,
    pub side_effect_description: Option<String>,
}

/// Write a resolution only if the dose is still in `expected` status.
/// Returns false when another writer got there first.
pub fn apply_dose_resolution(
    conn: &Connection,
    id: &Uuid,
    expected: DoseStatus,
    resolution: &DoseResolution,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE doses SET status = ?3, resolved_at = ?4, resolved_by = ?5, notes = ?6,
         missed_reason = ?7, side_effect_severity = ?8, side_effect_description = ?9
         WHERE id = ?1 AND status = ?2",
        params![
            id.to_string(),
            expected.as_str(),
            resolution.status.as_str(),
            resolution.resolved_at.as_ref().map(format_ts),
            resolution.resolved_by,
            resolution.notes,
            resolution.missed_reason,
            resolution.side_effect_severity.map(|s| s.as_str()),
            resolution.side_effect_description,
        ],
    )?;
    Ok(changed == 1)
}

/// `scheduled → due` for every dose whose time has come.
pub fn promote_due_doses(conn: &Connection, now: &NaiveDateTime) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE doses SET status = 'due' WHERE status = 'scheduled' AND scheduled_at <= ?1",
        params![format_ts(now)],
    )?;
    Ok(changed)
}

/// `scheduled/due → late` for every dose past its medication's grace period.
pub fn promote_late_doses(conn: &Connection, now: &NaiveDateTime) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE doses SET status = 'late'
         WHERE status IN ('scheduled', 'due')
           AND datetime(scheduled_at, '+' ||
               (SELECT m.grace_period_minutes FROM medications m WHERE m.id = doses.medication_id)
               || ' minutes') < ?1",
        params![format_ts(now)],
    )?;
    Ok(changed)
}

/// Unresolved doses whose grace period plus `window_minutes` elapsed before `now`.
pub fn get_doses_past_missed_window(
    conn: &Connection,
    now: &NaiveDateTime,
    window_minutes: i64,
) -> Result<Vec<Dose>, DatabaseError> {
    let sql = format!(
        "SELECT {DOSE_COLUMNS} FROM doses d
         JOIN medications m ON m.id = d.medication_id
         WHERE d.status IN ('scheduled', 'due', 'late')
           AND datetime({GRACE_DEADLINE_SQL}, '+' || ?2 || ' minutes') < ?1
         ORDER BY d.scheduled_at ASC"
    );
    query_doses(conn, &sql, params![format_ts(now), window_minutes])
}

/// Unresolved doses past grace on active medications with escalation enabled.
pub fn get_escalation_candidates(
    conn: &Connection,
    now: &NaiveDateTime,
) -> Result<Vec<Dose>, DatabaseError> {
    let sql = format!(
        "SELECT {DOSE_COLUMNS} FROM doses d
         JOIN medications m ON m.id = d.medication_id
         WHERE d.status IN ('scheduled', 'due', 'late')
           AND m.escalation_enabled = 1
           AND m.status = 'active'
           AND d.escalation_level < 3
           AND {GRACE_DEADLINE_SQL} < ?1
         ORDER BY d.scheduled_at ASC"
    );
    query_doses(conn, &sql, params![format_ts(now)])
}

/// Raise the escalation level from `from` to `to`. Returns false if the stored
/// level was no longer `from` or the dose has been resolved meanwhile.
pub fn raise_escalation_level(
    conn: &Connection,
    id: &Uuid,
    from: EscalationLevel,
    to: EscalationLevel,
) -> Result<bool, DatabaseError> {
    if to <= from {
        return Err(DatabaseError::ConstraintViolation(format!(
            "escalation level may only increase ({} -> {})",
            from.as_i64(),
            to.as_i64()
        )));
    }
    let changed = conn.execute(
        "UPDATE doses SET escalation_level = ?3
         WHERE id = ?1 AND escalation_level = ?2 AND status IN ('scheduled', 'due', 'late')",
        params![id.to_string(), from.as_i64(), to.as_i64()],
    )?;
    Ok(changed == 1)
}

/// Doses whose reminder window is open: `scheduled_at <= until` and
/// `now < grace deadline`. `until` is `now` plus the reminder lead.
pub fn get_dose_reminder_candidates(
    conn: &Connection,
    now: &NaiveDateTime,
    until: &NaiveDateTime,
) -> Result<Vec<Dose>, DatabaseError> {
    let sql = format!(
        "SELECT {DOSE_COLUMNS} FROM doses d
         JOIN medications m ON m.id = d.medication_id
         WHERE d.reminder_sent = 0
           AND d.status IN ('scheduled', 'due')
           AND m.status = 'active'
           AND (m.notify_patient = 1 OR m.notify_nurse = 1)
           AND d.scheduled_at <= ?2
           AND {GRACE_DEADLINE_SQL} > ?1
         ORDER BY d.scheduled_at ASC"
    );
    query_doses(conn, &sql, params![format_ts(now), format_ts(until)])
}

/// Persist reminder progress for a dose, guarded on `reminder_sent = 0`.
pub fn record_dose_reminder(
    conn: &Connection,
    id: &Uuid,
    delivered_audiences: &str,
    complete: bool,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE doses SET reminder_audiences = ?2, reminder_sent = ?3
         WHERE id = ?1 AND reminder_sent = 0",
        params![id.to_string(), delivered_audiences, complete as i32],
    )?;
    Ok(changed == 1)
}

fn query_doses(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Dose>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, dose_row_from_rusqlite)?;

    let mut doses = Vec::new();
    for row in rows {
        doses.push(dose_from_row(row?)?);
    }
    Ok(doses)
}

// Internal row type for Dose mapping
struct DoseRow {
    id: String,
    medication_id: String,
    scheduled_at: String,
    status: String,
    resolved_at: Option<String>,
    resolved_by: Option<String>,
    notes: Option<String>,
    missed_reason: Option<String>,
    side_effect_severity: Option<String>,
    side_effect_description: Option<String>,
    escalation_level: i64,
    reminder_sent: i32,
    reminder_audiences: String,
    created_at: String,
}

fn dose_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<DoseRow, rusqlite::Error> {
    Ok(DoseRow {
        id: row.get(0)?,
        medication_id: row.get(1)?,
        scheduled_at: row.get(2)?,
        status: row.get(3)?,
        resolved_at: row.get(4)?,
        resolved_by: row.get(5)?,
        notes: row.get(6)?,
        missed_reason: row.get(7)?,
        side_effect_severity: row.get(8)?,
        side_effect_description: row.get(9)?,
        escalation_level: row.get(10)?,
        reminder_sent: row.get(11)?,
        reminder_audiences: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn dose_from_row(row: DoseRow) -> Result<Dose, DatabaseError> {
    Ok(Dose {
        id: parse_uuid(&row.id)?,
        medication_id: parse_uuid(&row.medication_id)?,
        scheduled_at: parse_ts(&row.scheduled_at)?,
        status: DoseStatus::from_str(&row.status)?,
        resolved_at: parse_opt_ts(row.resolved_at)?,
        resolved_by: row.resolved_by,
        notes: row.notes,
        missed_reason: row.missed_reason,
        side_effect_severity: row
            .side_effect_severity
            .as_deref()
            .map(SideEffectSeverity::from_str)
            .transpose()?,
        side_effect_description: row.side_effect_description,
        escalation_level: EscalationLevel::from_i64(row.escalation_level)?,
        reminder_sent: row.reminder_sent != 0,
        reminder_audiences: row.reminder_audiences,
        created_at: parse_ts(&row.created_at)?,
    })
}
