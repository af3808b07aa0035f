use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_ts, parse_opt_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::Audience;
use crate::models::ServiceReminder;

const REMINDER_COLUMNS: &str =
    "id, care_recipient_id, service_name, message, scheduled_at, notify_patient, notify_admin,
     notify_supervisor, is_sent, sent_at, failure_reason, delivered_audiences, attempt_count,
     created_at";

pub fn insert_service_reminder(conn: &Connection, reminder: &ServiceReminder) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO service_reminders (id, care_recipient_id, service_name, message, scheduled_at,
         notify_patient, notify_admin, notify_supervisor, is_sent, sent_at, failure_reason,
         delivered_audiences, attempt_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            reminder.id.to_string(),
            reminder.care_recipient_id.to_string(),
            reminder.service_name,
            reminder.message,
            format_ts(&reminder.scheduled_at),
            reminder.notify_patient as i32,
            reminder.notify_admin as i32,
            reminder.notify_supervisor as i32,
            reminder.is_sent as i32,
            reminder.sent_at.as_ref().map(format_ts),
            reminder.failure_reason,
            reminder.delivered_audiences,
            reminder.attempt_count,
            format_ts(&reminder.created_at),
        ],
    )?;
    Ok(())
}

pub fn get_service_reminder(conn: &Connection, id: &Uuid) -> Result<ServiceReminder, DatabaseError> {
    let sql = format!("SELECT {REMINDER_COLUMNS} FROM service_reminders WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], reminder_row_from_rusqlite)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity_type: "service_reminder".into(),
                id: id.to_string(),
            },
            other => DatabaseError::Sqlite(other),
        })?;
    reminder_from_row(row)
}

/// Unsent service reminders whose time has come, oldest first.
pub fn get_pending_service_reminders(
    conn: &Connection,
    now: &NaiveDateTime,
) -> Result<Vec<ServiceReminder>, DatabaseError> {
    let sql = format!(
        "SELECT {REMINDER_COLUMNS} FROM service_reminders
         WHERE is_sent = 0 AND scheduled_at <= ?1
         ORDER BY scheduled_at ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![format_ts(now)], reminder_row_from_rusqlite)?;

    let mut reminders = Vec::new();
    for row in rows {
        reminders.push(reminder_from_row(row?)?);
    }
    Ok(reminders)
}

/// Persist one delivery attempt. `complete` closes the reminder; the update is
/// guarded on `is_sent = 0` so a reminder is never closed twice.
pub fn record_service_reminder_attempt(
    conn: &Connection,
    id: &Uuid,
    delivered_audiences: &str,
    complete: bool,
    failure_reason: Option<&str>,
    now: &NaiveDateTime,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE service_reminders
         SET delivered_audiences = ?2,
             attempt_count = attempt_count + 1,
             is_sent = ?3,
             sent_at = CASE WHEN ?3 = 1 THEN ?4 ELSE sent_at END,
             failure_reason = ?5
         WHERE id = ?1 AND is_sent = 0",
        params![
            id.to_string(),
            delivered_audiences,
            complete as i32,
            format_ts(now),
            failure_reason,
        ],
    )?;
    Ok(changed == 1)
}

/// Count a failed attempt without touching delivery progress. The reminder
/// stays pending.
pub fn record_service_reminder_failure(
    conn: &Connection,
    id: &Uuid,
    failure_reason: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE service_reminders
         SET attempt_count = attempt_count + 1, failure_reason = ?2
         WHERE id = ?1 AND is_sent = 0",
        params![id.to_string(), failure_reason],
    )?;
    Ok(changed == 1)
}

/// Comma-joined audience list as stored in `delivered_audiences` columns.
pub fn encode_audiences(audiences: &[Audience]) -> String {
    audiences
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn decode_audiences(value: &str) -> Result<Vec<Audience>, DatabaseError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Audience::from_str)
        .collect()
}

// Internal row type for ServiceReminder mapping
struct ReminderRow {
    id: String,
    care_recipient_id: String,
    service_name: String,
    message: String,
    scheduled_at: String,
    notify_patient: i32,
    notify_admin: i32,
    notify_supervisor: i32,
    is_sent: i32,
    sent_at: Option<String>,
    failure_reason: Option<String>,
    delivered_audiences: String,
    attempt_count: u32,
    created_at: String,
}

fn reminder_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<ReminderRow, rusqlite::Error> {
    Ok(ReminderRow {
        id: row.get(0)?,
        care_recipient_id: row.get(1)?,
        service_name: row.get(2)?,
        message: row.get(3)?,
        scheduled_at: row.get(4)?,
        notify_patient: row.get(5)?,
        notify_admin: row.get(6)?,
        notify_supervisor: row.get(7)?,
        is_sent: row.get(8)?,
        sent_at: row.get(9)?,
        failure_reason: row.get(10)?,
        delivered_audiences: row.get(11)?,
        attempt_count: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn reminder_from_row(row: ReminderRow) -> Result<ServiceReminder, DatabaseError> {
    Ok(ServiceReminder {
        id: parse_uuid(&row.id)?,
        care_recipient_id: parse_uuid(&row.care_recipient_id)?,
        service_name: row.service_name,
        message: row.message,
        scheduled_at: parse_ts(&row.scheduled_at)?,
        notify_patient: row.notify_patient != 0,
        notify_admin: row.notify_admin != 0,
        notify_supervisor: row.notify_supervisor != 0,
        is_sent: row.is_sent != 0,
        sent_at: parse_opt_ts(row.sent_at)?,
        failure_reason: row.failure_reason,
        delivered_audiences: row.delivered_audiences,
        attempt_count: row.attempt_count,
        created_at: parse_ts(&row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::fixtures::*;
    use crate::db::sqlite::open_memory_database;

    fn make_reminder(conn: &Connection, at: &str) -> ServiceReminder {
        let reminder = ServiceReminder {
            id: Uuid::new_v4(),
            care_recipient_id: make_recipient(conn),
            service_name: "Physiotherapy".into(),
            message: "Physiotherapy session at 10:00".into(),
            scheduled_at: ts(at),
            notify_patient: true,
            notify_admin: true,
            notify_supervisor: false,
            is_sent: false,
            sent_at: None,
            failure_reason: None,
            delivered_audiences: String::new(),
            attempt_count: 0,
            created_at: ts("2024-01-01 00:00"),
        };
        insert_service_reminder(conn, &reminder).unwrap();
        reminder
    }

    #[test]
    fn pending_only_includes_due_unsent() {
        let conn = open_memory_database().unwrap();
        let due = make_reminder(&conn, "2024-01-01 09:00");
        make_reminder(&conn, "2024-01-01 11:00");

        let pending = get_pending_service_reminders(&conn, &ts("2024-01-01 09:30")).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, due.id);
    }

    #[test]
    fn attempts_accumulate_until_complete() {
        let conn = open_memory_database().unwrap();
        let reminder = make_reminder(&conn, "2024-01-01 09:00");
        let now = ts("2024-01-01 09:01");

        assert!(record_service_reminder_attempt(&conn, &reminder.id, "patient", false, Some("gateway down"), &now).unwrap());
        let partial = get_service_reminder(&conn, &reminder.id).unwrap();
        assert_eq!(partial.attempt_count, 1);
        assert!(!partial.is_sent);
        assert_eq!(partial.sent_at, None);

        assert!(record_service_reminder_attempt(&conn, &reminder.id, "patient,admin", true, None, &now).unwrap());
        let done = get_service_reminder(&conn, &reminder.id).unwrap();
        assert!(done.is_sent);
        assert_eq!(done.attempt_count, 2);
        assert_eq!(done.sent_at, Some(now));
        assert_eq!(done.failure_reason, None);

        // Closed reminders are never rewritten.
        assert!(!record_service_reminder_attempt(&conn, &reminder.id, "", true, None, &now).unwrap());
    }

    #[test]
    fn failure_keeps_reminder_pending() {
        let conn = open_memory_database().unwrap();
        let reminder = make_reminder(&conn, "2024-01-01 09:00");

        assert!(record_service_reminder_failure(&conn, &reminder.id, "bad audience list").unwrap());
        let failed = get_service_reminder(&conn, &reminder.id).unwrap();
        assert!(!failed.is_sent);
        assert_eq!(failed.attempt_count, 1);
        assert_eq!(failed.failure_reason.as_deref(), Some("bad audience list"));

        record_service_reminder_attempt(&conn, &reminder.id, "patient,admin", true, None, &ts("2024-01-01 09:05")).unwrap();
        assert!(!record_service_reminder_failure(&conn, &reminder.id, "late").unwrap());
    }

    #[test]
    fn audiences_encode_and_decode() {
        let encoded = encode_audiences(&[Audience::Patient, Audience::Admin]);
        assert_eq!(encoded, "patient,admin");
        assert_eq!(decode_audiences(&encoded).unwrap(), vec![Audience::Patient, Audience::Admin]);
        assert!(decode_audiences("").unwrap().is_empty());
        assert!(decode_audiences("patient,robot").is_err());
    }
}
