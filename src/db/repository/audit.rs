use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_ts, parse_opt_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::{AuditAction, DoseStatus};
use crate::models::DoseAuditEntry;

pub fn insert_dose_audit(conn: &Connection, entry: &DoseAuditEntry) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO dose_audit (id, dose_id, action, actor, prior_status, new_status,
         prior_resolved_at, prior_notes, detail, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.id.to_string(),
            entry.dose_id.to_string(),
            entry.action.as_str(),
            entry.actor,
            entry.prior_status.as_str(),
            entry.new_status.as_str(),
            entry.prior_resolved_at.as_ref().map(format_ts),
            entry.prior_notes,
            entry.detail,
            format_ts(&entry.recorded_at),
        ],
    )?;
    Ok(())
}

/// Audit trail of one dose, oldest first.
pub fn get_dose_audit(conn: &Connection, dose_id: &Uuid) -> Result<Vec<DoseAuditEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, dose_id, action, actor, prior_status, new_status, prior_resolved_at,
                prior_notes, detail, recorded_at
         FROM dose_audit WHERE dose_id = ?1
         ORDER BY recorded_at ASC, rowid ASC",
    )?;
    let rows = stmt
        .query_map(params![dose_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(
            |(id, dose_id, action, actor, prior, new, prior_resolved_at, prior_notes, detail, recorded_at)| {
                Ok(DoseAuditEntry {
                    id: parse_uuid(&id)?,
                    dose_id: parse_uuid(&dose_id)?,
                    action: AuditAction::from_str(&action)?,
                    actor,
                    prior_status: DoseStatus::from_str(&prior)?,
                    new_status: DoseStatus::from_str(&new)?,
                    prior_resolved_at: parse_opt_ts(prior_resolved_at)?,
                    prior_notes,
                    detail,
                    recorded_at: parse_ts(&recorded_at)?,
                })
            },
        )
        .collect()
}
