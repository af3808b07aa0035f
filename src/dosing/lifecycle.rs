//! Dose lifecycle: `scheduled → due → late → {taken | missed | skipped | cancelled}`.
//!
//! Time moves doses forward through [`sweep`]; caregivers resolve them with the
//! explicit operations below. Every status write is conditional on the status
//! that was read, and every caregiver action appends a `dose_audit` row in the
//! same transaction.

use chrono::{Duration, NaiveDateTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::MissedPolicy;
use crate::db::repository::{self, DoseResolution};
use crate::db::DatabaseError;
use crate::error::CareError;
use crate::models::enums::{AuditAction, DoseStatus, EscalationLevel};
use crate::models::{Dose, DoseAuditEntry, DoseCorrection, DoseRecord};

/// How far into the future a reported administration time may be.
const FUTURE_TOLERANCE_MINUTES: i64 = 5;

pub const SYSTEM_ACTOR: &str = "system";
pub const AUTO_MISSED_REASON: &str = "auto: no response within window";

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub became_due: usize,
    pub became_late: usize,
    pub auto_missed: usize,
    pub errors: Vec<String>,
}

/// Apply time-driven transitions as of `now`.
pub fn sweep(conn: &Connection, now: NaiveDateTime, policy: MissedPolicy) -> Result<SweepReport, CareError> {
    let mut report = SweepReport {
        became_due: repository::promote_due_doses(conn, &now)?,
        became_late: repository::promote_late_doses(conn, &now)?,
        ..Default::default()
    };

    if let MissedPolicy::AfterWindow { minutes } = policy {
        for dose in repository::get_doses_past_missed_window(conn, &now, minutes)? {
            let resolution = DoseResolution {
                status: DoseStatus::Missed,
                resolved_at: Some(now),
                resolved_by: Some(SYSTEM_ACTOR.to_string()),
                notes: dose.notes.clone(),
                missed_reason: Some(AUTO_MISSED_REASON.to_string()),
                side_effect_severity: dose.side_effect_severity,
                side_effect_description: dose.side_effect_description.clone(),
            };
            let detail = format!("no response {minutes} minutes after grace period");
            match resolve_with_audit(conn, now, &dose, &resolution, AuditAction::AutoMissed, SYSTEM_ACTOR, Some(detail)) {
                Ok(_) => report.auto_missed += 1,
                Err(CareError::Conflict(_)) => {
                    tracing::debug!(dose_id = %dose.id, "Dose resolved before auto-miss, skipping");
                }
                Err(e) => {
                    tracing::warn!(dose_id = %dose.id, error = %e, "Auto-miss failed");
                    report.errors.push(format!("dose {}: {e}", dose.id));
                }
            }
        }
    }

    if report.became_due + report.became_late + report.auto_missed > 0 {
        tracing::info!(
            due = report.became_due,
            late = report.became_late,
            auto_missed = report.auto_missed,
            "Lifecycle sweep applied"
        );
    }
    Ok(report)
}

/// Record a dose as taken. On an already-taken dose this is a re-confirmation
/// that overwrites time, notes and side effects; the prior values are audited.
pub fn record_dose(
    conn: &Connection,
    now: NaiveDateTime,
    dose_id: &Uuid,
    record: &DoseRecord,
) -> Result<Dose, CareError> {
    require_text("actor", &record.actor)?;
    check_not_future(now, record.taken_at)?;

    let dose = repository::get_dose(conn, dose_id)?;
    let action = match dose.status {
        DoseStatus::Taken => AuditAction::Rerecorded,
        DoseStatus::Scheduled | DoseStatus::Due | DoseStatus::Late => AuditAction::Recorded,
        DoseStatus::Missed | DoseStatus::Skipped | DoseStatus::Cancelled => {
            return Err(CareError::Validation(format!(
                "dose {dose_id} is {}; use a correction to change it",
                dose.status
            )))
        }
    };

    let resolution = DoseResolution {
        status: DoseStatus::Taken,
        resolved_at: Some(record.taken_at),
        resolved_by: Some(record.actor.clone()),
        notes: record.notes.clone(),
        missed_reason: None,
        side_effect_severity: record.side_effect_severity,
        side_effect_description: record.side_effect_description.clone(),
    };
    let updated = resolve_with_audit(conn, now, &dose, &resolution, action, &record.actor, None)?;

    tracing::info!(dose_id = %dose_id, action = %action, "Dose recorded as taken");
    Ok(updated)
}

pub fn mark_missed(
    conn: &Connection,
    now: NaiveDateTime,
    dose_id: &Uuid,
    actor: &str,
    reason: &str,
) -> Result<Dose, CareError> {
    close_unresolved(conn, now, dose_id, actor, reason, DoseStatus::Missed, AuditAction::Missed)
}

pub fn skip_dose(
    conn: &Connection,
    now: NaiveDateTime,
    dose_id: &Uuid,
    actor: &str,
    reason: &str,
) -> Result<Dose, CareError> {
    close_unresolved(conn, now, dose_id, actor, reason, DoseStatus::Skipped, AuditAction::Skipped)
}

pub fn cancel_dose(
    conn: &Connection,
    now: NaiveDateTime,
    dose_id: &Uuid,
    actor: &str,
    reason: &str,
) -> Result<Dose, CareError> {
    close_unresolved(conn, now, dose_id, actor, reason, DoseStatus::Cancelled, AuditAction::Cancelled)
}

/// Explicit override of any status, terminal ones included.
pub fn correct_dose(
    conn: &Connection,
    now: NaiveDateTime,
    dose_id: &Uuid,
    correction: &DoseCorrection,
) -> Result<Dose, CareError> {
    require_text("actor", &correction.actor)?;
    require_text("reason", &correction.reason)?;

    let dose = repository::get_dose(conn, dose_id)?;
    let resolution = match correction.new_status {
        DoseStatus::Taken => {
            let taken_at = correction.taken_at.ok_or_else(|| {
                CareError::Validation("correcting a dose to taken requires taken_at".into())
            })?;
            check_not_future(now, taken_at)?;
            DoseResolution {
                status: DoseStatus::Taken,
                resolved_at: Some(taken_at),
                resolved_by: Some(correction.actor.clone()),
                notes: dose.notes.clone(),
                missed_reason: None,
                side_effect_severity: dose.side_effect_severity,
                side_effect_description: dose.side_effect_description.clone(),
            }
        }
        DoseStatus::Missed | DoseStatus::Skipped | DoseStatus::Cancelled => DoseResolution {
            status: correction.new_status,
            resolved_at: Some(now),
            resolved_by: Some(correction.actor.clone()),
            notes: dose.notes.clone(),
            missed_reason: Some(correction.reason.clone()),
            side_effect_severity: dose.side_effect_severity,
            side_effect_description: dose.side_effect_description.clone(),
        },
        // Reopening: the dose is pending again and the sweep takes it from here.
        DoseStatus::Scheduled | DoseStatus::Due | DoseStatus::Late => DoseResolution {
            status: correction.new_status,
            resolved_at: None,
            resolved_by: None,
            notes: dose.notes.clone(),
            missed_reason: None,
            side_effect_severity: None,
            side_effect_description: None,
        },
    };

    let updated = resolve_with_audit(
        conn,
        now,
        &dose,
        &resolution,
        AuditAction::Corrected,
        &correction.actor,
        Some(correction.reason.clone()),
    )?;

    tracing::info!(
        dose_id = %dose_id,
        from = %dose.status,
        to = %correction.new_status,
        "Dose corrected"
    );
    Ok(updated)
}

/// Record an as-needed administration as a new, already-taken dose.
///
/// Doses are keyed by medication and time, so a second administration of
/// the same medication at the same `taken_at` is rejected as a validation
/// error.
pub fn record_prn_dose(
    conn: &Connection,
    now: NaiveDateTime,
    medication_id: &Uuid,
    record: &DoseRecord,
) -> Result<Dose, CareError> {
    require_text("actor", &record.actor)?;
    check_not_future(now, record.taken_at)?;

    let medication = repository::get_medication(conn, medication_id)?;
    if !medication.is_prn {
        return Err(CareError::Validation(format!(
            "medication {medication_id} is not an as-needed medication"
        )));
    }
    if !medication.is_active() {
        return Err(CareError::Validation(format!("medication {medication_id} is inactive")));
    }
    if repository::get_dose_at(conn, medication_id, &record.taken_at)?.is_some() {
        return Err(CareError::Validation(format!(
            "medication {medication_id} already has a dose recorded at {}",
            record.taken_at
        )));
    }

    let dose = Dose {
        id: Uuid::new_v4(),
        medication_id: *medication_id,
        scheduled_at: record.taken_at,
        status: DoseStatus::Taken,
        resolved_at: Some(record.taken_at),
        resolved_by: Some(record.actor.clone()),
        notes: record.notes.clone(),
        missed_reason: None,
        side_effect_severity: record.side_effect_severity,
        side_effect_description: record.side_effect_description.clone(),
        escalation_level: EscalationLevel::None,
        reminder_sent: true,
        reminder_audiences: String::new(),
        created_at: now,
    };

    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;
    repository::insert_dose(&tx, &dose)?;
    repository::insert_dose_audit(&tx, &DoseAuditEntry {
        id: Uuid::new_v4(),
        dose_id: dose.id,
        action: AuditAction::PrnRecorded,
        actor: record.actor.clone(),
        prior_status: DoseStatus::Taken,
        new_status: DoseStatus::Taken,
        prior_resolved_at: None,
        prior_notes: None,
        detail: Some("as-needed administration".into()),
        recorded_at: now,
    })?;
    tx.commit().map_err(DatabaseError::from)?;

    tracing::info!(dose_id = %dose.id, medication_id = %medication_id, "PRN dose recorded");
    Ok(dose)
}

/// Audit trail of one dose, oldest first.
pub fn dose_history(conn: &Connection, dose_id: &Uuid) -> Result<Vec<DoseAuditEntry>, CareError> {
    repository::get_dose(conn, dose_id)?;
    Ok(repository::get_dose_audit(conn, dose_id)?)
}

fn close_unresolved(
    conn: &Connection,
    now: NaiveDateTime,
    dose_id: &Uuid,
    actor: &str,
    reason: &str,
    status: DoseStatus,
    action: AuditAction,
) -> Result<Dose, CareError> {
    require_text("actor", actor)?;
    require_text("reason", reason)?;

    let dose = repository::get_dose(conn, dose_id)?;
    if dose.status.is_terminal() {
        return Err(CareError::Validation(format!(
            "dose {dose_id} is already {}; use a correction to change it",
            dose.status
        )));
    }

    let resolution = DoseResolution {
        status,
        resolved_at: Some(now),
        resolved_by: Some(actor.to_string()),
        notes: dose.notes.clone(),
        missed_reason: Some(reason.to_string()),
        side_effect_severity: dose.side_effect_severity,
        side_effect_description: dose.side_effect_description.clone(),
    };
    let updated = resolve_with_audit(conn, now, &dose, &resolution, action, actor, Some(reason.to_string()))?;

    tracing::info!(dose_id = %dose_id, status = %status, "Dose closed");
    Ok(updated)
}

/// Cancel an unresolved dose that no longer fits its medication's schedule.
/// Returns `false` when the dose was resolved concurrently.
pub(crate) fn cancel_for_schedule_change(
    conn: &Connection,
    now: NaiveDateTime,
    dose: &Dose,
    detail: &str,
) -> Result<bool, CareError> {
    let resolution = DoseResolution {
        status: DoseStatus::Cancelled,
        resolved_at: Some(now),
        resolved_by: Some(SYSTEM_ACTOR.to_string()),
        notes: dose.notes.clone(),
        missed_reason: Some(detail.to_string()),
        side_effect_severity: dose.side_effect_severity,
        side_effect_description: dose.side_effect_description.clone(),
    };
    match resolve_with_audit(conn, now, dose, &resolution, AuditAction::ScheduleChanged, SYSTEM_ACTOR, Some(detail.to_string())) {
        Ok(_) => Ok(true),
        Err(CareError::Conflict(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Conditional status write plus audit row, atomically. `dose` is the state
/// the caller read; if the row has moved on since, nothing is written.
fn resolve_with_audit(
    conn: &Connection,
    now: NaiveDateTime,
    dose: &Dose,
    resolution: &DoseResolution,
    action: AuditAction,
    actor: &str,
    detail: Option<String>,
) -> Result<Dose, CareError> {
    let tx = conn.unchecked_transaction().map_err(DatabaseError::from)?;

    if !repository::apply_dose_resolution(&tx, &dose.id, dose.status, resolution)? {
        return Err(CareError::Conflict(format!(
            "dose {} is no longer {}",
            dose.id, dose.status
        )));
    }

    repository::insert_dose_audit(&tx, &DoseAuditEntry {
        id: Uuid::new_v4(),
        dose_id: dose.id,
        action,
        actor: actor.to_string(),
        prior_status: dose.status,
        new_status: resolution.status,
        prior_resolved_at: dose.resolved_at,
        prior_notes: dose.notes.clone(),
        detail,
        recorded_at: now,
    })?;

    tx.commit().map_err(DatabaseError::from)?;
    Ok(repository::get_dose(conn, &dose.id)?)
}

fn require_text(field: &str, value: &str) -> Result<(), CareError> {
    if value.trim().is_empty() {
        return Err(CareError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn check_not_future(now: NaiveDateTime, taken_at: NaiveDateTime) -> Result<(), CareError> {
    if taken_at > now + Duration::minutes(FUTURE_TOLERANCE_MINUTES) {
        return Err(CareError::Validation(format!(
            "taken_at {taken_at} is in the future"
        )));
    }
    Ok(())
}
