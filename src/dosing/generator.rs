//! Dose generation: materialize `scheduled` dose rows from a medication's
//! frequency rule. Idempotent; the `(medication_id, scheduled_at)` unique key
//! turns repeated or overlapping runs into no-ops.

use chrono::{NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::frequency::FrequencyRule;
use crate::clock::shift_hours;
use crate::db::repository;
use crate::error::CareError;
use crate::models::Medication;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationReport {
    pub created: usize,
    pub already_present: usize,
}

impl GenerationReport {
    fn absorb(&mut self, other: GenerationReport) {
        self.created += other.created;
        self.already_present += other.already_present;
    }
}

/// Totals of one horizon pass over every active medication.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HorizonReport {
    pub medications: usize,
    pub created: usize,
    pub already_present: usize,
    pub errors: Vec<(Uuid, String)>,
}

/// Generate doses of one medication in `[from, to)`, clamped to its
/// treatment dates. Inactive and as-needed medications generate nothing.
pub fn generate_doses(
    conn: &Connection,
    now: NaiveDateTime,
    medication_id: &Uuid,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Result<GenerationReport, CareError> {
    let medication = repository::get_medication(conn, medication_id)?;
    generate_for_medication(conn, now, &medication, from, to)
}

pub(crate) fn generate_for_medication(
    conn: &Connection,
    now: NaiveDateTime,
    medication: &Medication,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Result<GenerationReport, CareError> {
    let mut report = GenerationReport::default();
    if !medication.is_active() || medication.is_prn {
        return Ok(report);
    }

    let Some((start, end)) = clamp_to_treatment(medication, from, to) else {
        return Ok(report);
    };

    let rule = FrequencyRule::parse(medication.frequency_type, &medication.frequency_detail)?;
    for at in rule.expand(medication.start_date, start, end) {
        if repository::insert_dose_if_absent(conn, &medication.id, &at, &now)? {
            report.created += 1;
        } else {
            report.already_present += 1;
        }
    }

    if report.created > 0 {
        tracing::debug!(
            medication_id = %medication.id,
            created = report.created,
            already_present = report.already_present,
            "Generated doses"
        );
    }
    Ok(report)
}

/// `[max(from, start_date 00:00), min(to, (end_date + 1) 00:00))`, or `None`
/// when that window is empty.
fn clamp_to_treatment(
    medication: &Medication,
    from: NaiveDateTime,
    to: NaiveDateTime,
) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = from.max(medication.start_date.and_time(NaiveTime::MIN));
    let end = match medication.end_date.and_then(|d| d.succ_opt()) {
        Some(after_end) => to.min(after_end.and_time(NaiveTime::MIN)),
        None => to,
    };
    (start < end).then_some((start, end))
}

/// Roll the generation window forward for every active medication.
/// A failing medication is recorded and does not stop the others.
pub fn generate_horizon(
    conn: &Connection,
    now: NaiveDateTime,
    horizon_hours: i64,
) -> Result<HorizonReport, CareError> {
    let to = shift_hours(now, horizon_hours)?;
    let medications = repository::get_active_medications(conn)?;

    let mut report = HorizonReport::default();
    let mut totals = GenerationReport::default();
    for medication in &medications {
        report.medications += 1;
        match generate_for_medication(conn, now, medication, now, to) {
            Ok(r) => totals.absorb(r),
            Err(e) => {
                tracing::warn!(medication_id = %medication.id, error = %e, "Dose generation failed");
                report.errors.push((medication.id, e.to_string()));
            }
        }
    }
    report.created = totals.created;
    report.already_present = totals.already_present;

    tracing::info!(
        medications = report.medications,
        created = report.created,
        errors = report.errors.len(),
        "Dose horizon refreshed"
    );
    Ok(report)
}
