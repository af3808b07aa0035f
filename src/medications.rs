//! Medication management: create, edit, deactivate and remove medications
//! while keeping their materialized doses consistent with the schedule.
//!
//! Also the thin creation entry points for care recipients, their contacts,
//! and service reminders.

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::shift_hours;
use crate::db::repository;
use crate::dosing::frequency::FrequencyRule;
use crate::dosing::generator::{generate_for_medication, GenerationReport};
use crate::dosing::lifecycle::cancel_for_schedule_change;
use crate::error::CareError;
use crate::models::enums::{FrequencyType, MedicationStatus};
use crate::models::*;

// ═══════════════════════════════════════════
// Result types
// ═══════════════════════════════════════════

/// A medication after a write, with what happened to its doses.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleOutcome {
    pub medication: Medication,
    pub generated: GenerationReport,
    pub cancelled: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Removal {
    Deleted,
    Deactivated { cancelled: usize },
}

// ═══════════════════════════════════════════
// Medications
// ═══════════════════════════════════════════

/// Validate and insert a medication, then generate doses for the next
/// `horizon_hours`.
pub fn create_medication(
    conn: &Connection,
    now: NaiveDateTime,
    input: NewMedication,
    horizon_hours: i64,
) -> Result<ScheduleOutcome, CareError> {
    validate_medication(&input)?;
    repository::get_care_recipient(conn, &input.care_recipient_id)?;

    let medication = build_medication(Uuid::new_v4(), input, MedicationStatus::Active, now, now);
    repository::insert_medication(conn, &medication)?;
    let generated = generate_for_medication(conn, now, &medication, now, shift_hours(now, horizon_hours)?)?;

    tracing::info!(
        medication_id = %medication.id,
        frequency = %medication.frequency_type,
        generated = generated.created,
        "Medication created"
    );
    Ok(ScheduleOutcome {
        medication,
        generated,
        cancelled: 0,
    })
}

/// Replace a medication's editable fields. Future unresolved doses that no
/// longer fit the new schedule are cancelled; missing ones are generated.
pub fn update_medication(
    conn: &Connection,
    now: NaiveDateTime,
    medication_id: &Uuid,
    input: NewMedication,
    horizon_hours: i64,
) -> Result<ScheduleOutcome, CareError> {
    validate_medication(&input)?;
    let existing = repository::get_medication(conn, medication_id)?;
    if existing.care_recipient_id != input.care_recipient_id {
        return Err(CareError::Validation(
            "a medication cannot move to another care recipient".into(),
        ));
    }

    let medication = build_medication(existing.id, input, existing.status, existing.created_at, now);
    repository::update_medication(conn, &medication)?;

    let rule = FrequencyRule::parse(medication.frequency_type, &medication.frequency_detail)?;
    let mut cancelled = 0;
    for dose in repository::get_future_unresolved_doses(conn, medication_id, &now)? {
        if fits_schedule(&medication, &rule, dose.scheduled_at) {
            continue;
        }
        if cancel_for_schedule_change(conn, now, &dose, "schedule changed")? {
            cancelled += 1;
        }
    }

    let generated = generate_for_medication(conn, now, &medication, now, shift_hours(now, horizon_hours)?)?;

    tracing::info!(
        medication_id = %medication_id,
        cancelled,
        generated = generated.created,
        "Medication updated"
    );
    Ok(ScheduleOutcome {
        medication,
        generated,
        cancelled,
    })
}

/// Stop a medication. Doses already due or late stay open for the
/// caregiver to resolve; future ones are cancelled.
pub fn deactivate_medication(
    conn: &Connection,
    now: NaiveDateTime,
    medication_id: &Uuid,
) -> Result<usize, CareError> {
    repository::set_medication_status(conn, medication_id, MedicationStatus::Inactive, &now)?;

    let mut cancelled = 0;
    for dose in repository::get_future_unresolved_doses(conn, medication_id, &now)? {
        if cancel_for_schedule_change(conn, now, &dose, "medication deactivated")? {
            cancelled += 1;
        }
    }

    tracing::info!(medication_id = %medication_id, cancelled, "Medication deactivated");
    Ok(cancelled)
}

/// Delete a medication that never produced a dose; otherwise deactivate it
/// so its history is kept.
pub fn remove_medication(
    conn: &Connection,
    now: NaiveDateTime,
    medication_id: &Uuid,
) -> Result<Removal, CareError> {
    repository::get_medication(conn, medication_id)?;
    if repository::count_doses_for_medication(conn, medication_id)? == 0 {
        repository::delete_medication(conn, medication_id)?;
        tracing::info!(medication_id = %medication_id, "Medication deleted");
        return Ok(Removal::Deleted);
    }
    let cancelled = deactivate_medication(conn, now, medication_id)?;
    Ok(Removal::Deactivated { cancelled })
}

fn validate_medication(input: &NewMedication) -> Result<(), CareError> {
    require_text("name", &input.name)?;
    require_text("dosage", &input.dosage)?;
    if let Some(end) = input.end_date {
        if end < input.start_date {
            return Err(CareError::Validation(format!(
                "end_date {end} is before start_date {}",
                input.start_date
            )));
        }
    }
    if input.grace_period_minutes < 0 {
        return Err(CareError::Validation("grace_period_minutes must not be negative".into()));
    }
    FrequencyRule::parse(input.frequency_type, &input.frequency_detail)?;
    Ok(())
}

fn build_medication(
    id: Uuid,
    input: NewMedication,
    status: MedicationStatus,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
) -> Medication {
    Medication {
        id,
        care_recipient_id: input.care_recipient_id,
        name: input.name.trim().to_string(),
        form: input.form,
        dosage: input.dosage.trim().to_string(),
        route: input.route,
        is_prn: input.frequency_type == FrequencyType::AsNeeded,
        frequency_type: input.frequency_type,
        frequency_detail: input.frequency_detail,
        start_date: input.start_date,
        end_date: input.end_date,
        criticality: input.criticality,
        is_high_alert: input.is_high_alert,
        grace_period_minutes: input.grace_period_minutes,
        notify_patient: input.notify_patient,
        notify_nurse: input.notify_nurse,
        notify_supervisor: input.notify_supervisor,
        notify_family: input.notify_family,
        escalation_enabled: input.escalation_enabled,
        status,
        created_at,
        updated_at,
    }
}

fn fits_schedule(medication: &Medication, rule: &FrequencyRule, at: NaiveDateTime) -> bool {
    if medication.is_prn || at.date() < medication.start_date {
        return false;
    }
    if medication.end_date.is_some_and(|end| at.date() > end) {
        return false;
    }
    rule.matches(medication.start_date, at)
}

// ═══════════════════════════════════════════
// Recipients, contacts, service reminders
// ═══════════════════════════════════════════

pub fn add_care_recipient(conn: &Connection, full_name: &str) -> Result<CareRecipient, CareError> {
    require_text("full_name", full_name)?;
    let recipient = CareRecipient {
        id: Uuid::new_v4(),
        full_name: full_name.trim().to_string(),
    };
    repository::insert_care_recipient(conn, &recipient)?;
    Ok(recipient)
}

/// A contact needs a phone number or an email address to be reachable.
pub fn add_care_contact(conn: &Connection, input: NewCareContact) -> Result<CareContact, CareError> {
    require_text("display_name", &input.display_name)?;
    let phone = non_blank(input.phone);
    let email = non_blank(input.email);
    if phone.is_none() && email.is_none() {
        return Err(CareError::Validation("a contact needs a phone number or an email".into()));
    }
    repository::get_care_recipient(conn, &input.care_recipient_id)?;

    let contact = CareContact {
        id: Uuid::new_v4(),
        care_recipient_id: input.care_recipient_id,
        audience: input.audience,
        display_name: input.display_name.trim().to_string(),
        phone,
        email,
    };
    repository::insert_care_contact(conn, &contact)?;
    Ok(contact)
}

pub fn add_service_reminder(
    conn: &Connection,
    now: NaiveDateTime,
    input: NewServiceReminder,
) -> Result<ServiceReminder, CareError> {
    require_text("service_name", &input.service_name)?;
    require_text("message", &input.message)?;
    if !(input.notify_patient || input.notify_admin || input.notify_supervisor) {
        return Err(CareError::Validation("a service reminder needs at least one audience".into()));
    }
    repository::get_care_recipient(conn, &input.care_recipient_id)?;

    let reminder = ServiceReminder {
        id: Uuid::new_v4(),
        care_recipient_id: input.care_recipient_id,
        service_name: input.service_name.trim().to_string(),
        message: input.message,
        scheduled_at: input.scheduled_at,
        notify_patient: input.notify_patient,
        notify_admin: input.notify_admin,
        notify_supervisor: input.notify_supervisor,
        is_sent: false,
        sent_at: None,
        failure_reason: None,
        delivered_audiences: String::new(),
        attempt_count: 0,
        created_at: now,
    };
    repository::insert_service_reminder(conn, &reminder)?;
    tracing::info!(reminder_id = %reminder.id, scheduled_at = %reminder.scheduled_at, "Service reminder added");
    Ok(reminder)
}

fn require_text(field: &str, value: &str) -> Result<(), CareError> {
    if value.trim().is_empty() {
        return Err(CareError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::fixtures::*;
    use crate::db::repository::{get_dose, get_doses_for_medication, get_medication, get_service_reminder};
    use crate::db::sqlite::open_memory_database;
    use crate::dosing::dose_history;
    use crate::models::enums::{AuditAction, Audience, Criticality, DoseStatus};

    fn new_daily(recipient: Uuid, times: &str) -> NewMedication {
        NewMedication {
            care_recipient_id: recipient,
            name: "Lisinopril".into(),
            form: Some("tablet".into()),
            dosage: "10 mg".into(),
            route: Some("oral".into()),
            frequency_type: FrequencyType::Daily,
            frequency_detail: times.into(),
            start_date: date("2024-01-01"),
            end_date: None,
            criticality: Criticality::High,
            is_high_alert: false,
            grace_period_minutes: 30,
            notify_patient: true,
            notify_nurse: true,
            notify_supervisor: true,
            notify_family: false,
            escalation_enabled: true,
        }
    }

    fn all_doses(conn: &Connection, id: &Uuid) -> Vec<Dose> {
        get_doses_for_medication(conn, id, &ts("2023-01-01 00:00"), &ts("2025-01-01 00:00")).unwrap()
    }

    #[test]
    fn create_generates_initial_horizon() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);

        let out = create_medication(&conn, ts("2024-01-01 00:00"), new_daily(recipient, "08:00,20:00"), 48).unwrap();

        assert_eq!(out.generated.created, 4);
        assert!(!out.medication.is_prn);
        let stored = get_medication(&conn, &out.medication.id).unwrap();
        assert_eq!(stored.name, "Lisinopril");
        assert_eq!(all_doses(&conn, &out.medication.id).len(), 4);
    }

    #[test]
    fn create_rejects_invalid_input() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        let now = ts("2024-01-01 00:00");

        let mut blank = new_daily(recipient, "08:00");
        blank.name = "  ".into();
        assert!(matches!(create_medication(&conn, now, blank, 48), Err(CareError::Validation(_))));

        let mut reversed = new_daily(recipient, "08:00");
        reversed.end_date = Some(date("2023-12-01"));
        assert!(matches!(create_medication(&conn, now, reversed, 48), Err(CareError::Validation(_))));

        let mut negative = new_daily(recipient, "08:00");
        negative.grace_period_minutes = -5;
        assert!(matches!(create_medication(&conn, now, negative, 48), Err(CareError::Validation(_))));

        let garbled = new_daily(recipient, "8 o'clock");
        assert!(matches!(create_medication(&conn, now, garbled, 48), Err(CareError::Configuration(_))));

        let orphan = new_daily(Uuid::new_v4(), "08:00");
        assert!(matches!(create_medication(&conn, now, orphan, 48), Err(CareError::NotFound { .. })));
    }

    #[test]
    fn as_needed_medication_is_prn_without_doses() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        let mut input = new_daily(recipient, "");
        input.frequency_type = FrequencyType::AsNeeded;

        let out = create_medication(&conn, ts("2024-01-01 00:00"), input, 48).unwrap();

        assert!(out.medication.is_prn);
        assert_eq!(out.generated.created, 0);
        assert!(all_doses(&conn, &out.medication.id).is_empty());
    }

    #[test]
    fn update_moves_future_doses_to_new_times() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        let created = create_medication(&conn, ts("2024-01-01 00:00"), new_daily(recipient, "08:00"), 48).unwrap();
        let id = created.medication.id;

        let out = update_medication(&conn, ts("2024-01-01 01:00"), &id, new_daily(recipient, "09:00"), 48).unwrap();

        assert_eq!(out.cancelled, 2);
        assert_eq!(out.generated.created, 2);
        let doses = all_doses(&conn, &id);
        let cancelled: Vec<_> = doses.iter().filter(|d| d.status == DoseStatus::Cancelled).collect();
        assert_eq!(cancelled.len(), 2);
        assert!(cancelled.iter().all(|d| d.scheduled_at.format("%H:%M").to_string() == "08:00"));

        let history = dose_history(&conn, &cancelled[0].id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::ScheduleChanged);
        assert_eq!(history[0].prior_status, DoseStatus::Scheduled);
    }

    #[test]
    fn update_keeps_matching_doses() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        let created = create_medication(&conn, ts("2024-01-01 00:00"), new_daily(recipient, "08:00"), 48).unwrap();
        let mut edited = new_daily(recipient, "08:00,20:00");
        edited.dosage = "20 mg".into();

        let out = update_medication(&conn, ts("2024-01-01 01:00"), &created.medication.id, edited, 48).unwrap();

        assert_eq!(out.cancelled, 0);
        assert_eq!(out.generated.created, 2);
        assert_eq!(out.generated.already_present, 2);
        assert_eq!(out.medication.dosage, "20 mg");
    }

    #[test]
    fn update_rejects_recipient_change() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        let other = make_recipient(&conn);
        let created = create_medication(&conn, ts("2024-01-01 00:00"), new_daily(recipient, "08:00"), 48).unwrap();

        let result = update_medication(&conn, ts("2024-01-01 01:00"), &created.medication.id, new_daily(other, "08:00"), 48);
        assert!(matches!(result, Err(CareError::Validation(_))));
    }

    #[test]
    fn deactivate_cancels_only_future_doses() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");
        let past = insert_scheduled_dose(&conn, &med, "2024-01-01 08:00");
        let future = insert_scheduled_dose(&conn, &med, "2024-01-02 08:00");

        let cancelled = deactivate_medication(&conn, ts("2024-01-01 12:00"), &med.id).unwrap();

        assert_eq!(cancelled, 1);
        assert_eq!(get_medication(&conn, &med.id).unwrap().status, MedicationStatus::Inactive);
        assert_eq!(get_dose(&conn, &past.id).unwrap().status, DoseStatus::Scheduled);
        assert_eq!(get_dose(&conn, &future.id).unwrap().status, DoseStatus::Cancelled);
    }

    #[test]
    fn remove_deletes_unused_medication() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");

        assert_eq!(remove_medication(&conn, ts("2024-01-01 00:00"), &med.id).unwrap(), Removal::Deleted);
        assert!(matches!(get_medication(&conn, &med.id), Err(crate::db::DatabaseError::NotFound { .. })));
    }

    #[test]
    fn remove_deactivates_medication_with_history() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");
        insert_scheduled_dose(&conn, &med, "2024-01-02 08:00");

        let removal = remove_medication(&conn, ts("2024-01-01 12:00"), &med.id).unwrap();

        assert_eq!(removal, Removal::Deactivated { cancelled: 1 });
        assert_eq!(get_medication(&conn, &med.id).unwrap().status, MedicationStatus::Inactive);
    }

    #[test]
    fn contact_needs_a_reachable_address() {
        let conn = open_memory_database().unwrap();
        let recipient = add_care_recipient(&conn, "Ada Byron").unwrap();

        let unreachable = NewCareContact {
            care_recipient_id: recipient.id,
            audience: Audience::Nurse,
            display_name: "Night nurse".into(),
            phone: Some("  ".into()),
            email: None,
        };
        assert!(matches!(add_care_contact(&conn, unreachable), Err(CareError::Validation(_))));

        let contact = add_care_contact(&conn, NewCareContact {
            care_recipient_id: recipient.id,
            audience: Audience::Nurse,
            display_name: "Night nurse".into(),
            phone: Some("+15550100".into()),
            email: None,
        })
        .unwrap();
        assert_eq!(contact.phone.as_deref(), Some("+15550100"));
    }

    #[test]
    fn service_reminder_starts_unsent() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        let input = NewServiceReminder {
            care_recipient_id: recipient,
            service_name: "Physiotherapy".into(),
            message: "Session at 10:00".into(),
            scheduled_at: ts("2024-01-02 09:00"),
            notify_patient: true,
            notify_admin: false,
            notify_supervisor: false,
        };

        let reminder = add_service_reminder(&conn, ts("2024-01-01 09:00"), input.clone()).unwrap();
        let stored = get_service_reminder(&conn, &reminder.id).unwrap();
        assert!(!stored.is_sent);
        assert_eq!(stored.attempt_count, 0);

        let silent = NewServiceReminder {
            notify_patient: false,
            ..input
        };
        assert!(matches!(add_service_reminder(&conn, ts("2024-01-01 09:00"), silent), Err(CareError::Validation(_))));
    }
}
