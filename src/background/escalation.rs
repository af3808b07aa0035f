//! Missed-dose escalation.
//!
//! An unresolved dose past its grace period climbs nurse → supervisor →
//! family as time passes. Each tier is dispatched at most once per dose and in
//! order; the stored level only moves up, and only after the tier's
//! notification went out (or the medication has that tier switched off).

use std::collections::HashMap;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EscalationThresholds;
use crate::db::repository;
use crate::error::CareError;
use crate::models::enums::{Audience, EscalationLevel, ReminderKind};
use crate::models::{Dose, Medication};
use crate::notify::{AudienceNotifier, NotificationSettings, OutboundMessage};

#[derive(Debug, Clone, Default, Serialize)]
pub struct EscalationReport {
    pub scanned: usize,
    pub notified: usize,
    pub passed_through: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Highest tier a dose `elapsed_minutes` overdue has earned. Thresholds are
/// floored at the medication's grace period.
pub fn target_level(thresholds: &EscalationThresholds, grace_minutes: i64, elapsed_minutes: i64) -> EscalationLevel {
    let tiers = [
        (thresholds.nurse_minutes, EscalationLevel::NurseNotified),
        (thresholds.supervisor_minutes, EscalationLevel::SupervisorNotified),
        (thresholds.family_minutes, EscalationLevel::FamilyNotified),
    ];
    tiers
        .iter()
        .filter(|(threshold, _)| (*threshold).max(grace_minutes) <= elapsed_minutes)
        .map(|(_, level)| *level)
        .max()
        .unwrap_or(EscalationLevel::None)
}

fn tier_enabled(medication: &Medication, audience: Audience) -> bool {
    match audience {
        Audience::Nurse => medication.notify_nurse,
        Audience::Supervisor => medication.notify_supervisor,
        Audience::Family => medication.notify_family,
        Audience::Patient | Audience::Admin => false,
    }
}

/// One escalation scan as of `now`.
pub fn run_escalation(
    conn: &Connection,
    now: NaiveDateTime,
    thresholds: &EscalationThresholds,
    notifier: &dyn AudienceNotifier,
    settings: &NotificationSettings,
) -> Result<EscalationReport, CareError> {
    let mut report = EscalationReport::default();
    if !settings.any_enabled() {
        tracing::debug!("All notification channels disabled, escalation scan skipped");
        return Ok(report);
    }

    let candidates = repository::get_escalation_candidates(conn, &now)?;
    let mut medications: HashMap<Uuid, (Medication, String)> = HashMap::new();

    for dose in &candidates {
        report.scanned += 1;

        if !medications.contains_key(&dose.medication_id) {
            match load_medication(conn, &dose.medication_id) {
                Ok(loaded) => {
                    medications.insert(dose.medication_id, loaded);
                }
                Err(e) => {
                    report.errors.push(format!("dose {}: {e}", dose.id));
                    continue;
                }
            }
        }
        let Some((medication, recipient_name)) = medications.get(&dose.medication_id) else {
            continue;
        };

        if let Err(e) = escalate_dose(
            conn,
            now,
            thresholds,
            notifier,
            settings,
            dose,
            medication,
            recipient_name,
            &mut report,
        ) {
            tracing::warn!(dose_id = %dose.id, error = %e, "Escalation failed");
            report.errors.push(format!("dose {}: {e}", dose.id));
        }
    }

    if report.notified + report.failed > 0 {
        tracing::info!(
            scanned = report.scanned,
            notified = report.notified,
            passed_through = report.passed_through,
            failed = report.failed,
            "Escalation scan complete"
        );
    }
    Ok(report)
}

fn load_medication(conn: &Connection, id: &Uuid) -> Result<(Medication, String), CareError> {
    let medication = repository::get_medication(conn, id)?;
    let recipient = repository::get_care_recipient(conn, &medication.care_recipient_id)?;
    Ok((medication, recipient.full_name))
}

#[allow(clippy::too_many_arguments)]
fn escalate_dose(
    conn: &Connection,
    now: NaiveDateTime,
    thresholds: &EscalationThresholds,
    notifier: &dyn AudienceNotifier,
    settings: &NotificationSettings,
    dose: &Dose,
    medication: &Medication,
    recipient_name: &str,
    report: &mut EscalationReport,
) -> Result<(), CareError> {
    let elapsed = (now - dose.scheduled_at).num_minutes();
    let target = target_level(thresholds, medication.grace_period_minutes, elapsed);

    let mut level = dose.escalation_level;
    while level < target {
        let Some(next) = level.next() else { break };
        let Some(audience) = next.audience() else { break };

        if tier_enabled(medication, audience) {
            let message = escalation_message(dose, medication, recipient_name, elapsed, audience);
            let failure = match notifier.notify(settings, audience, &message, now) {
                Ok(delivery) => delivery.failure_summary(),
                Err(e) => Some(e.to_string()),
            };
            if let Some(reason) = failure {
                // Level stays put; this tier is retried on the next scan.
                tracing::warn!(dose_id = %dose.id, tier = %audience, reason = %reason, "Escalation tier not delivered");
                report.failed += 1;
                return Ok(());
            }
            report.notified += 1;
        } else {
            report.passed_through += 1;
        }

        if !repository::raise_escalation_level(conn, &dose.id, level, next)? {
            tracing::debug!(dose_id = %dose.id, "Escalation level changed concurrently, stopping");
            return Ok(());
        }
        tracing::info!(dose_id = %dose.id, tier = %audience, level = next.as_i64(), "Dose escalated");
        level = next;
    }
    Ok(())
}

fn escalation_message(
    dose: &Dose,
    medication: &Medication,
    recipient_name: &str,
    elapsed_minutes: i64,
    audience: Audience,
) -> OutboundMessage {
    OutboundMessage {
        item_kind: ReminderKind::Dose,
        item_id: dose.id,
        care_recipient_id: medication.care_recipient_id,
        subject: format!("Missed dose: {} for {recipient_name}", medication.name),
        body: format!(
            "{} {} for {recipient_name} was scheduled at {} and has not been recorded ({elapsed_minutes} min overdue). Escalated to {audience}.",
            medication.name,
            medication.dosage,
            dose.scheduled_at.format("%Y-%m-%d %H:%M"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::fixtures::*;
    use crate::db::repository::{get_dose, insert_medication};
    use crate::db::sqlite::open_memory_database;
    use crate::dosing::lifecycle::record_dose;
    use crate::models::DoseRecord;
    use crate::notify::testing::{enabled_settings, RecordingNotifier};

    fn thresholds() -> EscalationThresholds {
        EscalationThresholds {
            nurse_minutes: 30,
            supervisor_minutes: 120,
            family_minutes: 360,
        }
    }

    #[test]
    fn target_level_floors_at_grace() {
        let t = thresholds();
        assert_eq!(target_level(&t, 30, 29), EscalationLevel::None);
        assert_eq!(target_level(&t, 30, 30), EscalationLevel::NurseNotified);
        assert_eq!(target_level(&t, 30, 180), EscalationLevel::SupervisorNotified);
        assert_eq!(target_level(&t, 30, 360), EscalationLevel::FamilyNotified);
        // A 90 minute grace delays the nurse tier to 90 minutes.
        assert_eq!(target_level(&t, 90, 60), EscalationLevel::None);
        assert_eq!(target_level(&t, 90, 90), EscalationLevel::NurseNotified);
    }

    #[test]
    fn three_hours_unresolved_reaches_supervisor() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");
        let dose = insert_scheduled_dose(&conn, &med, "2024-01-01 08:00");
        let notifier = RecordingNotifier::default();

        let report =
            run_escalation(&conn, ts("2024-01-01 11:00"), &thresholds(), &notifier, &enabled_settings()).unwrap();

        assert_eq!(report.notified, 2);
        assert_eq!(notifier.audiences(), vec![Audience::Nurse, Audience::Supervisor]);
        assert_eq!(get_dose(&conn, &dose.id).unwrap().escalation_level, EscalationLevel::SupervisorNotified);
    }

    #[test]
    fn repeated_scans_are_idempotent_and_monotonic() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");
        let dose = insert_scheduled_dose(&conn, &med, "2024-01-01 08:00");
        let notifier = RecordingNotifier::default();
        let settings = enabled_settings();

        let mut seen = Vec::new();
        for at in ["2024-01-01 08:31", "2024-01-01 08:45", "2024-01-01 10:01", "2024-01-01 10:30", "2024-01-01 14:00", "2024-01-01 18:00"] {
            run_escalation(&conn, ts(at), &thresholds(), &notifier, &settings).unwrap();
            seen.push(get_dose(&conn, &dose.id).unwrap().escalation_level);
        }

        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            notifier.audiences(),
            vec![Audience::Nurse, Audience::Supervisor, Audience::Family]
        );
    }

    #[test]
    fn disabled_tier_is_passed_through() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        let mut med = daily_medication(recipient, "08:00", "2024-01-01");
        med.notify_supervisor = false;
        insert_medication(&conn, &med).unwrap();
        let dose = insert_scheduled_dose(&conn, &med, "2024-01-01 08:00");
        let notifier = RecordingNotifier::default();

        let report =
            run_escalation(&conn, ts("2024-01-01 15:00"), &thresholds(), &notifier, &enabled_settings()).unwrap();

        assert_eq!(report.passed_through, 1);
        assert_eq!(notifier.audiences(), vec![Audience::Nurse, Audience::Family]);
        assert_eq!(get_dose(&conn, &dose.id).unwrap().escalation_level, EscalationLevel::FamilyNotified);
    }

    #[test]
    fn failed_tier_is_retried_and_blocks_higher_tiers() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");
        let dose = insert_scheduled_dose(&conn, &med, "2024-01-01 08:00");
        let notifier = RecordingNotifier::default();
        let settings = enabled_settings();
        notifier.fail(Audience::Nurse);

        let report = run_escalation(&conn, ts("2024-01-01 11:00"), &thresholds(), &notifier, &settings).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(notifier.audiences(), vec![Audience::Nurse]);
        assert_eq!(get_dose(&conn, &dose.id).unwrap().escalation_level, EscalationLevel::None);

        notifier.heal(Audience::Nurse);
        notifier.clear();
        run_escalation(&conn, ts("2024-01-01 11:01"), &thresholds(), &notifier, &settings).unwrap();
        assert_eq!(notifier.audiences(), vec![Audience::Nurse, Audience::Supervisor]);
        assert_eq!(get_dose(&conn, &dose.id).unwrap().escalation_level, EscalationLevel::SupervisorNotified);
    }

    #[test]
    fn resolved_doses_stop_escalating() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");
        let dose = insert_scheduled_dose(&conn, &med, "2024-01-01 08:00");
        let notifier = RecordingNotifier::default();
        let settings = enabled_settings();

        run_escalation(&conn, ts("2024-01-01 08:45"), &thresholds(), &notifier, &settings).unwrap();
        record_dose(&conn, ts("2024-01-01 09:00"), &dose.id, &DoseRecord {
            taken_at: ts("2024-01-01 09:00"),
            actor: "nurse-ana".into(),
            notes: None,
            side_effect_severity: None,
            side_effect_description: None,
        })
        .unwrap();

        notifier.clear();
        let report = run_escalation(&conn, ts("2024-01-01 15:00"), &thresholds(), &notifier, &settings).unwrap();
        assert_eq!(report.scanned, 0);
        assert!(notifier.audiences().is_empty());
    }

    #[test]
    fn disabled_channels_skip_scan() {
        let conn = open_memory_database().unwrap();
        let med = insert_daily_medication(&conn, "08:00", "2024-01-01");
        insert_scheduled_dose(&conn, &med, "2024-01-01 08:00");
        let notifier = RecordingNotifier::default();
        let mut settings = enabled_settings();
        settings.sms_enabled = false;
        settings.email_enabled = false;

        let report = run_escalation(&conn, ts("2024-01-01 11:00"), &thresholds(), &notifier, &settings).unwrap();
        assert_eq!(report.scanned, 0);
        assert!(notifier.audiences().is_empty());
    }
}
