//! Reminder dispatch for service reminders and upcoming doses.
//!
//! Both kinds flow through one [`ReminderItem`]. Delivery is tracked per
//! audience, so a retry only targets the audiences still outstanding and no
//! audience is reminded twice.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::clock::shift_minutes;
use crate::config::EngineConfig;
use crate::db::repository;
use crate::db::DatabaseError;
use crate::error::CareError;
use crate::models::enums::{Audience, ReminderKind};
use crate::models::{Dose, Medication, ServiceReminder};
use crate::notify::{AudienceNotifier, NotificationSettings, OutboundMessage};

#[derive(Debug, Clone)]
pub enum ReminderItem {
    Service(ServiceReminder),
    Dose { dose: Dose, medication: Medication },
}

impl ReminderItem {
    pub fn kind(&self) -> ReminderKind {
        match self {
            Self::Service(_) => ReminderKind::Service,
            Self::Dose { .. } => ReminderKind::Dose,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Service(r) => r.id,
            Self::Dose { dose, .. } => dose.id,
        }
    }

    pub fn care_recipient_id(&self) -> Uuid {
        match self {
            Self::Service(r) => r.care_recipient_id,
            Self::Dose { medication, .. } => medication.care_recipient_id,
        }
    }

    /// Audiences this item should reach, in dispatch order.
    pub fn enabled_audiences(&self) -> Vec<Audience> {
        let flags: Vec<(bool, Audience)> = match self {
            Self::Service(r) => vec![
                (r.notify_patient, Audience::Patient),
                (r.notify_admin, Audience::Admin),
                (r.notify_supervisor, Audience::Supervisor),
            ],
            Self::Dose { medication, .. } => vec![
                (medication.notify_patient, Audience::Patient),
                (medication.notify_nurse, Audience::Nurse),
            ],
        };
        flags.into_iter().filter(|(on, _)| *on).map(|(_, a)| a).collect()
    }

    pub fn delivered_audiences(&self) -> Result<Vec<Audience>, DatabaseError> {
        match self {
            Self::Service(r) => repository::decode_audiences(&r.delivered_audiences),
            Self::Dose { dose, .. } => repository::decode_audiences(&dose.reminder_audiences),
        }
    }

    pub fn message(&self) -> OutboundMessage {
        let (subject, body) = match self {
            Self::Service(r) => (r.service_name.clone(), r.message.clone()),
            Self::Dose { dose, medication } => (
                format!("Medication reminder: {}", medication.name),
                format!(
                    "{} {} is due at {}.",
                    medication.name,
                    medication.dosage,
                    dose.scheduled_at.format("%H:%M")
                ),
            ),
        };
        OutboundMessage {
            item_kind: self.kind(),
            item_id: self.id(),
            care_recipient_id: self.care_recipient_id(),
            subject,
            body,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderReport {
    pub items: usize,
    pub deliveries: usize,
    pub failures: usize,
    pub completed: usize,
    pub errors: Vec<String>,
}

/// Reminder items ready for dispatch, plus the doses that could not be
/// loaded as `(dose_id, error)`.
#[derive(Debug, Default)]
pub struct CollectedReminders {
    pub items: Vec<ReminderItem>,
    pub skipped: Vec<(Uuid, String)>,
}

/// Service reminders that are due plus doses whose reminder window is open.
/// A dose whose medication cannot be loaded is skipped, not fatal.
pub fn collect_reminder_items(
    conn: &Connection,
    now: NaiveDateTime,
    lead_minutes: i64,
) -> Result<CollectedReminders, CareError> {
    let until = shift_minutes(now, lead_minutes)?;
    let mut collected = CollectedReminders {
        items: repository::get_pending_service_reminders(conn, &now)?
            .into_iter()
            .map(ReminderItem::Service)
            .collect(),
        ..Default::default()
    };

    let mut medications: HashMap<Uuid, Medication> = HashMap::new();
    for dose in repository::get_dose_reminder_candidates(conn, &now, &until)? {
        if !medications.contains_key(&dose.medication_id) {
            match repository::get_medication(conn, &dose.medication_id) {
                Ok(m) => {
                    medications.insert(m.id, m);
                }
                Err(e) => {
                    tracing::warn!(dose_id = %dose.id, error = %e, "Cannot load medication for dose reminder");
                    collected.skipped.push((dose.id, e.to_string()));
                    continue;
                }
            }
        }
        let Some(medication) = medications.get(&dose.medication_id) else {
            continue;
        };
        let medication = medication.clone();
        collected.items.push(ReminderItem::Dose { dose, medication });
    }
    Ok(collected)
}

/// One reminder pass as of `now`.
pub fn run_reminders(
    conn: &Connection,
    now: NaiveDateTime,
    config: &EngineConfig,
    notifier: &dyn AudienceNotifier,
    settings: &NotificationSettings,
) -> Result<ReminderReport, CareError> {
    let mut report = ReminderReport::default();
    if !settings.any_enabled() {
        tracing::debug!("All notification channels disabled, reminders skipped");
        return Ok(report);
    }

    let collected = collect_reminder_items(conn, now, config.reminder_lead_minutes)?;
    for (dose_id, error) in collected.skipped {
        report.errors.push(format!("{} {dose_id}: {error}", ReminderKind::Dose));
    }

    for item in collected.items {
        report.items += 1;
        if let Err(e) = dispatch_item(conn, now, config, notifier, settings, &item, &mut report) {
            tracing::warn!(item_id = %item.id(), kind = %item.kind(), error = %e, "Reminder dispatch failed");
            report.errors.push(format!("{} {}: {e}", item.kind(), item.id()));
            record_dispatch_failure(conn, &item, &e.to_string());
        }
    }

    if report.items > 0 {
        tracing::info!(
            items = report.items,
            deliveries = report.deliveries,
            failures = report.failures,
            completed = report.completed,
            errors = report.errors.len(),
            "Reminder pass complete"
        );
    }
    Ok(report)
}

/// Keep a service reminder pending but leave the reason on its row.
/// Dose reminders have no failure column; their error stays in the report.
fn record_dispatch_failure(conn: &Connection, item: &ReminderItem, reason: &str) {
    let ReminderItem::Service(reminder) = item else {
        return;
    };
    if let Err(e) = repository::record_service_reminder_failure(conn, &reminder.id, reason) {
        tracing::warn!(item_id = %reminder.id, error = %e, "Cannot record reminder failure");
    }
}

fn dispatch_item(
    conn: &Connection,
    now: NaiveDateTime,
    config: &EngineConfig,
    notifier: &dyn AudienceNotifier,
    settings: &NotificationSettings,
    item: &ReminderItem,
    report: &mut ReminderReport,
) -> Result<(), CareError> {
    let enabled = item.enabled_audiences();
    let mut delivered = item.delivered_audiences()?;
    let message = item.message();

    let outstanding: Vec<Audience> = enabled.iter().copied().filter(|a| !delivered.contains(a)).collect();

    let mut failures = Vec::new();
    let mut newly_delivered = 0;
    for audience in outstanding {
        let failure = match notifier.notify(settings, audience, &message, now) {
            Ok(delivery) => delivery.failure_summary(),
            Err(e) => Some(format!("{audience}: {e}")),
        };
        match failure {
            None => {
                delivered.push(audience);
                newly_delivered += 1;
                report.deliveries += 1;
            }
            Some(reason) => {
                report.failures += 1;
                failures.push(reason);
            }
        }
    }

    let all_delivered = enabled.iter().all(|a| delivered.contains(a));
    let encoded = repository::encode_audiences(&delivered);

    let closed = match item {
        ReminderItem::Service(reminder) => {
            let attempts = reminder.attempt_count + 1;
            let complete = all_delivered || attempts >= config.max_reminder_attempts;
            let failure_reason = (!failures.is_empty()).then(|| failures.join("; "));
            if complete && !all_delivered {
                tracing::warn!(
                    item_id = %reminder.id,
                    attempts,
                    "Service reminder closed after final attempt"
                );
            }
            repository::record_service_reminder_attempt(
                conn,
                &reminder.id,
                &encoded,
                complete,
                failure_reason.as_deref(),
                &now,
            )? && complete
        }
        // Dose reminders stop being selected once the grace period ends.
        ReminderItem::Dose { dose, .. } => {
            if newly_delivered == 0 && !all_delivered {
                false
            } else {
                repository::record_dose_reminder(conn, &dose.id, &encoded, all_delivered)? && all_delivered
            }
        }
    };

    if closed {
        report.completed += 1;
    }
    Ok(())
}
