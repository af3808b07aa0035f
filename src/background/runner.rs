//! CycleRunner: one end-to-end engine pass.
//!
//! Order within a cycle: horizon generation (when due), reminders, lifecycle
//! sweep, escalation. A failing stage is recorded and the later stages still run.

use std::time::Instant;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::Serialize;

use super::escalation::{run_escalation, EscalationReport};
use super::reminders::{run_reminders, ReminderReport};
use crate::config::EngineConfig;
use crate::db::repository;
use crate::dosing::{generate_horizon, sweep, HorizonReport, SweepReport};
use crate::error::CareError;
use crate::notify::AudienceNotifier;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub started_at: NaiveDateTime,
    pub horizon: Option<HorizonReport>,
    pub reminders: ReminderReport,
    pub sweep: SweepReport,
    pub escalation: EscalationReport,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl CycleReport {
    /// Stage failures plus per-item failures of every stage.
    pub fn error_count(&self) -> usize {
        self.errors.len()
            + self.horizon.as_ref().map_or(0, |h| h.errors.len())
            + self.reminders.errors.len()
            + self.sweep.errors.len()
            + self.escalation.errors.len()
    }
}

pub struct CycleRunner {
    config: EngineConfig,
    last_horizon: Option<NaiveDateTime>,
}

impl CycleRunner {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            last_horizon: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn horizon_due(&self, now: NaiveDateTime) -> bool {
        match self.last_horizon {
            None => true,
            Some(last) => now < last || (now - last).num_minutes() >= self.config.horizon_refresh_minutes,
        }
    }

    /// Run one cycle. Only a failure to read the notification settings
    /// snapshot aborts the cycle.
    pub fn run_cycle(
        &mut self,
        conn: &Connection,
        now: NaiveDateTime,
        notifier: &dyn AudienceNotifier,
    ) -> Result<CycleReport, CareError> {
        let start = Instant::now();
        let settings = repository::get_notification_settings(conn)?;
        let mut report = CycleReport {
            started_at: now,
            ..Default::default()
        };

        if self.horizon_due(now) {
            match generate_horizon(conn, now, self.config.horizon_hours) {
                Ok(h) => {
                    self.last_horizon = Some(now);
                    report.horizon = Some(h);
                }
                Err(e) => report.errors.push(format!("horizon: {e}")),
            }
        }

        match run_reminders(conn, now, &self.config, notifier, &settings) {
            Ok(r) => report.reminders = r,
            Err(e) => report.errors.push(format!("reminders: {e}")),
        }

        match sweep(conn, now, self.config.missed_policy) {
            Ok(s) => report.sweep = s,
            Err(e) => report.errors.push(format!("sweep: {e}")),
        }

        match run_escalation(conn, now, &self.config.escalation, notifier, &settings) {
            Ok(e) => report.escalation = e,
            Err(e) => report.errors.push(format!("escalation: {e}")),
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        for error in &report.errors {
            tracing::error!(error = %error, "Cycle stage failed");
        }
        tracing::debug!(
            duration_ms = report.duration_ms,
            errors = report.error_count(),
            "Cycle complete"
        );
        Ok(report)
    }
}
