use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{AuditAction, DoseStatus, EscalationLevel, SideEffectSeverity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dose {
    pub id: Uuid,
    pub medication_id: Uuid,
    pub scheduled_at: NaiveDateTime,
    pub status: DoseStatus,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolved_by: Option<String>,
    pub notes: Option<String>,
    pub missed_reason: Option<String>,
    pub side_effect_severity: Option<SideEffectSeverity>,
    pub side_effect_description: Option<String>,
    pub escalation_level: EscalationLevel,
    pub reminder_sent: bool,
    pub reminder_audiences: String,
    pub created_at: NaiveDateTime,
}

/// Caregiver report of a dose being taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseRecord {
    pub taken_at: NaiveDateTime,
    pub actor: String,
    pub notes: Option<String>,
    pub side_effect_severity: Option<SideEffectSeverity>,
    pub side_effect_description: Option<String>,
}

/// Explicit override of a dose's status, including terminal states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseCorrection {
    pub new_status: DoseStatus,
    pub actor: String,
    pub reason: String,
    pub taken_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoseAuditEntry {
    pub id: Uuid,
    pub dose_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub prior_status: DoseStatus,
    pub new_status: DoseStatus,
    pub prior_resolved_at: Option<NaiveDateTime>,
    pub prior_notes: Option<String>,
    pub detail: Option<String>,
    pub recorded_at: NaiveDateTime,
}
