use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Criticality, FrequencyType, MedicationStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: Uuid,
    pub care_recipient_id: Uuid,
    pub name: String,
    pub form: Option<String>,
    pub dosage: String,
    pub route: Option<String>,
    pub frequency_type: FrequencyType,
    pub frequency_detail: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub criticality: Criticality,
    pub is_prn: bool,
    pub is_high_alert: bool,
    pub grace_period_minutes: i64,
    pub notify_patient: bool,
    pub notify_nurse: bool,
    pub notify_supervisor: bool,
    pub notify_family: bool,
    pub escalation_enabled: bool,
    pub status: MedicationStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Medication {
    pub fn is_active(&self) -> bool {
        self.status == MedicationStatus::Active
    }
}

/// Caller-supplied fields for creating or editing a medication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMedication {
    pub care_recipient_id: Uuid,
    pub name: String,
    pub form: Option<String>,
    pub dosage: String,
    pub route: Option<String>,
    pub frequency_type: FrequencyType,
    pub frequency_detail: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub criticality: Criticality,
    pub is_high_alert: bool,
    pub grace_period_minutes: i64,
    pub notify_patient: bool,
    pub notify_nurse: bool,
    pub notify_supervisor: bool,
    pub notify_family: bool,
    pub escalation_enabled: bool,
}
