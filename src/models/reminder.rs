use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceReminder {
    pub id: Uuid,
    pub care_recipient_id: Uuid,
    pub service_name: String,
    pub message: String,
    pub scheduled_at: NaiveDateTime,
    pub notify_patient: bool,
    pub notify_admin: bool,
    pub notify_supervisor: bool,
    pub is_sent: bool,
    pub sent_at: Option<NaiveDateTime>,
    pub failure_reason: Option<String>,
    pub delivered_audiences: String,
    pub attempt_count: u32,
    pub created_at: NaiveDateTime,
}

/// Caller-supplied fields for a new service reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewServiceReminder {
    pub care_recipient_id: Uuid,
    pub service_name: String,
    pub message: String,
    pub scheduled_at: NaiveDateTime,
    pub notify_patient: bool,
    pub notify_admin: bool,
    pub notify_supervisor: bool,
}
