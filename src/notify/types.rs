use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::enums::{Audience, ChannelKind, ReminderKind};

/// Provider settings snapshot, read once per cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub sms_enabled: bool,
    pub email_enabled: bool,
    pub sms_gateway_url: Option<String>,
    pub email_gateway_url: Option<String>,
    pub sender_address: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl NotificationSettings {
    pub fn is_enabled(&self, channel: ChannelKind) -> bool {
        match channel {
            ChannelKind::Sms => self.sms_enabled,
            ChannelKind::Email => self.email_enabled,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.sms_enabled || self.email_enabled
    }
}

/// A message addressed to a care recipient's audiences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub item_kind: ReminderKind,
    pub item_id: Uuid,
    pub care_recipient_id: Uuid,
    pub subject: String,
    pub body: String,
}

/// One send to one destination. Persisted to `notification_log`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub item_kind: ReminderKind,
    pub item_id: Uuid,
    pub audience: Audience,
    pub channel: ChannelKind,
    pub destination: String,
    pub success: bool,
    pub error: Option<String>,
    pub attempted_at: NaiveDateTime,
}

/// Outcome of notifying one audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudienceDelivery {
    pub audience: Audience,
    pub attempts: Vec<DeliveryAttempt>,
}

impl AudienceDelivery {
    /// An audience counts as reached when any of its destinations accepted.
    pub fn delivered(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    pub fn failure_summary(&self) -> Option<String> {
        if self.delivered() {
            return None;
        }
        let errors: Vec<String> = self
            .attempts
            .iter()
            .map(|a| {
                format!(
                    "{} {}: {}",
                    a.channel,
                    a.destination,
                    a.error.as_deref().unwrap_or("failed")
                )
            })
            .collect();
        Some(format!("{}: {}", self.audience, errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(success: bool) -> DeliveryAttempt {
        DeliveryAttempt {
            item_kind: ReminderKind::Dose,
            item_id: Uuid::nil(),
            audience: Audience::Nurse,
            channel: ChannelKind::Email,
            destination: "nurse@example.org".into(),
            success,
            error: (!success).then(|| "timeout".to_string()),
            attempted_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn one_success_is_enough() {
        let delivery = AudienceDelivery {
            audience: Audience::Nurse,
            attempts: vec![attempt(false), attempt(true)],
        };
        assert!(delivery.delivered());
        assert_eq!(delivery.failure_summary(), None);
    }

    #[test]
    fn failure_summary_lists_attempts() {
        let delivery = AudienceDelivery {
            audience: Audience::Nurse,
            attempts: vec![attempt(false)],
        };
        assert_eq!(
            delivery.failure_summary().as_deref(),
            Some("nurse: email nurse@example.org: timeout")
        );
    }
}
