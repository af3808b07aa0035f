use chrono::NaiveDateTime;
use rusqlite::Connection;
use uuid::Uuid;

use super::{
    AudienceDelivery, AudienceNotifier, ContactDirectory, DeliveryAttempt, NotificationChannel,
    NotificationSettings, NotifyError, OutboundMessage,
};
use crate::db::repository;
use crate::models::enums::{Audience, ChannelKind};
use crate::models::CareContact;

/// Contact directory backed by the `care_contacts` table.
pub struct SqliteContactDirectory<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteContactDirectory<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ContactDirectory for SqliteContactDirectory<'_> {
    fn contacts_for(&self, care_recipient_id: &Uuid, audience: Audience) -> Result<Vec<CareContact>, NotifyError> {
        Ok(repository::get_contacts_for_audience(self.conn, care_recipient_id, audience)?)
    }
}

/// Resolves an audience to contacts and sends to every reachable destination
/// on the enabled channels. Each attempt is written to `notification_log`
/// when a log connection is supplied.
pub struct ContactNotifier<'a> {
    channel: &'a dyn NotificationChannel,
    directory: &'a dyn ContactDirectory,
    log: Option<&'a Connection>,
}

impl<'a> ContactNotifier<'a> {
    pub fn new(channel: &'a dyn NotificationChannel, directory: &'a dyn ContactDirectory) -> Self {
        Self {
            channel,
            directory,
            log: None,
        }
    }

    pub fn with_log(mut self, conn: &'a Connection) -> Self {
        self.log = Some(conn);
        self
    }

    fn attempt(
        &self,
        message: &OutboundMessage,
        audience: Audience,
        channel: ChannelKind,
        destination: &str,
        now: NaiveDateTime,
        result: Result<(), NotifyError>,
    ) -> DeliveryAttempt {
        let attempt = DeliveryAttempt {
            item_kind: message.item_kind,
            item_id: message.item_id,
            audience,
            channel,
            destination: destination.to_string(),
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
            attempted_at: now,
        };

        match &attempt.error {
            None => tracing::info!(
                item_id = %attempt.item_id,
                audience = %audience,
                channel = %channel,
                "Notification delivered"
            ),
            Some(error) => tracing::warn!(
                item_id = %attempt.item_id,
                audience = %audience,
                channel = %channel,
                error = %error,
                "Notification failed"
            ),
        }

        if let Some(conn) = self.log {
            if let Err(e) = repository::insert_notification_log(conn, &attempt) {
                tracing::warn!(error = %e, "Failed to write notification log");
            }
        }
        attempt
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AudienceNotifier for ContactNotifier<'_> {
    fn notify(
        &self,
        settings: &NotificationSettings,
        audience: Audience,
        message: &OutboundMessage,
        now: NaiveDateTime,
    ) -> Result<AudienceDelivery, NotifyError> {
        let contacts = self.directory.contacts_for(&message.care_recipient_id, audience)?;

        let mut attempts = Vec::new();
        let mut disabled = None;
        for contact in &contacts {
            if let Some(phone) = non_empty(&contact.phone) {
                if settings.sms_enabled {
                    let result = self.channel.send_sms(settings, phone, &message.body);
                    attempts.push(self.attempt(message, audience, ChannelKind::Sms, phone, now, result));
                } else {
                    disabled.get_or_insert(ChannelKind::Sms);
                }
            }
            if let Some(email) = non_empty(&contact.email) {
                if settings.email_enabled {
                    let result = self.channel.send_email(settings, email, &message.subject, &message.body);
                    attempts.push(self.attempt(message, audience, ChannelKind::Email, email, now, result));
                } else {
                    disabled.get_or_insert(ChannelKind::Email);
                }
            }
        }

        if attempts.is_empty() {
            return Err(match disabled {
                Some(channel) => NotifyError::ChannelDisabled(channel),
                None => NotifyError::NoRecipients(audience),
            });
        }
        Ok(AudienceDelivery { audience, attempts })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::db::repository::fixtures::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::enums::ReminderKind;
    use crate::notify::testing::enabled_settings;

    #[derive(Default)]
    struct MockChannel {
        sent: RefCell<Vec<(ChannelKind, String)>>,
        fail_sms: bool,
    }

    impl NotificationChannel for MockChannel {
        fn send_sms(&self, _: &NotificationSettings, to: &str, _: &str) -> Result<(), NotifyError> {
            self.sent.borrow_mut().push((ChannelKind::Sms, to.to_string()));
            if self.fail_sms {
                return Err(NotifyError::Gateway("503 busy".into()));
            }
            Ok(())
        }

        fn send_email(&self, _: &NotificationSettings, to: &str, _: &str, _: &str) -> Result<(), NotifyError> {
            self.sent.borrow_mut().push((ChannelKind::Email, to.to_string()));
            Ok(())
        }
    }

    fn message(recipient: Uuid) -> OutboundMessage {
        OutboundMessage {
            item_kind: ReminderKind::Dose,
            item_id: Uuid::new_v4(),
            care_recipient_id: recipient,
            subject: "Dose reminder".into(),
            body: "Metformin 500 mg due at 08:00".into(),
        }
    }

    #[test]
    fn sends_to_every_destination_and_logs() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        add_contact(&conn, recipient, Audience::Nurse, Some("+15550001"), Some("nurse@example.org"));

        let channel = MockChannel::default();
        let directory = SqliteContactDirectory::new(&conn);
        let notifier = ContactNotifier::new(&channel, &directory).with_log(&conn);
        let msg = message(recipient);

        let delivery = notifier
            .notify(&enabled_settings(), Audience::Nurse, &msg, ts("2024-01-01 07:45"))
            .unwrap();
        assert!(delivery.delivered());
        assert_eq!(delivery.attempts.len(), 2);
        assert_eq!(channel.sent.borrow().len(), 2);

        let log = repository::get_notification_log(&conn, ReminderKind::Dose, &msg.item_id).unwrap();
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn disabled_channel_is_skipped() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        add_contact(&conn, recipient, Audience::Nurse, Some("+15550001"), Some("nurse@example.org"));

        let channel = MockChannel::default();
        let directory = SqliteContactDirectory::new(&conn);
        let notifier = ContactNotifier::new(&channel, &directory);
        let mut settings = enabled_settings();
        settings.sms_enabled = false;

        let delivery = notifier
            .notify(&settings, Audience::Nurse, &message(recipient), ts("2024-01-01 07:45"))
            .unwrap();
        assert_eq!(delivery.attempts.len(), 1);
        assert_eq!(delivery.attempts[0].channel, ChannelKind::Email);
    }

    #[test]
    fn all_channels_disabled_is_error() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        add_contact(&conn, recipient, Audience::Family, Some("+15550002"), None);

        let channel = MockChannel::default();
        let directory = SqliteContactDirectory::new(&conn);
        let notifier = ContactNotifier::new(&channel, &directory);
        let mut settings = enabled_settings();
        settings.sms_enabled = false;

        let err = notifier
            .notify(&settings, Audience::Family, &message(recipient), ts("2024-01-01 07:45"))
            .unwrap_err();
        assert!(matches!(err, NotifyError::ChannelDisabled(ChannelKind::Sms)));
        assert!(channel.sent.borrow().is_empty());
    }

    #[test]
    fn no_contacts_is_no_recipients() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);

        let channel = MockChannel::default();
        let directory = SqliteContactDirectory::new(&conn);
        let notifier = ContactNotifier::new(&channel, &directory);

        let err = notifier
            .notify(&enabled_settings(), Audience::Supervisor, &message(recipient), ts("2024-01-01 07:45"))
            .unwrap_err();
        assert!(matches!(err, NotifyError::NoRecipients(Audience::Supervisor)));
    }

    #[test]
    fn gateway_failure_is_reported_not_raised() {
        let conn = open_memory_database().unwrap();
        let recipient = make_recipient(&conn);
        add_contact(&conn, recipient, Audience::Patient, Some("+15550003"), None);

        let channel = MockChannel {
            fail_sms: true,
            ..Default::default()
        };
        let directory = SqliteContactDirectory::new(&conn);
        let notifier = ContactNotifier::new(&channel, &directory);

        let delivery = notifier
            .notify(&enabled_settings(), Audience::Patient, &message(recipient), ts("2024-01-01 07:45"))
            .unwrap();
        assert!(!delivery.delivered());
        assert!(delivery.failure_summary().unwrap().contains("503 busy"));
    }
}
