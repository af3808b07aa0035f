//! Notification collaborator: audience resolution, channel delivery, attempt log.
//!
//! The engines only see [`AudienceNotifier`]. [`ContactNotifier`] is the
//! shipped implementation: it resolves an audience through a
//! [`ContactDirectory`] and delivers over a [`NotificationChannel`].

pub mod gateway;
pub mod notifier;
pub mod types;

pub use gateway::HttpGateway;
pub use notifier::{ContactNotifier, SqliteContactDirectory};
pub use types::*;

use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

use crate::db::DatabaseError;
use crate::models::enums::{Audience, ChannelKind};
use crate::models::CareContact;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("{0} channel is disabled")]
    ChannelDisabled(ChannelKind),

    #[error("No reachable recipients for audience {0}")]
    NoRecipients(Audience),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Raw delivery over SMS and email.
pub trait NotificationChannel {
    fn send_sms(&self, settings: &NotificationSettings, to: &str, body: &str) -> Result<(), NotifyError>;

    fn send_email(
        &self,
        settings: &NotificationSettings,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError>;
}

/// Resolves an audience of a care recipient to concrete contacts.
pub trait ContactDirectory {
    fn contacts_for(&self, care_recipient_id: &Uuid, audience: Audience) -> Result<Vec<CareContact>, NotifyError>;
}

/// What the engines call: deliver one message to one audience.
///
/// Gateway failures are reported inside the returned [`AudienceDelivery`];
/// `Err` means the audience could not be attempted at all.
pub trait AudienceNotifier {
    fn notify(
        &self,
        settings: &NotificationSettings,
        audience: Audience,
        message: &OutboundMessage,
        now: NaiveDateTime,
    ) -> Result<AudienceDelivery, NotifyError>;
}
