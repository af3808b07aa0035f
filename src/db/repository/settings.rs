use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use super::{format_ts, parse_ts};
use crate::db::DatabaseError;
use crate::notify::NotificationSettings;

/// Load the singleton provider settings row.
pub fn get_notification_settings(conn: &Connection) -> Result<NotificationSettings, DatabaseError> {
    let (sms_enabled, email_enabled, sms_gateway_url, email_gateway_url, sender_address, updated_at) = conn
        .query_row(
            "SELECT sms_enabled, email_enabled, sms_gateway_url, email_gateway_url,
                    sender_address, updated_at
             FROM notification_settings WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
                entity_type: "notification_settings".into(),
                id: "1".into(),
            },
            other => DatabaseError::Sqlite(other),
        })?;

    Ok(NotificationSettings {
        sms_enabled: sms_enabled != 0,
        email_enabled: email_enabled != 0,
        sms_gateway_url,
        email_gateway_url,
        sender_address,
        updated_at: parse_ts(&updated_at)?,
    })
}

/// Operator-side write of the provider settings. The engine never calls this.
pub fn set_notification_settings(
    conn: &Connection,
    settings: &NotificationSettings,
    now: &NaiveDateTime,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE notification_settings
         SET sms_enabled = ?1, email_enabled = ?2, sms_gateway_url = ?3,
             email_gateway_url = ?4, sender_address = ?5, updated_at = ?6
         WHERE id = 1",
        params![
            settings.sms_enabled as i32,
            settings.email_enabled as i32,
            settings.sms_gateway_url,
            settings.email_gateway_url,
            settings.sender_address,
            format_ts(now),
        ],
    )?;
    Ok(())
}
