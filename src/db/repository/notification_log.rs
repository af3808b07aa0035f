use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{format_ts, parse_ts, parse_uuid};
use crate::db::DatabaseError;
use crate::models::enums::{Audience, ChannelKind, ReminderKind};
use crate::notify::DeliveryAttempt;

pub fn insert_notification_log(conn: &Connection, attempt: &DeliveryAttempt) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO notification_log (item_kind, item_id, audience, channel, destination,
         success, error, attempted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            attempt.item_kind.as_str(),
            attempt.item_id.to_string(),
            attempt.audience.as_str(),
            attempt.channel.as_str(),
            attempt.destination,
            attempt.success as i32,
            attempt.error,
            format_ts(&attempt.attempted_at),
        ],
    )?;
    Ok(())
}

/// Every logged attempt for one item, in insertion order.
pub fn get_notification_log(
    conn: &Connection,
    item_kind: ReminderKind,
    item_id: &Uuid,
) -> Result<Vec<DeliveryAttempt>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT item_kind, item_id, audience, channel, destination, success, error, attempted_at
         FROM notification_log
         WHERE item_kind = ?1 AND item_id = ?2
         ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![item_kind.as_str(), item_id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i32>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(kind, id, audience, channel, destination, success, error, attempted_at)| {
            Ok(DeliveryAttempt {
                item_kind: ReminderKind::from_str(&kind)?,
                item_id: parse_uuid(&id)?,
                audience: Audience::from_str(&audience)?,
                channel: ChannelKind::from_str(&channel)?,
                destination,
                success: success != 0,
                error,
                attempted_at: parse_ts(&attempted_at)?,
            })
        })
        .collect()
}
