use std::str::FromStr;

use rusqlite::{params, Connection};
use uuid::Uuid;

use super::parse_uuid;
use crate::db::DatabaseError;
use crate::models::enums::Audience;
use crate::models::*;

pub fn insert_care_recipient(conn: &Connection, recipient: &CareRecipient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO care_recipients (id, full_name) VALUES (?1, ?2)",
        params![recipient.id.to_string(), recipient.full_name],
    )?;
    Ok(())
}

pub fn get_care_recipient(conn: &Connection, id: &Uuid) -> Result<CareRecipient, DatabaseError> {
    conn.query_row(
        "SELECT id, full_name FROM care_recipients WHERE id = ?1",
        params![id.to_string()],
        |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DatabaseError::NotFound {
            entity_type: "care_recipient".into(),
            id: id.to_string(),
        },
        other => DatabaseError::Sqlite(other),
    })
    .and_then(|(id, full_name)| {
        Ok(CareRecipient {
            id: parse_uuid(&id)?,
            full_name,
        })
    })
}

pub fn insert_care_contact(conn: &Connection, contact: &CareContact) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO care_contacts (id, care_recipient_id, audience, display_name, phone, email)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            contact.id.to_string(),
            contact.care_recipient_id.to_string(),
            contact.audience.as_str(),
            contact.display_name,
            contact.phone,
            contact.email,
        ],
    )?;
    Ok(())
}

/// Contacts registered for one audience of a care recipient.
pub fn get_contacts_for_audience(
    conn: &Connection,
    care_recipient_id: &Uuid,
    audience: Audience,
) -> Result<Vec<CareContact>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, care_recipient_id, audience, display_name, phone, email
         FROM care_contacts
         WHERE care_recipient_id = ?1 AND audience = ?2
         ORDER BY display_name",
    )?;

    let rows = stmt.query_map(params![care_recipient_id.to_string(), audience.as_str()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, Option<String>>(4)?,
            row.get::<_, Option<String>>(5)?,
        ))
    })?;

    let mut contacts = Vec::new();
    for row in rows {
        let (id, recipient_id, audience, display_name, phone, email) = row?;
        contacts.push(CareContact {
            id: parse_uuid(&id)?,
            care_recipient_id: parse_uuid(&recipient_id)?,
            audience: Audience::from_str(&audience)?,
            display_name,
            phone,
            email,
        });
    }
    Ok(contacts)
}
