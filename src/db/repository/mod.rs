//! Repository layer: entity-scoped database operations.
//!
//! Timestamps are stored as `YYYY-MM-DD HH:MM:SS` text so that SQL string
//! comparison orders them chronologically; dates as `YYYY-MM-DD`.

mod audit;
mod contact;
mod dose;
mod medication;
mod notification_log;
mod reminder;
mod settings;

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use super::DatabaseError;

pub use audit::*;
pub use contact::*;
pub use dose::*;
pub use medication::*;
pub use notification_log::*;
pub use reminder::*;
pub use settings::*;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format a timestamp for storage (sub-second precision is dropped).
pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_ts(value: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad timestamp '{value}': {e}")))
}

pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad date '{value}': {e}")))
}

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

pub(crate) fn parse_opt_ts(value: Option<String>) -> Result<Option<NaiveDateTime>, DatabaseError> {
    value.as_deref().map(parse_ts).transpose()
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Shared builders for repository and engine tests.

    use chrono::{NaiveDate, NaiveDateTime};
    use rusqlite::Connection;
    use uuid::Uuid;

    use super::*;
    use crate::models::enums::*;
    use crate::models::*;

    pub fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    pub fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub fn make_recipient(conn: &Connection) -> Uuid {
        let recipient = CareRecipient {
            id: Uuid::new_v4(),
            full_name: "Edith Clarke".into(),
        };
        insert_care_recipient(conn, &recipient).unwrap();
        recipient.id
    }

    pub fn daily_medication(recipient_id: Uuid, times: &str, start: &str) -> Medication {
        let created = ts("2023-12-31 09:00");
        Medication {
            id: Uuid::new_v4(),
            care_recipient_id: recipient_id,
            name: "Metformin".into(),
            form: Some("tablet".into()),
            dosage: "500 mg".into(),
            route: Some("oral".into()),
            frequency_type: FrequencyType::Daily,
            frequency_detail: times.into(),
            start_date: date(start),
            end_date: None,
            criticality: Criticality::Normal,
            is_prn: false,
            is_high_alert: false,
            grace_period_minutes: 30,
            notify_patient: true,
            notify_nurse: true,
            notify_supervisor: true,
            notify_family: true,
            escalation_enabled: true,
            status: MedicationStatus::Active,
            created_at: created,
            updated_at: created,
        }
    }

    pub fn insert_daily_medication(conn: &Connection, times: &str, start: &str) -> Medication {
        let recipient = make_recipient(conn);
        let med = daily_medication(recipient, times, start);
        insert_medication(conn, &med).unwrap();
        med
    }

    /// Insert one scheduled dose and return it.
    pub fn insert_scheduled_dose(conn: &Connection, med: &Medication, at: &str) -> Dose {
        let scheduled = ts(at);
        insert_dose_if_absent(conn, &med.id, &scheduled, &ts("2023-12-31 09:00")).unwrap();
        get_dose_at(conn, &med.id, &scheduled).unwrap().unwrap()
    }

    pub fn add_contact(conn: &Connection, recipient_id: Uuid, audience: Audience, phone: Option<&str>, email: Option<&str>) {
        insert_care_contact(conn, &CareContact {
            id: Uuid::new_v4(),
            care_recipient_id: recipient_id,
            audience,
            display_name: format!("{} contact", audience.as_str()),
            phone: phone.map(String::from),
            email: email.map(String::from),
        })
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trip_drops_subseconds() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(8, 0, 5, 250)
            .unwrap();
        let stored = format_ts(&ts);
        assert_eq!(stored, "2024-01-01 08:00:05");
        let expected = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 5)
            .unwrap();
        assert_eq!(parse_ts(&stored).unwrap(), expected);
    }

    #[test]
    fn bad_timestamp_is_constraint_violation() {
        assert!(matches!(
            parse_ts("yesterday"),
            Err(DatabaseError::ConstraintViolation(_))
        ));
    }
}
