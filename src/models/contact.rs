use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::Audience;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareRecipient {
    pub id: Uuid,
    pub full_name: String,
}

/// A person reachable on behalf of a care recipient, grouped by audience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareContact {
    pub id: Uuid,
    pub care_recipient_id: Uuid,
    pub audience: Audience,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCareContact {
    pub care_recipient_id: Uuid,
    pub audience: Audience,
    pub display_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}
