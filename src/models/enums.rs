use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(FrequencyType {
    Daily => "daily",
    Interval => "interval",
    SpecificDays => "specific_days",
    AsNeeded => "as_needed",
});

str_enum!(MedicationStatus {
    Active => "active",
    Inactive => "inactive",
});

str_enum!(Criticality {
    Low => "low",
    Normal => "normal",
    High => "high",
    Critical => "critical",
});

str_enum!(DoseStatus {
    Scheduled => "scheduled",
    Due => "due",
    Late => "late",
    Taken => "taken",
    Missed => "missed",
    Skipped => "skipped",
    Cancelled => "cancelled",
});

impl DoseStatus {
    /// Taken, missed, skipped and cancelled doses never move automatically.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Taken | Self::Missed | Self::Skipped | Self::Cancelled)
    }
}

str_enum!(SideEffectSeverity {
    None => "none",
    Mild => "mild",
    Moderate => "moderate",
    Severe => "severe",
});

str_enum!(Audience {
    Patient => "patient",
    Nurse => "nurse",
    Supervisor => "supervisor",
    Family => "family",
    Admin => "admin",
});

str_enum!(ChannelKind {
    Sms => "sms",
    Email => "email",
});

str_enum!(ReminderKind {
    Service => "service",
    Dose => "dose",
});

str_enum!(AuditAction {
    Recorded => "recorded",
    Rerecorded => "rerecorded",
    Missed => "missed",
    AutoMissed => "auto_missed",
    Skipped => "skipped",
    Cancelled => "cancelled",
    Corrected => "corrected",
    PrnRecorded => "prn_recorded",
    ScheduleChanged => "schedule_changed",
});

/// Ordinal escalation tier reached by a dose. Stored as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    None,
    NurseNotified,
    SupervisorNotified,
    FamilyNotified,
}

impl EscalationLevel {
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::None => 0,
            Self::NurseNotified => 1,
            Self::SupervisorNotified => 2,
            Self::FamilyNotified => 3,
        }
    }

    pub fn from_i64(value: i64) -> Result<Self, DatabaseError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::NurseNotified),
            2 => Ok(Self::SupervisorNotified),
            3 => Ok(Self::FamilyNotified),
            _ => Err(DatabaseError::InvalidEnum {
                field: "EscalationLevel".into(),
                value: value.to_string(),
            }),
        }
    }

    /// The audience a tier notifies. `None` has no audience.
    pub fn audience(&self) -> Option<Audience> {
        match self {
            Self::None => None,
            Self::NurseNotified => Some(Audience::Nurse),
            Self::SupervisorNotified => Some(Audience::Supervisor),
            Self::FamilyNotified => Some(Audience::Family),
        }
    }

    pub fn next(&self) -> Option<Self> {
        match self {
            Self::None => Some(Self::NurseNotified),
            Self::NurseNotified => Some(Self::SupervisorNotified),
            Self::SupervisorNotified => Some(Self::FamilyNotified),
            Self::FamilyNotified => None,
        }
    }
}
