use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CareError;

/// Application-level constants
pub const APP_NAME: &str = "Carewatch";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable overriding the data directory.
pub const HOME_ENV: &str = "CAREWATCH_HOME";

/// Get the application data directory.
/// `$CAREWATCH_HOME` if set, otherwise ~/Carewatch/.
pub fn app_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn database_path() -> PathBuf {
    app_data_dir().join("carewatch.db")
}

pub fn config_path() -> PathBuf {
    app_data_dir().join("carewatch.json")
}

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "carewatch_lib=info,carewatch=info,warn"
}

/// One year of generated doses.
pub const MAX_HORIZON_HOURS: i64 = 8760;
/// One week; bound for the reminder lead and the horizon refresh interval.
pub const MAX_OFFSET_MINUTES: i64 = 10_080;
/// Thirty days; bound for escalation thresholds and the auto-miss window.
pub const MAX_WINDOW_MINUTES: i64 = 43_200;

/// Per-tier escalation thresholds, in minutes past the scheduled time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationThresholds {
    pub nurse_minutes: i64,
    pub supervisor_minutes: i64,
    pub family_minutes: i64,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            nurse_minutes: 30,
            supervisor_minutes: 120,
            family_minutes: 360,
        }
    }
}

/// When an unanswered dose is closed as missed without a caregiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MissedPolicy {
    /// Doses stay open until a caregiver resolves them.
    Never,
    /// Closed once `minutes` have passed beyond the grace period.
    AfterWindow { minutes: i64 },
}

impl Default for MissedPolicy {
    fn default() -> Self {
        Self::AfterWindow { minutes: 720 }
    }
}

/// Engine settings, loaded from `carewatch.json`. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cycle_interval_secs: u64,
    pub horizon_hours: i64,
    pub horizon_refresh_minutes: i64,
    pub reminder_lead_minutes: i64,
    pub max_reminder_attempts: u32,
    pub escalation: EscalationThresholds,
    pub missed_policy: MissedPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 60,
            horizon_hours: 48,
            horizon_refresh_minutes: 60,
            reminder_lead_minutes: 15,
            max_reminder_attempts: 3,
            escalation: EscalationThresholds::default(),
            missed_policy: MissedPolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Read and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CareError> {
        let config = match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str::<Self>(&raw).map_err(|e| {
                CareError::Configuration(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(CareError::Configuration(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CareError> {
        let fail = |msg: String| Err(CareError::Configuration(msg));

        if self.cycle_interval_secs == 0 {
            return fail("cycle_interval_secs must be positive".into());
        }
        if self.horizon_hours <= 0 || self.horizon_hours > MAX_HORIZON_HOURS {
            return fail(format!("horizon_hours must be between 1 and {MAX_HORIZON_HOURS}"));
        }
        if self.horizon_refresh_minutes <= 0 || self.horizon_refresh_minutes > MAX_OFFSET_MINUTES {
            return fail(format!("horizon_refresh_minutes must be between 1 and {MAX_OFFSET_MINUTES}"));
        }
        if self.reminder_lead_minutes < 0 || self.reminder_lead_minutes > MAX_OFFSET_MINUTES {
            return fail(format!("reminder_lead_minutes must be between 0 and {MAX_OFFSET_MINUTES}"));
        }
        if self.max_reminder_attempts == 0 {
            return fail("max_reminder_attempts must be at least 1".into());
        }

        let t = &self.escalation;
        if t.nurse_minutes < 0 {
            return fail("escalation thresholds must not be negative".into());
        }
        if !(t.nurse_minutes <= t.supervisor_minutes && t.supervisor_minutes <= t.family_minutes) {
            return fail(format!(
                "escalation thresholds must be ordered nurse <= supervisor <= family (got {}/{}/{})",
                t.nurse_minutes, t.supervisor_minutes, t.family_minutes
            ));
        }

        if t.family_minutes > MAX_WINDOW_MINUTES {
            return fail(format!("escalation thresholds must not exceed {MAX_WINDOW_MINUTES} minutes"));
        }

        if let MissedPolicy::AfterWindow { minutes } = self.missed_policy {
            if minutes > MAX_WINDOW_MINUTES {
                return fail(format!("missed_policy window must not exceed {MAX_WINDOW_MINUTES} minutes"));
            }
            // Auto-miss must not pre-empt the last escalation tier.
            if minutes <= t.family_minutes {
                return fail(format!(
                    "missed_policy window ({minutes}m) must exceed the family threshold ({}m)",
                    t.family_minutes
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_ends_with_app_name_or_override() {
        let dir = app_data_dir();
        match std::env::var_os(HOME_ENV) {
            Some(v) if !v.is_empty() => assert_eq!(dir, PathBuf::from(v)),
            _ => assert!(dir.ends_with("Carewatch")),
        }
        assert!(database_path().starts_with(&dir));
        assert!(config_path().ends_with("carewatch.json"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.escalation.supervisor_minutes, 120);
        assert_eq!(config.missed_policy, MissedPolicy::AfterWindow { minutes: 720 });
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "cycle_interval_secs": 10, "missed_policy": { "mode": "never" } }"#,
        )
        .unwrap();
        assert_eq!(config.cycle_interval_secs, 10);
        assert_eq!(config.horizon_hours, 48);
        assert_eq!(config.missed_policy, MissedPolicy::Never);
    }

    #[test]
    fn unordered_thresholds_rejected() {
        let config = EngineConfig {
            escalation: EscalationThresholds {
                nurse_minutes: 120,
                supervisor_minutes: 30,
                family_minutes: 360,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CareError::Configuration(_))));
    }

    #[test]
    fn missed_window_must_outlast_escalation() {
        let config = EngineConfig {
            missed_policy: MissedPolicy::AfterWindow { minutes: 60 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_offsets_rejected() {
        let oversized = [
            EngineConfig { horizon_hours: 100_000_000_000, ..Default::default() },
            EngineConfig { horizon_hours: MAX_HORIZON_HOURS + 1, ..Default::default() },
            EngineConfig { horizon_refresh_minutes: i64::MAX, ..Default::default() },
            EngineConfig { reminder_lead_minutes: 1_000_000_000_000, ..Default::default() },
            EngineConfig { missed_policy: MissedPolicy::AfterWindow { minutes: i64::MAX }, ..Default::default() },
        ];
        for config in oversized {
            assert!(
                matches!(config.validate(), Err(CareError::Configuration(_))),
                "{config:?} should be rejected"
            );
        }

        let widest = EngineConfig {
            horizon_hours: MAX_HORIZON_HOURS,
            horizon_refresh_minutes: MAX_OFFSET_MINUTES,
            reminder_lead_minutes: MAX_OFFSET_MINUTES,
            ..Default::default()
        };
        widest.validate().unwrap();
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carewatch.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(CareError::Configuration(_))));
    }
}
