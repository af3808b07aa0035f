//! Frequency rules: parse a medication's frequency descriptor and expand it
//! into concrete administration times.
//!
//! Detail formats:
//! - `daily`: `"08:00,20:00"`
//! - `interval`: `"8"` (every 8 hours from the anchor date at midnight) or
//!   `"8@06:00"` (anchored at 06:00)
//! - `specific_days`: `"Mon,Wed,Fri@08:00,20:00"`
//! - `as_needed`: detail ignored, never expands
//!
//! Ranges are half-open `[start, end)`. Output is ascending without duplicates.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use crate::error::CareError;
use crate::models::enums::FrequencyType;

pub const MAX_INTERVAL_HOURS: u32 = 720;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrequencyRule {
    Daily { times: Vec<NaiveTime> },
    Interval { hours: u32, anchor_time: NaiveTime },
    SpecificDays { days: Vec<Weekday>, times: Vec<NaiveTime> },
    AsNeeded,
}

impl FrequencyRule {
    pub fn parse(frequency_type: FrequencyType, detail: &str) -> Result<Self, CareError> {
        match frequency_type {
            FrequencyType::Daily => Ok(Self::Daily {
                times: parse_times(detail)?,
            }),
            FrequencyType::Interval => parse_interval(detail),
            FrequencyType::SpecificDays => {
                let (days, times) = detail.split_once('@').ok_or_else(|| {
                    malformed(detail, "expected '<days>@<times>', e.g. 'Mon,Wed@08:00'")
                })?;
                Ok(Self::SpecificDays {
                    days: parse_days(days)?,
                    times: parse_times(times)?,
                })
            }
            FrequencyType::AsNeeded => Ok(Self::AsNeeded),
        }
    }

    /// All administration times in `[start, end)`. `anchor_date` is the first
    /// day of treatment and only matters for interval rules.
    pub fn expand(&self, anchor_date: NaiveDate, start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
        if start >= end {
            return Vec::new();
        }
        match self {
            Self::Daily { times } => expand_on_days(times, start, end, |_| true),
            Self::SpecificDays { days, times } => {
                expand_on_days(times, start, end, |d| days.contains(&d.weekday()))
            }
            Self::Interval { hours, anchor_time } => {
                expand_interval(*hours, anchor_date.and_time(*anchor_time), start, end)
            }
            Self::AsNeeded => Vec::new(),
        }
    }

    /// Whether `at` is one of the times this rule produces.
    pub fn matches(&self, anchor_date: NaiveDate, at: NaiveDateTime) -> bool {
        self.expand(anchor_date, at, at + Duration::seconds(1)).contains(&at)
    }
}

/// One-shot parse and expand.
pub fn expand(
    frequency_type: FrequencyType,
    frequency_detail: &str,
    anchor_date: NaiveDate,
    range_start: NaiveDateTime,
    range_end: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>, CareError> {
    let rule = FrequencyRule::parse(frequency_type, frequency_detail)?;
    Ok(rule.expand(anchor_date, range_start, range_end))
}

fn expand_on_days(
    times: &[NaiveTime],
    start: NaiveDateTime,
    end: NaiveDateTime,
    include_day: impl Fn(NaiveDate) -> bool,
) -> Vec<NaiveDateTime> {
    let mut out = Vec::new();
    let mut day = start.date();
    while day <= end.date() {
        if include_day(day) {
            for time in times {
                let at = day.and_time(*time);
                if at >= start && at < end {
                    out.push(at);
                }
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    out
}

fn expand_interval(hours: u32, first: NaiveDateTime, start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    let step = Duration::hours(i64::from(hours));
    let step_secs = step.num_seconds();

    let mut at = if start <= first {
        first
    } else {
        let behind = (start - first).num_seconds();
        let steps = (behind + step_secs - 1) / step_secs;
        first + Duration::seconds(steps * step_secs)
    };

    let mut out = Vec::new();
    while at < end {
        out.push(at);
        at += step;
    }
    out
}

fn parse_times(detail: &str) -> Result<Vec<NaiveTime>, CareError> {
    let mut times = detail
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveTime::parse_from_str(s, "%H:%M")
                .map_err(|_| malformed(detail, &format!("'{s}' is not a HH:MM time")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if times.is_empty() {
        return Err(malformed(detail, "at least one HH:MM time is required"));
    }
    times.sort();
    times.dedup();
    Ok(times)
}

fn parse_days(detail: &str) -> Result<Vec<Weekday>, CareError> {
    let mut days = Vec::new();
    for name in detail.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let day: Weekday = name
            .parse()
            .map_err(|_| malformed(detail, &format!("'{name}' is not a weekday")))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    if days.is_empty() {
        return Err(malformed(detail, "at least one weekday is required"));
    }
    days.sort_by_key(|d| d.num_days_from_monday());
    Ok(days)
}

fn parse_interval(detail: &str) -> Result<FrequencyRule, CareError> {
    let (hours, anchor) = match detail.split_once('@') {
        Some((h, t)) => (h.trim(), Some(t.trim())),
        None => (detail.trim(), None),
    };

    let hours: u32 = hours
        .parse()
        .map_err(|_| malformed(detail, "interval must be a whole number of hours"))?;
    if hours == 0 || hours > MAX_INTERVAL_HOURS {
        return Err(malformed(
            detail,
            &format!("interval must be between 1 and {MAX_INTERVAL_HOURS} hours"),
        ));
    }

    let anchor_time = match anchor {
        Some(t) => NaiveTime::parse_from_str(t, "%H:%M")
            .map_err(|_| malformed(detail, &format!("'{t}' is not a HH:MM time")))?,
        None => NaiveTime::MIN,
    };

    Ok(FrequencyRule::Interval { hours, anchor_time })
}

fn malformed(detail: &str, why: &str) -> CareError {
    CareError::Configuration(format!("invalid frequency detail '{detail}': {why}"))
}
