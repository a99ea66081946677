//! Schedule configuration and wall-clock trigger arithmetic

use crate::core::error::EngineError;
use chrono::{DateTime, Duration as TimeDelta, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

/// A fixed offset of the display timezone from UTC, in minutes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UtcOffset {
    minutes: i32,
}

impl UtcOffset {
    pub const UTC: UtcOffset = UtcOffset { minutes: 0 };

    pub fn from_minutes(minutes: i32) -> Result<Self, EngineError> {
        if minutes.abs() >= 24 * 60 {
            return Err(EngineError::ScheduleConflict(format!(
                "utc offset of {} minutes is out of range",
                minutes
            )));
        }
        Ok(Self { minutes })
    }

    /// Parse "+05:30", "-0800", "Z" or "UTC"
    pub fn parse(s: &str) -> Result<Self, EngineError> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
            return Ok(Self::UTC);
        }

        let re = PATTERN.get_or_init(|| {
            Regex::new(r"^([+-])(\d{2}):?(\d{2})$").expect("offset pattern is valid")
        });
        let caps = re.captures(trimmed).ok_or_else(|| {
            EngineError::ScheduleConflict(format!("invalid utc offset '{}', expected ±HH:MM", s))
        })?;

        let hours: i32 = caps[2].parse().unwrap_or(0);
        let mins: i32 = caps[3].parse().unwrap_or(0);
        if mins >= 60 {
            return Err(EngineError::ScheduleConflict(format!(
                "invalid utc offset '{}': minutes must be below 60",
                s
            )));
        }
        let sign = if &caps[1] == "-" { -1 } else { 1 };
        Self::from_minutes(sign * (hours * 60 + mins))
    }

    pub fn minutes(&self) -> i32 {
        self.minutes
    }
}

/// Convert a display-timezone time of day to the canonical (UTC) time of day
pub fn to_canonical(display: NaiveTime, offset: UtcOffset) -> NaiveTime {
    display
        .overflowing_sub_signed(TimeDelta::minutes(offset.minutes as i64))
        .0
}

/// Next instant strictly after `now` whose UTC time of day is `at`
pub fn next_daily_fire(now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let candidate = now.date_naive().and_time(at).and_utc();
    if candidate > now {
        candidate
    } else {
        candidate + TimeDelta::days(1)
    }
}

/// When a scheduled job fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Trigger {
    /// Once per 24h at a canonical (UTC) time of day
    DailyAt { time: NaiveTime },
    /// Every `hours` hours starting from arm time
    EveryHours { hours: u32 },
}

impl Trigger {
    /// Time between consecutive fires
    pub fn period(&self) -> Duration {
        match self {
            Trigger::DailyAt { .. } => Duration::from_secs(24 * 60 * 60),
            Trigger::EveryHours { hours } => Duration::from_secs(*hours as u64 * 60 * 60),
        }
    }

    /// Delay from `now` until the first fire
    pub fn first_delay(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Trigger::DailyAt { time } => (next_daily_fire(now, *time) - now)
                .to_std()
                .unwrap_or_default(),
            Trigger::EveryHours { .. } => self.period(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::DailyAt { time } => format!("daily at {} UTC", time.format("%H:%M")),
            Trigger::EveryHours { hours } => format!("every {}h", hours),
        }
    }
}

/// Schedule attached to a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub trigger: Trigger,
}

impl ScheduleConfig {
    /// Daily trigger from a display "HH:MM" and the display timezone offset
    pub fn daily(display_time: &str, offset: UtcOffset) -> Result<Self, EngineError> {
        let display = NaiveTime::parse_from_str(display_time.trim(), "%H:%M").map_err(|e| {
            EngineError::ScheduleConflict(format!(
                "invalid schedule time '{}', expected HH:MM: {}",
                display_time, e
            ))
        })?;

        Ok(Self {
            enabled: true,
            trigger: Trigger::DailyAt {
                time: to_canonical(display, offset),
            },
        })
    }

    /// Interval trigger; the interval must be a positive number of hours
    pub fn every_hours(hours: i64) -> Result<Self, EngineError> {
        if hours <= 0 {
            return Err(EngineError::ScheduleConflict(format!(
                "interval must be a positive number of hours, got {}",
                hours
            )));
        }
        let hours = u32::try_from(hours).map_err(|_| {
            EngineError::ScheduleConflict(format!("interval of {} hours is too large", hours))
        })?;

        Ok(Self {
            enabled: true,
            trigger: Trigger::EveryHours { hours },
        })
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Re-check invariants on a value built without the constructors
    pub fn validate(&self) -> Result<(), EngineError> {
        match self.trigger {
            Trigger::EveryHours { hours: 0 } => Err(EngineError::ScheduleConflict(
                "interval must be a positive number of hours, got 0".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
