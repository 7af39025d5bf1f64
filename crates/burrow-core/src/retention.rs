use chrono::{DateTime, Duration, Utc};

use crate::backup::BackupMeta;
use crate::config::RetentionConfig;
use crate::error::{BurrowError, Result};

/// Parse a window such as "36h", "7d", "2w", "3m" (30-day months) or "1y".
/// A bare number counts days.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || BurrowError::Config(format!("invalid duration: '{s}'"));
    if s.is_empty() {
        return Err(BurrowError::Config("empty duration string".into()));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: i64 = digits.parse().map_err(|_| invalid())?;
    let days_per_unit = match unit.to_ascii_lowercase().as_str() {
        "" | "d" => 1,
        "w" => 7,
        "m" => 30,
        "y" => 365,
        "h" => return Ok(Duration::hours(n)),
        _ => return Err(invalid()),
    };
    n.checked_mul(days_per_unit)
        .map(Duration::days)
        .ok_or_else(invalid)
}

/// Backups whose recovery time falls before `now - window` are expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
}

impl RetentionPolicy {
    pub fn from_config(config: &RetentionConfig) -> Result<Option<Self>> {
        config
            .window
            .as_deref()
            .map(|w| parse_duration(w).map(|window| Self { window }))
            .transpose()
    }

    pub fn is_expired(&self, meta: &BackupMeta, now: DateTime<Utc>) -> bool {
        meta.recovery_time() < now - self.window
    }
}
