//! Time-indexed schedules and the dedup / sort / collapse pipeline.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

use super::ProfileError;

/// Seconds in a day; valid offsets are `0..SECONDS_PER_DAY`.
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Minutes in a day; the end offset of the last sensitivity segment.
pub const MINUTES_PER_DAY: u32 = 1_440;

/// One schedule entry as the data service reports it.
///
/// Nightscout carries both a `time` string and, usually, an explicit
/// `timeAsSeconds`. Either may be a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawScheduleEntry {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(
        default,
        rename = "timeAsSeconds",
        deserialize_with = "deserialize_seconds"
    )]
    pub time_as_seconds: Option<i64>,
    pub value: Decimal,
}

impl RawScheduleEntry {
    pub fn at_time(time: &str, value: Decimal) -> Self {
        Self {
            time: Some(time.to_string()),
            time_as_seconds: None,
            value,
        }
    }

    pub fn at_seconds(seconds: i64, value: Decimal) -> Self {
        Self {
            time: None,
            time_as_seconds: Some(seconds),
            value,
        }
    }

    /// Resolve the entry's offset from midnight. Explicit seconds win over
    /// the time string.
    pub fn offset_seconds(&self) -> Result<u32, ProfileError> {
        if let Some(secs) = self.time_as_seconds {
            return u32::try_from(secs)
                .ok()
                .filter(|s| *s < SECONDS_PER_DAY)
                .ok_or(ProfileError::OffsetOutOfRange(secs));
        }
        match &self.time {
            Some(time) => parse_time_of_day(time),
            None => Err(ProfileError::InvalidTime(String::new())),
        }
    }
}

/// A canonical schedule entry: offset from midnight plus value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub offset_seconds: u32,
    pub value: Decimal,
}

impl ScheduleEntry {
    pub fn new(offset_seconds: u32, value: Decimal) -> Self {
        Self {
            offset_seconds,
            value,
        }
    }

    pub fn offset_minutes(&self) -> u32 {
        self.offset_seconds / 60
    }
}

/// Parse an `HH:MM` or `HH:MM:SS` time of day into seconds from midnight.
pub fn parse_time_of_day(input: &str) -> Result<u32, ProfileError> {
    let invalid = || ProfileError::InvalidTime(input.to_string());

    let parts: Vec<&str> = input.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(invalid());
    }

    let mut fields = [0u32; 3];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *slot = part.parse().map_err(|_| invalid())?;
    }

    let [hours, minutes, seconds] = fields;
    if hours > 23 || minutes > 59 || seconds > 59 {
        return Err(invalid());
    }
    Ok(hours * 3600 + minutes * 60 + seconds)
}

/// Format minutes from midnight as `hh:mm:ss`.
pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}

/// Drop same-offset duplicates, keeping the value of the last occurrence.
///
/// The surviving entry stays where its offset first appeared, so the pass
/// is stable with respect to input order.
pub fn dedup_last_wins(entries: &[ScheduleEntry]) -> Vec<ScheduleEntry> {
    let mut out: Vec<ScheduleEntry> = Vec::with_capacity(entries.len());
    let mut seen: HashMap<u32, usize> = HashMap::new();

    for entry in entries {
        match seen.get(&entry.offset_seconds) {
            Some(&idx) => out[idx].value = entry.value,
            None => {
                seen.insert(entry.offset_seconds, out.len());
                out.push(*entry);
            }
        }
    }
    out
}

/// Run-length compress on value: keep entry `i` iff it is the first entry or
/// its value differs from the last kept entry.
pub fn collapse_runs(entries: &[ScheduleEntry]) -> Vec<ScheduleEntry> {
    let mut out: Vec<ScheduleEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match out.last() {
            Some(kept) if kept.value == entry.value => {}
            _ => out.push(*entry),
        }
    }
    out
}

/// Resolve offsets, dedup, sort and collapse a raw schedule.
pub fn canonicalize(
    schedule: &'static str,
    raw: &[RawScheduleEntry],
) -> Result<Vec<ScheduleEntry>, ProfileError> {
    if raw.is_empty() {
        return Err(ProfileError::EmptySchedule(schedule));
    }

    let resolved = raw
        .iter()
        .map(|r| Ok(ScheduleEntry::new(r.offset_seconds()?, r.value.normalize())))
        .collect::<Result<Vec<_>, ProfileError>>()?;

    let mut deduped = dedup_last_wins(&resolved);
    deduped.sort_by_key(|e| e.offset_seconds);
    Ok(collapse_runs(&deduped))
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Int(i64),
        Float(f64),
        Text(String),
    }

    match Option::<Seconds>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Seconds::Int(v)) => Ok(Some(v)),
        Some(Seconds::Float(v)) => Ok(Some(v as i64)),
        Some(Seconds::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Seconds::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
