//! The tuning tool's `profile.json` input schema.
//!
//! Field names follow the tool exactly (`basalprofile`, `isfProfile`,
//! `min_5m_carbimpact`, ...). Decimals are written as JSON numbers because the
//! tool does arithmetic on them directly.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::schedule::{format_minutes, ScheduleEntry, MINUTES_PER_DAY};
use crate::units::GlucoseUnits;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProfile {
    #[serde(rename = "min_5m_carbimpact", with = "rust_decimal::serde::float")]
    pub min_5m_carbimpact: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub dia: Decimal,
    #[serde(rename = "basalprofile")]
    pub basal_profile: Vec<BasalSegment>,
    #[serde(rename = "isfProfile")]
    pub isf_profile: IsfProfile,
    #[serde(with = "rust_decimal::serde::float")]
    pub carb_ratio: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub autosens_max: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub autosens_min: Decimal,
    pub curve: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasalSegment {
    pub start: String,
    pub minutes: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub rate: Decimal,
}

impl BasalSegment {
    pub fn from_entry(entry: &ScheduleEntry) -> Self {
        let minutes = entry.offset_minutes();
        Self {
            start: format_minutes(minutes),
            minutes,
            rate: entry.value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsfProfile {
    pub sensitivities: Vec<SensitivitySegment>,
}

/// One sensitivity block. `offset` and `endoffset` are minutes from midnight;
/// `sensitivity` is always mg/dL per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivitySegment {
    pub i: usize,
    pub start: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub sensitivity: Decimal,
    pub offset: u32,
    pub x: usize,
    pub endoffset: u32,
}

/// Build sensitivity segments from a canonical schedule. Each segment ends
/// where the next one starts; the last one ends at midnight (1440).
pub fn sensitivity_segments(
    entries: &[ScheduleEntry],
    units: GlucoseUnits,
) -> Vec<SensitivitySegment> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let offset = entry.offset_minutes();
            let endoffset = entries
                .get(i + 1)
                .map_or(MINUTES_PER_DAY, ScheduleEntry::offset_minutes);
            SensitivitySegment {
                i,
                start: format_minutes(offset),
                sensitivity: units.to_mgdl(entry.value).normalize(),
                offset,
                x: i,
                endoffset,
            }
        })
        .collect()
}
