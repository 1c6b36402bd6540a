//! Profile normalization: Nightscout schedules → tuning tool input.
//!
//! [`normalize`] is a pure function. Every schedule is resolved to offsets,
//! deduplicated (last entry per offset wins), sorted and run-length
//! collapsed. Carb ratio and sensitivity must then be a single block each;
//! anything else is [`ProfileError::Ambiguous`] and the caller has to supply
//! an explicit override.

pub mod openaps;
pub mod schedule;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::units::GlucoseUnits;

pub use openaps::{BasalSegment, IsfProfile, NormalizedProfile, SensitivitySegment};
pub use schedule::{RawScheduleEntry, ScheduleEntry, MINUTES_PER_DAY};

/// The tool's default minimum carb impact (mg/dL per 5 minutes).
pub const DEFAULT_MIN_5M_CARBIMPACT: Decimal = Decimal::from_parts(8, 0, 0, false, 0);

/// Shortest duration of insulin action the tool accepts, in hours.
pub const MIN_DIA_HOURS: Decimal = Decimal::from_parts(3, 0, 0, false, 0);

/// Autosens bounds written into every profile (1.2 and 0.7).
pub const AUTOSENS_MAX: Decimal = Decimal::from_parts(12, 0, 0, false, 1);
pub const AUTOSENS_MIN: Decimal = Decimal::from_parts(7, 0, 0, false, 1);

pub const DEFAULT_INSULIN_CURVE: &str = "rapid-acting";

/// Insulin curves the tool understands.
pub const INSULIN_CURVES: [&str; 3] = ["bilinear", "rapid-acting", "ultra-rapid"];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProfileError {
    #[error("invalid time of day '{0}'")]
    InvalidTime(String),

    #[error("schedule offset {0}s is outside the day")]
    OffsetOutOfRange(i64),

    #[error("{0} schedule has no entries")]
    EmptySchedule(&'static str),

    #[error(
        "profile has {carb_ratio_blocks} carb ratio and {sensitivity_blocks} sensitivity \
         blocks; supply a single value for each"
    )]
    Ambiguous {
        carb_ratio_blocks: usize,
        sensitivity_blocks: usize,
    },
}

impl From<ProfileError> for CoreError {
    fn from(err: ProfileError) -> Self {
        match err {
            ProfileError::Ambiguous { .. } => CoreError::AmbiguousProfile(err.to_string()),
            other => CoreError::Validation(other.to_string()),
        }
    }
}

/// A single profile from the data service, already fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProfile {
    #[serde(default)]
    pub name: Option<String>,
    pub dia: Decimal,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default, rename = "carbratio")]
    pub carb_ratio: Vec<RawScheduleEntry>,
    #[serde(default, rename = "sens")]
    pub sensitivity: Vec<RawScheduleEntry>,
    #[serde(default)]
    pub basal: Vec<RawScheduleEntry>,
}

/// Single-value replacements for schedules the user could not tune as
/// multiple blocks. The sensitivity override is in the profile's own units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(default)]
    pub carb_ratio: Option<Decimal>,
    #[serde(default)]
    pub sensitivity: Option<Decimal>,
}

/// Output of [`normalize`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Normalized {
    pub profile: NormalizedProfile,
    pub units: GlucoseUnits,
    pub timezone: Option<String>,
    pub warnings: Vec<String>,
}

/// Canonicalize a raw profile into the tool's input schema.
pub fn normalize(raw: &RawProfile, overrides: ProfileOverrides) -> Result<Normalized, ProfileError> {
    let units = GlucoseUnits::from_tag(raw.units.as_deref());

    let carb_ratio = match overrides.carb_ratio {
        Some(value) => vec![ScheduleEntry::new(0, value.normalize())],
        None => schedule::canonicalize("carbratio", &raw.carb_ratio)?,
    };
    let sensitivity = match overrides.sensitivity {
        Some(value) => vec![ScheduleEntry::new(0, value.normalize())],
        None => schedule::canonicalize("sens", &raw.sensitivity)?,
    };

    if carb_ratio.len() > 1 || sensitivity.len() > 1 {
        return Err(ProfileError::Ambiguous {
            carb_ratio_blocks: carb_ratio.len(),
            sensitivity_blocks: sensitivity.len(),
        });
    }

    let basal = schedule::canonicalize("basal", &raw.basal)?;

    let mut warnings = Vec::new();
    let mut dia = raw.dia;
    if dia < MIN_DIA_HOURS {
        warnings.push(format!(
            "DIA of {dia} hours is too short. It has been automatically adjusted to the \
             minimum of {MIN_DIA_HOURS} hours"
        ));
        dia = MIN_DIA_HOURS;
    }

    let profile = NormalizedProfile {
        min_5m_carbimpact: DEFAULT_MIN_5M_CARBIMPACT,
        dia,
        basal_profile: basal.iter().map(BasalSegment::from_entry).collect(),
        isf_profile: IsfProfile {
            sensitivities: openaps::sensitivity_segments(&sensitivity, units),
        },
        carb_ratio: carb_ratio[0].value,
        autosens_max: AUTOSENS_MAX,
        autosens_min: AUTOSENS_MIN,
        curve: DEFAULT_INSULIN_CURVE.to_string(),
    };

    Ok(Normalized {
        profile,
        units,
        timezone: raw.timezone.clone(),
        warnings,
    })
}

impl NormalizedProfile {
    /// Apply the optional tuning knobs a user can set at submission time.
    pub fn with_tuning_overrides(
        mut self,
        min_5m_carbimpact: Option<Decimal>,
        curve: Option<&str>,
    ) -> Result<Self, CoreError> {
        if let Some(impact) = min_5m_carbimpact {
            if impact <= Decimal::ZERO {
                return Err(CoreError::Validation(
                    "min_5m_carbimpact must be positive".into(),
                ));
            }
            self.min_5m_carbimpact = impact;
        }
        if let Some(curve) = curve.filter(|c| !c.is_empty()) {
            if !INSULIN_CURVES.contains(&curve) {
                return Err(CoreError::Validation(format!(
                    "Unknown insulin curve '{curve}'"
                )));
            }
            self.curve = curve.to_string();
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn raw_profile() -> RawProfile {
        RawProfile {
            name: Some("Default".into()),
            dia: dec!(4),
            timezone: Some("Europe/London".into()),
            units: Some("mg/dl".into()),
            carb_ratio: vec![
                RawScheduleEntry::at_time("00:00", dec!(10)),
                RawScheduleEntry::at_time("08:00", dec!(10)),
            ],
            sensitivity: vec![RawScheduleEntry::at_time("00:00", dec!(50))],
            basal: vec![
                RawScheduleEntry::at_time("00:00", dec!(0.8)),
                RawScheduleEntry::at_time("06:00", dec!(1.0)),
                RawScheduleEntry::at_time("06:00", dec!(1.1)),
                RawScheduleEntry::at_time("12:00", dec!(1.1)),
            ],
        }
    }

    #[test]
    fn normalizes_a_single_block_profile() {
        let out = normalize(&raw_profile(), ProfileOverrides::default()).unwrap();
        let p = &out.profile;

        assert_eq!(p.carb_ratio, dec!(10));
        assert_eq!(p.min_5m_carbimpact, dec!(8));
        assert_eq!(p.curve, "rapid-acting");
        assert_eq!(p.isf_profile.sensitivities.len(), 1);
        assert_eq!(p.isf_profile.sensitivities[0].endoffset, MINUTES_PER_DAY);

        let basal: Vec<(u32, Decimal)> = p.basal_profile.iter().map(|b| (b.minutes, b.rate)).collect();
        assert_eq!(basal, vec![(0, dec!(0.8)), (360, dec!(1.1))]);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn multiple_sensitivity_blocks_are_ambiguous() {
        let mut raw = raw_profile();
        raw.sensitivity.push(RawScheduleEntry::at_time("12:00", dec!(40)));
        assert_matches!(
            normalize(&raw, ProfileOverrides::default()),
            Err(ProfileError::Ambiguous { carb_ratio_blocks: 1, sensitivity_blocks: 2 })
        );
    }

    #[test]
    fn override_resolves_ambiguity() {
        let mut raw = raw_profile();
        raw.carb_ratio.push(RawScheduleEntry::at_time("12:00", dec!(12)));
        let overrides = ProfileOverrides {
            carb_ratio: Some(dec!(11)),
            sensitivity: None,
        };
        let out = normalize(&raw, overrides).unwrap();
        assert_eq!(out.profile.carb_ratio, dec!(11));
    }

    #[test]
    fn mmol_profile_sensitivity_and_override_are_converted() {
        let mut raw = raw_profile();
        raw.units = Some("mmol".into());
        raw.sensitivity = vec![RawScheduleEntry::at_time("00:00", dec!(3))];
        let out = normalize(&raw, ProfileOverrides::default()).unwrap();
        assert_eq!(out.units, GlucoseUnits::Mmol);
        assert_eq!(out.profile.isf_profile.sensitivities[0].sensitivity, dec!(54));
        // Basal rates stay in U/hr.
        assert_eq!(out.profile.basal_profile[0].rate, dec!(0.8));

        let overrides = ProfileOverrides {
            carb_ratio: None,
            sensitivity: Some(dec!(2.5)),
        };
        let out = normalize(&raw, overrides).unwrap();
        assert_eq!(out.profile.isf_profile.sensitivities[0].sensitivity, dec!(45));
    }

    #[test]
    fn short_dia_is_raised_with_a_warning() {
        let mut raw = raw_profile();
        raw.dia = dec!(2);
        let out = normalize(&raw, ProfileOverrides::default()).unwrap();
        assert_eq!(out.profile.dia, dec!(3));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("DIA of 2 hours"));
    }

    #[test]
    fn ambiguity_maps_to_core_error() {
        let err: CoreError = ProfileError::Ambiguous {
            carb_ratio_blocks: 2,
            sensitivity_blocks: 1,
        }
        .into();
        assert_matches!(err, CoreError::AmbiguousProfile(_));
    }

    #[test]
    fn serializes_in_tool_schema() {
        let out = normalize(&raw_profile(), ProfileOverrides::default()).unwrap();
        let json = serde_json::to_value(&out.profile).unwrap();
        assert!(json["basalprofile"].is_array());
        assert_eq!(json["isfProfile"]["sensitivities"][0]["endoffset"], 1440);
        assert_eq!(json["carb_ratio"], 10.0);
        assert!((json["autosens_max"].as_f64().unwrap() - 1.2).abs() < 1e-9);
        assert_eq!(json["basalprofile"][1]["start"], "06:00:00");
        assert_eq!(json["curve"], "rapid-acting");
    }

    #[test]
    fn tuning_overrides_validate_curve() {
        let out = normalize(&raw_profile(), ProfileOverrides::default()).unwrap();
        let tuned = out
            .profile
            .clone()
            .with_tuning_overrides(Some(dec!(6)), Some("ultra-rapid"))
            .unwrap();
        assert_eq!(tuned.min_5m_carbimpact, dec!(6));
        assert_eq!(tuned.curve, "ultra-rapid");
        assert_matches!(
            out.profile.with_tuning_overrides(None, Some("slow")),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn parses_nightscout_store_entry() {
        let json = r#"{
            "dia": "3.5",
            "carbratio": [{"time": "00:00", "value": "9", "timeAsSeconds": "0"}],
            "sens": [{"time": "00:00", "value": 2.8, "timeAsSeconds": 0}],
            "basal": [{"time": "00:00", "value": "0.5"}],
            "timezone": "UTC",
            "units": "mmol"
        }"#;
        let raw: RawProfile = serde_json::from_str(json).unwrap();
        let out = normalize(&raw, ProfileOverrides::default()).unwrap();
        assert_eq!(out.profile.dia, dec!(3.5));
        assert_eq!(out.profile.isf_profile.sensitivities[0].sensitivity, dec!(50.4));
    }
}
