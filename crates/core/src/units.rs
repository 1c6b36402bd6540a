//! Glucose unit handling.
//!
//! Nightscout reports units as free-form tags (`mg/dl`, `mg/dL`, `mmol`,
//! `mmol/L`, ...). The tuning tool always works in mg/dL, so anything in the
//! mmol/L family is converted with a fixed factor of 18.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// mg/dL per mmol/L, as used by the tuning tool and its reports.
pub const MGDL_PER_MMOL: Decimal = Decimal::from_parts(18, 0, 0, false, 0);

/// The two unit families a profile or report can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseUnits {
    #[default]
    MgDl,
    Mmol,
}

impl GlucoseUnits {
    /// Classify a raw units tag. Any tag containing `mmol` (case-insensitive)
    /// is mmol/L; everything else, including a missing tag, is mg/dL.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(t) if t.to_ascii_lowercase().contains("mmol") => Self::Mmol,
            _ => Self::MgDl,
        }
    }

    /// Human-readable label used in reports.
    pub fn label(self) -> &'static str {
        match self {
            Self::MgDl => "mg/dL",
            Self::Mmol => "mmol/L",
        }
    }

    /// Convert a sensitivity expressed in these units to mg/dL.
    pub fn to_mgdl(self, value: Decimal) -> Decimal {
        match self {
            Self::MgDl => value,
            Self::Mmol => value.saturating_mul(MGDL_PER_MMOL),
        }
    }

    /// Convert a sensitivity expressed in mg/dL to these units.
    pub fn from_mgdl(self, value: Decimal) -> Decimal {
        match self {
            Self::MgDl => value,
            Self::Mmol => value / MGDL_PER_MMOL,
        }
    }
}

impl std::fmt::Display for GlucoseUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tag_classification_is_case_insensitive() {
        assert_eq!(GlucoseUnits::from_tag(Some("mmol")), GlucoseUnits::Mmol);
        assert_eq!(GlucoseUnits::from_tag(Some("MMOL/L")), GlucoseUnits::Mmol);
        assert_eq!(GlucoseUnits::from_tag(Some("mg/dl")), GlucoseUnits::MgDl);
        assert_eq!(GlucoseUnits::from_tag(None), GlucoseUnits::MgDl);
    }

    #[test]
    fn mmol_converts_by_eighteen() {
        assert_eq!(GlucoseUnits::Mmol.to_mgdl(dec!(2.5)), dec!(45.0));
        assert_eq!(GlucoseUnits::MgDl.to_mgdl(dec!(45)), dec!(45));
        assert_eq!(GlucoseUnits::Mmol.from_mgdl(dec!(36)), dec!(2));
    }
}
