//! Recommendations log → structured tuning results.
//!
//! [`parse_recommendations`] reads the trailing table of the tool's log (see
//! [`grammar`]) and produces a [`ParsedResult`] with pump and tuned values
//! for ISF, carb ratio and the 24 hourly basal rates, plus the basal rates
//! rounded to the pump's increment.

pub mod grammar;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::units::GlucoseUnits;
pub use grammar::{LogGrammar, TableRow, OREF0_V1};

pub const HOURS_PER_DAY: usize = 24;

/// Column indices within a table row.
const COL_ORIGINAL: usize = 1;
const COL_TUNED: usize = 2;
const COL_DAYS_MISSED: usize = 3;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    TooFewColumns,
    NotNumeric,
    Blank,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TooFewColumns => "too few columns",
            Self::NotNumeric => "not a number",
            Self::Blank => "blank value",
        })
    }
}

/// A malformed cell, with enough context to find it in the raw log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason} at line {line_number}, column {column}: [{value}] in [{line}]")]
pub struct ParseError {
    pub line_number: usize,
    pub line: String,
    pub column: usize,
    pub value: String,
    pub reason: ParseFailure,
}

/// Why a tuning run produced no usable result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunError {
    #[error("no table border found in log (grammar {version})")]
    MissingTable { version: &'static str },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("required row '{0}' is missing")]
    MissingRow(String),

    #[error("row '{label}' has no value in column {column}")]
    MissingColumn { label: String, column: usize },

    #[error("row '{label}' has a blank original value with no previous hour to carry over")]
    UnresolvedCarryOver { label: String },

    #[error("row '{label}' reports {missed} missed days for a {days} day run")]
    DaysMissedOutOfRange { label: String, missed: u32, days: u32 },

    #[error("basal increment must be positive, got {0}")]
    InvalidIncrement(Decimal),

    #[error("row '{label}' has an out of range value {value}")]
    ValueOutOfRange { label: String, value: Decimal },

    #[error("tuning tool exited with status {exit_code}")]
    ToolFailed { exit_code: i32 },

    #[error("recommendations log unavailable: {0}")]
    MissingLog(String),

    #[error("run step outcome unavailable: {0}")]
    OutcomeUnavailable(String),
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Largest magnitude accepted for any number in the table.
pub const MAX_TABLE_VALUE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// How a tuned basal rate is snapped to a multiple of the pump increment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BasalRounding {
    /// Any fractional number of increments goes to the next increment.
    #[default]
    AwayFromZero,
    /// Nearest increment, ties away from zero.
    HalfAwayFromZero,
    /// Nearest increment, ties to even.
    HalfEven,
}

impl BasalRounding {
    fn strategy(self) -> RoundingStrategy {
        match self {
            Self::AwayFromZero => RoundingStrategy::AwayFromZero,
            Self::HalfAwayFromZero => RoundingStrategy::MidpointAwayFromZero,
            Self::HalfEven => RoundingStrategy::MidpointNearestEven,
        }
    }

    /// Snap `value` to a multiple of `increment`. `None` on overflow.
    pub fn snap(self, value: Decimal, increment: Decimal) -> Option<Decimal> {
        value
            .checked_div(increment)?
            .round_dp_with_strategy(0, self.strategy())
            .checked_mul(increment)
    }
}

impl FromStr for BasalRounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "away_from_zero" => Ok(Self::AwayFromZero),
            "half_away_from_zero" => Ok(Self::HalfAwayFromZero),
            "half_even" => Ok(Self::HalfEven),
            other => Err(format!("unknown basal rounding '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParseOptions {
    pub units: GlucoseUnits,
    pub basal_increment: Decimal,
    /// Length of the run in days; upper bound for the missed-day count.
    pub days: u32,
    pub rounding: BasalRounding,
    pub grammar: LogGrammar,
}

impl ParseOptions {
    pub fn new(units: GlucoseUnits, basal_increment: Decimal, days: u32) -> Self {
        Self {
            units,
            basal_increment,
            days,
            rounding: BasalRounding::default(),
            grammar: OREF0_V1,
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedResult {
    pub pump_isf: Decimal,
    pub tune_isf: Decimal,
    pub pump_cr: Decimal,
    pub tune_cr: Decimal,
    pub pump_basals: [Decimal; HOURS_PER_DAY],
    pub tune_basals: [Decimal; HOURS_PER_DAY],
    pub suggested_basals: [Decimal; HOURS_PER_DAY],
    pub days_missed: [u32; HOURS_PER_DAY],
    /// Units of the two ISF values.
    pub units: GlucoseUnits,
}

impl ParsedResult {
    pub fn pump_basal_total(&self) -> Decimal {
        self.pump_basals.iter().sum()
    }

    pub fn tune_basal_total(&self) -> Decimal {
        self.tune_basals.iter().sum()
    }

    pub fn suggested_basal_total(&self) -> Decimal {
        self.suggested_basals.iter().sum()
    }
}

/// Values read from one table row before assembly.
#[derive(Debug, Clone, Copy)]
struct RowValues {
    original: Option<Decimal>,
    tuned: Decimal,
    days_missed: Option<u32>,
}

fn read_row(row: &TableRow<'_>) -> Result<RowValues, ParseError> {
    let decimal = |column: usize| -> Result<Option<Decimal>, ParseError> {
        row.cell(column)
            .map(|v| Decimal::from_str(v).map_err(|_| row.error(column, ParseFailure::NotNumeric)))
            .transpose()
    };

    let original = decimal(COL_ORIGINAL)?;
    let tuned = decimal(COL_TUNED)?.ok_or_else(|| row.error(COL_TUNED, ParseFailure::Blank))?;
    let days_missed = row
        .cell(COL_DAYS_MISSED)
        .map(|v| {
            v.parse::<u32>()
                .map_err(|_| row.error(COL_DAYS_MISSED, ParseFailure::NotNumeric))
        })
        .transpose()?;

    Ok(RowValues {
        original,
        tuned,
        days_missed,
    })
}

/// Parse the full recommendations log.
pub fn parse_recommendations(text: &str, opts: &ParseOptions) -> Result<ParsedResult, RunError> {
    if opts.basal_increment <= Decimal::ZERO {
        return Err(RunError::InvalidIncrement(opts.basal_increment));
    }
    let grammar = &opts.grammar;

    let rows = grammar.table_rows(text)?;

    // Top-most occurrence of a label wins.
    let mut values: HashMap<&str, RowValues> = HashMap::new();
    for row in &rows {
        let parsed = read_row(row)?;
        for value in parsed.original.into_iter().chain([parsed.tuned]) {
            if value.abs() > MAX_TABLE_VALUE {
                return Err(RunError::ValueOutOfRange {
                    label: row.label().to_string(),
                    value,
                });
            }
        }
        values.entry(row.label()).or_insert(parsed);
    }

    let lookup = |label: &str| -> Result<RowValues, RunError> {
        values
            .get(label)
            .copied()
            .ok_or_else(|| RunError::MissingRow(label.to_string()))
    };
    let original = |label: &str, row: &RowValues| -> Result<Decimal, RunError> {
        row.original.ok_or_else(|| RunError::MissingColumn {
            label: label.to_string(),
            column: COL_ORIGINAL,
        })
    };

    let isf = lookup(grammar.isf_label)?;
    let cr = lookup(grammar.carb_ratio_label)?;

    let mut pump_basals = [Decimal::ZERO; HOURS_PER_DAY];
    let mut tune_basals = [Decimal::ZERO; HOURS_PER_DAY];
    let mut suggested_basals = [Decimal::ZERO; HOURS_PER_DAY];
    let mut days_missed = [0u32; HOURS_PER_DAY];

    for hour in 0..HOURS_PER_DAY {
        let label = LogGrammar::hourly_label(hour);
        let row = lookup(&label)?;

        pump_basals[hour] = match (row.original, hour) {
            (Some(v), _) => v,
            (None, 0) => return Err(RunError::UnresolvedCarryOver { label }),
            (None, h) => pump_basals[h - 1],
        };
        tune_basals[hour] = row.tuned;
        suggested_basals[hour] = opts
            .rounding
            .snap(row.tuned, opts.basal_increment)
            .ok_or_else(|| RunError::ValueOutOfRange {
                label: label.clone(),
                value: row.tuned,
            })?;

        let missed = row.days_missed.ok_or_else(|| RunError::MissingColumn {
            label: label.clone(),
            column: COL_DAYS_MISSED,
        })?;
        if missed > opts.days {
            return Err(RunError::DaysMissedOutOfRange {
                label,
                missed,
                days: opts.days,
            });
        }
        days_missed[hour] = missed;
    }

    Ok(ParsedResult {
        pump_isf: opts.units.from_mgdl(original(grammar.isf_label, &isf)?),
        tune_isf: opts.units.from_mgdl(isf.tuned),
        pump_cr: original(grammar.carb_ratio_label, &cr)?,
        tune_cr: cr.tuned,
        pump_basals,
        tune_basals,
        suggested_basals,
        days_missed,
        units: opts.units,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    /// Build a log with the given hourly rows and a standard header block.
    fn log_with_hours(hours: &[String]) -> String {
        let mut out = String::from(
            "Autotune pump profile recommendations:\n\
             Parameter      | Pump     | Autotune | Days Missing\n\
             ---------------------------------------------------------\n\
             ISF [mg/dL/U]  | 50.000   | 54.000   |\n\
             Carb Ratio[g/U]| 10.000   | 9.500    |\n\
             Basals [U/hr]  | -        |          |\n",
        );
        for row in hours {
            out.push_str(row);
            out.push('\n');
        }
        out
    }

    fn hours_with(tuned: Decimal) -> Vec<String> {
        (0..24)
            .flat_map(|h| {
                [
                    format!("  {h:02}:00        | 0.800    | {tuned}    | 1"),
                    format!("  {h:02}:30        |          | {tuned}    | 1"),
                ]
            })
            .collect()
    }

    fn opts() -> ParseOptions {
        ParseOptions::new(GlucoseUnits::MgDl, dec!(0.05), 7)
    }

    #[test]
    fn parses_a_full_table() {
        let res = parse_recommendations(&log_with_hours(&hours_with(dec!(0.812))), &opts()).unwrap();
        assert_eq!(res.pump_isf, dec!(50));
        assert_eq!(res.tune_isf, dec!(54));
        assert_eq!(res.pump_cr, dec!(10));
        assert_eq!(res.tune_cr, dec!(9.5));
        assert_eq!(res.pump_basals, [dec!(0.8); 24]);
        assert_eq!(res.tune_basals[23], dec!(0.812));
        assert_eq!(res.suggested_basals[0], dec!(0.85));
        assert_eq!(res.days_missed, [1; 24]);
        assert_eq!(res.pump_basal_total(), dec!(19.2));
    }

    #[test]
    fn rounding_goes_to_the_next_increment() {
        for (tuned, expected) in [(dec!(0.324), dec!(0.35)), (dec!(0.325), dec!(0.35)), (dec!(0.35), dec!(0.35))] {
            let res = parse_recommendations(&log_with_hours(&hours_with(tuned)), &opts()).unwrap();
            assert_eq!(res.suggested_basals[5], expected, "tuned {tuned}");
        }
    }

    #[test]
    fn alternative_rounding_conventions() {
        let inc = dec!(0.05);
        assert_eq!(BasalRounding::HalfAwayFromZero.snap(dec!(0.324), inc), Some(dec!(0.30)));
        assert_eq!(BasalRounding::HalfAwayFromZero.snap(dec!(0.325), inc), Some(dec!(0.35)));
        assert_eq!(BasalRounding::HalfEven.snap(dec!(0.325), inc), Some(dec!(0.30)));
        assert_eq!(BasalRounding::HalfEven.snap(dec!(0.375), inc), Some(dec!(0.40)));
        assert_eq!("half_even".parse::<BasalRounding>(), Ok(BasalRounding::HalfEven));
    }

    #[test]
    fn blank_original_carries_previous_hour() {
        let mut hours = hours_with(dec!(1.0));
        hours[2] = "  01:00        |          | 1.0    | 0".to_string();
        hours[4] = "  02:00        |          | 1.0    | 0".to_string();
        hours[0] = "  00:00        | 0.650    | 1.0    | 0".to_string();
        let res = parse_recommendations(&log_with_hours(&hours), &opts()).unwrap();
        assert_eq!(&res.pump_basals[..4], &[dec!(0.65), dec!(0.65), dec!(0.65), dec!(0.8)]);
    }

    #[test]
    fn blank_original_at_midnight_is_an_error() {
        let mut hours = hours_with(dec!(1.0));
        hours[0] = "  00:00        |          | 1.0    | 0".to_string();
        assert_matches!(
            parse_recommendations(&log_with_hours(&hours), &opts()),
            Err(RunError::UnresolvedCarryOver { label }) if label == "00:00"
        );
    }

    #[test]
    fn mmol_converts_isf_only() {
        let o = ParseOptions::new(GlucoseUnits::Mmol, dec!(0.05), 7);
        let res = parse_recommendations(&log_with_hours(&hours_with(dec!(0.8))), &o).unwrap();
        assert_eq!(res.pump_isf.round_dp(4), dec!(2.7778));
        assert_eq!(res.tune_isf, dec!(3));
        assert_eq!(res.pump_cr, dec!(10));
        assert_eq!(res.pump_basals[0], dec!(0.8));
    }

    #[test]
    fn missing_isf_row_is_fatal() {
        let text = log_with_hours(&hours_with(dec!(0.8))).replace("ISF [mg/dL/U]", "XSF");
        assert_matches!(
            parse_recommendations(&text, &opts()),
            Err(RunError::MissingRow(label)) if label == "ISF [mg/dL/U]"
        );
    }

    #[test]
    fn missing_hour_is_fatal() {
        let mut hours = hours_with(dec!(0.8));
        hours.remove(26);
        assert_matches!(
            parse_recommendations(&log_with_hours(&hours), &opts()),
            Err(RunError::MissingRow(label)) if label == "13:00"
        );
    }

    #[test]
    fn non_numeric_cell_reports_line_and_column() {
        let mut hours = hours_with(dec!(0.8));
        hours[6] = "  03:00        | 0.8    | abc    | 0".to_string();
        let err = parse_recommendations(&log_with_hours(&hours), &opts()).unwrap_err();
        assert_matches!(
            err,
            RunError::Parse(ParseError { line_number: 13, column: 2, ref value, reason: ParseFailure::NotNumeric, .. })
                if value == "abc"
        );
    }

    #[test]
    fn days_missed_is_required_and_bounded() {
        let mut hours = hours_with(dec!(0.8));
        hours[0] = "  00:00        | 0.8    | 0.8    |".to_string();
        assert_matches!(
            parse_recommendations(&log_with_hours(&hours), &opts()),
            Err(RunError::MissingColumn { column: 3, .. })
        );

        hours[0] = "  00:00        | 0.8    | 0.8    | 9".to_string();
        assert_matches!(
            parse_recommendations(&log_with_hours(&hours), &opts()),
            Err(RunError::DaysMissedOutOfRange { missed: 9, days: 7, .. })
        );
    }

    #[test]
    fn first_occurrence_of_a_label_wins() {
        let mut hours = hours_with(dec!(0.8));
        hours.push("  00:00        | 9.9    | 9.9    | 0".to_string());
        let res = parse_recommendations(&log_with_hours(&hours), &opts()).unwrap();
        assert_eq!(res.pump_basals[0], dec!(0.8));
    }

    #[test]
    fn zero_increment_is_rejected() {
        let o = ParseOptions::new(GlucoseUnits::MgDl, Decimal::ZERO, 7);
        assert_matches!(
            parse_recommendations(&log_with_hours(&hours_with(dec!(0.8))), &o),
            Err(RunError::InvalidIncrement(_))
        );
    }

    #[test]
    fn huge_tuned_value_is_out_of_range() {
        let mut hours = hours_with(dec!(0.8));
        hours[6] = "  03:00        | 0.8    | 79228162514264337593543950335 | 0".to_string();
        assert_matches!(
            parse_recommendations(&log_with_hours(&hours), &opts()),
            Err(RunError::ValueOutOfRange { label, .. }) if label == "03:00"
        );
    }

    #[test]
    fn tiny_increment_overflow_is_out_of_range() {
        let o = ParseOptions::new(GlucoseUnits::MgDl, Decimal::new(1, 28), 7);
        assert_matches!(
            parse_recommendations(&log_with_hours(&hours_with(dec!(100))), &o),
            Err(RunError::ValueOutOfRange { label, .. }) if label == "00:00"
        );
        assert_eq!(BasalRounding::AwayFromZero.snap(dec!(100), Decimal::new(1, 28)), None);
    }
}
