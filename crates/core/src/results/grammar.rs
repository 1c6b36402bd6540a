//! Versioned grammar for the tuning tool's recommendations log.
//!
//! The log is owned by an external tool, so every assumption about its shape
//! lives here as data. A new log revision gets a new constant plus a
//! conformance fixture under `tests/fixtures/`; a log that does not match the
//! grammar is a [`RunError`], never a silently partial result.

use super::{ParseError, ParseFailure, RunError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogGrammar {
    /// Identifier recorded alongside parse failures.
    pub version: &'static str,
    pub delimiter: char,
    /// A line starting with this marks the top of the table.
    pub border_prefix: &'static str,
    /// Section header row inside the table, skipped.
    pub header_label: &'static str,
    /// Interpolated half-hour rows end with this, skipped.
    pub half_hour_suffix: &'static str,
    pub isf_label: &'static str,
    pub carb_ratio_label: &'static str,
    /// `label | original | tuned` at minimum.
    pub min_columns: usize,
}

/// oref0 `autotune_recommendations.log`, as written by `oref0-autotune-recommends-report`.
pub const OREF0_V1: LogGrammar = LogGrammar {
    version: "oref0-v1",
    delimiter: '|',
    border_prefix: "----------",
    header_label: "Basals [U/hr]",
    half_hour_suffix: ":30",
    isf_label: "ISF [mg/dL/U]",
    carb_ratio_label: "Carb Ratio[g/U]",
    min_columns: 3,
};

impl Default for LogGrammar {
    fn default() -> Self {
        OREF0_V1
    }
}

/// One data row of the table, columns trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow<'a> {
    /// 1-based line number in the full log.
    pub line_number: usize,
    pub line: &'a str,
    pub columns: Vec<&'a str>,
}

impl TableRow<'_> {
    pub fn label(&self) -> &str {
        self.columns[0]
    }

    /// Column `index`, or `None` when absent or blank.
    pub fn cell(&self, index: usize) -> Option<&str> {
        self.columns.get(index).copied().filter(|c| !c.is_empty())
    }

    pub fn error(&self, column: usize, reason: ParseFailure) -> ParseError {
        ParseError {
            line_number: self.line_number,
            line: self.line.to_string(),
            column,
            value: self.columns.get(column).copied().unwrap_or_default().to_string(),
            reason,
        }
    }
}

impl LogGrammar {
    pub fn hourly_label(hour: usize) -> String {
        format!("{hour:02}:00")
    }

    /// Extract the data rows of the trailing table, top to bottom.
    ///
    /// Scans backwards from the last line to the border; anything above the
    /// border is ignored. Blank lines, the header row and half-hour rows are
    /// dropped here.
    pub fn table_rows<'a>(&self, text: &'a str) -> Result<Vec<TableRow<'a>>, RunError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut rows = Vec::new();
        let mut found_border = false;

        for (idx, raw) in lines.iter().enumerate().rev() {
            let line = raw.trim();
            if line.starts_with(self.border_prefix) {
                found_border = true;
                break;
            }
            if line.is_empty() || line.starts_with(self.header_label) {
                continue;
            }

            let columns: Vec<&str> = line.split(self.delimiter).map(str::trim).collect();
            if columns[0].ends_with(self.half_hour_suffix) {
                continue;
            }

            let row = TableRow {
                line_number: idx + 1,
                line,
                columns,
            };
            if row.columns.len() < self.min_columns {
                return Err(row.error(row.columns.len(), ParseFailure::TooFewColumns).into());
            }
            rows.push(row);
        }

        if !found_border {
            return Err(RunError::MissingTable {
                version: self.version,
            });
        }

        rows.reverse();
        Ok(rows)
    }
}
