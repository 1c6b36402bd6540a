//! Result reports sent to the job's recipient.
//!
//! A success report carries the ISF / carb ratio comparison and the hourly
//! basal table. A failure report carries no numbers: the raw diagnostic stays
//! in the ledger.

use std::fmt::Write as _;

use autotune_core::results::{ParsedResult, HOURS_PER_DAY};
use chrono::NaiveDate;
use rust_decimal::Decimal;

pub const REPORT_SUBJECT: &str = "Autotune Results";

const CELL: &str = "border-top: solid 1px #ddd; padding: 8px";

/// A file attached to a report, typically one of the tool's daily logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
    pub failed: bool,
}

/// Job facts a success report needs besides the parsed numbers.
#[derive(Debug, Clone)]
pub struct ReportContext {
    pub endpoint: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub uam_as_basal: bool,
    pub basal_increment: Decimal,
    pub days: u32,
    pub commit: Option<String>,
}

impl Report {
    pub fn success(
        to: impl Into<String>,
        ctx: &ReportContext,
        result: &ParsedResult,
        attachments: Vec<Attachment>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: REPORT_SUBJECT.to_string(),
            html_body: render_success(ctx, result),
            attachments,
            failed: false,
        }
    }

    pub fn failure(to: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            to: to.into(),
            subject: REPORT_SUBJECT.to_string(),
            html_body: render_failure(),
            attachments,
            failed: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn render_failure() -> String {
    wrap(
        "<p>Sorry, an error occurred while running Autotune.</p>\
         <p>Re-running the job sometimes works on the second try. If it keeps \
         failing, check that your Nightscout site is reachable and has treatment \
         data for the requested period.</p>",
    )
}

pub fn render_success(ctx: &ReportContext, result: &ParsedResult) -> String {
    let mut body = String::new();
    let endpoint = escape(&ctx.endpoint);

    let _ = write!(
        body,
        "<h2><a href=\"{endpoint}\">{endpoint}</a></h2>\
         <p>Based on data entered between {} and {}</p>",
        ctx.start_date.format("%Y-%m-%d"),
        ctx.end_date.format("%Y-%m-%d"),
    );
    body.push_str(uam_intro(ctx.uam_as_basal));

    render_isf_cr(&mut body, result);
    render_basals(&mut body, ctx, result);

    if let Some(commit) = &ctx.commit {
        let _ = write!(body, "<p><small>oref0 commit {}</small></p>", escape(commit));
    }
    wrap(&body)
}

fn uam_intro(uam_as_basal: bool) -> &'static str {
    if uam_as_basal {
        "<p>Unannounced meals were ignored and counted towards basal recommendations. \
         If not all carbs were recorded, re-run with the UAM as Basals option disabled.</p>"
    } else {
        "<p>Sudden rises were counted as being triggered by carbs that were not recorded \
         rather than incorrect basals. If all carbs were recorded, re-run with the UAM as \
         Basals option enabled.</p>"
    }
}

fn render_isf_cr(body: &mut String, result: &ParsedResult) {
    let _ = write!(
        body,
        "<table width='50%'><thead><tr>\
         <th style='{CELL}'>Parameter</th>\
         <th style='{CELL}'>Original&nbsp;Value</th>\
         <th style='{CELL}'>Autotune&nbsp;Result</th>\
         </tr></thead><tbody>"
    );
    let rows = [
        (format!("ISF ({}/U)", result.units.label()), result.pump_isf, result.tune_isf),
        ("CR (g/U)".to_string(), result.pump_cr, result.tune_cr),
    ];
    for (i, (label, original, tuned)) in rows.iter().enumerate() {
        let _ = write!(
            body,
            "<tr style='{}'><th style='{CELL}'>{label}</th>\
             <td style='{CELL}'>{original:.1}</td>\
             <td style='{CELL}; {}'>{tuned:.1}</td></tr>",
            stripe(i),
            change_highlight(*original, *tuned),
        );
    }
    body.push_str("</tbody></table>");
}

fn render_basals(body: &mut String, ctx: &ReportContext, result: &ParsedResult) {
    let _ = write!(
        body,
        "<table width='50%' cellspacing='0'><thead><tr>\
         <th width='25%' style='{CELL}'>Time</th>\
         <th width='25%' style='{CELL}'>Original</th>\
         <th width='25%' style='{CELL}'>Autotune&nbsp;Result</th>\
         <th width='25%' style='{CELL}'>Rounded&nbsp;to&nbsp;{}</th>\
         </tr></thead><tbody>",
        ctx.basal_increment.normalize(),
    );
    for hour in 0..HOURS_PER_DAY {
        let (original, tuned, suggested) = (
            result.pump_basals[hour],
            result.tune_basals[hour],
            result.suggested_basals[hour],
        );
        let _ = write!(
            body,
            "<tr style='{}'><th style='{CELL}'>{hour:02}:00</th>\
             <td style='{CELL}'>{original:.3}</td>\
             <td style='{CELL}'>{tuned:.3}</td>\
             <td style='{CELL}; {}'>{suggested:.3} {}</td></tr>",
            stripe(hour),
            change_highlight(original, suggested),
            missed_days_indicator(ctx.days, result.days_missed[hour]),
        );
    }
    let _ = write!(
        body,
        "</tbody><tfoot><tr><th>Daily Total</th>\
         <th style='{CELL}'>{:.3}</th>\
         <th style='{CELL}'>{:.3}</th>\
         <th style='{CELL}'>{:.3}</th>\
         </tr></tfoot></table>",
        result.pump_basal_total(),
        result.tune_basal_total(),
        result.suggested_basal_total(),
    );
}

fn stripe(row: usize) -> &'static str {
    if row % 2 == 0 {
        "background-color: #f9f9f9"
    } else {
        ""
    }
}

/// Background for a changed value: red for large moves, amber for moderate.
pub fn change_highlight(original: Decimal, updated: Decimal) -> &'static str {
    if original.is_zero() {
        return "";
    }
    let Some(percentage) = (updated - original)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|d| d.checked_div(original))
    else {
        return "background-color: rgb(242, 222, 222);";
    };
    if percentage >= Decimal::from(19) || percentage <= Decimal::from(-29) {
        "background-color: rgb(242, 222, 222);"
    } else if percentage >= Decimal::TEN || percentage <= -Decimal::TEN {
        "background-color: rgb(252, 248, 227);"
    } else {
        ""
    }
}

/// One small square per day of history: green where the hour had data, red
/// for each day it was missed.
pub fn missed_days_indicator(days: u32, missed: u32) -> String {
    let with_data = days.saturating_sub(missed);
    (0..days)
        .map(|i| {
            let colour = if i < with_data { "green" } else { "red" };
            format!(
                "<div style=\"display: inline-block; height: 5px; width: 5px; \
                 margin-left: 1px; background-color: {colour}\"></div>"
            )
        })
        .collect()
}

fn wrap(body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{REPORT_SUBJECT}</title></head>\
         <body style=\"font-family: sans-serif\">{body}</body></html>"
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use autotune_core::units::GlucoseUnits;
    use rust_decimal_macros::dec;

    fn sample_result() -> ParsedResult {
        let mut days_missed = [0; HOURS_PER_DAY];
        days_missed[3] = 2;
        ParsedResult {
            pump_isf: dec!(2.5),
            tune_isf: dec!(2.8),
            pump_cr: dec!(10),
            tune_cr: dec!(9.5),
            pump_basals: [dec!(1.0); HOURS_PER_DAY],
            tune_basals: [dec!(1.04); HOURS_PER_DAY],
            suggested_basals: [dec!(1.05); HOURS_PER_DAY],
            days_missed,
            units: GlucoseUnits::Mmol,
        }
    }

    fn context() -> ReportContext {
        ReportContext {
            endpoint: "https://ns.example.com".into(),
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
            uam_as_basal: true,
            basal_increment: dec!(0.05),
            days: 7,
            commit: Some("abc1234".into()),
        }
    }

    #[test]
    fn success_report_has_tables_totals_and_commit() {
        let report = Report::success("user@example.com", &context(), &sample_result(), Vec::new());
        let html = &report.html_body;

        assert!(!report.failed);
        assert_eq!(report.subject, REPORT_SUBJECT);
        assert!(html.contains("ISF (mmol/L/U)"));
        assert!(html.contains("2.8"));
        assert!(html.contains("23:00"));
        assert!(html.contains("Rounded&nbsp;to&nbsp;0.05"));
        assert!(html.contains("Daily Total"));
        assert!(html.contains("25.200"));
        assert!(html.contains("between 2024-03-01 and 2024-03-07"));
        assert!(html.contains("Unannounced meals were ignored"));
        assert!(html.contains("abc1234"));
    }

    #[test]
    fn failure_report_carries_no_numbers() {
        let report = Report::failure("user@example.com", Vec::new());
        assert!(report.failed);
        assert!(report.html_body.contains("an error occurred"));
        assert!(!report.html_body.contains("<table"));
    }

    #[test]
    fn missed_days_are_red_squares() {
        let html = missed_days_indicator(7, 2);
        assert_eq!(html.matches("green").count(), 5);
        assert_eq!(html.matches("red").count(), 2);
        assert_eq!(missed_days_indicator(3, 9).matches("red").count(), 3);
    }

    #[test]
    fn highlight_thresholds() {
        assert_eq!(change_highlight(dec!(10), dec!(10.5)), "");
        assert!(change_highlight(dec!(10), dec!(11)).contains("252"));
        assert!(change_highlight(dec!(10), dec!(12)).contains("242"));
        assert!(change_highlight(dec!(10), dec!(7)).contains("242"));
        assert_eq!(change_highlight(Decimal::ZERO, dec!(1)), "");
        assert!(change_highlight(Decimal::new(1, 28), dec!(1000000)).contains("242"));
    }

    #[test]
    fn endpoint_is_escaped() {
        let mut ctx = context();
        ctx.endpoint = "https://ns.example.com/?a=<b>".into();
        let html = render_success(&ctx, &sample_result());
        assert!(html.contains("&lt;b&gt;"));
        assert!(!html.contains("<b>"));
    }
}
