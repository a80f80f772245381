//! Console rendering for predictions and collection results.
//!
//! Renderers return `String`s so they can be tested; the `print_*` helpers
//! write them to stdout.

use std::fmt::Write;

use anyhow::Result;
use tracing::info;

use crate::ml::predictor::{AvailabilityReport, Prediction};
use crate::stats::CollectionResult;

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

const RULE_WIDTH: usize = 60;

pub fn day_name(dow: u32) -> &'static str {
    DAY_NAMES.get(dow as usize).copied().unwrap_or("?")
}

pub fn render_prediction(p: &Prediction) -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "  Station   : {}", p.station_id);
    let _ = writeln!(out, "  When      : {} {:02}:00", day_name(p.dow), p.hour);
    let _ = writeln!(
        out,
        "  P(>=1 bike): {:.1}%  {} {}",
        p.probability * 100.0,
        p.tier.marker(),
        p.tier
    );
    if !p.known_station {
        let _ = writeln!(
            out,
            "  Note      : station not seen in training, scored as an unknown station"
        );
    }
    out
}

/// Renders the report table. `top` limits the rows shown; the footer always
/// states the total.
pub fn render_report(report: &AvailabilityReport, top: Option<usize>) -> String {
    let heavy = "═".repeat(RULE_WIDTH);
    let light = "─".repeat(RULE_WIDTH);
    let shown = top.unwrap_or(report.rows.len()).min(report.rows.len());

    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{heavy}");
    let _ = writeln!(
        out,
        "  {} ({})",
        report.as_of.format("%Y-%m-%d %H:%M %Z"),
        day_name(report.dow)
    );
    let _ = writeln!(out, "{heavy}");
    let _ = writeln!(
        out,
        "  {:<12} {:>11} {:>14}  {}",
        "Station", "Bikes now", "P(available)", "Tier"
    );
    let _ = writeln!(out, "{light}");
    for row in report.rows.iter().take(shown) {
        let _ = writeln!(
            out,
            "  {:<12} {:>11} {:>13.1}%  {} {}",
            row.station_id,
            row.bikes_now,
            row.probability * 100.0,
            row.tier.marker(),
            row.tier
        );
    }
    let _ = writeln!(out, "{light}");
    let _ = writeln!(out, "  {} of {} stations", shown, report.rows.len());
    let unknown = report.unknown_stations();
    if unknown > 0 {
        let _ = writeln!(out, "  {unknown} stations not seen in training");
    }
    let _ = writeln!(out, "{heavy}");
    out
}

pub fn print_prediction(p: &Prediction) {
    print!("{}", render_prediction(p));
}

pub fn print_report(report: &AvailabilityReport, top: Option<usize>) {
    print!("{}", render_report(report, top));
}

/// Logs a collection result as JSON.
pub fn log_collection(result: &CollectionResult) -> Result<()> {
    info!("{}", serde_json::to_string(result)?);
    Ok(())
}
