//! Output formatters for tilestore-explain
//!
//! Supports colored text for the terminal and JSON for tooling.

use std::io::{self, Write};

use colored::{ColoredString, Colorize};
use serde::Serialize;
use tilestore::{ElementPlan, RegRef};

use crate::report::{PlanReport, RequirementsReport};

/// Output format options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Colored text output for terminal
    #[default]
    Text,
    /// JSON output for tooling and CI
    Json,
}

fn flag(on: bool) -> ColoredString {
    if on {
        "yes".green()
    } else {
        "no".dimmed()
    }
}

fn reg(r: Option<RegRef>) -> String {
    r.map_or_else(|| "-".to_string(), |r| r.to_string())
}

/// Format a requirements report as colored text
#[must_use]
pub fn format_requirements_text(report: &RequirementsReport) -> String {
    let req = &report.requirement;
    let store = &report.store;
    let mut output = String::new();

    output.push_str(&format!(
        "{} gwvw={} edge={} beta={} atomic={}\n",
        "Store".cyan().bold(),
        store.gwvw,
        store.edge,
        store.beta,
        store.atomic
    ));
    output.push_str(&"═".repeat(60));
    output.push('\n');

    output.push_str(&format!("\n{}\n", "Addressing:".white().bold()));
    output.push_str(&format!("  ├── Strategy: {:?}\n", report.strategy));
    output.push_str(&format!("  ├── Row increment via descriptor: {}\n", flag(report.srd_inc_for_row)));
    output.push_str(&format!(
        "  ├── Mask optimisation: {}\n",
        report
            .sgpr_usage
            .map_or_else(|| "none".to_string(), |u| format!("{u:?}"))
    ));
    output.push_str(&format!("  └── Shared vgprs held: {}\n", report.shared_vgprs));

    let sgpr_status = if req.sgpr_overflow {
        "[OVERFLOW]".red()
    } else {
        "[OK]".green()
    };
    output.push_str(&format!("\n{} {}\n", "Scalar Registers:".white().bold(), sgpr_status));
    output.push_str(&format!("  ├── Mask per element: {}\n", req.num_mask_sgpr_per_element));
    output.push_str(&format!("  ├── Mask per batch: {}\n", req.num_mask_sgpr_per_batch));
    output.push_str(&format!("  ├── Temp per batch: {}\n", req.num_temp_sgpr_per_batch));
    output.push_str(&format!(
        "  └── Elements per batch: {}\n",
        req.num_elements_per_batch_limited_by_sgprs
    ));

    output.push_str(&format!("\n{}\n", "Vector Registers:".white().bold()));
    output.push_str(&format!("  ├── Address per stream: {}\n", req.num_vgprs_per_addr));
    output.push_str(&format!(
        "  ├── Data per vector unit: {}\n",
        req.num_vgprs_per_data_per_vi
    ));
    output.push_str(&format!("  ├── Half-register packing: {}\n", flag(req.half_data_reg_per_vi)));
    output.push_str(&format!("  ├── Accumulator per value: {}\n", req.num_vgpr_per_value));
    output.push_str(&format!(
        "  └── {}: {} (align {})\n",
        "Per element".bold(),
        req.num_vgprs_per_element,
        req.align
    ));

    output
}

fn format_element(index: usize, plan: &ElementPlan) -> String {
    let e = plan.element;
    let row_marker = if plan.new_row { "*".yellow() } else { " ".normal() };
    format!(
        "  {index:>3}{row_marker} ({},{},{},{})  row {:>4} col {:>4}  D {:<6} C {:<6} data {:<6} bias {:<6} mask {:<4} acc {}\n",
        e.d1,
        e.d0,
        e.vc1,
        e.vc0,
        plan.coord1,
        plan.coord0,
        reg(plan.addr.output),
        reg(plan.addr.source),
        reg(plan.data),
        reg(plan.bias_data),
        plan.mask.map_or_else(|| "-".to_string(), |m| m.to_string()),
        plan.accumulator
    )
}

/// Format a plan report as colored text
#[must_use]
pub fn format_plan_text(report: &PlanReport) -> String {
    let mut output = format_requirements_text(&report.requirements);

    output.push_str(&format!(
        "\n{} {} batches of up to {} elements ({} marks a new row, & a borrowed register)\n",
        "Batches:".white().bold(),
        report.batches.len(),
        report.batch_len,
        "*".yellow()
    ));
    for (b, batch) in report.batches.iter().enumerate() {
        output.push_str(&format!("  batch {b}\n"));
        for (i, plan) in batch.elements.iter().enumerate() {
            output.push_str(&format_element(i, plan));
        }
    }

    let pool = &report.pool;
    let pool_status = if pool.leaked > 0 {
        "[LEAK]".red()
    } else if pool.overflowed {
        "[WARN]".yellow()
    } else {
        "[OK]".green()
    };
    output.push_str(&format!("\n{} {}\n", "Register Pool:".white().bold(), pool_status));
    output.push_str(&format!("  ├── Peak size: {} / {}\n", pool.peak, pool.limit));
    output.push_str(&format!("  ├── Checkouts: {}\n", pool.checkouts));
    output.push_str(&format!("  └── Outstanding after teardown: {}\n", pool.leaked));

    output
}

/// Format any report as pretty JSON
pub fn format_json<T: Serialize>(report: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Write a plan report to stdout
pub fn write_plan(report: &PlanReport, format: OutputFormat) -> io::Result<()> {
    let text = match format {
        OutputFormat::Text => format_plan_text(report),
        OutputFormat::Json => format_json(report).map_err(io::Error::other)?,
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}")
}

/// Write a requirements report to stdout
pub fn write_requirements(report: &RequirementsReport, format: OutputFormat) -> io::Result<()> {
    let text = match format {
        OutputFormat::Text => format_requirements_text(report),
        OutputFormat::Json => format_json(report).map_err(io::Error::other)?,
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{text}")
}
