//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use remediation_lib::preflight::{CheckStatus, PreflightReport};
use remediation_lib::{BatchSummary, OutcomeStatus};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Row for outcome tables
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Warnings")]
    warnings: String,
}

/// Row for preflight tables
#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a batch summary as a table plus totals, or as JSON
pub fn print_summary(summary: &BatchSummary, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(summary);
    }

    if summary.items.is_empty() {
        print_info("Nothing to process");
        return Ok(());
    }

    let rows: Vec<OutcomeRow> = summary
        .items
        .iter()
        .map(|item| OutcomeRow {
            target: item.target.clone(),
            status: color_status(item.status),
            message: item.message.clone(),
            warnings: item.warnings.join("\n"),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()).to_string());

    for item in summary.items.iter().filter(|i| i.detail.is_some()) {
        if let Some(detail) = &item.detail {
            print_info(&format!("{}:", item.target));
            println!("{}", serde_json::to_string_pretty(detail)?);
        }
    }

    println!(
        "\nSucceeded: {}  Action required: {}  Skipped: {}  Failed: {}  Warnings: {}",
        summary.succeeded,
        summary.action_required,
        summary.skipped,
        summary.failed,
        summary.warnings
    );
    if summary.has_failures() {
        print_error(&format!("{} item(s) failed", summary.failed));
    } else {
        print_success("No failures");
    }
    Ok(())
}

/// Print a preflight report, one row per check
pub fn print_preflight(report: &PreflightReport, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(report);
    }

    let rows: Vec<CheckRow> = report
        .instances
        .iter()
        .flat_map(|instance| {
            instance.checks.iter().map(move |check| CheckRow {
                kind: instance.kind.clone(),
                target: instance.target.clone(),
                check: check.name.clone(),
                status: color_check(check.status),
                detail: check.message.clone().unwrap_or_default(),
            })
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()).to_string());

    let failing = report
        .instances
        .iter()
        .filter(|i| i.status == CheckStatus::Fail)
        .count();
    let warning = report
        .instances
        .iter()
        .filter(|i| i.status == CheckStatus::Warn)
        .count();
    if failing > 0 {
        print_error(&format!(
            "{} of {} instance(s) failed preflight",
            failing,
            report.instances.len()
        ));
    } else if warning > 0 {
        print_warning(&format!("{} instance(s) with warnings", warning));
    } else {
        print_success("All preflight checks passed");
    }
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color an outcome status
pub fn color_status(status: OutcomeStatus) -> String {
    let label = status.as_str();
    match status {
        OutcomeStatus::Succeeded => label.green().to_string(),
        OutcomeStatus::ActionRequired => label.yellow().to_string(),
        OutcomeStatus::Skipped => label.dimmed().to_string(),
        OutcomeStatus::Failed => label.red().to_string(),
    }
}

/// Color a check status
pub fn color_check(status: CheckStatus) -> String {
    let label = status.as_str();
    match status {
        CheckStatus::Pass => label.green().to_string(),
        CheckStatus::Warn => label.yellow().to_string(),
        CheckStatus::Fail => label.red().to_string(),
    }
}
