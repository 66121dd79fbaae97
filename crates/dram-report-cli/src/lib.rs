//! Command surface and report orchestration for the `dram` binary.
//!
//! The pipeline is: workbook adapter → derived views → renderers. Chart
//! images are intermediate artifacts written to a scratch directory that is
//! removed unconditionally, even when PDF assembly fails after their
//! creation.

mod chart;
mod document;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use dram_report_core::{
    build_attendee_report, format_rfc3339, now_utc, AttendeeReport, AttendeeSummary,
    CorrelationRow, DifferenceRow, GroupRanking, HistoryRow, LoadOptions, ReportOptions,
    TastingTable, TrendPoint,
};
use tempfile::TempDir;
use tracing::info;

pub use document::clean_text;

#[derive(Debug, Parser)]
#[command(name = "dram")]
#[command(about = "Whisky club tasting report generator")]
pub struct Cli {
    /// Path to the master workbook.
    #[arg(long, default_value = "Master Data File.xlsx")]
    source: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a personalized PDF report for one attendee.
    Report(ReportArgs),
    /// List the distinct attendee names found in the workbook.
    Attendees(AttendeesArgs),
    /// Print every derived view for one attendee without rendering a PDF.
    Summary(SummaryArgs),
}

/// Cleaning options shared by every subcommand, one flag per field.
#[derive(Debug, Args)]
pub struct LoadArgs {
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    remove_guests: bool,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    remove_us_whiskies: bool,
    #[arg(long, default_value_t = 0.0)]
    remove_thresh: f64,
    #[arg(long, default_value_t = false, action = ArgAction::Set)]
    pointscale: bool,
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    fill_missing_age: bool,
    #[arg(long, default_value_t = 0)]
    min_whiskies_per_region: u32,
}

impl LoadArgs {
    fn to_options(&self) -> LoadOptions {
        LoadOptions {
            remove_guests: self.remove_guests,
            remove_us_whiskies: self.remove_us_whiskies,
            remove_thresh: self.remove_thresh,
            pointscale: self.pointscale,
            fill_missing_age: self.fill_missing_age,
            min_whiskies_per_region: self.min_whiskies_per_region,
        }
    }
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long)]
    attendee: String,
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    #[arg(long, default_value_t = 5)]
    min_distillery_count: usize,
    #[command(flatten)]
    load: LoadArgs,
}

#[derive(Debug, Args)]
pub struct AttendeesArgs {
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    load: LoadArgs,
}

#[derive(Debug, Args)]
pub struct SummaryArgs {
    #[arg(long)]
    attendee: String,
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    load: LoadArgs,
}

/// Runs a parsed command line to completion.
///
/// # Errors
/// Returns an error for load, derivation, or rendering failures; the
/// message carries the stable taxonomy from the core crate.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Report(args) => run_report(&cli.source, &args),
        Command::Attendees(args) => run_attendees(&cli.source, &args),
        Command::Summary(args) => run_summary(&cli.source, &args),
    }
}

fn run_report(source: &Path, args: &ReportArgs) -> Result<()> {
    let report_options = ReportOptions {
        min_distillery_count: args.min_distillery_count,
        ..ReportOptions::default()
    };
    let output = generate_report(
        source,
        &args.attendee,
        &args.load.to_options(),
        &report_options,
        &args.output_dir,
    )?;
    println!("{}", output.display());
    Ok(())
}

fn run_attendees(source: &Path, args: &AttendeesArgs) -> Result<()> {
    let table = load_table(source, &args.load)?;
    let attendees = table.attendees();

    if args.json {
        let payload = AttendeeListJsonPayload {
            contract_version: "attendee_list.v1".to_string(),
            generated_at: format_rfc3339(now_utc())?,
            attendees,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for attendee in attendees {
            println!("{attendee}");
        }
    }
    Ok(())
}

fn run_summary(source: &Path, args: &SummaryArgs) -> Result<()> {
    let table = load_table(source, &args.load)?;
    let options = ReportOptions::default();
    let report = build_attendee_report(&table, &args.attendee, &options)?;

    if args.json {
        let payload = AttendeeReportJsonPayload {
            contract_version: "attendee_report.v1".to_string(),
            generated_at: format_rfc3339(now_utc())?,
            report,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print_summary(&report.summary);
        print_trend(&report.trend);
        print_ranking("distilleries", &report.distilleries);
        print_ranking("regions", &report.regions);
        print_correlations(&report.correlations);
        print_differences(&report.differences);
        print_history(&report.history);
    }
    Ok(())
}

fn load_table(source: &Path, load: &LoadArgs) -> Result<TastingTable> {
    let table = dram_report_xlsx::load_tasting_table(source, &load.to_options())?;
    info!(rows = table.len(), "loaded tasting table");
    Ok(table)
}

/// Full report pipeline for one attendee: load, derive, chart, assemble.
///
/// # Errors
/// Propagates every load and derivation failure; chart or document
/// failures surface as rendering errors. Chart artifacts are removed on
/// every path.
pub fn generate_report(
    source: &Path,
    attendee: &str,
    load_options: &LoadOptions,
    report_options: &ReportOptions,
    output_dir: &Path,
) -> Result<PathBuf> {
    let table = dram_report_xlsx::load_tasting_table(source, load_options)?;
    info!(rows = table.len(), "loaded tasting table");

    let report = build_attendee_report(&table, attendee, report_options)?;

    let scratch = TempDir::new().context("failed to create chart scratch directory")?;
    let trend_chart = scratch.path().join("trend_chart.png");
    let distillery_chart = scratch.path().join("distillery_chart.png");
    let region_chart = scratch.path().join("region_chart.png");

    chart::render_trend_chart(&report.trend, report_options.trend_window, &trend_chart)?;
    chart::render_group_chart(
        &report.distilleries.groups,
        &format!(
            "Distilleries by Average Score (minimum {} scores)",
            report_options.min_distillery_count
        ),
        "Distillery",
        &distillery_chart,
    )?;
    chart::render_group_chart(
        &report.regions.groups,
        "Regions by Average Score (most frequently scored)",
        "Region",
        &region_chart,
    )?;
    info!("rendered chart artifacts");

    let output = output_dir.join(report_file_name(attendee));
    document::write_report(
        &report,
        report_options,
        &trend_chart,
        &distillery_chart,
        &region_chart,
        &output,
    )?;
    info!(path = %output.display(), "report written");
    Ok(output)
}

/// Deterministic output name: lowercased attendee, spaces to underscores.
#[must_use]
pub fn report_file_name(attendee: &str) -> String {
    format!(
        "whisky_report_{}.pdf",
        attendee.to_lowercase().replace(' ', "_")
    )
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct AttendeeListJsonPayload {
    contract_version: String,
    generated_at: String,
    attendees: Vec<String>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct AttendeeReportJsonPayload {
    contract_version: String,
    generated_at: String,
    report: AttendeeReport,
}

fn print_summary(summary: &AttendeeSummary) {
    println!(
        "attendee={} meetings_attended={} whiskies_scored={} avg_score={:.2} total_price={:.2}",
        summary.attendee,
        summary.meetings_attended,
        summary.whiskies_scored,
        summary.avg_score,
        summary.total_price
    );
}

fn print_trend(trend: &[TrendPoint]) {
    println!("scoring trend:");
    println!("{:<8} {:<8} moving_avg", "whisky", "score");
    println!("{}", "-".repeat(30));
    for point in trend {
        println!(
            "{:<8} {:<8.1} {:.2}",
            point.whisky.to_string(),
            point.score,
            point.moving_avg
        );
    }
}

fn print_ranking(label: &str, ranking: &GroupRanking) {
    println!("{label}:");
    println!("{:<32} {:<10} count", "name", "avg_score");
    println!("{}", "-".repeat(52));
    for group in &ranking.groups {
        println!(
            "{:<32} {:<10.2} {}",
            group.name, group.avg_score, group.whisky_count
        );
    }
}

fn print_correlations(correlations: &[CorrelationRow]) {
    println!("correlations:");
    println!("{:<32} {:<12} common_whiskies", "attendee", "correlation");
    println!("{}", "-".repeat(60));
    for row in correlations {
        println!(
            "{:<32} {:<12.3} {}",
            row.attendee, row.correlation, row.common_whiskies
        );
    }
}

fn print_differences(differences: &[DifferenceRow]) {
    println!("largest score differences:");
    println!(
        "{:<8} {:<32} {:<20} {:<8} {:<8} difference",
        "whisky", "other_attendee", "distillery", "yours", "theirs"
    );
    println!("{}", "-".repeat(88));
    for row in differences {
        println!(
            "{:<8} {:<32} {:<20} {:<8.1} {:<8.1} {:.1}",
            row.whisky.to_string(),
            row.other_attendee,
            row.distillery.as_deref().unwrap_or(""),
            row.target_score,
            row.other_score,
            row.absolute_difference
        );
    }
}

fn print_history(history: &[HistoryRow]) {
    println!("scoring history:");
    println!(
        "{:<8} {:<8} {:<36} {:<20} {:<6} {:<16} {:<6} price",
        "meeting", "score", "description", "distillery", "age", "region", "abv%"
    );
    println!("{}", "-".repeat(108));
    for row in history {
        println!(
            "{:<8} {:<8.1} {:<36} {:<20} {:<6} {:<16} {:<6} {}",
            row.meeting,
            row.score,
            row.description,
            row.distillery,
            row.age_display,
            row.region,
            row.abv_percent
                .map_or_else(String::new, |abv| format!("{abv:.0}")),
            row.price.map_or_else(String::new, |price| format!("{price:.0}"))
        );
    }
}
