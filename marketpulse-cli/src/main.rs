//! MarketPulse CLI — run, history and export commands.
//!
//! Commands:
//! - `run`: collect, derive, validate, persist, and upsert the history row
//! - `history`: rebuild one ledger row from `latest.csv`
//! - `export`: write `latest.json` / `history.json` from the CSV tables
//!
//! Configuration comes from `$MARKETPULSE_CONFIG` or `./marketpulse.toml`;
//! without either the built-in catalogues are used.
//!
//! Exit codes: `0` success, `2` coverage below threshold, `1` failure.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use marketpulse_runner::{
    export_json, OutputLayout, Pipeline, PipelineConfig, RunOutcome, RunRequest, EXIT_FAILURE,
    EXIT_OK,
};

#[derive(Parser)]
#[command(
    name = "marketpulse",
    about = "MarketPulse — daily market indicator aggregation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once for a schedule phase.
    Run {
        /// Schedule slot identifier (e.g. 0730, 1600).
        #[arg(long)]
        phase: String,

        /// IANA timezone name overriding the configured one.
        #[arg(long)]
        tz: Option<String>,

        /// Compare against the persisted table for the run date and flag revisions.
        #[arg(long, default_value_t = false)]
        reconcile: bool,
    },
    /// Rebuild the history row for a date from latest.csv.
    History {
        /// Target date (YYYY-MM-DD). Defaults to the latest date in latest.csv.
        #[arg(long)]
        date: Option<String>,
    },
    /// Write latest.json and history.json next to the CSV tables.
    Export,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(usage_exit_code(&e));
        }
    };
    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

/// `--help` and `--version` succeed; any other usage error is a failure,
/// never the low-coverage code clap would otherwise use.
fn usage_exit_code(err: &clap::Error) -> i32 {
    if err.exit_code() == 0 {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

fn dispatch(command: Commands) -> Result<i32> {
    let config = PipelineConfig::discover().context("failed to load configuration")?;
    match command {
        Commands::Run {
            phase,
            tz,
            reconcile,
        } => run_cmd(config, phase, tz, reconcile),
        Commands::History { date } => history_cmd(config, date),
        Commands::Export => export_cmd(&config),
    }
}

fn run_cmd(config: PipelineConfig, phase: String, tz: Option<String>, reconcile: bool) -> Result<i32> {
    let mut request = RunRequest::new(phase).with_reconcile(reconcile);
    if let Some(tz) = tz {
        request = request.with_timezone(tz);
    }
    let outcome = Pipeline::from_config(config)
        .run(&request)
        .context("pipeline run failed")?;
    print_summary(&outcome);
    Ok(outcome.exit_code)
}

fn history_cmd(config: PipelineConfig, date: Option<String>) -> Result<i32> {
    let date = date
        .as_deref()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .transpose()
        .context("--date must be YYYY-MM-DD")?;
    let outcome = Pipeline::from_config(config)
        .update_history(date)
        .context("history update failed")?;
    info!(
        date = %outcome.date,
        outcome = ?outcome.outcome,
        rows = outcome.rows,
        missing = outcome.missing,
        report = %outcome.report_path.display(),
        "history row written"
    );
    Ok(EXIT_OK)
}

fn export_cmd(config: &PipelineConfig) -> Result<i32> {
    let layout = OutputLayout::new(&config.paths.out_dir);
    let summary = export_json(&layout)?;
    if summary.latest_rows.is_none() && summary.history_rows.is_none() {
        warn!(dir = %layout.root().display(), "no CSV tables found to export");
    }
    Ok(EXIT_OK)
}

fn print_summary(outcome: &RunOutcome) {
    println!();
    println!("=== Run Summary ===");
    println!("Timestamp:      {}", outcome.timestamp.format("%Y-%m-%d %H:%M"));
    println!("Records:        {}", outcome.records);
    println!("Rejected:       {}", outcome.rejected);
    println!(
        "Coverage:       {:.1}% (threshold {:.1}%)",
        outcome.coverage.ratio * 100.0,
        outcome.coverage.threshold * 100.0
    );
    if let Some(r) = outcome.reconcile {
        println!("Reconciled:     {} compared, {} revised", r.compared, r.revised);
    }
    println!("Latest rows:    {}", outcome.persist.latest_rows);
    println!("Content hash:   {}", outcome.persist.content_hash);
    println!(
        "History:        {} ({:?}, {} rows)",
        outcome.history.date, outcome.history.outcome, outcome.history.rows
    );
    for name in &outcome.failed_collectors {
        println!("WARNING: collector '{name}' failed");
    }
    if outcome.coverage.is_below_threshold() {
        println!("WARNING: coverage below threshold; missing:");
        for key in &outcome.coverage.missing {
            println!("  {key}");
        }
    }
    println!();
}
