//! Pipeline summary command.
//!
//! # Responsibility
//! - Load a `GET /deals` JSON snapshot and print pipeline statistics.
//! - Verify `dealflow_core` wiring independently from any UI runtime.
//!
//! Usage: `dealflow <deals.json> [--config <config.json>] [--search <text>] [--json]`

use clap::Parser;
use dealflow_core::{aggregate_filtered, decode_deal_list, DealFilter, EngineConfig, PipelineStats};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

/// Prints pipeline statistics for a saved deal list.
#[derive(Debug, Parser)]
#[command(name = "dealflow", version)]
struct Args {
    /// JSON array as returned by `GET /deals`.
    #[arg(value_name = "DEALS_JSON")]
    deals_path: PathBuf,

    /// Engine config file (JSON).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Case-insensitive text filter over title, customer, owner, notes and tags.
    #[arg(long)]
    search: Option<String>,

    /// Emit statistics as JSON instead of a table.
    #[arg(long)]
    json: bool,
}

fn run(args: Args) -> Result<String, String> {
    let config = match args.config.as_deref() {
        Some(path) => EngineConfig::load(path).map_err(|err| err.to_string())?,
        None => EngineConfig::default(),
    };
    config.init_logging().map_err(|err| err.to_string())?;

    let body = std::fs::read_to_string(&args.deals_path)
        .map_err(|err| format!("failed to read `{}`: {err}", args.deals_path.display()))?;
    let deals = decode_deal_list(&body).map_err(|err| err.to_string())?;
    let filter = DealFilter {
        query: args.search,
        ..DealFilter::default()
    };
    let stats = aggregate_filtered(&deals, &filter);
    info!(
        "event=cli_summary module=cli status=ok deals={} matched={}",
        deals.len(),
        stats.overall.total_count
    );

    if args.json {
        serde_json::to_string_pretty(&stats).map_err(|err| err.to_string())
    } else {
        Ok(render_table(&stats))
    }
}

fn render_table(stats: &PipelineStats) -> String {
    let mut out = String::new();
    for row in &stats.stages {
        out.push_str(&format!(
            "{:<14} count={:<4} value={:<12} weighted={}\n",
            row.stage.key(),
            row.count,
            row.total_value,
            row.weighted_value.round_dp(2)
        ));
    }
    let overall = &stats.overall;
    out.push_str(&format!(
        "total count={} value={} won={} conversion={:.1}% win_rate={:.1}% average={}\n",
        overall.total_count,
        overall.total_value,
        overall.won_value,
        overall.conversion_rate * 100.0,
        overall.win_rate * 100.0,
        overall.average_value
    ));
    out
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("dealflow: {err}");
            ExitCode::FAILURE
        }
    }
}
