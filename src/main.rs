use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use dg_sync::config::{self, SyncConfig};
use dg_sync::engine::PhaseSet;
use dg_sync::logging;
use dg_sync::runner::{SyncOutcome, SyncRequest, run_sync};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Phase {
    Discovery,
    Scores,
    Results,
}

/// Reconcile the league store with DailyGammon once.
#[derive(Debug, Parser)]
#[command(name = "dg_sync", version)]
struct Cli {
    /// Season number; defaults to the newest season in the store.
    #[arg(long)]
    season: Option<u32>,
    /// Restrict to one league, e.g. 2A.
    #[arg(long)]
    league: Option<String>,
    /// Print intended writes without applying them.
    #[arg(long)]
    dry_run: bool,
    #[arg(long, env = "SYNC_DB_PATH")]
    db: Option<PathBuf>,
    /// Override the tournament label matched on player pages.
    #[arg(long)]
    season_filter: Option<String>,
    /// Run only the given phases (repeatable).
    #[arg(long = "phase", value_enum)]
    phases: Vec<Phase>,
    /// Print the cycle report as JSON.
    #[arg(long)]
    json: bool,
    #[arg(short, long)]
    verbose: bool,
}

fn phase_set(phases: &[Phase]) -> PhaseSet {
    if phases.is_empty() {
        return PhaseSet::all();
    }
    PhaseSet {
        discovery: phases.contains(&Phase::Discovery),
        scores: phases.contains(&Phase::Scores),
        results: phases.contains(&Phase::Results),
    }
}

fn main() -> Result<()> {
    config::load_dotenv();
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = SyncConfig::from_env()?;
    let request = SyncRequest {
        season: cli.season,
        league: cli.league.clone(),
        season_filter: cli.season_filter.clone(),
        dry_run: cli.dry_run,
        phases: phase_set(&cli.phases),
        db_path: cli.db.clone(),
    };
    let outcome = run_sync(&config, &request)?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_summary(&outcome);
    }
    Ok(())
}

fn print_summary(outcome: &SyncOutcome) {
    let report = &outcome.report;
    println!(
        "{}Sync complete: season {} league {} ({} groups)",
        if outcome.dry_run { "[DRY-RUN] " } else { "" },
        outcome.season_no,
        outcome.league.as_deref().unwrap_or("all"),
        outcome.groups
    );
    println!(
        "Remote ids attached: {} (not found: {})",
        report.ids_attached, report.ids_not_found
    );
    println!("Orientations resolved: {}", report.orientations_resolved);
    println!(
        "Scores updated: {} (unchanged: {})",
        report.scores_updated, report.scores_unchanged
    );
    println!(
        "Matches finished: {} (still open: {})",
        report.matches_finished, report.still_open
    );
    println!(
        "Deferred: {}  Skipped: {}  Remote fetches: {}",
        report.deferred, report.skipped, report.remote_fetches
    );
    if let Some(run_id) = outcome.run_id {
        println!("Run recorded as #{run_id}");
    }
    if !report.issues.is_empty() {
        println!("Issues: {}", report.issues.len());
        for issue in report.issues.iter().take(20) {
            println!("   - {issue}");
        }
    }
}
