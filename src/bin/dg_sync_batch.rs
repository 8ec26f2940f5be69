use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use dg_sync::config::{self, SyncConfig};
use dg_sync::error::SyncError;
use dg_sync::logging;
use dg_sync::runner::{SyncRequest, run_sync};

/// Scheduled reconciliation: repeats full cycles on a fixed interval.
#[derive(Debug, Parser)]
#[command(name = "dg_sync_batch", version)]
struct Cli {
    #[arg(long)]
    season: Option<u32>,
    #[arg(long)]
    league: Option<String>,
    #[arg(long)]
    dry_run: bool,
    #[arg(long, env = "SYNC_DB_PATH")]
    db: Option<PathBuf>,
    #[arg(long)]
    season_filter: Option<String>,
    /// Seconds between cycle starts.
    #[arg(long, default_value_t = 900)]
    interval: u64,
    /// Stop after this many cycles; runs forever when omitted.
    #[arg(long)]
    cycles: Option<u32>,
    #[arg(short, long)]
    verbose: bool,
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
        db_path: cli.db.clone(),
        ..SyncRequest::default()
    };
    let interval = Duration::from_secs(cli.interval.max(1));

    let mut cycle = 0u32;
    loop {
        cycle += 1;
        match run_sync(&config, &request) {
            Ok(outcome) => {
                let r = &outcome.report;
                println!(
                    "cycle {cycle}: season {} attached={} scores={} finished={} deferred={} skipped={} fetches={}",
                    outcome.season_no,
                    r.ids_attached,
                    r.scores_updated,
                    r.matches_finished,
                    r.deferred,
                    r.skipped,
                    r.remote_fetches
                );
            }
            Err(err) => match err.downcast_ref::<SyncError>() {
                Some(sync) if sync.is_fatal() => {
                    error!(cycle, error = %sync, "login failed; retrying next interval");
                }
                _ => error!(cycle, error = %format!("{err:#}"), "cycle failed"),
            },
        }

        if cli.cycles.is_some_and(|max| cycle >= max) {
            info!(cycles = cycle, "batch finished");
            return Ok(());
        }
        thread::sleep(interval);
    }
}
