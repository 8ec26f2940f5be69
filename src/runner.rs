use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{SyncConfig, season_filter};
use crate::engine::{CycleReport, GroupScope, PhaseSet, Reconciler};
use crate::remote::{DgSession, RemoteSource};
use crate::store::{DryRunStore, MatchStore, RunEntry, SqliteStore};

#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub season: Option<u32>,
    pub league: Option<String>,
    /// Used verbatim for every group instead of the rendered label.
    pub season_filter: Option<String>,
    pub dry_run: bool,
    pub phases: PhaseSet,
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub season_no: u32,
    pub league: Option<String>,
    pub groups: usize,
    pub dry_run: bool,
    pub report: CycleReport,
    /// Writes a dry run would have made.
    pub planned: Vec<String>,
    pub run_id: Option<i64>,
}

/// One full cycle against the live site: open the store, log in, reconcile.
pub fn run_sync(config: &SyncConfig, request: &SyncRequest) -> Result<SyncOutcome> {
    let db_path = request.db_path.as_ref().unwrap_or(&config.db_path);
    let store = SqliteStore::open(db_path)?.with_link_base(&config.remote.base_url);
    info!(db = %db_path.display(), host = %config.remote.base_url, "store opened");

    let session = DgSession::login(&config.remote)?;
    sync_with(&session, &store, request, config.fetch_parallelism)
}

/// The cycle itself, over any remote source. Season defaults to the newest
/// one in the store.
pub fn sync_with<R: RemoteSource>(
    remote: &R,
    store: &SqliteStore,
    request: &SyncRequest,
    parallelism: usize,
) -> Result<SyncOutcome> {
    let started_at = Utc::now();
    let season_no = match request.season {
        Some(season) => season,
        None => store
            .max_season()?
            .ok_or_else(|| anyhow!("store has no groups; pass --season"))?,
    };
    let league = request
        .league
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    let groups = store
        .groups_for_season(season_no, league)
        .with_context(|| format!("load groups for season {season_no}"))?;
    if groups.is_empty() {
        warn!(season = season_no, league = ?league, "no groups match the selection");
    }
    let scopes = groups
        .iter()
        .map(|g| GroupScope {
            group_id: g.group_id,
            label: format!("{}/{}", g.season_no, g.league),
            season_filter: request
                .season_filter
                .clone()
                .unwrap_or_else(|| season_filter(g.season_no, Some(&g.league))),
        })
        .collect::<Vec<_>>();

    info!(
        season = season_no,
        league = ?league,
        groups = scopes.len(),
        dry_run = request.dry_run,
        "sync cycle starting"
    );

    let (report, planned) = if request.dry_run {
        let dry = DryRunStore::new(store);
        let report = reconcile(remote, &dry, &scopes, request.phases, parallelism);
        (report, dry.planned())
    } else {
        let report = reconcile(remote, store, &scopes, request.phases, parallelism);
        (report, Vec::new())
    };

    let run_id = if request.dry_run {
        None
    } else {
        Some(store.record_run(&RunEntry {
            started_at,
            season_no,
            league,
            dry_run: false,
            report: &report,
        })?)
    };

    Ok(SyncOutcome {
        season_no,
        league: league.map(str::to_string),
        groups: scopes.len(),
        dry_run: request.dry_run,
        report,
        planned,
        run_id,
    })
}

fn reconcile<R: RemoteSource, S: MatchStore>(
    remote: &R,
    store: &S,
    scopes: &[GroupScope],
    phases: PhaseSet,
    parallelism: usize,
) -> CycleReport {
    Reconciler::new(remote, store, parallelism).run_cycle(scopes, phases)
}
