//! Reconciliation cycle: attach remote ids, follow intermediate scores,
//! commit final results. One `Reconciler` serves exactly one cycle, so its
//! fetch caches and terminal set never outlive the run that filled them.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{StoreError, SyncError};
use crate::extract::{extract_latest_score, extract_winner};
use crate::fetch_cache::FetchCache;
use crate::model::{DiscoveredFixture, ExportWinner, MATCH_LENGTH, MatchRecord, PageKind, Side};
use crate::orientation::{map_scores, orientation_from_opponent, resolve_switched, side_for_label};
use crate::remote::RemoteSource;
use crate::store::MatchStore;

/// One group of the tournament together with the season label its
/// fixtures carry on the remote site.
#[derive(Debug, Clone)]
pub struct GroupScope {
    pub group_id: i64,
    pub label: String,
    pub season_filter: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseSet {
    pub discovery: bool,
    pub scores: bool,
    pub results: bool,
}

impl PhaseSet {
    pub fn all() -> Self {
        Self {
            discovery: true,
            scores: true,
            results: true,
        }
    }
}

impl Default for PhaseSet {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub records_examined: usize,
    pub ids_attached: usize,
    pub ids_not_found: usize,
    pub orientations_resolved: usize,
    pub scores_updated: usize,
    pub scores_unchanged: usize,
    pub matches_finished: usize,
    pub still_open: usize,
    /// Fetch or parse misses, retried next cycle.
    pub deferred: usize,
    pub skipped: usize,
    pub remote_fetches: usize,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Attached,
    NotFound,
    ScoresWritten { finished: bool },
    Unchanged,
    Finished,
    StillOpen,
}

pub struct Reconciler<'a, R, S> {
    remote: &'a R,
    store: &'a S,
    pages: FetchCache<(PageKind, u64), Arc<str>>,
    feeds: FetchCache<(u64, String), Vec<DiscoveredFixture>>,
    /// Records that reached their final state during this run.
    terminal: Mutex<HashSet<i64>>,
    resolved: AtomicUsize,
    pool: Option<rayon::ThreadPool>,
}

impl<'a, R: RemoteSource, S: MatchStore> Reconciler<'a, R, S> {
    pub fn new(remote: &'a R, store: &'a S, parallelism: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .build()
            .ok();
        Self {
            remote,
            store,
            pages: FetchCache::new(),
            feeds: FetchCache::new(),
            terminal: Mutex::new(HashSet::new()),
            resolved: AtomicUsize::new(0),
            pool,
        }
    }

    pub fn run_cycle(self, scopes: &[GroupScope], phases: PhaseSet) -> CycleReport {
        let mut report = CycleReport::default();
        if phases.discovery {
            self.discover(scopes, &mut report);
        }
        if phases.scores {
            self.propagate_scores(scopes, &mut report);
        }
        if phases.results {
            self.commit_results(scopes, &mut report);
        }
        report.orientations_resolved = self.resolved.load(Ordering::Relaxed);
        report.remote_fetches = self.pages.fetch_count() + self.feeds.fetch_count();

        info!(
            attached = report.ids_attached,
            scores = report.scores_updated,
            finished = report.matches_finished,
            deferred = report.deferred,
            skipped = report.skipped,
            fetches = report.remote_fetches,
            "cycle complete"
        );
        report
    }

    // Phase A

    fn discover(&self, scopes: &[GroupScope], report: &mut CycleReport) {
        let mut claimed = match self.store.attached_remote_ids() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = %err, "cannot load attached remote ids; discovery skipped");
                report.issues.push(format!("discovery skipped: {err}"));
                return;
            }
        };
        let pending = self.collect(scopes, report, |group| {
            self.store.records_missing_remote_id(group)
        });
        if pending.is_empty() {
            return;
        }
        info!(
            records = pending.len(),
            known_ids = claimed.len(),
            "phase A: discovering remote match ids"
        );

        // Side A's feed is the primary source; warm those in parallel.
        let mut primary = pending
            .iter()
            .filter_map(|(scope, r)| Some((r.side_a.remote_id?, scope.season_filter.as_str())))
            .collect::<Vec<_>>();
        primary.sort_unstable();
        primary.dedup();
        self.with_fetch_pool(|| {
            primary.par_iter().for_each(|(player, filter)| {
                self.feed(*player, filter);
            })
        });

        // Attach sequentially so first-match-wins follows record order.
        for (scope, record) in &pending {
            report.records_examined += 1;
            let result = self.discover_record(record, &scope.season_filter, &mut claimed);
            fold(report, record, result);
        }
    }

    fn discover_record(
        &self,
        record: &MatchRecord,
        season_filter: &str,
        claimed: &mut HashSet<u64>,
    ) -> Result<Outcome, SyncError> {
        for owner in [&record.side_a, &record.side_b] {
            let Some(player) = owner.remote_id else {
                continue;
            };
            for fixture in self.feed(player, season_filter) {
                let remote_id = fixture.remote_match_id;
                if claimed.contains(&remote_id) {
                    debug!(record = record.id, remote_id, "remote id already attached elsewhere");
                    continue;
                }
                let Some(switched) = orientation_from_opponent(
                    &fixture.remote_opponent_name,
                    &record.side_a.name,
                    &record.side_b.name,
                ) else {
                    continue;
                };
                match self.store.attach_remote_id(record.id, remote_id, switched) {
                    Ok(()) => {
                        claimed.insert(remote_id);
                        info!(
                            record = record.id,
                            remote_id,
                            switched,
                            side_a = %record.side_a.name,
                            side_b = %record.side_b.name,
                            "attached remote match id"
                        );
                        return Ok(Outcome::Attached);
                    }
                    Err(StoreError::Conflict { .. }) => {
                        claimed.insert(remote_id);
                        debug!(record = record.id, remote_id, "attach conflict, trying next candidate");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        debug!(
            record = record.id,
            side_a = %record.side_a.name,
            side_b = %record.side_b.name,
            season = season_filter,
            "no remote match found"
        );
        Ok(Outcome::NotFound)
    }

    // Phase B

    fn propagate_scores(&self, scopes: &[GroupScope], report: &mut CycleReport) {
        let open = self.collect(scopes, report, |group| self.store.open_records(group));
        if open.is_empty() {
            return;
        }
        info!(records = open.len(), "phase B: propagating intermediate scores");
        let results = self.with_fetch_pool(|| {
            open.par_iter()
                .map(|(_, record)| self.propagate_record(record))
                .collect::<Vec<_>>()
        });
        for ((_, record), result) in open.iter().zip(results) {
            report.records_examined += 1;
            fold(report, record, result);
        }
    }

    fn propagate_record(&self, record: &MatchRecord) -> Result<Outcome, SyncError> {
        let Some(remote_id) = record.remote_match_id else {
            return Ok(Outcome::Unchanged);
        };

        // The store may already hold the final score while the flag lags.
        if let Some(side) = record.terminal_side() {
            self.store.mark_finished(record.id, side)?;
            self.mark_terminal(record.id);
            info!(record = record.id, remote_id, "stored score is final, marked finished");
            return Ok(Outcome::Finished);
        }

        let page = self.page(PageKind::MatchList, remote_id)?;
        let names = [record.side_a.name.as_str(), record.side_b.name.as_str()];
        let obs = extract_latest_score(&page, &names).ok_or(SyncError::ParseMiss {
            remote_id,
            what: "score line",
        })?;

        let switched = match record.switched {
            Some(switched) => switched,
            None => {
                let orientation = resolve_switched(&record.side_a.name, &record.side_b.name, &obs);
                let Some(switched) = orientation.switched() else {
                    return Err(SyncError::OrientationAmbiguous {
                        remote_id,
                        left: obs.left_name,
                        right: obs.right_name,
                        side_a: record.side_a.name.clone(),
                        side_b: record.side_b.name.clone(),
                    });
                };
                self.store.record_orientation(record.id, switched)?;
                self.resolved.fetch_add(1, Ordering::Relaxed);
                info!(
                    record = record.id,
                    remote_id,
                    switched,
                    left = %obs.left_name,
                    right = %obs.right_name,
                    "orientation resolved from score page"
                );
                switched
            }
        };

        let (side_a, side_b) = map_scores(&obs, switched);
        if side_a > MATCH_LENGTH
            || side_b > MATCH_LENGTH
            || (side_a == MATCH_LENGTH && side_b == MATCH_LENGTH)
        {
            return Err(SyncError::ParseMiss {
                remote_id,
                what: "plausible score",
            });
        }
        if record.left_score == Some(side_a) && record.right_score == Some(side_b) {
            return Ok(Outcome::Unchanged);
        }
        let (stored_a, stored_b) = (
            record.left_score.unwrap_or(0),
            record.right_score.unwrap_or(0),
        );
        if side_a < stored_a || side_b < stored_b {
            return Err(SyncError::ScoreRegression {
                remote_id,
                stored_a,
                stored_b,
                observed_a: side_a,
                observed_b: side_b,
            });
        }

        self.store.update_scores(record.id, side_a, side_b)?;
        let finished = side_a == MATCH_LENGTH || side_b == MATCH_LENGTH;
        if finished {
            self.mark_terminal(record.id);
        }
        info!(
            record = record.id,
            remote_id,
            side_a = %record.side_a.name,
            side_b = %record.side_b.name,
            score = %format!("{side_a}-{side_b}"),
            "score updated"
        );
        Ok(Outcome::ScoresWritten { finished })
    }

    // Phase C

    fn commit_results(&self, scopes: &[GroupScope], report: &mut CycleReport) {
        let terminal = self
            .terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let open = self
            .collect(scopes, report, |group| self.store.open_records(group))
            .into_iter()
            .filter(|(_, record)| !terminal.contains(&record.id))
            .collect::<Vec<_>>();
        if open.is_empty() {
            return;
        }
        info!(records = open.len(), "phase C: committing final results");
        let results = self.with_fetch_pool(|| {
            open.par_iter()
                .map(|(_, record)| self.commit_record(record))
                .collect::<Vec<_>>()
        });
        for ((_, record), result) in open.iter().zip(results) {
            report.records_examined += 1;
            fold(report, record, result);
        }
    }

    fn commit_record(&self, record: &MatchRecord) -> Result<Outcome, SyncError> {
        let Some(remote_id) = record.remote_match_id else {
            return Ok(Outcome::StillOpen);
        };
        let export = self.page(PageKind::Export, remote_id)?;
        let Some(winner) = extract_winner(&export) else {
            return Ok(Outcome::StillOpen);
        };
        let side = winning_side(record, &winner)?;
        self.store.mark_finished(record.id, side)?;
        self.mark_terminal(record.id);
        info!(
            record = record.id,
            remote_id,
            winner = %record.participant(side).name,
            "final result committed"
        );
        Ok(Outcome::Finished)
    }

    // Shared plumbing

    fn collect<'s>(
        &self,
        scopes: &'s [GroupScope],
        report: &mut CycleReport,
        load: impl Fn(i64) -> Result<Vec<MatchRecord>, StoreError>,
    ) -> Vec<(&'s GroupScope, MatchRecord)> {
        let mut out = Vec::new();
        for scope in scopes {
            match load(scope.group_id) {
                Ok(records) => out.extend(records.into_iter().map(|r| (scope, r))),
                Err(err) => {
                    warn!(group = %scope.label, error = %err, "cannot load records");
                    report.issues.push(format!("group {}: {err}", scope.label));
                }
            }
        }
        out
    }

    fn page(&self, kind: PageKind, remote_id: u64) -> Result<Arc<str>, SyncError> {
        self.pages
            .get_or_fetch((kind, remote_id), || {
                let body = match kind {
                    PageKind::MatchList => self.remote.fetch_match_page(remote_id),
                    PageKind::Export => self.remote.fetch_match_export(remote_id),
                };
                body.map(Arc::from)
            })
            .ok_or(SyncError::FetchUnavailable { remote_id, kind })
    }

    fn feed(&self, player: u64, season_filter: &str) -> Vec<DiscoveredFixture> {
        self.feeds
            .get_or_fetch((player, season_filter.to_string()), || {
                Some(self.remote.list_player_fixtures(player, season_filter))
            })
            .unwrap_or_default()
    }

    fn mark_terminal(&self, record_id: i64) {
        self.terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record_id);
    }

    fn with_fetch_pool<T: Send>(&self, action: impl FnOnce() -> T + Send) -> T {
        match self.pool.as_ref() {
            Some(pool) => pool.install(action),
            None => action(),
        }
    }
}

/// Decides which record side won, given the export's verdict.
///
/// The export's header name is trusted over the column position. When both
/// are available and disagree the record is left alone.
pub fn winning_side(record: &MatchRecord, winner: &ExportWinner) -> Result<Side, SyncError> {
    let remote_id = record.remote_match_id.unwrap_or_default();
    let positional = record.switched.map(|s| winner.side.record_side(s));

    let Some(name) = winner.name.as_deref() else {
        return positional.ok_or_else(|| SyncError::OrientationAmbiguous {
            remote_id,
            left: "first column".to_string(),
            right: "second column".to_string(),
            side_a: record.side_a.name.clone(),
            side_b: record.side_b.name.clone(),
        });
    };
    let named = side_for_label(name, &record.side_a.name, &record.side_b.name).ok_or_else(|| {
        SyncError::WinnerUnmatched {
            remote_id,
            winner: name.to_string(),
        }
    })?;
    if positional.is_some_and(|p| p != named) {
        return Err(SyncError::WinnerDisputed {
            remote_id,
            winner: name.to_string(),
        });
    }
    Ok(named)
}

fn fold(report: &mut CycleReport, record: &MatchRecord, result: Result<Outcome, SyncError>) {
    match result {
        Ok(Outcome::Attached) => report.ids_attached += 1,
        Ok(Outcome::NotFound) => report.ids_not_found += 1,
        Ok(Outcome::ScoresWritten { finished }) => {
            report.scores_updated += 1;
            if finished {
                report.matches_finished += 1;
            }
        }
        Ok(Outcome::Unchanged) => report.scores_unchanged += 1,
        Ok(Outcome::Finished) => report.matches_finished += 1,
        Ok(Outcome::StillOpen) => report.still_open += 1,
        Err(err) if err.is_deferral() => {
            report.deferred += 1;
            debug!(
                record = record.id,
                remote_id = ?record.remote_match_id,
                error = %err,
                "deferred to next cycle"
            );
        }
        Err(SyncError::Store(StoreError::AlreadyFinished(_))) => {
            report.skipped += 1;
            debug!(record = record.id, "already finished by another writer");
        }
        Err(err) => {
            report.skipped += 1;
            warn!(
                record = record.id,
                remote_id = ?record.remote_match_id,
                side_a = %record.side_a.name,
                side_b = %record.side_b.name,
                error = %err,
                "record skipped"
            );
            report
                .issues
                .push(format!("record {} ({}): {err}", record.id, record.describe()));
        }
    }
}
