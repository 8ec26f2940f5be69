use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};

use crate::config::DEFAULT_BASE_URL;
use crate::engine::CycleReport;
use crate::error::StoreError;
use crate::model::{Group, MATCH_LENGTH, MatchRecord, Participant, Side};
use crate::remote::match_link;

/// Narrow access to the authoritative match records. Every write is a
/// single transaction that re-checks its precondition against current
/// state, so concurrent writers cannot regress a record.
pub trait MatchStore: Sync {
    fn records_missing_remote_id(&self, group_id: i64) -> Result<Vec<MatchRecord>, StoreError>;

    /// Records with a remote id that are not finished yet.
    fn open_records(&self, group_id: i64) -> Result<Vec<MatchRecord>, StoreError>;

    fn record(&self, record_id: i64) -> Result<Option<MatchRecord>, StoreError>;

    fn attached_remote_ids(&self) -> Result<HashSet<u64>, StoreError>;

    fn attach_remote_id(
        &self,
        record_id: i64,
        remote_id: u64,
        switched: bool,
    ) -> Result<(), StoreError>;

    /// Persists an orientation resolved after the fact. Only fills an unset flag.
    fn record_orientation(&self, record_id: i64, switched: bool) -> Result<(), StoreError>;

    fn update_scores(&self, record_id: i64, side_a: u8, side_b: u8) -> Result<(), StoreError>;

    fn mark_finished(&self, record_id: i64, winner: Side) -> Result<(), StoreError>;
}

const RECORD_SELECT: &str = r#"
    SELECT
        m.id, m.group_id,
        m.player_id, p1.player_name, p1.dg_player_id,
        m.opponent_id, p2.player_name, p2.dg_player_id,
        m.match_id, m.left_score, m.right_score, m.switched_flag, m.finished
    FROM matches m
    JOIN players p1 ON m.player_id = p1.player_id
    JOIN players p2 ON m.opponent_id = p2.player_id
"#;

/// Seed data for one fixture, as written by the import tooling.
#[derive(Debug, Clone, Default)]
pub struct NewMatch {
    pub group_id: i64,
    pub player_id: i64,
    pub opponent_id: i64,
    pub remote_match_id: Option<u64>,
    pub switched: Option<bool>,
    pub left_score: Option<u8>,
    pub right_score: Option<u8>,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct RunEntry<'a> {
    pub started_at: DateTime<Utc>,
    pub season_no: u32,
    pub league: Option<&'a str>,
    pub dry_run: bool,
    pub report: &'a CycleReport,
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    link_base: String,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(10))
            .context("set sqlite busy timeout")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            link_base: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Host used when rendering the stored match link.
    pub fn with_link_base(mut self, base_url: &str) -> Self {
        self.link_base = base_url.trim_end_matches('/').to_string();
        self
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write<T>(
        &self,
        action: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = action(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn query_records(&self, filter: &str, group_id: i64) -> Result<Vec<MatchRecord>, StoreError> {
        let conn = self.lock();
        let sql = format!("{RECORD_SELECT} WHERE m.group_id = ?1 AND {filter} ORDER BY m.id");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![group_id], record_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn groups_for_season(&self, season_no: u32, league: Option<&str>) -> Result<Vec<Group>> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT group_id, season_no, league FROM groups
                 WHERE season_no = ?1 AND (?2 IS NULL OR lower(league) = lower(?2))
                 ORDER BY league, group_id",
            )
            .context("prepare groups query")?;
        let rows = stmt
            .query_map(params![season_no, league.map(str::trim)], |row| {
                Ok(Group {
                    group_id: row.get(0)?,
                    season_no: row.get(1)?,
                    league: row.get(2)?,
                })
            })
            .context("query groups")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode group row")?);
        }
        Ok(out)
    }

    pub fn max_season(&self) -> Result<Option<u32>> {
        self.lock()
            .query_row("SELECT MAX(season_no) FROM groups", [], |row| {
                row.get::<_, Option<u32>>(0)
            })
            .context("query max season")
    }

    pub fn insert_player(&self, name: &str, remote_id: Option<u64>) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO players (player_name, dg_player_id) VALUES (?1, ?2)",
            params![name.trim(), remote_id.map(|id| id as i64)],
        )
        .with_context(|| format!("insert player {name}"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_group(&self, season_no: u32, league: &str) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO groups (season_no, league) VALUES (?1, ?2)",
            params![season_no, league.trim()],
        )
        .with_context(|| format!("insert group {season_no}/{league}"))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn insert_match(&self, m: &NewMatch) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO matches (
                group_id, player_id, opponent_id, match_id, match_link,
                left_score, right_score, switched_flag, finished, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                m.group_id,
                m.player_id,
                m.opponent_id,
                m.remote_match_id.map(|id| id as i64),
                m.remote_match_id.map(|id| match_link(&self.link_base, id)),
                m.left_score,
                m.right_score,
                m.switched,
                m.finished,
                Utc::now().to_rfc3339(),
            ],
        )
        .context("insert match")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn record_run(&self, run: &RunEntry<'_>) -> Result<i64> {
        let report = run.report;
        let issues_json = serde_json::to_string(&report.issues).unwrap_or_else(|_| "[]".to_string());
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_runs (
                started_at, finished_at, season_no, league, dry_run,
                ids_attached, orientations_resolved, scores_updated, matches_finished,
                deferred, skipped, remote_fetches, issues_json
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                run.started_at.to_rfc3339(),
                Utc::now().to_rfc3339(),
                run.season_no,
                run.league,
                run.dry_run,
                report.ids_attached as i64,
                report.orientations_resolved as i64,
                report.scores_updated as i64,
                report.matches_finished as i64,
                report.deferred as i64,
                report.skipped as i64,
                report.remote_fetches as i64,
                issues_json,
            ],
        )
        .context("insert sync run")?;
        Ok(conn.last_insert_rowid())
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS players (
            player_id INTEGER PRIMARY KEY AUTOINCREMENT,
            player_name TEXT NOT NULL UNIQUE,
            dg_player_id INTEGER NULL
        );
        CREATE TABLE IF NOT EXISTS groups (
            group_id INTEGER PRIMARY KEY AUTOINCREMENT,
            season_no INTEGER NOT NULL,
            league TEXT NOT NULL,
            UNIQUE (season_no, league)
        );
        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            group_id INTEGER NOT NULL REFERENCES groups(group_id),
            player_id INTEGER NOT NULL REFERENCES players(player_id),
            opponent_id INTEGER NOT NULL REFERENCES players(player_id),
            match_id INTEGER NULL UNIQUE,
            match_link TEXT NULL,
            left_score INTEGER NULL CHECK (left_score BETWEEN 0 AND 11),
            right_score INTEGER NULL CHECK (right_score BETWEEN 0 AND 11),
            switched_flag INTEGER NULL,
            finished INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_group ON matches(group_id);

        CREATE TABLE IF NOT EXISTS sync_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            season_no INTEGER NOT NULL,
            league TEXT NULL,
            dry_run INTEGER NOT NULL,
            ids_attached INTEGER NOT NULL,
            orientations_resolved INTEGER NOT NULL,
            scores_updated INTEGER NOT NULL,
            matches_finished INTEGER NOT NULL,
            deferred INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            remote_fetches INTEGER NOT NULL,
            issues_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MatchRecord> {
    let to_u64 = |v: Option<i64>| v.and_then(|v| u64::try_from(v).ok());
    let to_score = |v: Option<i64>| v.and_then(|v| u8::try_from(v).ok());
    Ok(MatchRecord {
        id: row.get(0)?,
        group_id: row.get(1)?,
        side_a: Participant {
            player_id: row.get(2)?,
            name: row.get(3)?,
            remote_id: to_u64(row.get(4)?),
        },
        side_b: Participant {
            player_id: row.get(5)?,
            name: row.get(6)?,
            remote_id: to_u64(row.get(7)?),
        },
        remote_match_id: to_u64(row.get(8)?),
        left_score: to_score(row.get(9)?),
        right_score: to_score(row.get(10)?),
        switched: row.get::<_, Option<bool>>(11)?,
        finished: row.get::<_, bool>(12)?,
    })
}

fn load_record(conn: &Connection, record_id: i64) -> Result<MatchRecord, StoreError> {
    conn.query_row(
        &format!("{RECORD_SELECT} WHERE m.id = ?1"),
        params![record_id],
        record_from_row,
    )
    .optional()?
    .ok_or(StoreError::NotFound(record_id))
}

fn check_attach(
    record: &MatchRecord,
    remote_id: u64,
    held_elsewhere: bool,
) -> Result<(), StoreError> {
    if record.remote_match_id.is_some() || held_elsewhere {
        return Err(StoreError::Conflict {
            record_id: record.id,
            remote_id,
        });
    }
    Ok(())
}

/// `Ok(true)` when the flag still needs writing.
fn check_orientation(record: &MatchRecord, switched: bool) -> Result<bool, StoreError> {
    match record.switched {
        None => Ok(true),
        Some(current) if current == switched => Ok(false),
        Some(_) => Err(StoreError::OrientationSet(record.id)),
    }
}

fn check_scores(record: &MatchRecord, side_a: u8, side_b: u8) -> Result<(), StoreError> {
    if record.is_terminal() {
        return Err(StoreError::AlreadyFinished(record.id));
    }
    if side_a > MATCH_LENGTH || side_b > MATCH_LENGTH || (side_a == MATCH_LENGTH && side_b == MATCH_LENGTH)
    {
        return Err(StoreError::InvalidScore {
            record_id: record.id,
            side_a,
            side_b,
        });
    }
    Ok(())
}

fn check_winner(record: &MatchRecord, winner: Side) -> Result<(), StoreError> {
    if record.finished {
        return Err(StoreError::AlreadyFinished(record.id));
    }
    // The other side already holds the winning score.
    if record.score(winner.other()) == Some(MATCH_LENGTH) {
        return Err(StoreError::InvalidScore {
            record_id: record.id,
            side_a: MATCH_LENGTH,
            side_b: MATCH_LENGTH,
        });
    }
    Ok(())
}

impl MatchStore for SqliteStore {
    fn records_missing_remote_id(&self, group_id: i64) -> Result<Vec<MatchRecord>, StoreError> {
        self.query_records("m.match_id IS NULL", group_id)
    }

    fn open_records(&self, group_id: i64) -> Result<Vec<MatchRecord>, StoreError> {
        self.query_records("m.match_id IS NOT NULL AND m.finished = 0", group_id)
    }

    fn record(&self, record_id: i64) -> Result<Option<MatchRecord>, StoreError> {
        match load_record(&self.lock(), record_id) {
            Ok(record) => Ok(Some(record)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn attached_remote_ids(&self) -> Result<HashSet<u64>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT match_id FROM matches WHERE match_id IS NOT NULL")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut out = HashSet::new();
        for row in rows {
            if let Ok(id) = u64::try_from(row?) {
                out.insert(id);
            }
        }
        Ok(out)
    }

    fn attach_remote_id(
        &self,
        record_id: i64,
        remote_id: u64,
        switched: bool,
    ) -> Result<(), StoreError> {
        self.write(|tx| {
            let record = load_record(tx, record_id)?;
            let held_elsewhere = tx
                .query_row(
                    "SELECT id FROM matches WHERE match_id = ?1",
                    params![remote_id as i64],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
            check_attach(&record, remote_id, held_elsewhere)?;
            tx.execute(
                "UPDATE matches
                 SET match_id = ?1, match_link = ?2, switched_flag = ?3, updated_at = ?4
                 WHERE id = ?5 AND match_id IS NULL",
                params![
                    remote_id as i64,
                    match_link(&self.link_base, remote_id),
                    switched,
                    Utc::now().to_rfc3339(),
                    record_id
                ],
            )?;
            Ok(())
        })
    }

    fn record_orientation(&self, record_id: i64, switched: bool) -> Result<(), StoreError> {
        self.write(|tx| {
            let record = load_record(tx, record_id)?;
            if check_orientation(&record, switched)? {
                tx.execute(
                    "UPDATE matches SET switched_flag = ?1, updated_at = ?2
                     WHERE id = ?3 AND switched_flag IS NULL",
                    params![switched, Utc::now().to_rfc3339(), record_id],
                )?;
            }
            Ok(())
        })
    }

    fn update_scores(&self, record_id: i64, side_a: u8, side_b: u8) -> Result<(), StoreError> {
        self.write(|tx| {
            let record = load_record(tx, record_id)?;
            check_scores(&record, side_a, side_b)?;
            let finished = side_a == MATCH_LENGTH || side_b == MATCH_LENGTH;
            tx.execute(
                "UPDATE matches
                 SET left_score = ?1, right_score = ?2, finished = ?3, updated_at = ?4
                 WHERE id = ?5 AND finished = 0",
                params![side_a, side_b, finished, Utc::now().to_rfc3339(), record_id],
            )?;
            Ok(())
        })
    }

    fn mark_finished(&self, record_id: i64, winner: Side) -> Result<(), StoreError> {
        self.write(|tx| {
            let record = load_record(tx, record_id)?;
            check_winner(&record, winner)?;
            let sql = match winner {
                Side::A => {
                    "UPDATE matches SET left_score = ?1, finished = 1, updated_at = ?2
                     WHERE id = ?3 AND finished = 0"
                }
                Side::B => {
                    "UPDATE matches SET right_score = ?1, finished = 1, updated_at = ?2
                     WHERE id = ?3 AND finished = 0"
                }
            };
            tx.execute(sql, params![MATCH_LENGTH, Utc::now().to_rfc3339(), record_id])?;
            Ok(())
        })
    }
}

/// Store wrapper for `--dry-run`: reads go to the real store, writes are
/// checked against current state, printed and remembered, never applied.
pub struct DryRunStore<'a, S> {
    inner: &'a S,
    claimed: Mutex<HashSet<u64>>,
    planned: Mutex<Vec<String>>,
}

impl<'a, S: MatchStore> DryRunStore<'a, S> {
    pub fn new(inner: &'a S) -> Self {
        Self {
            inner,
            claimed: Mutex::new(HashSet::new()),
            planned: Mutex::new(Vec::new()),
        }
    }

    pub fn planned(&self) -> Vec<String> {
        self.planned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn load(&self, record_id: i64) -> Result<MatchRecord, StoreError> {
        self.inner
            .record(record_id)?
            .ok_or(StoreError::NotFound(record_id))
    }

    fn plan(&self, action: String) {
        println!("[DRY-RUN] Would {action}");
        self.planned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(action);
    }
}

impl<S: MatchStore> MatchStore for DryRunStore<'_, S> {
    fn records_missing_remote_id(&self, group_id: i64) -> Result<Vec<MatchRecord>, StoreError> {
        self.inner.records_missing_remote_id(group_id)
    }

    fn open_records(&self, group_id: i64) -> Result<Vec<MatchRecord>, StoreError> {
        self.inner.open_records(group_id)
    }

    fn record(&self, record_id: i64) -> Result<Option<MatchRecord>, StoreError> {
        self.inner.record(record_id)
    }

    fn attached_remote_ids(&self) -> Result<HashSet<u64>, StoreError> {
        self.inner.attached_remote_ids()
    }

    fn attach_remote_id(
        &self,
        record_id: i64,
        remote_id: u64,
        switched: bool,
    ) -> Result<(), StoreError> {
        let record = self.load(record_id)?;
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        let held_elsewhere =
            claimed.contains(&remote_id) || self.inner.attached_remote_ids()?.contains(&remote_id);
        check_attach(&record, remote_id, held_elsewhere)?;
        claimed.insert(remote_id);
        drop(claimed);
        self.plan(format!(
            "attach match_id={remote_id} to record {record_id} ({}, switched={switched})",
            record.describe()
        ));
        Ok(())
    }

    fn record_orientation(&self, record_id: i64, switched: bool) -> Result<(), StoreError> {
        let record = self.load(record_id)?;
        if check_orientation(&record, switched)? {
            self.plan(format!(
                "set switched={switched} on record {record_id} ({})",
                record.describe()
            ));
        }
        Ok(())
    }

    fn update_scores(&self, record_id: i64, side_a: u8, side_b: u8) -> Result<(), StoreError> {
        let record = self.load(record_id)?;
        check_scores(&record, side_a, side_b)?;
        self.plan(format!(
            "update record {record_id} ({}) to {side_a}-{side_b}",
            record.describe()
        ));
        Ok(())
    }

    fn mark_finished(&self, record_id: i64, winner: Side) -> Result<(), StoreError> {
        let record = self.load(record_id)?;
        check_winner(&record, winner)?;
        self.plan(format!(
            "finish record {record_id} ({}) with {} at {MATCH_LENGTH}",
            record.describe(),
            record.participant(winner).name
        ));
        Ok(())
    }
}
