use thiserror::Error;

use crate::model::PageKind;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record {record_id} cannot take remote match id {remote_id}: already attached")]
    Conflict { record_id: i64, remote_id: u64 },
    #[error("record {0} is already finished")]
    AlreadyFinished(i64),
    #[error("record {0} already has a different orientation")]
    OrientationSet(i64),
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("score {side_a}-{side_b} is not valid for record {record_id}")]
    InvalidScore {
        record_id: i64,
        side_a: u8,
        side_b: u8,
    },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("login to {host} failed: {reason}")]
    Auth { host: String, reason: String },
    #[error("{} page for match {remote_id} unavailable", .kind.label())]
    FetchUnavailable { remote_id: u64, kind: PageKind },
    #[error("no {what} found for match {remote_id}")]
    ParseMiss { remote_id: u64, what: &'static str },
    #[error(
        "cannot orient match {remote_id}: remote shows '{left}' vs '{right}', record has '{side_a}' vs '{side_b}'"
    )]
    OrientationAmbiguous {
        remote_id: u64,
        left: String,
        right: String,
        side_a: String,
        side_b: String,
    },
    #[error("export for match {remote_id} names winner '{winner}', which is neither side")]
    WinnerUnmatched { remote_id: u64, winner: String },
    #[error("export for match {remote_id} names '{winner}' but the winning column belongs to the other side")]
    WinnerDisputed { remote_id: u64, winner: String },
    #[error(
        "remote score {observed_a}-{observed_b} for match {remote_id} is behind stored {stored_a}-{stored_b}"
    )]
    ScoreRegression {
        remote_id: u64,
        stored_a: u8,
        stored_b: u8,
        observed_a: u8,
        observed_b: u8,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    /// Only a failed login stops a run; everything else is per-record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Auth { .. })
    }

    /// Conditions that are expected to clear up on a later cycle.
    pub fn is_deferral(&self) -> bool {
        matches!(
            self,
            SyncError::FetchUnavailable { .. } | SyncError::ParseMiss { .. }
        )
    }
}
