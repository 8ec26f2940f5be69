use serde::Serialize;

/// Score that ends a match. Reaching it on either side is terminal.
pub const MATCH_LENGTH: u8 = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// Which column of the remote page a side was rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSide {
    First,
    Second,
}

impl RemoteSide {
    /// Maps a remote column onto the record's sides.
    pub fn record_side(self, switched: bool) -> Side {
        match (self, switched) {
            (RemoteSide::First, false) | (RemoteSide::Second, true) => Side::A,
            (RemoteSide::Second, false) | (RemoteSide::First, true) => Side::B,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    MatchList,
    Export,
}

impl PageKind {
    pub fn label(self) -> &'static str {
        match self {
            PageKind::MatchList => "match list",
            PageKind::Export => "export",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub player_id: i64,
    pub name: String,
    /// DailyGammon user id, supplied by the import pipeline.
    pub remote_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub id: i64,
    pub group_id: i64,
    pub side_a: Participant,
    pub side_b: Participant,
    pub remote_match_id: Option<u64>,
    /// Side A's score.
    pub left_score: Option<u8>,
    /// Side B's score.
    pub right_score: Option<u8>,
    /// `None` until the remote orientation has been established.
    pub switched: Option<bool>,
    pub finished: bool,
}

impl MatchRecord {
    pub fn score(&self, side: Side) -> Option<u8> {
        match side {
            Side::A => self.left_score,
            Side::B => self.right_score,
        }
    }

    pub fn participant(&self, side: Side) -> &Participant {
        match side {
            Side::A => &self.side_a,
            Side::B => &self.side_b,
        }
    }

    /// Side whose stored score already reached the match length.
    pub fn terminal_side(&self) -> Option<Side> {
        if self.left_score == Some(MATCH_LENGTH) {
            Some(Side::A)
        } else if self.right_score == Some(MATCH_LENGTH) {
            Some(Side::B)
        } else {
            None
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.finished || self.terminal_side().is_some()
    }

    pub fn describe(&self) -> String {
        format!("{} vs {}", self.side_a.name, self.side_b.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: i64,
    pub season_no: u32,
    pub league: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFixture {
    pub remote_opponent_name: String,
    pub remote_match_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreObservation {
    pub left_name: String,
    pub right_name: String,
    pub left_score: u8,
    pub right_score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportWinner {
    pub side: RemoteSide,
    /// Name of the winning column, read from the export's score header.
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(left: Option<u8>, right: Option<u8>) -> MatchRecord {
        MatchRecord {
            id: 1,
            group_id: 1,
            side_a: Participant {
                player_id: 1,
                name: "Alice".to_string(),
                remote_id: Some(10),
            },
            side_b: Participant {
                player_id: 2,
                name: "Bob".to_string(),
                remote_id: Some(20),
            },
            remote_match_id: None,
            left_score: left,
            right_score: right,
            switched: None,
            finished: false,
        }
    }

    #[test]
    fn remote_side_follows_switched_flag() {
        assert_eq!(RemoteSide::First.record_side(false), Side::A);
        assert_eq!(RemoteSide::First.record_side(true), Side::B);
        assert_eq!(RemoteSide::Second.record_side(false), Side::B);
        assert_eq!(RemoteSide::Second.record_side(true), Side::A);
    }

    #[test]
    fn terminal_side_detects_eleven() {
        assert_eq!(record(Some(11), Some(6)).terminal_side(), Some(Side::A));
        assert_eq!(record(Some(3), Some(11)).terminal_side(), Some(Side::B));
        assert_eq!(record(Some(10), None).terminal_side(), None);
        assert!(!record(None, None).is_terminal());
    }
}
