use crate::model::{ScoreObservation, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Remote left is side A.
    Aligned,
    /// Remote left is side B.
    Switched,
    Ambiguous,
}

impl Orientation {
    pub fn switched(self) -> Option<bool> {
        match self {
            Orientation::Aligned => Some(false),
            Orientation::Switched => Some(true),
            Orientation::Ambiguous => None,
        }
    }
}

fn norm(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Aligns the observed left/right labels with the record's sides.
///
/// Exact matches decide first. The substring fallback exists because remote
/// display names sometimes carry decorations the store does not; it only
/// fires when side A's name occurs in exactly one label. Anything else is
/// ambiguous and must not be guessed.
pub fn resolve_switched(side_a: &str, side_b: &str, obs: &ScoreObservation) -> Orientation {
    let (a, b) = (norm(side_a), norm(side_b));
    let (left, right) = (norm(&obs.left_name), norm(&obs.right_name));
    if a.is_empty() || b.is_empty() {
        return Orientation::Ambiguous;
    }

    if left == a && right == b {
        return Orientation::Aligned;
    }
    if left == b && right == a {
        return Orientation::Switched;
    }

    match (left.contains(&a), right.contains(&a)) {
        (true, false) => Orientation::Aligned,
        (false, true) => Orientation::Switched,
        _ => Orientation::Ambiguous,
    }
}

/// Discovery rule: the opponent listed on a player's feed names the other
/// side. Opponent = side B keeps the record order, opponent = side A means
/// the remote match runs the other way round.
pub fn orientation_from_opponent(opponent: &str, side_a: &str, side_b: &str) -> Option<bool> {
    let opponent = norm(opponent);
    if opponent.is_empty() {
        return None;
    }
    if opponent == norm(side_b) {
        Some(false)
    } else if opponent == norm(side_a) {
        Some(true)
    } else {
        None
    }
}

/// Which record side a free-text remote label names. Exact match first,
/// then the single-hit substring fallback used by [`resolve_switched`].
pub fn side_for_label(label: &str, side_a: &str, side_b: &str) -> Option<Side> {
    let label = norm(label);
    let (a, b) = (norm(side_a), norm(side_b));
    if label.is_empty() || a.is_empty() || b.is_empty() {
        return None;
    }
    if label == a {
        return Some(Side::A);
    }
    if label == b {
        return Some(Side::B);
    }
    match (label.contains(&a), label.contains(&b)) {
        (true, false) => Some(Side::A),
        (false, true) => Some(Side::B),
        _ => None,
    }
}

/// Observed scores as `(side A, side B)`.
pub fn map_scores(obs: &ScoreObservation, switched: bool) -> (u8, u8) {
    if switched {
        (obs.right_score, obs.left_score)
    } else {
        (obs.left_score, obs.right_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(left: &str, right: &str, ls: u8, rs: u8) -> ScoreObservation {
        ScoreObservation {
            left_name: left.to_string(),
            right_name: right.to_string(),
            left_score: ls,
            right_score: rs,
        }
    }

    #[test]
    fn exact_names_decide_orientation() {
        assert_eq!(
            resolve_switched("Alice", "Bob", &obs("alice", "BOB", 1, 2)),
            Orientation::Aligned
        );
        assert_eq!(
            resolve_switched("Alice", "Bob", &obs("Bob", "Alice", 1, 2)),
            Orientation::Switched
        );
    }

    #[test]
    fn substring_fallback_needs_a_single_hit() {
        assert_eq!(
            resolve_switched("Alice", "Bob", &obs("Alice (DE)", "Bobby", 0, 0)),
            Orientation::Aligned
        );
        assert_eq!(
            resolve_switched("Alice", "Bob", &obs("Bobby", "[Alice]", 0, 0)),
            Orientation::Switched
        );
        assert_eq!(
            resolve_switched("Al", "Bob", &obs("Alan", "Alice", 0, 0)),
            Orientation::Ambiguous
        );
        assert_eq!(
            resolve_switched("Alice", "Bob", &obs("Carol", "Dave", 0, 0)),
            Orientation::Ambiguous
        );
    }

    #[test]
    fn opponent_name_orients_discovery() {
        assert_eq!(orientation_from_opponent("bob", "Alice", "Bob"), Some(false));
        assert_eq!(orientation_from_opponent(" Alice", "Alice", "Bob"), Some(true));
        assert_eq!(orientation_from_opponent("Carol", "Alice", "Bob"), None);
        assert_eq!(orientation_from_opponent("", "Alice", ""), None);
    }

    #[test]
    fn labels_map_to_sides() {
        assert_eq!(side_for_label("BOB", "Alice", "Bob"), Some(Side::B));
        assert_eq!(side_for_label("alice_dg", "Alice", "Bob"), Some(Side::A));
        assert_eq!(side_for_label("Bob & Alice", "Alice", "Bob"), None);
        assert_eq!(side_for_label("Carol", "Alice", "Bob"), None);
    }

    #[test]
    fn switched_mapping_swaps_scores() {
        let o = obs("Bob", "Alice", 7, 4);
        assert_eq!(map_scores(&o, true), (4, 7));
        assert_eq!(map_scores(&o, false), (7, 4));
    }
}
