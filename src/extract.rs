//! Pure parsers for DailyGammon pages.
//!
//! The markup is not under our control and carries no stable ids, so every
//! function here works on loose structure (table rows, link shapes, text
//! columns). Callers treat `None`/empty as "nothing usable this cycle".

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::model::{DiscoveredFixture, ExportWinner, RemoteSide, ScoreObservation};

/// Character column separating the two players in the export's text layout.
/// "Wins" left of it belongs to the first-listed player.
///
/// Heuristic of last resort: it only holds while the export keeps its
/// current fixed-width rendering. The engine cross-checks it against the
/// export's score header before trusting it.
pub const WIN_COLUMN_THRESHOLD: usize = 24;

static ROW: Lazy<Selector> = Lazy::new(|| selector("tr"));
static CELL: Lazy<Selector> = Lazy::new(|| selector("td"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));

static GAME_HREF: Lazy<Regex> = Lazy::new(|| regex(r"/bg/game/(\d+)/0/"));
static USER_HREF: Lazy<Regex> = Lazy::new(|| regex(r"/bg/user/\d+"));
static NAME_SCORE: Lazy<Regex> = Lazy::new(|| regex(r"^(.+?)\s*:\s*(\d+)"));
static SCORE_HEADER: Lazy<Regex> =
    Lazy::new(|| regex(r"^\s*(\S.*?)\s*:\s*(\d+)\s{2,}(\S.*?)\s*:\s*(\d+)\s*$"));
static MOVE_NUMBER: Lazy<Regex> = Lazy::new(|| regex(r"^\d+\)"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|_| unreachable!("static selector {css}"))
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|_| unreachable!("static pattern {pattern}"))
}

/// True when the server answered with its login prompt instead of content.
pub fn requires_login(page: &str) -> bool {
    page.contains("Please Login")
}

/// Fixtures listed on a player's page whose row text mentions
/// `season_filter` (case-insensitive). Page order, duplicates kept.
pub fn extract_fixtures(html: &str, season_filter: &str) -> Vec<DiscoveredFixture> {
    let doc = Html::parse_document(html);
    let filter = season_filter.trim().to_lowercase();

    let mut out = Vec::new();
    for row in doc.select(&ROW) {
        let Some(remote_match_id) = first_href(&row, &GAME_HREF).and_then(|href| {
            GAME_HREF
                .captures(href)
                .and_then(|c| c[1].parse::<u64>().ok())
        }) else {
            continue;
        };
        if !filter.is_empty() && !row_text(&row).to_lowercase().contains(&filter) {
            continue;
        }
        let Some(opponent) = row
            .select(&LINK)
            .find(|a| a.value().attr("href").is_some_and(|h| USER_HREF.is_match(h)))
        else {
            continue;
        };
        let remote_opponent_name = row_text(&opponent);
        if remote_opponent_name.is_empty() {
            continue;
        }
        out.push(DiscoveredFixture {
            remote_opponent_name,
            remote_match_id,
        });
    }
    out
}

/// Most recent `name : score | name : score` row mentioning one of
/// `known_names`, scanning the match list from the bottom.
pub fn extract_latest_score<S: AsRef<str>>(
    html: &str,
    known_names: &[S],
) -> Option<ScoreObservation> {
    let doc = Html::parse_document(html);
    let names = known_names
        .iter()
        .map(|n| n.as_ref().trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>();

    let rows = doc.select(&ROW).collect::<Vec<_>>();
    for row in rows.into_iter().rev() {
        let text = row_text(&row).to_lowercase();
        if !names.iter().any(|n| text.contains(n.as_str())) {
            continue;
        }
        let cells = row.select(&CELL).collect::<Vec<_>>();
        if cells.len() < 3 {
            continue;
        }
        let (Some((left_name, left_score)), Some((right_name, right_score))) = (
            name_and_score(&row_text(&cells[1])),
            name_and_score(&row_text(&cells[2])),
        ) else {
            continue;
        };
        return Some(ScoreObservation {
            left_name,
            right_name,
            left_score,
            right_score,
        });
    }
    None
}

/// Winner of a finished match from the plain-text export, `None` while the
/// match is still open.
pub fn extract_winner(export_text: &str) -> Option<ExportWinner> {
    let lines = export_text.lines().collect::<Vec<_>>();
    let (idx, line) = lines
        .iter()
        .enumerate()
        .rev()
        .find(|(_, line)| line.contains("and the match") && line.contains("Wins"))?;

    let byte_pos = line.find("Wins")?;
    let column = line[..byte_pos].chars().count();
    let side = if column < WIN_COLUMN_THRESHOLD {
        RemoteSide::First
    } else {
        RemoteSide::Second
    };

    let name = lines[..idx]
        .iter()
        .rev()
        .find_map(|l| score_header(l))
        .map(|(first, second)| match side {
            RemoteSide::First => first,
            RemoteSide::Second => second,
        });

    Some(ExportWinner { side, name })
}

fn score_header(line: &str) -> Option<(String, String)> {
    let caps = SCORE_HEADER.captures(line)?;
    let first = caps[1].trim();
    if MOVE_NUMBER.is_match(first) {
        return None;
    }
    Some((first.to_string(), caps[3].trim().to_string()))
}

fn name_and_score(cell: &str) -> Option<(String, u8)> {
    let caps = NAME_SCORE.captures(cell)?;
    let score = caps[2].parse::<u8>().ok()?;
    Some((caps[1].trim().to_string(), score))
}

fn first_href<'a>(el: &ElementRef<'a>, pattern: &Regex) -> Option<&'a str> {
    el.select(&LINK)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| pattern.is_match(href))
}

/// Visible text with runs of whitespace collapsed to one space.
fn row_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_and_score_accepts_loose_spacing() {
        assert_eq!(name_and_score("Alice:7"), Some(("Alice".to_string(), 7)));
        assert_eq!(
            name_and_score("Mary Ann  :  10"),
            Some(("Mary Ann".to_string(), 10))
        );
        assert_eq!(name_and_score("no score here"), None);
        assert_eq!(name_and_score("Alice : 999"), None);
    }

    #[test]
    fn score_header_skips_move_lines() {
        assert_eq!(
            score_header(" alice : 9                          bob : 10"),
            Some(("alice".to_string(), "bob".to_string()))
        );
        assert_eq!(score_header("  1) 31: 8/5 6/5                    42: 8/4 6/4"), None);
        assert_eq!(score_header("  3) 64:                            53: 11"), None);
    }

    #[test]
    fn login_prompt_detection() {
        assert!(requires_login("<html><b>Please Login</b></html>"));
        assert!(!requires_login("<html>Welcome back</html>"));
    }
}
