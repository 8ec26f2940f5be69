use std::fs;
use std::path::PathBuf;

use dg_sync::extract::{extract_fixtures, extract_latest_score, extract_winner, requires_login};
use dg_sync::model::RemoteSide;

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

#[test]
fn user_page_fixtures_filtered_by_season() {
    let html = read_fixture("user_page.html");
    let rows = extract_fixtures(&html, "34th-season-2a");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].remote_opponent_name, "Bob");
    assert_eq!(rows[0].remote_match_id, 5001);
    assert_eq!(rows[1].remote_opponent_name, "Carol");
    assert_eq!(rows[1].remote_match_id, 5002);
}

#[test]
fn empty_season_filter_keeps_every_linked_row() {
    let html = read_fixture("user_page.html");
    let ids = extract_fixtures(&html, "")
        .into_iter()
        .map(|f| f.remote_match_id)
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![5001, 5002, 4100]);
}

#[test]
fn unrelated_season_yields_nothing() {
    let html = read_fixture("user_page.html");
    assert!(extract_fixtures(&html, "35th-season").is_empty());
}

#[test]
fn latest_score_comes_from_last_row() {
    let html = read_fixture("match_list.html");
    let obs = extract_latest_score(&html, &["Alice", "Bob"]).expect("score row");
    assert_eq!(obs.left_name, "Alice");
    assert_eq!(obs.right_name, "Bob");
    assert_eq!(obs.left_score, 7);
    assert_eq!(obs.right_score, 4);
}

#[test]
fn latest_score_needs_a_known_name() {
    let html = read_fixture("match_list.html");
    assert!(extract_latest_score(&html, &["Carol"]).is_none());
    assert!(extract_latest_score(&html, &[""]).is_none());
}

#[test]
fn first_column_winner() {
    let text = read_fixture("export_first_wins.txt");
    let winner = extract_winner(&text).expect("finished match");
    assert_eq!(winner.side, RemoteSide::First);
    assert_eq!(winner.name.as_deref(), Some("Alice"));
}

#[test]
fn second_column_winner() {
    let text = read_fixture("export_second_wins.txt");
    let winner = extract_winner(&text).expect("finished match");
    assert_eq!(winner.side, RemoteSide::Second);
    assert_eq!(winner.name.as_deref(), Some("Bob"));
}

#[test]
fn game_wins_are_not_match_wins() {
    let text = read_fixture("export_open.txt");
    assert!(extract_winner(&text).is_none());
}

#[test]
fn login_prompt_is_detected() {
    assert!(requires_login(&read_fixture("login_prompt.html")));
    assert!(!requires_login(&read_fixture("match_list.html")));
}
