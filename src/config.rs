use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};

pub const DEFAULT_BASE_URL: &str = "http://www.dailygammon.com";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_FETCH_PARALLELISM: usize = 6;
const DATA_DIR: &str = "dg_sync";
const DB_FILE: &str = "league.sqlite";

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub login: String,
    pub password: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub db_path: PathBuf,
    pub fetch_parallelism: usize,
}

/// Loads `.env.local`, `.env` and `a.env` if present. Existing variables win.
pub fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    let _ = dotenvy::from_filename("a.env");
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let login = var("DG_LOGIN").ok_or_else(|| anyhow!("DG_LOGIN is not set"))?;
        let password = var("DG_PW").ok_or_else(|| anyhow!("DG_PW is not set"))?;
        let base_url = var("DG_BASE_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let timeout_secs = var("DG_TIMEOUT_SECS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(5, 120);
        let fetch_parallelism = var("FETCH_PARALLELISM")
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_FETCH_PARALLELISM)
            .clamp(1, 32);
        let db_path = var("SYNC_DB_PATH")
            .map(PathBuf::from)
            .or_else(|| default_db_path(&var))
            .ok_or_else(|| anyhow!("cannot resolve store path; set SYNC_DB_PATH"))?;

        Ok(Self {
            remote: RemoteConfig {
                base_url,
                login: login.trim().to_string(),
                password,
                timeout: Duration::from_secs(timeout_secs),
            },
            db_path,
            fetch_parallelism,
        })
    }
}

fn default_db_path(var: &impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    if let Some(base) = var("XDG_DATA_HOME") {
        return Some(PathBuf::from(base).join(DATA_DIR).join(DB_FILE));
    }
    let home = var("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(DATA_DIR)
            .join(DB_FILE),
    )
}

/// Renders the season label the remote site puts in its tournament names,
/// e.g. `34th-season-2a`.
pub fn season_filter(season: u32, league: Option<&str>) -> String {
    let mut out = format!("{}-season", ordinal(season));
    if let Some(league) = league.map(str::trim).filter(|l| !l.is_empty()) {
        out.push('-');
        out.push_str(&league.to_lowercase());
    }
    out
}

fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn season_filter_uses_ordinals() {
        assert_eq!(season_filter(34, Some("2A")), "34th-season-2a");
        assert_eq!(season_filter(31, None), "31st-season");
        assert_eq!(season_filter(32, Some(" ")), "32nd-season");
        assert_eq!(season_filter(33, None), "33rd-season");
        assert_eq!(season_filter(12, None), "12th-season");
        assert_eq!(season_filter(111, None), "111th-season");
    }

    #[test]
    fn credentials_are_required() {
        let err = SyncConfig::from_lookup(lookup(&[("DG_PW", "x"), ("HOME", "/h")])).unwrap_err();
        assert!(err.to_string().contains("DG_LOGIN"));
    }

    #[test]
    fn defaults_and_clamps() {
        let cfg = SyncConfig::from_lookup(lookup(&[
            ("DG_LOGIN", " alice "),
            ("DG_PW", "secret"),
            ("HOME", "/home/alice"),
            ("DG_TIMEOUT_SECS", "1"),
            ("FETCH_PARALLELISM", "500"),
            ("DG_BASE_URL", "http://localhost:8080/"),
        ]))
        .expect("config should load");
        assert_eq!(cfg.remote.login, "alice");
        assert_eq!(cfg.remote.base_url, "http://localhost:8080");
        assert_eq!(cfg.remote.timeout, Duration::from_secs(5));
        assert_eq!(cfg.fetch_parallelism, 32);
        assert_eq!(
            cfg.db_path,
            PathBuf::from("/home/alice/.local/share/dg_sync/league.sqlite")
        );
    }

    #[test]
    fn explicit_db_path_wins() {
        let cfg = SyncConfig::from_lookup(lookup(&[
            ("DG_LOGIN", "a"),
            ("DG_PW", "b"),
            ("SYNC_DB_PATH", "/tmp/x.sqlite"),
            ("XDG_DATA_HOME", "/data"),
        ]))
        .expect("config should load");
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/x.sqlite"));
        assert_eq!(cfg.remote.timeout, Duration::from_secs(30));
        assert_eq!(cfg.fetch_parallelism, 6);
    }
}
