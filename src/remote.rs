use anyhow::Context;
use reqwest::blocking::Client;
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::extract::{extract_fixtures, requires_login};
use crate::http_client::session_client;
use crate::model::DiscoveredFixture;

/// Read access to the remote game server. Failures surface as absence, the
/// caller retries on a later cycle.
pub trait RemoteSource: Sync {
    fn list_player_fixtures(
        &self,
        player_remote_id: u64,
        season_filter: &str,
    ) -> Vec<DiscoveredFixture>;

    fn fetch_match_page(&self, remote_match_id: u64) -> Option<String>;

    fn fetch_match_export(&self, remote_match_id: u64) -> Option<String>;
}

/// Logged-in DailyGammon session.
#[derive(Debug)]
pub struct DgSession {
    client: Client,
    base_url: String,
}

impl DgSession {
    pub fn login(config: &RemoteConfig) -> Result<Self, SyncError> {
        let auth_err = |reason: String| SyncError::Auth {
            host: config.base_url.clone(),
            reason,
        };
        let client = session_client(config.timeout).map_err(|e| auth_err(format!("{e:#}")))?;

        let url = format!("{}/bg/login", config.base_url);
        let form = [
            ("login", config.login.as_str()),
            ("password", config.password.as_str()),
            ("save", "1"),
        ];
        let resp = client
            .post(&url)
            .form(&form)
            .send()
            .map_err(|e| auth_err(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(auth_err(format!("http {status}")));
        }
        let body = resp.text().map_err(|e| auth_err(e.to_string()))?;
        if requires_login(&body) {
            return Err(auth_err("credentials rejected".to_string()));
        }

        debug!(host = %config.base_url, user = %config.login, "logged in");
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    fn get_page(&self, url: &str) -> Option<String> {
        let result = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.text())
            .with_context(|| format!("GET {url}"));
        match result {
            Ok(body) if requires_login(&body) => {
                warn!(%url, "session no longer authenticated");
                None
            }
            Ok(body) => Some(body),
            Err(err) => {
                warn!(%url, error = %format!("{err:#}"), "fetch failed");
                None
            }
        }
    }
}

impl RemoteSource for DgSession {
    fn list_player_fixtures(
        &self,
        player_remote_id: u64,
        season_filter: &str,
    ) -> Vec<DiscoveredFixture> {
        let url = format!("{}/bg/user/{player_remote_id}", self.base_url);
        let Some(html) = self.get_page(&url) else {
            return Vec::new();
        };
        let fixtures = extract_fixtures(&html, season_filter);
        debug!(
            player = player_remote_id,
            season = season_filter,
            found = fixtures.len(),
            "parsed player fixtures"
        );
        fixtures
    }

    fn fetch_match_page(&self, remote_match_id: u64) -> Option<String> {
        self.get_page(&format!(
            "{}/bg/game/{remote_match_id}/0/list",
            self.base_url
        ))
    }

    fn fetch_match_export(&self, remote_match_id: u64) -> Option<String> {
        self.get_page(&format!("{}/bg/export/{remote_match_id}", self.base_url))
    }
}

/// Link stored next to an attached remote id.
pub fn match_link(base_url: &str, remote_match_id: u64) -> String {
    format!("{base_url}/bg/game/{remote_match_id}/0/list#end")
}
