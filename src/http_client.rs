use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;

const USER_AGENT: &str = "Mozilla/5.0";

/// Blocking client with a cookie jar, so one login carries the session for
/// every later request made through it.
pub fn session_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .cookie_store(true)
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build http client")
}
