use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

use crate::data::now_ms;
use crate::data::types::LiveGame;

const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/121.0",
];

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("upstream rate limited (status {0})")]
    RateLimited(u16),
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl FeedError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FeedError::RateLimited(_))
    }
}

/// Client for the upstream live-match list. Best-effort and rate-limited
/// on the provider side; every request is bounded by a timeout and sends
/// a rotating browser User-Agent.
pub struct FeedClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl FeedClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// Fetch the current live-match list. 429/403 responses surface as
    /// `FeedError::RateLimited` so the tracker can enter its cooldown.
    pub async fn fetch_live(&self) -> Result<Vec<LiveGame>, FeedError> {
        // Cache-busting timestamp, the provider caches aggressively.
        let mut url = format!("{}/live?_={}", self.base_url, now_ms());
        if let Some(key) = &self.api_key {
            url.push_str(&format!("&api_key={}", key));
        }

        let ua = pick_user_agent();
        let response = self
            .client
            .get(&url)
            .header("User-Agent", ua)
            .header("Accept", "application/json, text/plain, */*")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            return Err(FeedError::RateLimited(status.as_u16()));
        }

        let games: Vec<LiveGame> = response.error_for_status()?.json().await?;
        Ok(games)
    }
}

fn pick_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}
