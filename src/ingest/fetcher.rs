// src/ingest/fetcher.rs
//! HTTP feed retrieval: one shared connection pool, a semaphore capping
//! in-flight requests, a per-request timeout and a fixed retry budget.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::counter;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::ingest::parser::{decode_feed_bytes, parse_feed};
use crate::ingest::types::{FeedClient, FeedSource, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed feed: {0}")]
    Malformed(String),
    #[error("feed has no entries")]
    Empty,
    #[error("feed client closed")]
    Closed,
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub retry_delay: Duration,
    pub max_in_flight: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("newswire-relay/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(15),
            retries: 2,
            retry_delay: Duration::from_secs(2),
            max_in_flight: 3,
        }
    }
}

pub struct HttpFeedClient {
    client: Client,
    pool: Arc<Semaphore>,
    cfg: FetchConfig,
}

impl HttpFeedClient {
    pub fn new(cfg: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.timeout)
            .build()
            .context("building feed http client")?;
        Ok(Self {
            client,
            pool: Arc::new(Semaphore::new(cfg.max_in_flight.max(1))),
            cfg,
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.cfg
    }

    async fn fetch_once(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        let (bytes, charset) = {
            let _permit = self.pool.acquire().await.map_err(|_| FetchError::Closed)?;
            let resp = self.client.get(url).send().await?;
            if resp.status() != StatusCode::OK {
                return Err(FetchError::Status(resp.status().as_u16()));
            }
            let charset = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .and_then(charset_param);
            (resp.bytes().await?, charset)
        };
        parse_feed(&decode_feed_bytes(&bytes, charset.as_deref()))
    }
}

/// `charset` parameter of a Content-Type value, if any.
fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&self, feed: &FeedSource) -> Result<ParsedFeed, FetchError> {
        let attempts = self.cfg.retries + 1;
        let mut last_err = FetchError::Empty;

        for attempt in 1..=attempts {
            match self.fetch_once(&feed.url).await {
                Ok(parsed) => {
                    debug!(feed = %feed.url, entries = parsed.entries.len(), attempt, "feed fetched");
                    counter!("feeds_fetched_total").increment(1);
                    return Ok(parsed);
                }
                Err(FetchError::Closed) => return Err(FetchError::Closed),
                Err(e) => {
                    warn!(feed = %feed.url, attempt, attempts, error = %e, "feed attempt failed");
                    last_err = e;
                    if attempt < attempts {
                        tokio::time::sleep(self.cfg.retry_delay).await;
                    }
                }
            }
        }

        counter!("feed_fetch_errors_total").increment(1);
        Err(last_err)
    }

    async fn close(&self) {
        self.pool.close();
    }
}
