// src/config/settings.rs
//! Environment configuration. `.env` is loaded by the binary before this runs.

use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::warn;

use crate::delivery::{DeliveryConfig, OperatingWindow};
use crate::ingest::fetcher::FetchConfig;
use crate::ingest::filter::{DateMode, FilterPolicy};
use crate::ingest::IngestOptions;
use crate::notify::discord::DEFAULT_API_BASE;

pub const DEFAULT_HISTORY_PATH: &str = "state/sent_history.json";

#[derive(Debug, Clone)]
pub struct Settings {
    pub discord_token: String,
    pub channels: Vec<String>,
    pub discord_api_base: String,
    pub feed_urls: Vec<String>,
    pub date_mode: DateMode,
    pub active_start_hour: u32,
    pub active_end_hour: u32,
    pub daily_limit: u32,
    pub batch_size: usize,
    pub max_per_feed: usize,
    pub entries_per_feed: usize,
    pub fetch_retries: u32,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout: Duration,
    pub retry_delay: Duration,
    pub batch_pause: Duration,
    pub send_delay: Duration,
    pub check_interval: Duration,
    pub error_backoff: Duration,
    pub cycle_deadline: Duration,
    pub history_path: PathBuf,
    pub recent_sources_cap: usize,
    pub max_source_run: usize,
    pub translate_url: Option<String>,
    pub translate_target: String,
    pub translate_api_key: Option<String>,
    pub status_addr: Option<SocketAddr>,
    /// `LOG_FORMAT=json`.
    pub log_json: bool,
    /// Optional values that failed to parse, as `(key, raw value)`. Held
    /// until the subscriber exists; see [`Settings::warn_rejected`].
    pub rejected: Vec<(String, String)>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key → value lookup. Missing credential or channels is
    /// an error; malformed optional values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let Some(discord_token) = get("DISCORD_TOKEN") else {
            bail!("DISCORD_TOKEN is not set");
        };

        let channels = get("DISCORD_CHANNEL_IDS")
            .or_else(|| get("DISCORD_CHANNEL_ID"))
            .map(|v| split_list(&v))
            .unwrap_or_default();
        if channels.is_empty() {
            bail!("no destination channel: set DISCORD_CHANNEL_IDS (or DISCORD_CHANNEL_ID)");
        }

        let rejected = RefCell::new(Vec::new());
        let parse = |k: &str| Parsed {
            key: k.to_string(),
            raw: get(k),
            rejected: &rejected,
        };

        let date_mode = parse("DATE_MODE").or(DateMode::Rolling24h);
        let active_start_hour = parse("ACTIVE_HOURS_START").or(8u32);
        let active_end_hour = parse("ACTIVE_HOURS_END").or(21u32);

        let mut settings = Self {
            discord_token,
            channels,
            discord_api_base: get("DISCORD_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            feed_urls: get("FEED_URLS").map(|v| split_list(&v)).unwrap_or_default(),
            date_mode,
            active_start_hour,
            active_end_hour,
            daily_limit: parse("DAILY_LIMIT").or(50),
            batch_size: parse("BATCH_SIZE").or(2usize).max(1),
            max_per_feed: parse("MAX_PER_FEED").or(3usize).max(1),
            entries_per_feed: parse("ENTRIES_PER_FEED").or(15usize).max(1),
            fetch_retries: parse("FETCH_RETRIES").or(2),
            max_concurrent_fetches: parse("MAX_CONCURRENT_FETCHES").or(3usize).max(1),
            fetch_timeout: Duration::from_secs(parse("FETCH_TIMEOUT_SECS").or(15)),
            retry_delay: Duration::from_millis(parse("RETRY_DELAY_MS").or(2000)),
            batch_pause: Duration::from_millis(parse("BATCH_PAUSE_MS").or(1000)),
            send_delay: Duration::from_millis(parse("SEND_DELAY_MS").or(1500)),
            check_interval: Duration::from_secs(parse("CHECK_INTERVAL_SECS").or(1800)),
            error_backoff: Duration::from_secs(parse("ERROR_BACKOFF_SECS").or(60)),
            cycle_deadline: Duration::from_secs(parse("CYCLE_DEADLINE_SECS").or(600)),
            history_path: get("HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HISTORY_PATH)),
            recent_sources_cap: parse("RECENT_SOURCES_CAP").or(5usize).max(1),
            max_source_run: parse("MAX_SOURCE_RUN").or(1usize).max(1),
            translate_url: get("TRANSLATE_URL"),
            translate_target: get("TRANSLATE_TARGET").unwrap_or_else(|| "pt".to_string()),
            translate_api_key: get("TRANSLATE_API_KEY"),
            status_addr: parse("STATUS_ADDR").opt(),
            log_json: get("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
            rejected: Vec::new(),
        };
        settings.rejected = rejected.into_inner();
        Ok(settings)
    }

    /// Log every value that fell back to its default.
    pub fn warn_rejected(&self) {
        for (key, value) in &self.rejected {
            warn!(%key, %value, "invalid value; using default");
        }
    }

    pub fn window(&self) -> Result<OperatingWindow> {
        OperatingWindow::from_hours(self.active_start_hour, self.active_end_hour)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: self.fetch_timeout,
            retries: self.fetch_retries,
            retry_delay: self.retry_delay,
            max_in_flight: self.max_concurrent_fetches,
            ..FetchConfig::default()
        }
    }

    pub fn filter_policy(&self, blocked_keywords: Vec<String>) -> FilterPolicy {
        FilterPolicy {
            date_mode: self.date_mode,
            blocked_keywords,
            max_per_feed: self.max_per_feed,
            scan_limit: self.entries_per_feed,
            ..FilterPolicy::default()
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            batch_width: self.max_concurrent_fetches,
            batch_pause: self.batch_pause,
        }
    }

    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            channels: self.channels.clone(),
            batch_size: self.batch_size,
            send_delay: self.send_delay,
        }
    }
}

fn split_list(v: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in v.split([',', ';', '\n']) {
        let t = item.trim();
        if !t.is_empty() && !out.iter().any(|o| o == t) {
            out.push(t.to_string());
        }
    }
    out
}

struct Parsed<'a> {
    key: String,
    raw: Option<String>,
    rejected: &'a RefCell<Vec<(String, String)>>,
}

impl Parsed<'_> {
    fn opt<T: FromStr>(self) -> Option<T> {
        let raw = self.raw?;
        match raw.parse::<T>() {
            Ok(v) => Some(v),
            Err(_) => {
                self.rejected.borrow_mut().push((self.key, raw));
                None
            }
        }
    }

    fn or<T: FromStr>(self, default: T) -> T {
        self.opt().unwrap_or(default)
    }
}
