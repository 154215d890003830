// src/ingest/mod.rs
pub mod balance;
pub mod fetcher;
pub mod filter;
pub mod parser;
pub mod types;

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use futures::future::join_all;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::ingest::filter::{CandidatePool, EntryFilter, FilterStats};
use crate::ingest::types::{FeedClient, FeedSource};
use crate::shutdown::Shutdown;
use crate::store::DedupStore;

/// Longest title we keep; Discord caps whole messages at 2000 chars.
pub const MAX_TITLE_CHARS: usize = 256;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feeds_fetched_total", "Feeds fetched and parsed successfully.");
        describe_counter!(
            "feed_fetch_errors_total",
            "Feeds given up on after the retry budget."
        );
        describe_counter!("articles_accepted_total", "Entries accepted by the filter.");
        describe_counter!(
            "articles_rejected_total",
            "Entries rejected by the filter, by reason."
        );
        describe_counter!("messages_sent_total", "Messages delivered to a channel.");
        describe_counter!("message_send_errors_total", "Failed channel sends.");
        describe_counter!("cycles_total", "Completed delivery cycles.");
        describe_counter!("cycle_failures_total", "Cycles aborted by an error or deadline.");
        describe_histogram!("feed_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!("daily_quota_used", "Messages sent today.");
        describe_gauge!("last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

/// Normalize a feed title: decode entities, strip tags, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 4) Length cap
    if out.chars().count() > MAX_TITLE_CHARS {
        out = out.chars().take(MAX_TITLE_CHARS).collect();
    }

    out
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Feeds fetched concurrently per batch.
    pub batch_width: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_width: 3,
            batch_pause: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub pool: CandidatePool,
    pub fetched: usize,
    pub failed: Vec<String>,
    pub stats: FilterStats,
    pub interrupted: bool,
}

/// Fetch every feed in fixed-size batches and screen the results.
///
/// Fetches inside a batch run concurrently and only produce local results;
/// screening into the pool happens sequentially once the batch is done.
/// A failed feed is logged and skipped.
#[allow(clippy::too_many_arguments)]
pub async fn collect_candidates(
    client: &dyn FeedClient,
    feeds: &[FeedSource],
    filter: &EntryFilter,
    store: &dyn DedupStore,
    scopes: &[String],
    opts: &IngestOptions,
    shutdown: &Shutdown,
    now: DateTime<FixedOffset>,
) -> IngestReport {
    ensure_metrics_described();

    let mut report = IngestReport::default();
    let width = opts.batch_width.max(1);

    for (n, batch) in feeds.chunks(width).enumerate() {
        if shutdown.is_triggered() {
            info!(batch = n, "shutdown requested; stopping ingestion");
            report.interrupted = true;
            break;
        }
        if n > 0 && !opts.batch_pause.is_zero() {
            tokio::time::sleep(opts.batch_pause).await;
        }

        let results = join_all(batch.iter().map(|feed| client.fetch(feed))).await;

        for (feed, result) in batch.iter().zip(results) {
            match result {
                Ok(parsed) => {
                    report.fetched += 1;
                    let stats = filter.screen(feed, &parsed.entries, store, scopes, now, &mut report.pool);
                    info!(
                        feed = %feed.url,
                        source = %feed.name,
                        entries = parsed.entries.len(),
                        accepted = stats.accepted,
                        rejected = stats.rejected(),
                        "feed screened"
                    );
                    report.stats.merge(stats);
                }
                Err(e) => {
                    warn!(feed = %feed.url, error = %e, "feed skipped this cycle");
                    report.failed.push(feed.url.clone());
                }
            }
        }
    }

    report
}
