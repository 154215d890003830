// src/ingest/filter.rs
//! Entry screening: recency → link/title validity → dedup → keyword block-list
//! → per-feed cap. Accepted articles land in a [`CandidatePool`] grouped by
//! source name.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use metrics::counter;

use crate::ingest::types::{Article, ArticleId, FeedEntry, FeedSource};
use crate::store::{seen_everywhere, DedupStore};

/// Future-dated entries within this skew still count as recent.
const CLOCK_SKEW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateMode {
    /// Published on the current local calendar day.
    Today,
    /// Published within the last 24 hours.
    #[default]
    Rolling24h,
}

impl FromStr for DateMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" | "day" | "exact" => Ok(DateMode::Today),
            "rolling24h" | "rolling" | "24h" => Ok(DateMode::Rolling24h),
            other => Err(anyhow!("unknown date mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub date_mode: DateMode,
    pub blocked_keywords: Vec<String>,
    pub accepted_schemes: Vec<String>,
    pub max_per_feed: usize,
    pub scan_limit: usize,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            date_mode: DateMode::default(),
            blocked_keywords: Vec::new(),
            accepted_schemes: vec!["http://".into(), "https://".into()],
            max_per_feed: 3,
            scan_limit: 15,
        }
    }
}

/// Rejection counters for one or more screened feeds.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub accepted: usize,
    pub stale: usize,
    pub invalid: usize,
    pub duplicate: usize,
    pub blocked: usize,
    pub over_cap: usize,
}

impl FilterStats {
    pub fn merge(&mut self, other: FilterStats) {
        self.accepted += other.accepted;
        self.stale += other.stale;
        self.invalid += other.invalid;
        self.duplicate += other.duplicate;
        self.blocked += other.blocked;
        self.over_cap += other.over_cap;
    }

    pub fn rejected(&self) -> usize {
        self.stale + self.invalid + self.duplicate + self.blocked + self.over_cap
    }
}

/// Articles accepted during one cycle, grouped by source name.
#[derive(Debug, Default, Clone)]
pub struct CandidatePool {
    buckets: BTreeMap<String, Vec<Article>>,
    ids: HashSet<ArticleId>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the same identity was already pooled this cycle.
    pub fn insert(&mut self, article: Article) -> bool {
        if !self.ids.insert(article.id.clone()) {
            return false;
        }
        self.buckets
            .entry(article.source.clone())
            .or_default()
            .push(article);
        true
    }

    pub fn contains(&self, id: &ArticleId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn count_for(&self, source: &str) -> usize {
        self.buckets.get(source).map(Vec::len).unwrap_or(0)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str)
    }

    pub fn into_buckets(self) -> BTreeMap<String, Vec<Article>> {
        self.buckets
    }
}

pub struct EntryFilter {
    policy: FilterPolicy,
}

impl EntryFilter {
    pub fn new(mut policy: FilterPolicy) -> Self {
        policy.blocked_keywords = policy
            .blocked_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { policy }
    }

    pub fn policy(&self) -> &FilterPolicy {
        &self.policy
    }

    pub fn is_recent(&self, published: Option<DateTime<Utc>>, now: DateTime<FixedOffset>) -> bool {
        let Some(published) = published else {
            return false;
        };
        match self.policy.date_mode {
            DateMode::Today => {
                published.with_timezone(&now.timezone()).date_naive() == now.date_naive()
            }
            DateMode::Rolling24h => {
                let now = now.with_timezone(&Utc);
                published >= now - ChronoDuration::hours(24)
                    && published <= now + ChronoDuration::minutes(CLOCK_SKEW_MINUTES)
            }
        }
    }

    pub fn has_valid_link(&self, link: &str) -> bool {
        !link.is_empty()
            && self
                .policy
                .accepted_schemes
                .iter()
                .any(|scheme| link.len() > scheme.len() && link.starts_with(scheme.as_str()))
    }

    pub fn is_blocked(&self, title: &str) -> bool {
        if self.policy.blocked_keywords.is_empty() {
            return false;
        }
        let lowered = title.to_lowercase();
        self.policy
            .blocked_keywords
            .iter()
            .any(|k| lowered.contains(k.as_str()))
    }

    /// Screen the entries of one feed into `pool`.
    pub fn screen(
        &self,
        feed: &FeedSource,
        entries: &[FeedEntry],
        store: &dyn DedupStore,
        scopes: &[String],
        now: DateTime<FixedOffset>,
        pool: &mut CandidatePool,
    ) -> FilterStats {
        let mut stats = FilterStats::default();

        for entry in entries.iter().take(self.policy.scan_limit) {
            if !self.is_recent(entry.published, now) {
                stats.stale += 1;
                continue;
            }
            if entry.title.is_empty() || !self.has_valid_link(&entry.link) {
                stats.invalid += 1;
                continue;
            }
            let id = ArticleId::from_parts(&entry.title, &entry.link);
            if pool.contains(&id) || seen_everywhere(store, scopes, &id) {
                stats.duplicate += 1;
                continue;
            }
            if self.is_blocked(&entry.title) {
                stats.blocked += 1;
                continue;
            }
            if stats.accepted >= self.policy.max_per_feed {
                stats.over_cap += 1;
                continue;
            }

            let article = Article::new(feed, entry.title.clone(), entry.link.clone(), entry.published);
            if pool.insert(article) {
                stats.accepted += 1;
            }
        }

        record_stats(&stats);
        stats
    }
}

fn record_stats(stats: &FilterStats) {
    counter!("articles_accepted_total").increment(stats.accepted as u64);
    for (reason, n) in [
        ("stale", stats.stale),
        ("invalid", stats.invalid),
        ("duplicate", stats.duplicate),
        ("blocked", stats.blocked),
        ("over_cap", stats.over_cap),
    ] {
        if n > 0 {
            counter!("articles_rejected_total", "reason" => reason).increment(n as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonHistoryStore;
    use chrono::TimeZone;

    fn brt() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn filter(mode: DateMode) -> EntryFilter {
        EntryFilter::new(FilterPolicy {
            date_mode: mode,
            blocked_keywords: vec!["  Horóscopo ".into(), "".into()],
            ..FilterPolicy::default()
        })
    }

    #[test]
    fn today_mode_uses_local_calendar_day() {
        let f = filter(DateMode::Today);
        let now = brt().with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        // 01:00 UTC on the 10th is still the 9th in UTC-3
        let late_yesterday = Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();
        let this_morning = Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap();
        assert!(!f.is_recent(Some(late_yesterday), now));
        assert!(f.is_recent(Some(this_morning), now));
        assert!(!f.is_recent(None, now));
    }

    #[test]
    fn rolling_mode_uses_24h_window() {
        let f = filter(DateMode::Rolling24h);
        let now = brt().with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let utc_now = now.with_timezone(&Utc);
        assert!(f.is_recent(Some(utc_now - ChronoDuration::hours(23)), now));
        assert!(!f.is_recent(Some(utc_now - ChronoDuration::hours(25)), now));
        assert!(!f.is_recent(Some(utc_now + ChronoDuration::hours(2)), now));
    }

    #[test]
    fn keyword_block_is_case_insensitive_unicode() {
        let f = filter(DateMode::Rolling24h);
        assert!(f.is_blocked("HORÓSCOPO do dia"));
        assert!(!f.is_blocked("Previsão do tempo"));
    }

    #[test]
    fn link_must_carry_scheme() {
        let f = filter(DateMode::Rolling24h);
        assert!(f.has_valid_link("https://a.test/x"));
        assert!(f.has_valid_link("http://a.test/x"));
        assert!(!f.has_valid_link("ftp://a.test/x"));
        assert!(!f.has_valid_link("https://"));
        assert!(!f.has_valid_link(""));
    }

    #[test]
    fn same_article_in_two_feeds_is_pooled_once() {
        let f = filter(DateMode::Rolling24h);
        let now = brt().with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let entry = FeedEntry {
            title: "Shared".into(),
            link: "https://a.test/shared".into(),
            published: Some(now.with_timezone(&Utc)),
        };
        let store = JsonHistoryStore::in_memory();
        let scopes = vec!["c1".to_string()];
        let mut pool = CandidatePool::new();
        let a = FeedSource::new("https://a.test/rss", "A");
        let b = FeedSource::new("https://b.test/rss", "B");
        let s1 = f.screen(&a, std::slice::from_ref(&entry), &store, &scopes, now, &mut pool);
        let s2 = f.screen(&b, std::slice::from_ref(&entry), &store, &scopes, now, &mut pool);
        assert_eq!(s1.accepted, 1);
        assert_eq!(s2.duplicate, 1);
        assert_eq!(pool.len(), 1);
    }
}
