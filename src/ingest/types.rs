// src/ingest/types.rs
use std::fmt;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::ingest::fetcher::FetchError;

pub const DEFAULT_SOURCE_NAME: &str = "Unknown";
pub const DEFAULT_EMOJI: &str = "📰";

/// A configured feed. Immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    pub name: String,  // e.g. "G1", "UOL"; "Unknown" when no table entry matched
    pub emoji: String, // message prefix for articles of this feed
}

impl FeedSource {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            emoji: DEFAULT_EMOJI.to_string(),
        }
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = emoji.into();
        self
    }
}

/// One raw item as read from the feed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// Content-addressed article identity: SHA-256 over (title, link), lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArticleId(String);

impl ArticleId {
    pub fn from_parts(title: &str, link: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        // unit separator keeps ("ab", "c") and ("a", "bc") apart
        hasher.update([0x1f]);
        hasher.update(link.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Self(out)
    }

    /// Wrap an already computed hash (e.g. loaded from the history file).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A screened entry ready for balancing and delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub source: String,
    pub emoji: String,
}

impl Article {
    pub fn new(feed: &FeedSource, title: String, link: String, published: Option<DateTime<Utc>>) -> Self {
        Self {
            id: ArticleId::from_parts(&title, &link),
            title,
            link,
            published,
            source: feed.name.clone(),
            emoji: feed.emoji.clone(),
        }
    }
}

/// Retrieval seam for feeds; the HTTP implementation lives in `fetcher`.
#[async_trait::async_trait]
pub trait FeedClient: Send + Sync {
    async fn fetch(&self, feed: &FeedSource) -> Result<ParsedFeed, FetchError>;

    /// Release network resources; later fetches may fail.
    async fn close(&self) {}
}
