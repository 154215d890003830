// src/config/catalog.rs
//! Static lookup data: the feed list (with per-feed emoji), the URL → source
//! name table and the keyword block-list. TOML or JSON with the same shape.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::types::{FeedSource, DEFAULT_EMOJI, DEFAULT_SOURCE_NAME};

pub const ENV_FEEDS_CONFIG_PATH: &str = "FEEDS_CONFIG_PATH";
pub const DEFAULT_TOML_PATH: &str = "config/feeds.toml";
pub const DEFAULT_JSON_PATH: &str = "config/feeds.json";

/// A feed is either a bare URL or a table with optional overrides.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum FeedSpec {
    Url(String),
    Full {
        url: String,
        #[serde(default)]
        emoji: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

impl FeedSpec {
    pub fn url(&self) -> &str {
        match self {
            FeedSpec::Url(u) => u,
            FeedSpec::Full { url, .. } => url,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SourceName {
    /// Case-insensitive substring of the feed URL.
    pub pattern: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedCatalog {
    #[serde(default)]
    pub feeds: Vec<FeedSpec>,
    #[serde(default)]
    pub sources: Vec<SourceName>,
    #[serde(default)]
    pub blocked_keywords: Vec<String>,
}

impl FeedCatalog {
    /// Load from an explicit path; the extension picks the format, JSON is
    /// tried when TOML parsing fails.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading feed catalog from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&content, &ext).with_context(|| format!("parsing {}", path.display()))
    }

    /// Resolution order:
    /// 1) `$FEEDS_CONFIG_PATH`
    /// 2) `config/feeds.toml`
    /// 3) `config/feeds.json`
    /// 4) empty catalog
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_FEEDS_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_FEEDS_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Ok(Self::default())
    }

    pub fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        let parsed = if hint_ext == "json" {
            serde_json::from_str::<Self>(s).map_err(anyhow::Error::from)
        } else {
            toml::from_str::<Self>(s)
                .map_err(anyhow::Error::from)
                .or_else(|e| serde_json::from_str::<Self>(s).map_err(|_| e))
        }?;
        Ok(parsed.cleaned())
    }

    /// Trim, drop blanks, drop duplicate URLs/keywords (first one wins).
    fn cleaned(mut self) -> Self {
        let mut seen = HashSet::new();
        self.feeds = self
            .feeds
            .into_iter()
            .filter_map(|f| {
                let url = f.url().trim().to_string();
                if url.is_empty() || !seen.insert(url.clone()) {
                    return None;
                }
                Some(match f {
                    FeedSpec::Url(_) => FeedSpec::Url(url),
                    FeedSpec::Full { emoji, name, .. } => FeedSpec::Full { url, emoji, name },
                })
            })
            .collect();

        let mut kw_seen = HashSet::new();
        self.blocked_keywords = self
            .blocked_keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && kw_seen.insert(k.to_lowercase()))
            .collect();

        self.sources
            .retain(|s| !s.pattern.trim().is_empty() && !s.name.trim().is_empty());
        self
    }

    /// Replace the feed list with bare URLs (e.g. from `FEED_URLS`).
    pub fn with_urls(mut self, urls: &[String]) -> Self {
        self.feeds = urls.iter().cloned().map(FeedSpec::Url).collect();
        self.cleaned()
    }

    /// First table entry whose pattern occurs in the URL, else "Unknown".
    pub fn source_name_for(&self, url: &str) -> String {
        let lowered = url.to_lowercase();
        self.sources
            .iter()
            .find(|s| lowered.contains(&s.pattern.trim().to_lowercase()))
            .map(|s| s.name.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SOURCE_NAME.to_string())
    }

    pub fn feed_sources(&self) -> Vec<FeedSource> {
        self.feeds
            .iter()
            .map(|spec| match spec {
                FeedSpec::Url(url) => FeedSource::new(url.clone(), self.source_name_for(url)),
                FeedSpec::Full { url, emoji, name } => {
                    let name = name
                        .as_deref()
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(str::to_string)
                        .unwrap_or_else(|| self.source_name_for(url));
                    FeedSource::new(url.clone(), name)
                        .with_emoji(emoji.clone().unwrap_or_else(|| DEFAULT_EMOJI.to_string()))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
blocked_keywords = [" BBB ", "", "bbb", "horóscopo"]
feeds = [
  "https://g1.globo.com/rss/g1/",
  { url = "https://rss.uol.com.br/feed/noticias.xml", emoji = "🟡" },
  { url = "https://g1.globo.com/rss/g1/" },
  { url = "https://blog.test/atom", name = "Blog" },
  "  ",
]

[[sources]]
pattern = "g1.globo"
name = "G1"

[[sources]]
pattern = "UOL.com"
name = "UOL"
"#;

    #[test]
    fn toml_catalog_is_cleaned() {
        let c = FeedCatalog::parse(TOML, "toml").unwrap();
        assert_eq!(c.feeds.len(), 3);
        assert_eq!(c.blocked_keywords, vec!["BBB".to_string(), "horóscopo".to_string()]);
    }

    #[test]
    fn names_resolve_by_substring_then_default() {
        let c = FeedCatalog::parse(TOML, "toml").unwrap();
        let feeds = c.feed_sources();
        assert_eq!(feeds[0].name, "G1");
        assert_eq!(feeds[0].emoji, DEFAULT_EMOJI);
        assert_eq!(feeds[1].name, "UOL");
        assert_eq!(feeds[1].emoji, "🟡");
        assert_eq!(feeds[2].name, "Blog");
        assert_eq!(c.source_name_for("https://elsewhere.test/rss"), "Unknown");
    }

    #[test]
    fn json_shape_is_accepted() {
        let json = r#"{"feeds": ["https://a.test/rss"], "sources": [{"pattern": "a.test", "name": "A"}]}"#;
        let c = FeedCatalog::parse(json, "json").unwrap();
        assert_eq!(c.feed_sources()[0].name, "A");
        // unknown extension falls back to JSON after TOML fails
        assert!(FeedCatalog::parse(json, "").is_ok());
    }

    #[test]
    fn url_override_replaces_feed_list() {
        let c = FeedCatalog::parse(TOML, "toml")
            .unwrap()
            .with_urls(&["https://g1.globo.com/economia".into(), "".into()]);
        let feeds = c.feed_sources();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].name, "G1");
    }
}
