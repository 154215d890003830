//! # Dedup Store
//!
//! Durable record of which article identities were already delivered, keyed by
//! delivery scope (the destination channel id).
//!
//! - `record` is an idempotent upsert.
//! - `exists` failures must be read as "already sent"; use [`seen_in`] /
//!   [`seen_everywhere`] instead of calling `exists` directly.
//! - The JSON backing file maps channel id → ordered list of identity hashes
//!   and is rewritten in full on `flush`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::ingest::types::ArticleId;

/// Stored title snippet length.
pub const TITLE_SNIPPET_CHARS: usize = 200;

pub trait DedupStore: Send + Sync {
    fn exists(&self, scope: &str, id: &ArticleId) -> Result<bool>;
    fn record(&mut self, scope: &str, id: &ArticleId, title: &str) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

/// Fail-safe existence check: storage errors count as "already sent".
pub fn seen_in(store: &dyn DedupStore, scope: &str, id: &ArticleId) -> bool {
    match store.exists(scope, id) {
        Ok(found) => found,
        Err(e) => {
            warn!(scope, id = %id, error = %e, "dedup lookup failed; assuming already sent");
            true
        }
    }
}

/// True when `id` was delivered to every scope (nothing left to do for it).
pub fn seen_everywhere(store: &dyn DedupStore, scopes: &[String], id: &ArticleId) -> bool {
    scopes.iter().all(|s| seen_in(store, s, id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRecord {
    pub id: ArticleId,
    pub title: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct ScopeHistory {
    order: Vec<ArticleId>,
    index: HashSet<ArticleId>,
    records: HashMap<ArticleId, SeenRecord>,
}

fn corrupt_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    path.with_file_name(name)
}

/// In-memory history synchronized to a JSON file.
#[derive(Debug, Default)]
pub struct JsonHistoryStore {
    path: Option<PathBuf>,
    scopes: BTreeMap<String, ScopeHistory>,
    dirty: bool,
}

impl JsonHistoryStore {
    /// Store that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Empty store that will be written to `path` on flush.
    pub fn empty_at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Load from `path`. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut store = Self::empty_at(path);
        if !path.exists() {
            debug!(path = %path.display(), "no history file yet");
            return Ok(store);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("reading history from {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(store);
        }
        let raw: BTreeMap<String, Vec<String>> = serde_json::from_str(&content)
            .with_context(|| format!("parsing history file {}", path.display()))?;

        for (scope, ids) in raw {
            let hist = store.scopes.entry(scope).or_default();
            for id in ids {
                let id = ArticleId::from_hex(id);
                if hist.index.insert(id.clone()) {
                    hist.order.push(id);
                }
            }
        }
        Ok(store)
    }

    /// [`load`](Self::load) for startup. A file that cannot be read or parsed
    /// is moved aside to `<name>.corrupt` so the first flush does not erase
    /// it. If it cannot be moved, the store runs without a file this session.
    pub fn load_or_recover(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let err = match Self::load(path) {
            Ok(store) => return store,
            Err(e) => e,
        };
        let aside = corrupt_path(path);
        match fs::rename(path, &aside) {
            Ok(()) => {
                warn!(error = %format!("{err:#}"), moved_to = %aside.display(), "history unreadable, starting empty");
                Self::empty_at(path)
            }
            Err(e) => {
                warn!(
                    error = %format!("{err:#}"),
                    rename_error = %e,
                    "history unreadable and could not be moved aside; not persisting this run"
                );
                Self::in_memory()
            }
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self, scope: &str) -> usize {
        self.scopes.get(scope).map(|h| h.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.values().all(|h| h.order.is_empty())
    }

    /// Metadata for identities recorded during this process lifetime.
    pub fn record_for(&self, scope: &str, id: &ArticleId) -> Option<&SeenRecord> {
        self.scopes.get(scope).and_then(|h| h.records.get(id))
    }

    fn snapshot(&self) -> BTreeMap<&str, Vec<&str>> {
        self.scopes
            .iter()
            .map(|(scope, h)| (scope.as_str(), h.order.iter().map(|id| id.as_str()).collect()))
            .collect()
    }
}

impl DedupStore for JsonHistoryStore {
    fn exists(&self, scope: &str, id: &ArticleId) -> Result<bool> {
        Ok(self
            .scopes
            .get(scope)
            .is_some_and(|h| h.index.contains(id)))
    }

    fn record(&mut self, scope: &str, id: &ArticleId, title: &str) -> Result<()> {
        let hist = self.scopes.entry(scope.to_string()).or_default();
        if !hist.index.insert(id.clone()) {
            return Ok(());
        }
        hist.order.push(id.clone());
        hist.records.insert(
            id.clone(),
            SeenRecord {
                id: id.clone(),
                title: title.chars().take(TITLE_SNIPPET_CHARS).collect(),
                sent_at: Utc::now(),
            },
        );
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if !self.dirty && path.exists() {
            return Ok(());
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating history dir {}", dir.display()))?;
        }
        let body = serde_json::to_vec_pretty(&self.snapshot()).context("serializing history")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("replacing {}", path.display()))?;

        self.dirty = false;
        debug!(path = %path.display(), "history flushed");
        Ok(())
    }
}
