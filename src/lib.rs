// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod delivery;
pub mod driver;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod shutdown;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::config::{FeedCatalog, Settings};
pub use crate::delivery::{DeliveryReport, DeliveryScheduler, SkipReason};
pub use crate::driver::{CycleDriver, CycleReport, DriverConfig, Session};
pub use crate::ingest::types::{Article, ArticleId, FeedClient, FeedSource};
pub use crate::notify::{ChannelSender, Translator};
pub use crate::store::{DedupStore, JsonHistoryStore};
