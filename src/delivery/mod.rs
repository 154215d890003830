// src/delivery/mod.rs
//! Delivery Scheduler: drains the balanced queue into every configured
//! channel under the operating window, the daily quota and a per-cycle batch
//! limit. A failed send only skips that one channel/article.

pub mod gates;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use metrics::counter;
use tracing::{debug, info, warn};

use crate::ingest::balance::RecentSources;
use crate::ingest::types::Article;
use crate::notify::{format_message, ChannelHandle, ChannelSender, SendError, Translator};
use crate::store::{seen_in, DedupStore};

pub use gates::{DailyQuota, OperatingWindow};

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub channels: Vec<String>,
    /// Articles dispatched per cycle.
    pub batch_size: usize,
    /// Pause after every send attempt.
    pub send_delay: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            batch_size: 2,
            send_delay: Duration::from_millis(1500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    OutsideWindow,
    QuotaReached,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub skipped: Option<SkipReason>,
    /// Successful channel sends.
    pub sent: usize,
    /// Failed channel sends.
    pub failed: usize,
    /// Articles dispatched to at least one channel.
    pub articles: usize,
    /// Queued articles left unsent this cycle (not carried over).
    pub dropped: usize,
}

/// Mutable process state the scheduler works on.
pub struct DeliveryState<'a> {
    pub store: &'a mut dyn DedupStore,
    pub quota: &'a mut DailyQuota,
    pub recent: &'a mut RecentSources,
}

pub struct DeliveryScheduler {
    cfg: DeliveryConfig,
    window: OperatingWindow,
    translator: Arc<dyn Translator>,
}

impl DeliveryScheduler {
    pub fn new(cfg: DeliveryConfig, window: OperatingWindow, translator: Arc<dyn Translator>) -> Self {
        Self {
            cfg,
            window,
            translator,
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.cfg
    }

    pub fn window(&self) -> &OperatingWindow {
        &self.window
    }

    /// Gate check only; does not touch the queue.
    pub fn gate(&self, quota: &mut DailyQuota, now: DateTime<FixedOffset>) -> Option<SkipReason> {
        quota.roll_over(now.date_naive());
        if !self.window.is_open(now) {
            return Some(SkipReason::OutsideWindow);
        }
        if quota.exhausted() {
            return Some(SkipReason::QuotaReached);
        }
        None
    }

    pub async fn deliver(
        &self,
        mut queue: VecDeque<Article>,
        sender: &dyn ChannelSender,
        state: DeliveryState<'_>,
        now: DateTime<FixedOffset>,
    ) -> DeliveryReport {
        let DeliveryState {
            store,
            quota,
            recent,
        } = state;
        let mut report = DeliveryReport::default();

        if let Some(reason) = self.gate(quota, now) {
            report.skipped = Some(reason);
            report.dropped = queue.len();
            info!(?reason, dropped = report.dropped, "delivery skipped");
            return report;
        }

        // resolved at most once per cycle; None = unusable this cycle
        let mut handles: HashMap<String, Option<ChannelHandle>> = HashMap::new();

        while report.articles < self.cfg.batch_size && !quota.exhausted() {
            let Some(article) = queue.pop_front() else {
                break;
            };

            let mut attempted = false;
            let mut delivered = false;
            let mut title: Option<String> = None;

            for channel_id in &self.cfg.channels {
                if seen_in(&*store, channel_id, &article.id) {
                    debug!(channel = %channel_id, id = %article.id, "already delivered here");
                    continue;
                }
                if quota.exhausted() {
                    info!(limit = quota.limit(), "daily quota reached mid-batch");
                    break;
                }
                let Some(handle) = resolve_cached(&mut handles, sender, channel_id).await else {
                    continue;
                };

                if title.is_none() {
                    title = Some(self.translated_title(&article).await);
                }
                let text = format_message(&article, title.as_deref().unwrap_or(&article.title));
                attempted = true;

                match sender.send(&handle, &text).await {
                    Ok(()) => {
                        if let Err(e) = store.record(channel_id, &article.id, &article.title) {
                            warn!(channel = %channel_id, error = %e, "could not record delivery");
                        }
                        quota.record_send();
                        report.sent += 1;
                        delivered = true;
                        counter!("messages_sent_total").increment(1);
                        info!(
                            channel = %handle.label(),
                            source = %article.source,
                            quota_used = quota.sent(),
                            quota_limit = quota.limit(),
                            "article sent: {}",
                            article.title
                        );
                    }
                    Err(SendError::Forbidden(msg)) => {
                        report.failed += 1;
                        counter!("message_send_errors_total").increment(1);
                        warn!(
                            channel = %handle.label(),
                            error = %msg,
                            "missing permission to post; check the bot's channel permissions"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        counter!("message_send_errors_total").increment(1);
                        warn!(channel = %handle.label(), error = %e, "send failed; skipping");
                    }
                }

                if !self.cfg.send_delay.is_zero() {
                    tokio::time::sleep(self.cfg.send_delay).await;
                }
            }

            if delivered {
                recent.push(&article.source);
            }
            if attempted {
                report.articles += 1;
            }
        }

        report.dropped = queue.len();

        if let Err(e) = store.flush() {
            warn!(error = %e, "history flush failed; continuing with in-memory state");
        }

        report
    }

    async fn translated_title(&self, article: &Article) -> String {
        match self.translator.translate(&article.title).await {
            Ok(t) => t,
            Err(e) => {
                warn!(translator = self.translator.name(), error = %e, "translation failed; using original title");
                article.title.clone()
            }
        }
    }
}

async fn resolve_cached(
    cache: &mut HashMap<String, Option<ChannelHandle>>,
    sender: &dyn ChannelSender,
    channel_id: &str,
) -> Option<ChannelHandle> {
    if let Some(cached) = cache.get(channel_id) {
        return cached.clone();
    }
    let resolved = match sender.resolve(channel_id).await {
        Ok(h) => Some(h),
        Err(e) => {
            warn!(channel = %channel_id, error = %e, "channel unavailable this cycle");
            None
        }
    };
    cache.insert(channel_id.to_string(), resolved.clone());
    resolved
}
