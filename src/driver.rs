// src/driver.rs
//! Cycle Driver: one always-on loop of ingest → balance → deliver, gated by the
//! operating window and the daily quota, with a per-cycle deadline and an
//! error backoff. All mutable state lives in [`Session`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local, Utc};
use metrics::{counter, gauge};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};

use crate::delivery::{
    DailyQuota, DeliveryReport, DeliveryScheduler, DeliveryState, SkipReason,
};
use crate::ingest::balance::{RecentSources, SourceBalancer};
use crate::ingest::filter::{EntryFilter, FilterStats};
use crate::ingest::types::{FeedClient, FeedSource};
use crate::ingest::{collect_candidates, IngestOptions};
use crate::notify::ChannelSender;
use crate::shutdown::Shutdown;
use crate::store::DedupStore;

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Sleep after a completed or skipped cycle.
    pub interval: Duration,
    /// Sleep after a failed or timed-out cycle.
    pub error_backoff: Duration,
    /// Upper bound for one whole cycle.
    pub cycle_deadline: Duration,
    pub ingest: IngestOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1800),
            error_backoff: Duration::from_secs(60),
            cycle_deadline: Duration::from_secs(600),
            ingest: IngestOptions::default(),
        }
    }
}

/// Everything a cycle reads or mutates.
pub struct Session {
    pub store: Box<dyn DedupStore>,
    pub quota: DailyQuota,
    pub recent: RecentSources,
    pub feeds: Vec<FeedSource>,
    pub filter: EntryFilter,
    pub balancer: SourceBalancer,
    pub scheduler: DeliveryScheduler,
    pub config: DriverConfig,
    rng: StdRng,
}

impl Session {
    pub fn new(
        store: Box<dyn DedupStore>,
        feeds: Vec<FeedSource>,
        filter: EntryFilter,
        scheduler: DeliveryScheduler,
        quota: DailyQuota,
    ) -> Self {
        Self {
            store,
            quota,
            recent: RecentSources::default(),
            feeds,
            filter,
            balancer: SourceBalancer::default(),
            scheduler,
            config: DriverConfig::default(),
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_balancer(mut self, balancer: SourceBalancer, recent: RecentSources) -> Self {
        self.balancer = balancer;
        self.recent = recent;
        self
    }

    /// Fixed shuffle order (tests, reproducible runs).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn flush_store(&mut self) {
        if let Err(e) = self.store.flush() {
            warn!(error = %e, "history flush failed");
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct CycleReport {
    pub fetched: usize,
    pub failed_feeds: Vec<String>,
    pub filter: FilterStats,
    /// Articles handed to delivery after balancing.
    pub queued: usize,
    pub delivery: DeliveryReport,
    /// Shutdown arrived during ingestion; nothing was delivered.
    pub interrupted: bool,
}

/// Totals for one [`CycleDriver::run`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub skipped: usize,
    pub failures: usize,
}

pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

pub fn local_now() -> DateTime<FixedOffset> {
    Local::now().fixed_offset()
}

pub struct CycleDriver {
    client: Arc<dyn FeedClient>,
    sender: Arc<dyn ChannelSender>,
    session: Session,
    shutdown: Shutdown,
    clock: Clock,
}

impl CycleDriver {
    pub fn new(
        client: Arc<dyn FeedClient>,
        sender: Arc<dyn ChannelSender>,
        session: Session,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            client,
            sender,
            session,
            shutdown,
            clock: Arc::new(local_now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// One ingest → balance → deliver pass at `now`.
    ///
    /// Ingestion is skipped entirely when the gates are closed. A cycle in
    /// which every feed failed is still a normal cycle: feed errors are
    /// warnings, and the next attempt waits the regular interval.
    pub async fn run_cycle(&mut self, now: DateTime<FixedOffset>) -> Result<CycleReport> {
        let s = &mut self.session;
        let mut report = CycleReport::default();

        if let Some(reason) = s.scheduler.gate(&mut s.quota, now) {
            report.delivery.skipped = Some(reason);
            return Ok(report);
        }

        let ingest = collect_candidates(
            self.client.as_ref(),
            &s.feeds,
            &s.filter,
            s.store.as_ref(),
            &s.scheduler.config().channels,
            &s.config.ingest,
            &self.shutdown,
            now,
        )
        .await;

        report.fetched = ingest.fetched;
        report.failed_feeds = ingest.failed;
        report.filter = ingest.stats;

        if ingest.interrupted {
            report.interrupted = true;
            return Ok(report);
        }
        if report.fetched == 0 && !s.feeds.is_empty() {
            warn!(feeds = s.feeds.len(), "no feed could be fetched this cycle");
            counter!("cycles_total").increment(1);
            return Ok(report);
        }

        let queue = s.balancer.balance(ingest.pool, &s.recent, &mut s.rng);
        report.queued = queue.len();

        let state = DeliveryState {
            store: s.store.as_mut(),
            quota: &mut s.quota,
            recent: &mut s.recent,
        };
        report.delivery = s
            .scheduler
            .deliver(queue, self.sender.as_ref(), state, now)
            .await;

        counter!("cycles_total").increment(1);
        gauge!("last_cycle_ts").set(Utc::now().timestamp() as f64);
        info!(
            fetched = report.fetched,
            failed = report.failed_feeds.len(),
            accepted = report.filter.accepted,
            sent = report.delivery.sent,
            dropped = report.delivery.dropped,
            quota_used = s.quota.sent(),
            quota_limit = s.quota.limit(),
            "cycle complete"
        );
        Ok(report)
    }

    /// Loop until shutdown, then flush and close.
    pub async fn run(mut self) -> RunSummary {
        let mut summary = RunSummary::default();
        info!(
            feeds = self.session.feeds.len(),
            channels = self.session.scheduler.config().channels.len(),
            window_start = %self.session.scheduler.window().start(),
            window_end = %self.session.scheduler.window().end(),
            daily_limit = self.session.quota.limit(),
            "driver started"
        );

        loop {
            let now = (self.clock)();
            if self.session.quota.roll_over(now.date_naive()) {
                info!(day = %now.date_naive(), "daily quota reset");
            }
            if self.shutdown.is_triggered() {
                break;
            }

            let pause = match self.session.scheduler.gate(&mut self.session.quota, now) {
                Some(SkipReason::OutsideWindow) => {
                    summary.skipped += 1;
                    let next = self.session.scheduler.window().next_opening(now);
                    info!(next_opening = %next.format("%d/%m %H:%M"), "outside operating hours; pausing");
                    self.session.config.interval
                }
                Some(SkipReason::QuotaReached) => {
                    summary.skipped += 1;
                    info!(limit = self.session.quota.limit(), "daily quota reached; waiting for tomorrow");
                    self.session.config.interval
                }
                None => {
                    let deadline = self.session.config.cycle_deadline;
                    let outcome = tokio::time::timeout(deadline, self.run_cycle(now)).await;
                    match outcome {
                        Ok(Ok(_)) => {
                            summary.cycles += 1;
                            self.session.config.interval
                        }
                        Ok(Err(e)) => {
                            summary.failures += 1;
                            counter!("cycle_failures_total").increment(1);
                            error!("cycle failed: {e:#}");
                            self.session.flush_store();
                            self.session.config.error_backoff
                        }
                        Err(_) => {
                            summary.failures += 1;
                            counter!("cycle_failures_total").increment(1);
                            error!(deadline_secs = deadline.as_secs(), "cycle exceeded its deadline");
                            self.session.flush_store();
                            self.session.config.error_backoff
                        }
                    }
                }
            };

            if !self.pause(pause).await {
                break;
            }
        }

        info!(?summary, "driver stopping");
        self.finish().await;
        summary
    }

    /// Single cycle at the current time, then flush and close.
    pub async fn run_once(mut self) -> Result<CycleReport> {
        let now = (self.clock)();
        self.session.quota.roll_over(now.date_naive());
        let result = self.run_cycle(now).await;
        self.finish().await;
        result
    }

    /// False when shutdown interrupted the sleep.
    async fn pause(&mut self, d: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(d) => true,
            _ = self.shutdown.wait() => false,
        }
    }

    async fn finish(&mut self) {
        self.session.flush_store();
        self.client.close().await;
        self.sender.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryConfig, OperatingWindow};
    use crate::ingest::fetcher::FetchError;
    use crate::ingest::filter::FilterPolicy;
    use crate::ingest::types::{FeedEntry, ParsedFeed};
    use crate::notify::{ChannelHandle, Passthrough, SendError};
    use crate::store::JsonHistoryStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;

    struct Down;

    #[async_trait]
    impl FeedClient for Down {
        async fn fetch(&self, _feed: &FeedSource) -> Result<ParsedFeed, FetchError> {
            Err(FetchError::Timeout)
        }
    }

    struct OneEntry;

    #[async_trait]
    impl FeedClient for OneEntry {
        async fn fetch(&self, feed: &FeedSource) -> Result<ParsedFeed, FetchError> {
            Ok(ParsedFeed {
                title: None,
                entries: vec![FeedEntry {
                    title: format!("{} headline", feed.name),
                    link: format!("{}/a", feed.url),
                    published: Some(Utc::now()),
                }],
            })
        }
    }

    #[derive(Default)]
    struct Outbox(Mutex<Vec<String>>);

    #[async_trait]
    impl ChannelSender for Outbox {
        async fn resolve(&self, id: &str) -> Result<ChannelHandle, SendError> {
            Ok(ChannelHandle::new(id))
        }
        async fn send(&self, _c: &ChannelHandle, text: &str) -> Result<(), SendError> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    fn session(window: OperatingWindow) -> Session {
        let scheduler = DeliveryScheduler::new(
            DeliveryConfig {
                channels: vec!["c1".into()],
                batch_size: 5,
                send_delay: Duration::ZERO,
            },
            window,
            Arc::new(Passthrough),
        );
        Session::new(
            Box::new(JsonHistoryStore::in_memory()),
            vec![
                FeedSource::new("https://a.test/rss", "A"),
                FeedSource::new("https://b.test/rss", "B"),
            ],
            EntryFilter::new(FilterPolicy::default()),
            scheduler,
            DailyQuota::new(10),
        )
        .with_config(DriverConfig {
            ingest: IngestOptions {
                batch_width: 2,
                batch_pause: Duration::ZERO,
            },
            ..DriverConfig::default()
        })
        .with_seed(7)
    }

    fn noon() -> DateTime<FixedOffset> {
        let now = Utc::now().fixed_offset();
        now.timezone()
            .from_local_datetime(&now.date_naive().and_hms_opt(12, 0, 0).unwrap())
            .unwrap()
    }

    /// Never answers within any sane deadline. Records when each fetch began.
    struct Stalled {
        origin: tokio::time::Instant,
        starts: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl FeedClient for Stalled {
        async fn fetch(&self, _feed: &FeedSource) -> Result<ParsedFeed, FetchError> {
            self.starts.lock().push(self.origin.elapsed());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(FetchError::Timeout)
        }
    }

    #[tokio::test]
    async fn all_feeds_failing_is_a_quiet_cycle() {
        let outbox = Arc::new(Outbox::default());
        let mut d = CycleDriver::new(
            Arc::new(Down),
            outbox.clone(),
            session(OperatingWindow::always()),
            Shutdown::never(),
        );
        let r = d.run_cycle(noon()).await.unwrap();
        assert_eq!(r.fetched, 0);
        assert_eq!(r.failed_feeds.len(), 2);
        assert_eq!(r.delivery.sent, 0);
        assert!(outbox.0.lock().is_empty());
    }

    #[tokio::test]
    async fn closed_window_skips_ingestion() {
        let outbox = Arc::new(Outbox::default());
        let window = OperatingWindow::from_hours(1, 2).unwrap();
        let mut d = CycleDriver::new(Arc::new(Down), outbox.clone(), session(window), Shutdown::never());
        let r = d.run_cycle(noon()).await.unwrap();
        assert_eq!(r.delivery.skipped, Some(SkipReason::OutsideWindow));
        assert_eq!(r.fetched, 0);
        assert!(outbox.0.lock().is_empty());
    }

    #[tokio::test]
    async fn cycle_sends_then_dedups() {
        let outbox = Arc::new(Outbox::default());
        let mut d = CycleDriver::new(
            Arc::new(OneEntry),
            outbox.clone(),
            session(OperatingWindow::always()),
            Shutdown::never(),
        );
        let now = Utc::now().fixed_offset();
        let first = d.run_cycle(now).await.unwrap();
        assert_eq!(first.delivery.sent, 2);
        let second = d.run_cycle(now).await.unwrap();
        assert_eq!(second.filter.duplicate, 2);
        assert_eq!(second.delivery.sent, 0);
        assert_eq!(outbox.0.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn feed_outage_waits_the_regular_interval() {
        let (trigger, shutdown) = crate::shutdown::channel();
        let d = CycleDriver::new(
            Arc::new(Down),
            Arc::new(Outbox::default()),
            session(OperatingWindow::always()),
            shutdown,
        )
        .with_clock(Arc::new(noon));

        let handle = tokio::spawn(d.run());
        // t=0 only; the next cycle is due at t=1800s
        tokio::time::sleep(Duration::from_secs(90)).await;
        trigger.trigger();
        let summary = handle.await.unwrap();
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_overrun_backs_off_and_flushes_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sent_history.json");
        let client = Arc::new(Stalled {
            origin: tokio::time::Instant::now(),
            starts: Mutex::new(Vec::new()),
        });

        let mut s = session(OperatingWindow::always());
        s.store = Box::new(JsonHistoryStore::empty_at(&path));
        s.feeds.truncate(1);
        s.config.cycle_deadline = Duration::from_secs(10);
        s.config.error_backoff = Duration::from_secs(60);

        let (trigger, shutdown) = crate::shutdown::channel();
        let d = CycleDriver::new(client.clone(), Arc::new(Outbox::default()), s, shutdown)
            .with_clock(Arc::new(noon));
        let handle = tokio::spawn(d.run());

        // first cycle starts at t=0 and is cut off at t=10s
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(path.exists(), "history not flushed after the timeout");
        assert_eq!(client.starts.lock().len(), 1);

        // second cycle starts at t=70s (10s + backoff) and is cut off at t=80s
        tokio::time::sleep(Duration::from_secs(64)).await;
        trigger.trigger();
        let summary = handle.await.unwrap();

        assert_eq!(summary.failures, 2);
        assert_eq!(summary.cycles, 0);
        let starts: Vec<u64> = client.starts.lock().iter().map(|d| d.as_secs()).collect();
        assert_eq!(starts, vec![0, 70]);
    }
}
