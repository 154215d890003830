//! newswire-relay: binary entrypoint
//! Loads `.env` and the feed catalog, wires fetcher, filter, balancer and the
//! Discord sender into the cycle driver, and runs until Ctrl-C / SIGTERM.
//!
//! `--once` runs a single cycle and exits (cron-style deployments).

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use newswire_relay::config::catalog::DEFAULT_TOML_PATH;
use newswire_relay::config::{FeedCatalog, Settings};
use newswire_relay::delivery::{DailyQuota, DeliveryScheduler};
use newswire_relay::driver::{CycleDriver, DriverConfig, Session};
use newswire_relay::ingest::balance::{RecentSources, SourceBalancer};
use newswire_relay::ingest::fetcher::HttpFeedClient;
use newswire_relay::ingest::filter::EntryFilter;
use newswire_relay::metrics::Telemetry;
use newswire_relay::notify::discord::DiscordClient;
use newswire_relay::notify::{LibreTranslate, Passthrough, Translator};
use newswire_relay::shutdown;
use newswire_relay::store::JsonHistoryStore;

/// `RUST_LOG` wins; otherwise `info`. `json` selects structured output.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when the file is absent.
    let _ = dotenvy::dotenv();
    let settings = Settings::from_env().context("invalid configuration")?;
    init_tracing(settings.log_json);
    settings.warn_rejected();

    let once = std::env::args().skip(1).any(|a| a == "--once");

    let mut catalog = FeedCatalog::load_default()?;
    if !settings.feed_urls.is_empty() {
        catalog = catalog.with_urls(&settings.feed_urls);
    }
    let feeds = catalog.feed_sources();
    if feeds.is_empty() {
        bail!("no feeds configured: add them to {DEFAULT_TOML_PATH} or set FEED_URLS");
    }

    let store = JsonHistoryStore::load_or_recover(&settings.history_path);

    let translator: Arc<dyn Translator> = match &settings.translate_url {
        Some(url) => Arc::new(LibreTranslate::new(
            url.clone(),
            settings.translate_target.clone(),
            settings.translate_api_key.clone(),
        )?),
        None => Arc::new(Passthrough),
    };
    info!(translator = translator.name(), "title translation");

    let sender = Arc::new(
        DiscordClient::new(settings.discord_token.clone()).with_api_base(settings.discord_api_base.clone()),
    );
    let client = Arc::new(HttpFeedClient::new(settings.fetch_config())?);

    let scheduler = DeliveryScheduler::new(settings.delivery_config(), settings.window()?, translator);
    let filter = EntryFilter::new(settings.filter_policy(catalog.blocked_keywords.clone()));
    let session = Session::new(
        Box::new(store),
        feeds,
        filter,
        scheduler,
        DailyQuota::new(settings.daily_limit),
    )
    .with_config(DriverConfig {
        interval: settings.check_interval,
        error_backoff: settings.error_backoff,
        cycle_deadline: settings.cycle_deadline,
        ingest: settings.ingest_options(),
    })
    .with_balancer(
        SourceBalancer::new(settings.max_source_run),
        RecentSources::with_capacity(settings.recent_sources_cap),
    );

    let telemetry = Telemetry::init()?;
    let (trigger, stop) = shutdown::channel();
    shutdown::spawn_signal_listener(trigger);

    if let Some(addr) = settings.status_addr {
        let status_stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = telemetry.serve(addr, status_stop).await {
                warn!("status endpoint stopped: {e:#}");
            }
        });
    }

    let driver = CycleDriver::new(client, sender, session, stop);
    if once {
        let report = driver.run_once().await?;
        info!(
            fetched = report.fetched,
            sent = report.delivery.sent,
            skipped = ?report.delivery.skipped,
            "single cycle finished"
        );
    } else {
        driver.run().await;
    }
    Ok(())
}
