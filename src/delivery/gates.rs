// src/delivery/gates.rs
//! Operating-hours window and daily send quota.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, TimeZone};
use metrics::gauge;

/// Local hours during which delivery is allowed. Both ends inclusive;
/// `start > end` wraps past midnight (e.g. 22 → 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl Default for OperatingWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl OperatingWindow {
    pub fn from_hours(start_hour: u32, end_hour: u32) -> Result<Self> {
        let (Some(start), Some(end)) = (
            NaiveTime::from_hms_opt(start_hour, 0, 0),
            NaiveTime::from_hms_opt(end_hour, 0, 0),
        ) else {
            bail!("operating hours must be 0..=23, got {start_hour}..{end_hour}");
        };
        Ok(Self { start, end })
    }

    /// Window covering the whole day.
    pub fn always() -> Self {
        Self {
            start: NaiveTime::MIN,
            end: NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN),
        }
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= t && t <= self.end
        } else {
            t >= self.start || t <= self.end
        }
    }

    pub fn is_open(&self, now: DateTime<FixedOffset>) -> bool {
        self.contains(now.time())
    }

    /// Next moment the window opens (`now` itself when already open).
    pub fn next_opening(&self, now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        if self.is_open(now) {
            return now;
        }
        let tz = now.timezone();
        let mut day = now.date_naive();
        if now.time() > self.start {
            day += ChronoDuration::days(1);
        }
        tz.from_local_datetime(&day.and_time(self.start))
            .single()
            .unwrap_or(now)
    }
}

/// Messages allowed per local calendar day.
#[derive(Debug, Clone)]
pub struct DailyQuota {
    limit: u32,
    sent: u32,
    day: Option<NaiveDate>,
}

impl DailyQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            sent: 0,
            day: None,
        }
    }

    /// Reset the counter when `today` differs from the tracked day.
    /// Returns true when a previous day's count was cleared.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.day == Some(today) {
            return false;
        }
        let had_day = self.day.is_some();
        self.day = Some(today);
        self.sent = 0;
        gauge!("daily_quota_used").set(0.0);
        had_day
    }

    pub fn record_send(&mut self) {
        self.sent = self.sent.saturating_add(1);
        gauge!("daily_quota_used").set(self.sent as f64);
    }

    pub fn exhausted(&self) -> bool {
        self.sent >= self.limit
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.sent)
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn day(&self) -> Option<NaiveDate> {
        self.day
    }
}
