// ABOUTME: Strava API quota manager over the shared cache, enforcing daily and 15-minute windows
// ABOUTME: Degrades open when the cache is unreachable; never crashes a worker on cache failure
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::cache::{factory::Cache, CacheProvider};
use crate::constants::quota;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// Snapshot of both quota windows
#[derive(Debug, Clone, Serialize)]
pub struct QuotaStatus {
    pub daily_used: u64,
    pub daily_limit: u64,
    pub short_used: u64,
    pub short_limit: u64,
    pub next_short_reset: DateTime<Utc>,
    pub next_daily_reset: DateTime<Utc>,
}

/// Seconds remaining until the next UTC midnight.
///
/// Never returns 0: a counter created at exactly 00:00 UTC must still get a
/// positive TTL.
#[must_use]
pub fn seconds_until_midnight_utc(now: DateTime<Utc>) -> u64 {
    let midnight = (now + ChronoDuration::days(1))
        .with_hour(0)
        .and_then(|t| t.with_minute(0))
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    let secs = (midnight - now).num_seconds();
    secs.max(1) as u64
}

/// Cross-process quota accounting for outgoing Strava calls.
///
/// Two rolling counters live in the shared cache: a daily window that resets
/// at UTC midnight and a 15-minute window. All workers in all processes see
/// the same counts.
#[derive(Clone)]
pub struct QuotaManager {
    cache: Cache,
    daily_limit: u64,
    short_limit: u64,
}

impl QuotaManager {
    /// Create a manager with the stock Strava limits
    #[must_use]
    pub fn new(cache: Cache) -> Self {
        Self::with_limits(cache, quota::DAILY_LIMIT, quota::SHORT_LIMIT)
    }

    /// Create a manager with custom limits (tests, constrained deployments)
    #[must_use]
    pub const fn with_limits(cache: Cache, daily_limit: u64, short_limit: u64) -> Self {
        Self {
            cache,
            daily_limit,
            short_limit,
        }
    }

    /// Configured daily limit
    #[must_use]
    pub const fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    /// Read a counter, degrading to 0 when the cache is down
    async fn safe_counter(&self, key: &str, repair_ttl: Duration) -> u64 {
        match self.cache.counter(key, repair_ttl).await {
            Ok(value) => value,
            Err(e) => {
                warn!("quota cache unavailable (read {key}): {e}");
                0
            }
        }
    }

    /// Increment a counter, degrading to a no-op when the cache is down
    async fn safe_incr(&self, key: &str, ttl: Duration) {
        if let Err(e) = self.cache.incr(key, ttl).await {
            warn!("quota cache unavailable (incr {key}): {e}");
        }
    }

    /// Check both windows before an upstream call.
    ///
    /// Returns `false` when the daily budget is spent. When only the short
    /// window is full, blocks the calling worker until the window ends and
    /// then returns `true`.
    pub async fn may_proceed(&self) -> bool {
        let daily_ttl = Duration::from_secs(seconds_until_midnight_utc(Utc::now()));
        let daily = self.safe_counter(quota::DAILY_KEY, daily_ttl).await;
        if daily >= self.daily_limit {
            warn!("daily Strava quota exhausted ({daily}/{})", self.daily_limit);
            return false;
        }

        let short_ttl = Duration::from_secs(quota::SHORT_WINDOW_SECS);
        let short = self.safe_counter(quota::SHORT_KEY, short_ttl).await;
        if short >= self.short_limit {
            let wait = match self.cache.ttl(quota::SHORT_KEY).await {
                Ok(Some(remaining)) => remaining.max(Duration::from_secs(1)),
                Ok(None) => Duration::from_secs(1),
                Err(e) => {
                    warn!("quota cache unavailable (ttl {}): {e}", quota::SHORT_KEY);
                    Duration::from_secs(quota::SHORT_WAIT_FALLBACK_SECS)
                }
            };
            info!("15-minute Strava quota reached, waiting {}s", wait.as_secs());
            tokio::time::sleep(wait).await;
        }

        true
    }

    /// Record one upstream call against both windows
    pub async fn record_use(&self) {
        let daily_ttl = Duration::from_secs(seconds_until_midnight_utc(Utc::now()));
        self.safe_incr(quota::DAILY_KEY, daily_ttl).await;
        self.safe_incr(quota::SHORT_KEY, Duration::from_secs(quota::SHORT_WINDOW_SECS))
            .await;
    }

    /// Pin the daily counter to its limit so the whole fleet stops until the
    /// next UTC midnight. Called when the provider answers HTTP 429.
    pub async fn force_daily_exhausted(&self) {
        let fallback = Duration::from_secs(seconds_until_midnight_utc(Utc::now()));
        if let Err(e) = self
            .cache
            .set_counter(quota::DAILY_KEY, self.daily_limit, fallback)
            .await
        {
            warn!("quota cache unavailable (set {}): {e}", quota::DAILY_KEY);
        }
        warn!("daily Strava quota forced to exhausted after HTTP 429");
    }

    /// Report both windows; reset instants come from the cache TTLs when
    /// available.
    pub async fn status(&self) -> QuotaStatus {
        let now = Utc::now();
        let daily_ttl = Duration::from_secs(seconds_until_midnight_utc(now));
        let short_ttl = Duration::from_secs(quota::SHORT_WINDOW_SECS);

        let daily_used = self.safe_counter(quota::DAILY_KEY, daily_ttl).await;
        let short_used = self.safe_counter(quota::SHORT_KEY, short_ttl).await;

        let next_daily_reset = match self.cache.ttl(quota::DAILY_KEY).await {
            Ok(Some(remaining)) => now + ChronoDuration::seconds(remaining.as_secs() as i64),
            _ => now + ChronoDuration::seconds(seconds_until_midnight_utc(now) as i64),
        };
        let next_short_reset = match self.cache.ttl(quota::SHORT_KEY).await {
            Ok(Some(remaining)) => now + ChronoDuration::seconds(remaining.as_secs() as i64),
            _ => now + ChronoDuration::seconds(quota::SHORT_WINDOW_SECS as i64),
        };

        QuotaStatus {
            daily_used,
            daily_limit: self.daily_limit,
            short_used,
            short_limit: self.short_limit,
            next_short_reset,
            next_daily_reset,
        }
    }
}
