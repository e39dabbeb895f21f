//! Usage limiter over the key-value store.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::counter::{CalendarWindow, CounterDecision, LegacyDecision, LegacyUsage, UsageCounter};
use crate::calendar;
use crate::clock::Clock;
use crate::config::CounterConfig;
use crate::error::Result;
use crate::keys::{self, Owner};
use crate::store::{self, KvStore};

/// Counts attempts per owner in calendar-aligned, rolling and legacy windows.
///
/// Every increment is a read-modify-write without coordination: two
/// concurrent increments for the same owner can both read the same base value
/// and one of them is lost. Counts are approximate under bursts from a single
/// owner.
pub struct UsageLimiter {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: CounterConfig,
}

impl UsageLimiter {
    /// Create a new limiter over `store`.
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: CounterConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Get the counter configuration.
    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Increment the counter at `key`, opening a window of `ttl_secs` if none exists.
    ///
    /// The stored `resetAt` is never extended by later increments. The key is
    /// written with an expiry of at least `min_ttl_secs`, so a window may
    /// outlive its nominal end by up to that much.
    pub async fn increment_with_ttl(
        &self,
        key: &str,
        limit: u64,
        ttl_secs: u64,
    ) -> Result<CounterDecision> {
        let now = self.clock.now_secs();
        let existing: Option<UsageCounter> = store::get_json(self.store.as_ref(), key).await?;

        let usage = match existing {
            Some(counter) => UsageCounter {
                count: counter.count.saturating_add(1),
                reset_at: counter.reset_at,
            },
            None => UsageCounter {
                count: 1,
                reset_at: secs_after(now, ttl_secs),
            },
        };

        let ttl = ttl_secs.max(self.config.min_ttl_secs);
        store::put_json(self.store.as_ref(), key, &usage, Some(ttl)).await?;

        let decision = CounterDecision::new(limit, usage);
        trace!(
            key = %key,
            count = usage.count,
            reset_at = usage.reset_at,
            ttl = ttl,
            "Incremented usage counter"
        );
        if !decision.allowed {
            warn!(key = %key, count = usage.count, limit = limit, "Usage limit exceeded");
        }

        Ok(decision)
    }

    /// Increment the owner's counter for the current UTC day.
    pub async fn increment_daily(&self, owner: &Owner, limit: u64) -> Result<CounterDecision> {
        self.increment_calendar(CalendarWindow::Day, owner, limit).await
    }

    /// Increment the owner's counter for the current UTC month.
    pub async fn increment_monthly(&self, owner: &Owner, limit: u64) -> Result<CounterDecision> {
        self.increment_calendar(CalendarWindow::Month, owner, limit).await
    }

    /// Increment the owner's counter for the calendar period containing now.
    ///
    /// The key embeds the period, so a new period addresses a fresh key and
    /// the old one expires through its TTL.
    pub async fn increment_calendar(
        &self,
        window: CalendarWindow,
        owner: &Owner,
        limit: u64,
    ) -> Result<CounterDecision> {
        let now = self.clock.now();
        let key = window.key(&self.config.prefix, owner, now);
        let ttl = window.secs_until_end(now);
        self.increment_with_ttl(&key, limit, ttl).await
    }

    /// Current counter for the owner's calendar period, without counting.
    pub async fn peek_calendar(
        &self,
        window: CalendarWindow,
        owner: &Owner,
    ) -> Result<Option<UsageCounter>> {
        let key = window.key(&self.config.prefix, owner, self.clock.now());
        store::get_json(self.store.as_ref(), &key).await
    }

    /// Increment the owner's rolling counter using the configured window.
    pub async fn increment_rolling(&self, owner: &Owner, limit: u64) -> Result<CounterDecision> {
        self.increment_daily_rolling(owner, limit, self.config.rolling_window_secs)
            .await
    }

    /// Increment the owner's rolling counter.
    ///
    /// The window opens on the first increment (or the first after the previous
    /// window ended) and lasts `window_secs` from that moment, independent of
    /// calendar boundaries. Within a window the key is rewritten with the
    /// remaining time, so it expires when the window ends.
    pub async fn increment_daily_rolling(
        &self,
        owner: &Owner,
        limit: u64,
        window_secs: u64,
    ) -> Result<CounterDecision> {
        let now = self.clock.now_secs();
        let key = keys::rolling_key(&self.config.prefix, owner);
        let existing: Option<UsageCounter> = store::get_json(self.store.as_ref(), &key).await?;

        let (usage, ttl) = match existing {
            Some(counter) if !counter.is_expired(now) => {
                let usage = UsageCounter {
                    count: counter.count.saturating_add(1),
                    reset_at: counter.reset_at,
                };
                (usage, counter.reset_at.saturating_sub(now) as u64)
            }
            _ => {
                let usage = UsageCounter {
                    count: 1,
                    reset_at: secs_after(now, window_secs),
                };
                debug!(
                    key = %key,
                    reset_at = usage.reset_at,
                    "Opened rolling usage window"
                );
                (usage, window_secs)
            }
        };

        let ttl = ttl.max(self.config.min_ttl_secs);
        store::put_json(self.store.as_ref(), &key, &usage, Some(ttl)).await?;

        let decision = CounterDecision::new(limit, usage);
        trace!(
            key = %key,
            count = usage.count,
            reset_at = usage.reset_at,
            ttl = ttl,
            "Incremented rolling counter"
        );
        if !decision.allowed {
            warn!(key = %key, count = usage.count, limit = limit, "Rolling usage limit exceeded");
        }

        Ok(decision)
    }

    /// Current rolling counter for the owner, or `None` if no window is open.
    pub async fn peek_rolling(&self, owner: &Owner) -> Result<Option<UsageCounter>> {
        let key = keys::rolling_key(&self.config.prefix, owner);
        let counter: Option<UsageCounter> = store::get_json(self.store.as_ref(), &key).await?;
        let now = self.clock.now_secs();
        Ok(counter.filter(|c| !c.is_expired(now)))
    }

    /// Drop the owner's rolling window so the next increment opens a new one.
    pub async fn reset_rolling(&self, owner: &Owner) -> Result<()> {
        let key = keys::rolling_key(&self.config.prefix, owner);
        debug!(key = %key, "Resetting rolling usage window");
        self.store.delete(&key).await
    }

    /// Increment a monthly counter stored without expiry.
    ///
    /// Only for reading and extending data written before TTL counters
    /// existed: old month keys are never evicted.
    pub async fn increment_monthly_no_ttl(
        &self,
        prefix: &str,
        owner: &Owner,
        limit: u64,
    ) -> Result<LegacyDecision> {
        let month = calendar::compact_month_tag(self.clock.now());
        let key = keys::legacy_monthly_key(prefix, owner, &month);
        let existing: Option<LegacyUsage> = store::get_json(self.store.as_ref(), &key).await?;

        let usage = LegacyUsage {
            count: existing.unwrap_or_default().count.saturating_add(1),
        };
        store::put_json(self.store.as_ref(), &key, &usage, None).await?;

        trace!(key = %key, count = usage.count, "Incremented legacy monthly counter");
        Ok(LegacyDecision {
            allowed: usage.count <= limit,
            count: usage.count,
        })
    }
}

/// Unix seconds `secs` after `now`, saturating instead of overflowing.
fn secs_after(now: i64, secs: u64) -> i64 {
    now.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX))
}
