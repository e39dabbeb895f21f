//! Usage counter records and admission decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::keys::{self, Owner};

/// A counter value as stored under every TTL-managed counter key.
///
/// `reset_at` is fixed when the window opens; increments inside the same
/// window never move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounter {
    /// Attempts counted in the current window
    pub count: u64,
    /// Unix seconds at which the window ends
    pub reset_at: i64,
}

impl UsageCounter {
    /// Whether the window has ended at `now_secs`.
    pub fn is_expired(&self, now_secs: i64) -> bool {
        now_secs >= self.reset_at
    }
}

/// Outcome of one counter increment.
///
/// The counter has already been incremented when this is returned, whether or
/// not the attempt was allowed; callers gate the work on `allowed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDecision {
    /// Whether the new count is within the limit
    pub allowed: bool,
    /// The limit the count was checked against
    pub limit: u64,
    /// Counter state after the increment
    pub usage: UsageCounter,
}

impl CounterDecision {
    pub(crate) fn new(limit: u64, usage: UsageCounter) -> Self {
        Self {
            allowed: usage.count <= limit,
            limit,
            usage,
        }
    }

    /// Attempts left before the limit is reached.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.usage.count)
    }

    /// Seconds until the window resets, as seen at `now_secs`.
    pub fn retry_after_secs(&self, now_secs: i64) -> u64 {
        self.usage.reset_at.saturating_sub(now_secs).max(0) as u64
    }
}

/// Value of a legacy monthly counter; carries no expiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyUsage {
    /// Attempts counted this month
    pub count: u64,
}

/// Outcome of one legacy counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDecision {
    /// Whether the new count is within the limit
    pub allowed: bool,
    /// Counter value after the increment
    pub count: u64,
}

/// Calendar period a counter resets on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarWindow {
    /// Resets at the end of each UTC day
    Day,
    /// Resets at the end of each UTC month
    Month,
}

impl CalendarWindow {
    /// Key of the counter for `owner` in the period containing `now`.
    pub fn key(&self, prefix: &str, owner: &Owner, now: DateTime<Utc>) -> String {
        match self {
            CalendarWindow::Day => keys::daily_key(prefix, &calendar::day_tag(now), owner),
            CalendarWindow::Month => keys::monthly_key(prefix, &calendar::month_tag(now), owner),
        }
    }

    /// Seconds left in the period containing `now`.
    pub fn secs_until_end(&self, now: DateTime<Utc>) -> u64 {
        match self {
            CalendarWindow::Day => calendar::secs_until_end_of_day(now),
            CalendarWindow::Month => calendar::secs_until_end_of_month(now),
        }
    }
}
