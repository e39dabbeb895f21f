//! UTC calendar helpers shared by counters and ledgers.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveTime, TimeZone, Utc};

/// `YYYY-MM-DD` tag used by daily counter keys.
pub fn day_tag(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` tag used by monthly counter keys.
pub fn month_tag(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// `YYYYMM` tag used by legacy counters and quota periods.
pub fn compact_month_tag(now: DateTime<Utc>) -> String {
    now.format("%Y%m").to_string()
}

/// Last millisecond of the UTC day containing `now` (23:59:59.999).
pub fn end_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    let next_day = now.date_naive().succ_opt().unwrap_or(NaiveDate::MAX);
    midnight(next_day) - Duration::milliseconds(1)
}

/// Last millisecond of the UTC month containing `now`.
pub fn end_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1).unwrap_or(NaiveDate::MIN);
    let next_first = first
        .checked_add_months(Months::new(1))
        .unwrap_or(NaiveDate::MAX);
    midnight(next_first) - Duration::milliseconds(1)
}

/// Whole seconds from `now` until the end of its UTC day, rounded up.
pub fn secs_until_end_of_day(now: DateTime<Utc>) -> u64 {
    secs_until(now, end_of_day(now))
}

/// Whole seconds from `now` until the end of its UTC month, rounded up.
pub fn secs_until_end_of_month(now: DateTime<Utc>) -> u64 {
    secs_until(now, end_of_month(now))
}

/// Add calendar months, clamping to the last day of a shorter target month
/// (Jan 31 + 1 month is Feb 28/29, never Mar 2/3).
pub fn add_months(at: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    at.checked_add_months(Months::new(months)).unwrap_or(at)
}

/// Expiry of a credit pack created at `created_at_ms`: `months` calendar
/// months plus `grace_days` days later, in unix milliseconds.
pub fn pack_expiry_ms(created_at_ms: i64, months: u32, grace_days: u32) -> i64 {
    let created = from_millis(created_at_ms);
    let expires = add_months(created, months) + Duration::days(i64::from(grace_days));
    expires.timestamp_millis()
}

/// Convert unix milliseconds to a UTC instant; out-of-range values map to the epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

fn secs_until(now: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    let ms = (end - now).num_milliseconds().max(0) as u64;
    ms.div_ceil(1000)
}
