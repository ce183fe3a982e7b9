// Calendar day handling shared by login streaks and daily missions.
// One reset boundary for the whole module: midnight PST = 8am UTC.

use chrono::{DateTime, Datelike, NaiveDate};
use spacetimedb::Timestamp;

/// Hour (UTC) at which a new calendar day starts
pub const DAY_RESET_HOUR_UTC: i64 = 8;

const MICROS_PER_HOUR: i64 = 60 * 60 * 1_000_000;

/// Calendar day a timestamp falls on, relative to the reset hour
pub fn day_of(ts: Timestamp) -> NaiveDate {
    let shifted = ts
        .to_micros_since_unix_epoch()
        .saturating_sub(DAY_RESET_HOUR_UTC * MICROS_PER_HOUR);
    DateTime::from_timestamp_micros(shifted)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Compact YYYYMMDD key used to stamp per-day rows
pub fn day_key(date: NaiveDate) -> u32 {
    let year = date.year().max(0) as u32;
    year * 10_000 + date.month() * 100 + date.day()
}

/// Whole calendar days from `earlier` to `later` (negative if `later` is before)
pub fn days_between(earlier: NaiveDate, later: NaiveDate) -> i64 {
    later.signed_duration_since(earlier).num_days()
}
