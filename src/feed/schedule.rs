//! Adaptive per-feed refresh cadence.
//!
//! The polling interval is derived from how often a feed actually
//! publishes: half the mean gap between recent articles, clamped to a
//! sane band, with a little jitter so many feeds (and many clients) don't
//! all fire at the same instant. Feeds that have gone quiet stop being
//! polled entirely.

use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::feed::parser::Link;

/// Ceiling for the computed interval; also the fallback when there is not
/// enough history to compute one.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Floor for the computed interval.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Cadence when the newest article is between one and one-and-a-half days
/// old.
const SLOW_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);
/// Jitter added on top of a computed interval, `[0, 60s)`.
const JITTER_MS: u64 = 60_000;

const ONE_DAY_SECS: i64 = 24 * 60 * 60;

/// What the poller should do with a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCadence {
    /// Poll again after this delay.
    Every(Duration),
    /// The feed has gone quiet; do not schedule a timer. A manual refresh
    /// is the only way to load it again.
    Dormant,
}

/// Computes the refresh cadence from a feed's full article list.
///
/// Policy:
/// - no articles: the 30-minute maximum;
/// - newest article older than 1.5 days (strict): [`RefreshCadence::Dormant`];
/// - newest article older than 1 day (strict): a fixed 2-hour interval;
/// - otherwise, half the mean gap between consecutive publication dates —
///   excluding the first and last article, which tend to be collection
///   boundary outliers — clamped to `[10 min, 30 min]` plus up to a minute
///   of jitter.
///
/// Fewer than four articles leave the trimmed list without a single gap;
/// that case falls back to the maximum interval instead of propagating a
/// division by zero.
pub fn estimate(links: &[Link], now: DateTime<Utc>) -> RefreshCadence {
    if links.is_empty() {
        return RefreshCadence::Every(MAX_REFRESH_INTERVAL);
    }

    let mut dates: Vec<DateTime<Utc>> = links.iter().map(|l| l.publication_date).collect();
    dates.sort();
    let newest = dates[dates.len() - 1];

    let age = now.signed_duration_since(newest);
    if age > chrono::Duration::seconds(3 * ONE_DAY_SECS / 2) {
        return RefreshCadence::Dormant;
    }
    if age > chrono::Duration::seconds(ONE_DAY_SECS) {
        return RefreshCadence::Every(SLOW_REFRESH_INTERVAL);
    }

    if dates.len() < 4 {
        // Trimming first and last leaves no gap to average.
        return RefreshCadence::Every(MAX_REFRESH_INTERVAL);
    }

    let trimmed = &dates[1..dates.len() - 1];
    let gaps: Vec<i64> = trimmed
        .windows(2)
        .map(|w| w[1].signed_duration_since(w[0]).num_milliseconds())
        .collect();
    let mean_ms = gaps.iter().sum::<i64>() / gaps.len() as i64;
    let half_mean = Duration::from_millis((mean_ms / 2).max(0) as u64);

    let clamped = half_mean.clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL);
    RefreshCadence::Every(clamped + Duration::from_millis(jitter_ms()))
}

/// Uniform-ish jitter from the subsecond clock. Not statistical-quality
/// randomness, just enough to desynchronize polling across feeds.
fn jitter_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()) % JITTER_MS)
        .unwrap_or(0)
}
