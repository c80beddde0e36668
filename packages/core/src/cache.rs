//! Snapshot freshness checks.
//!
//! A snapshot is reusable while its `fetched_at` timestamp is younger than
//! the configured threshold. Anything that cannot be parsed counts as stale,
//! so the worst outcome of a damaged snapshot is one extra fetch.

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Default freshness threshold in hours.
pub const DEFAULT_MAX_AGE_HOURS: f64 = 24.0;

/// Age reported for snapshots whose timestamp could not be read.
pub const UNKNOWN_AGE_HOURS: f64 = 999.0;

const MILLIS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Error, Debug, PartialEq)]
pub enum FreshnessError {
    #[error("Malformed fetched_at timestamp: {0:?}")]
    MalformedTimestamp(String),
}

/// Outcome of a freshness check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Freshness {
    pub fresh: bool,
    pub age_hours: f64,
}

impl Freshness {
    fn unknown() -> Self {
        Self {
            fresh: false,
            age_hours: UNKNOWN_AGE_HOURS,
        }
    }
}

/// Parse a snapshot timestamp.
///
/// RFC 3339 is what this crate writes. Offset-less ISO-8601 values are
/// accepted too and read as UTC.
pub fn parse_fetched_at(raw: &str) -> Result<DateTime<Utc>, FreshnessError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FreshnessError::MalformedTimestamp(raw.to_string()));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| FreshnessError::MalformedTimestamp(raw.to_string()))
}

/// Decide whether a snapshot fetched at `fetched_at` can still be served at
/// `now`. Strictly younger than `max_age_hours` is fresh; exactly at the
/// threshold is stale. Never fails.
pub fn is_fresh(fetched_at: &str, max_age_hours: f64, now: DateTime<Utc>) -> Freshness {
    match parse_fetched_at(fetched_at) {
        Ok(timestamp) => {
            let age_hours = (now - timestamp).num_milliseconds() as f64 / MILLIS_PER_HOUR;
            Freshness {
                fresh: age_hours < max_age_hours,
                age_hours,
            }
        }
        Err(err) => {
            tracing::debug!("Treating snapshot as stale: {}", err);
            Freshness::unknown()
        }
    }
}
