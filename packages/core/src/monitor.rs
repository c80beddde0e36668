//! Snapshot orchestration: serve a fresh cached snapshot when there is one,
//! otherwise fetch from Ad Manager and persist the result.
//!
//! A failed fetch is always an error, even when an older (stale) snapshot
//! exists. Stale data is never served.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::is_fresh;
use crate::error::AppError;
use crate::fetcher::{AccountQuery, RecordFetcher};
use crate::metrics::AppMetrics;
use crate::model::{NetworkCode, Snapshot};
use crate::store::SnapshotStore;

/// Where a served snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Cache,
    Fresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServedSnapshot {
    pub source: Source,
    pub snapshot: Snapshot,
    /// Age of the cached snapshot in hours; `None` for fresh fetches.
    pub cached_hours_ago: Option<f64>,
}

pub struct SnapshotService {
    fetcher: RecordFetcher,
    store: Arc<dyn SnapshotStore + Send + Sync>,
    max_age_hours: f64,
    metrics: Option<Arc<AppMetrics>>,
}

impl SnapshotService {
    pub fn new(
        fetcher: RecordFetcher,
        store: Arc<dyn SnapshotStore + Send + Sync>,
        max_age_hours: f64,
    ) -> Self {
        Self {
            fetcher,
            store,
            max_age_hours,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_age_hours(&self) -> f64 {
        self.max_age_hours
    }

    /// Child publishers for `network_code`, from cache when allowed and fresh.
    pub async fn serve(&self, network_code: &NetworkCode, refresh: bool) -> Result<ServedSnapshot, AppError> {
        self.serve_at(network_code, refresh, Utc::now()).await
    }

    /// [`serve`](Self::serve) with an explicit notion of "now".
    pub async fn serve_at(
        &self,
        network_code: &NetworkCode,
        refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<ServedSnapshot, AppError> {
        if !refresh {
            if let Some((snapshot, age_hours)) = self.fresh_cached(network_code.as_str(), now).await {
                tracing::info!(
                    "Returning cached data for network {} ({:.1} hours old)",
                    network_code,
                    age_hours
                );
                if let Some(metrics) = &self.metrics {
                    metrics.cache_hits_total.inc();
                }
                return Ok(ServedSnapshot {
                    source: Source::Cache,
                    snapshot,
                    cached_hours_ago: Some(age_hours),
                });
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.cache_misses_total.inc();
        }
        tracing::info!("Fetching fresh data from Ad Manager for network {}...", network_code);
        let snapshot = self.fetch_and_store(network_code.as_str()).await?;

        Ok(ServedSnapshot {
            source: Source::Fresh,
            snapshot,
            cached_hours_ago: None,
        })
    }

    /// Fetch child publishers for `network_code` and persist them as a new
    /// snapshot file. A failed write is logged; the fetched data is still
    /// returned.
    pub async fn fetch_and_store(&self, network_code: &str) -> Result<Snapshot, AppError> {
        let snapshot = self.fetch(network_code, AccountQuery::ChildPublishers).await?;

        if let Err(err) = self.store.write(&snapshot).await {
            tracing::error!("Failed to save snapshot for network {}: {}", network_code, err);
        }

        Ok(snapshot)
    }

    /// Run a fetch without touching the snapshot store.
    pub async fn fetch(&self, network_code: &str, query: AccountQuery) -> Result<Snapshot, AppError> {
        if let Some(metrics) = &self.metrics {
            metrics.fetches_total.inc();
        }

        match self.fetcher.fetch(network_code, query).await {
            Ok(snapshot) => {
                if let Some(metrics) = &self.metrics {
                    metrics.records_last_fetch.set(snapshot.total_count as f64);
                }
                Ok(snapshot)
            }
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.fetch_errors_total.inc();
                }
                Err(err.into())
            }
        }
    }

    /// Latest snapshot for `network_code` if it is still fresh at `now`.
    /// Store failures count as a cache miss.
    async fn fresh_cached(&self, network_code: &str, now: DateTime<Utc>) -> Option<(Snapshot, f64)> {
        let file = match self.store.latest(network_code).await {
            Ok(Some(file)) => file,
            Ok(None) => return None,
            Err(err) => {
                tracing::warn!("Cannot list snapshots for network {}: {}", network_code, err);
                return None;
            }
        };

        let snapshot = match self.store.read(&file).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!("Ignoring unreadable snapshot {}: {}", file.name, err);
                return None;
            }
        };

        let freshness = is_fresh(&snapshot.fetched_at, self.max_age_hours, now);
        if freshness.fresh {
            Some((snapshot, freshness.age_hours))
        } else {
            tracing::info!(
                "Cached snapshot {} is stale ({:.1} hours old)",
                file.name,
                freshness.age_hours
            );
            None
        }
    }
}
