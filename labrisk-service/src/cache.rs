//! In-memory cache for the latest population analysis.
//!
//! The cache holds one immutable [`CacheSnapshot`] behind a lock. Every write
//! builds a new snapshot and swaps the `Arc`, so a reader either sees the old
//! snapshot or the new one, never a mix.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use labrisk_core::{AggregateSummary, Clock, PatientAnalysis};
use log::debug;
use serde::{Deserialize, Serialize};

/// Age after which a cached analysis is reported as stale.
pub const CACHE_TTL_MS: i64 = 60 * 60 * 1000;

/// One stored analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub analyses: Vec<PatientAnalysis>,
    pub summary: AggregateSummary,
    pub cache_timestamp: DateTime<Utc>,
}

/// A snapshot as seen by a reader, with staleness computed at read time.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnalysis {
    pub snapshot: Arc<CacheSnapshot>,
    pub is_stale: bool,
    /// Clock reading the staleness was computed against.
    pub read_at: DateTime<Utc>,
}

impl CachedAnalysis {
    pub fn analyses(&self) -> &[PatientAnalysis] {
        &self.snapshot.analyses
    }

    pub fn summary(&self) -> &AggregateSummary {
        &self.snapshot.summary
    }

    pub fn cache_timestamp(&self) -> DateTime<Utc> {
        self.snapshot.cache_timestamp
    }

    /// Age of the snapshot at read time, in milliseconds.
    pub fn age_ms(&self) -> i64 {
        (self.read_at - self.snapshot.cache_timestamp).num_milliseconds()
    }
}

/// Monitoring view of the cache. Fields are `None` while the cache is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub has_cached_data: bool,
    /// Seconds since the last write, rounded.
    pub cache_age: Option<i64>,
    pub is_stale: Option<bool>,
    pub patient_count: usize,
    pub data_quality_score: Option<f64>,
}

pub struct ResultCache {
    slot: RwLock<Option<Arc<CacheSnapshot>>>,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            slot: RwLock::new(None),
            clock,
        }
    }

    /// Replace whatever is cached with a new run.
    pub fn store(&self, analyses: Vec<PatientAnalysis>, summary: AggregateSummary) {
        let snapshot = CacheSnapshot {
            analyses,
            summary,
            cache_timestamp: self.clock.now(),
        };
        debug!(
            "Caching analysis of {} patients at {}",
            snapshot.analyses.len(),
            snapshot.cache_timestamp
        );
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(snapshot));
    }

    pub fn read(&self) -> Option<CachedAnalysis> {
        let snapshot = self.current()?;
        let read_at = self.clock.now();
        let is_stale = read_at - snapshot.cache_timestamp > Duration::milliseconds(CACHE_TTL_MS);
        Some(CachedAnalysis {
            snapshot,
            is_stale,
            read_at,
        })
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_fresh(&self) -> bool {
        self.read().is_some_and(|cached| !cached.is_stale)
    }

    /// Cached analysis of a single patient, stale or not.
    pub fn patient(&self, patient_id: &str) -> Option<PatientAnalysis> {
        self.current()?
            .analyses
            .iter()
            .find(|analysis| analysis.patient_id == patient_id)
            .cloned()
    }

    /// Replace the cached record with the same patient id.
    ///
    /// Does nothing on an empty cache. Otherwise the cache timestamp is
    /// refreshed even when no record matches, which restarts the TTL of the
    /// whole run; the summary is left as stored. Returns whether a record was
    /// replaced.
    pub fn update_one(&self, analysis: PatientAnalysis) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = slot.as_ref() else {
            return false;
        };

        let mut analyses = current.analyses.clone();
        let replaced = match analyses
            .iter_mut()
            .find(|existing| existing.patient_id == analysis.patient_id)
        {
            Some(existing) => {
                *existing = analysis;
                true
            }
            None => false,
        };

        let next = CacheSnapshot {
            analyses,
            summary: current.summary.clone(),
            cache_timestamp: self.clock.now(),
        };
        *slot = Some(Arc::new(next));
        replaced
    }

    pub fn stats(&self) -> CacheStats {
        Self::stats_for(self.read().as_ref())
    }

    /// Stats of a snapshot that was already read, so callers that also use
    /// the snapshot report one consistent state.
    pub fn stats_for(cached: Option<&CachedAnalysis>) -> CacheStats {
        let Some(cached) = cached else {
            return CacheStats {
                has_cached_data: false,
                cache_age: None,
                is_stale: None,
                patient_count: 0,
                data_quality_score: None,
            };
        };

        CacheStats {
            has_cached_data: true,
            cache_age: Some((cached.age_ms() as f64 / 1000.0).round() as i64),
            is_stale: Some(cached.is_stale),
            patient_count: cached.analyses().len(),
            data_quality_score: Some(cached.summary().data_quality_score),
        }
    }

    fn current(&self) -> Option<Arc<CacheSnapshot>> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
