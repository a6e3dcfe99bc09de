//! Bounded statistics cache with generation counters.
//!
//! Entry storage is a `moka` cache with a fixed entry capacity. Every entry
//! is stamped with the generations it was computed under. An invalidation
//! bumps the matching generation before dropping entries, so a computation
//! that started before the invalidation and finished after it can never be
//! served: its stamp no longer matches.

use dashmap::DashMap;
use moka::sync::Cache;
use outcome_core::{Aggregate, ForecastType, StatKey, Subtype};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("no cached statistics for {0}")]
    Miss(StatKey),
    /// The entry predates an invalidation; the caller must recompute
    #[error("stale cached statistics for {0}")]
    Stale(StatKey),
}

/// Generations an entry was computed under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    global: u64,
    forecast_type: u64,
    subtype: u64,
    pair: u64,
}

#[derive(Clone)]
struct CacheEntry {
    aggregate: Aggregate,
    stamp: Stamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

pub struct StatisticsCache {
    entries: Cache<StatKey, CacheEntry>,
    capacity: usize,
    global_generation: AtomicU64,
    type_generations: DashMap<ForecastType, u64>,
    subtype_generations: DashMap<Subtype, u64>,
    pair_generations: DashMap<(ForecastType, Subtype), u64>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StatisticsCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Cache::builder().max_capacity(capacity as u64).build(),
            capacity,
            global_generation: AtomicU64::new(0),
            type_generations: DashMap::new(),
            subtype_generations: DashMap::new(),
            pair_generations: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Current generations for `key`. Read this before computing a value
    /// and hand it back to [`StatisticsCache::insert`].
    pub fn stamp(&self, key: &StatKey) -> Stamp {
        Stamp {
            global: self.global_generation.load(Ordering::Acquire),
            forecast_type: self
                .type_generations
                .get(&key.forecast_type)
                .map(|g| *g)
                .unwrap_or(0),
            subtype: self
                .subtype_generations
                .get(&key.subtype)
                .map(|g| *g)
                .unwrap_or(0),
            pair: self
                .pair_generations
                .get(&(key.forecast_type, key.subtype))
                .map(|g| *g)
                .unwrap_or(0),
        }
    }

    pub fn get(&self, key: &StatKey) -> Result<Aggregate, CacheError> {
        let current = self.stamp(key);

        match self.entries.get(key) {
            Some(entry) if entry.stamp == current => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.aggregate)
            }
            Some(_) => {
                self.entries.invalidate(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Stale(*key))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Miss(*key))
            }
        }
    }

    /// Store a value computed under `stamp`. Values computed before an
    /// invalidation are dropped.
    pub fn insert(&self, key: StatKey, aggregate: Aggregate, stamp: Stamp) {
        if self.stamp(&key) != stamp {
            tracing::debug!(key = %key, "Discarding statistics computed before invalidation");
            return;
        }
        self.entries.insert(key, CacheEntry { aggregate, stamp });
    }

    /// Drop cached statistics. `None` matches every forecast type or subtype.
    pub fn invalidate(&self, forecast_type: Option<ForecastType>, subtype: Option<Subtype>) {
        match (forecast_type, subtype) {
            (None, None) => {
                self.global_generation.fetch_add(1, Ordering::AcqRel);
            }
            (Some(ft), None) => {
                *self.type_generations.entry(ft).or_insert(0) += 1;
            }
            (None, Some(st)) => {
                *self.subtype_generations.entry(st).or_insert(0) += 1;
            }
            (Some(ft), Some(st)) => {
                *self.pair_generations.entry((ft, st)).or_insert(0) += 1;
            }
        }

        let matching: Vec<StatKey> = self
            .entries
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| {
                forecast_type.map_or(true, |ft| key.forecast_type == ft)
                    && subtype.map_or(true, |st| key.subtype == st)
            })
            .collect();
        for key in &matching {
            self.entries.invalidate(key);
        }

        tracing::debug!(
            forecast_type = ?forecast_type,
            subtype = ?subtype,
            dropped = matching.len(),
            "Statistics cache invalidated"
        );
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            size: self.len(),
            capacity: self.capacity,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    /// Entry count after pending evictions and invalidations are applied
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
