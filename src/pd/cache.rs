//! Read-through lookup of PD term-structure detail rows
//!
//! Built once per run from a single bulk fetch and shared read-only with every
//! worker. Lookups try, in order:
//! 1. an account-specific row for (structure, account, bucket)
//! 2. the band row for (structure, band, bucket)
//! 3. the nearest lower bucket of the same band
//!
//! Hit/miss counters are atomics so the cache can sit behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use super::PdTermStructureDetail;
use crate::error::{EclError, Result};

/// Normalised band label used as a key
fn band_key(band: &str) -> String {
    band.trim().to_ascii_uppercase()
}

/// In-memory PD lookup keyed by (structure id, band, bucket)
#[derive(Debug, Default)]
pub struct PdLookupCache {
    /// (structure, band) → bucket → PD
    bands: HashMap<(String, String), BTreeMap<u32, f64>>,

    /// (structure, account, bucket) → PD
    account_overrides: HashMap<(String, String, u32), f64>,

    hits: AtomicU64,
    fallbacks: AtomicU64,
    misses: AtomicU64,
}

impl PdLookupCache {
    /// Build from a bulk fetch of detail rows
    pub fn build(details: Vec<PdTermStructureDetail>) -> Self {
        let mut cache = Self::default();
        for detail in details {
            match detail.account_id {
                Some(account_id) => {
                    cache
                        .account_overrides
                        .insert((detail.structure_id, account_id, detail.bucket), detail.pd);
                }
                None => {
                    cache
                        .bands
                        .entry((detail.structure_id, band_key(&detail.band)))
                        .or_default()
                        .insert(detail.bucket, detail.pd);
                }
            }
        }
        cache
    }

    /// Look up a PD, falling back to the nearest lower bucket of the band
    pub fn lookup(&self, structure_id: &str, band: &str, bucket: u32, account_id: &str) -> Option<f64> {
        let override_key = (structure_id.to_string(), account_id.to_string(), bucket);
        if let Some(pd) = self.account_overrides.get(&override_key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(*pd);
        }

        let Some(buckets) = self.bands.get(&(structure_id.to_string(), band_key(band))) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if let Some(pd) = buckets.get(&bucket) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(*pd);
        }

        match buckets.range(..bucket).next_back() {
            Some((_, pd)) => {
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
                Some(*pd)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Look up a PD or fail with the key that was missing
    pub fn require(&self, structure_id: &str, band: &str, bucket: u32, account_id: &str) -> Result<f64> {
        self.lookup(structure_id, band, bucket, account_id)
            .ok_or_else(|| EclError::PdNotFound {
                structure_id: structure_id.to_string(),
                band: band.to_string(),
                bucket,
            })
    }

    /// Number of (structure, band) curves held
    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty() && self.account_overrides.is_empty()
    }

    /// Share of lookups answered by an exact key
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.fallbacks.load(Ordering::Relaxed) + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
