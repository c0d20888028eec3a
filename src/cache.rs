//! In-memory bucketed vulnerability cache.
//!
//! Each bucket is keyed by a platform tag and treated as an infinitely
//! growing (until removed) collection. Alongside the resident items (the
//! "active set") every bucket tracks the count of items ever cached under it
//! (the "full set" size). Readers track how many items they have consumed
//! and pass that figure to [`Cache::retrieve`] as an offset into the full
//! set, so a refill that displaces the active set does not make a caught-up
//! reader skip or re-read data.

use std::collections::HashMap;

use data_connector::CacheSnapshot;
use tracing::warn;

use crate::vulnerability::Vulnerability;

#[derive(Debug, Default)]
pub struct Cache {
    buckets: HashMap<String, Vec<Vulnerability>>,
    total_counts: HashMap<String, usize>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store items under a bucket, replacing whatever is resident.
    ///
    /// The bucket's full-set count grows by `items.len()` unconditionally;
    /// it is a cursor into the full set, not a dedup measure.
    pub fn cache(&mut self, platform: &str, items: Vec<Vulnerability>) {
        let count = self.total_counts.entry(platform.to_string()).or_insert(0);
        *count += items.len();
        self.buckets.insert(platform.to_string(), items);
    }

    /// Remove a bucket and its full-set count. No-op if absent.
    pub fn remove_bucket(&mut self, platform: &str) {
        self.buckets.remove(platform);
        self.total_counts.remove(platform);
    }

    /// The full-set size of a bucket, or 0 if the bucket does not exist.
    pub fn size(&self, platform: &str) -> usize {
        self.total_counts.get(platform).copied().unwrap_or(0)
    }

    /// Retrieve items from a bucket at an offset into its full set.
    ///
    /// Returns `None` if the bucket does not exist. An offset past the end
    /// of the full set yields an empty list; an offset that falls in the
    /// inactive set is clamped to the start of the active set, delivering
    /// as much as remains resident.
    pub fn retrieve(
        &self,
        platform: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Option<Vec<Vulnerability>> {
        let items = self.buckets.get(platform)?;
        let total = self.total_counts[platform];

        if offset > total {
            return Some(Vec::new());
        }

        let inactive = total - items.len();
        let start = offset.saturating_sub(inactive);

        let end = match limit {
            Some(limit) if limit <= items.len() => (start + limit).min(items.len()),
            _ => items.len(),
        };

        Some(items[start..end].to_vec())
    }

    /// Snapshot the cache for persistence. Buckets that fail to serialize
    /// are skipped rather than failing the whole snapshot.
    pub fn snapshot(&self) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::default();
        for (platform, items) in &self.buckets {
            match serde_json::to_value(items) {
                Ok(value) => {
                    snapshot.buckets.insert(platform.clone(), value);
                    snapshot
                        .total_counts
                        .insert(platform.clone(), self.total_counts[platform] as u64);
                }
                Err(e) => warn!(platform = %platform, error = %e, "failed to snapshot bucket"),
            }
        }
        snapshot
    }

    /// Rebuild the cache from a snapshot. Malformed buckets and buckets
    /// without a matching count are skipped.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        for (platform, value) in snapshot.buckets {
            let Some(&count) = snapshot.total_counts.get(&platform) else {
                warn!(platform = %platform, "bucket has no item count, not restoring");
                continue;
            };
            match serde_json::from_value::<Vec<Vulnerability>>(value) {
                Ok(items) => {
                    self.buckets.insert(platform.clone(), items);
                    self.total_counts.insert(platform, count as usize);
                }
                Err(e) => {
                    warn!(platform = %platform, error = %e, "skipping malformed bucket")
                }
            }
        }
    }
}
