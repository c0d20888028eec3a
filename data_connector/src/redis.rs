//! Redis state store implementation.
//!
//! Key layout:
//! * `registry_max_active_sessions`, `registry_max_queued_sessions`:
//!   registry bounds as decimal strings
//! * `registry_sessions`: hash of session id to its JSON record
//! * `cache_buckets`: hash of platform tag to the JSON list of resident items
//! * `cache_item_counts`: hash of platform tag to its stringified full-set size

use std::collections::HashMap;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use serde_json::Value;
use tracing::warn;

use crate::{
    config::RedisConfig,
    core::{
        CacheSnapshot, RegistrySnapshot, SessionRecord, StateSnapshot, StateStore,
        StateStoreError, StateStoreResult,
    },
};

const KEY_MAX_ACTIVE_SESSIONS: &str = "registry_max_active_sessions";
const KEY_MAX_QUEUED_SESSIONS: &str = "registry_max_queued_sessions";
const KEY_SESSIONS: &str = "registry_sessions";
const KEY_CACHE_BUCKETS: &str = "cache_buckets";
const KEY_CACHE_ITEM_COUNTS: &str = "cache_item_counts";

pub struct RedisStateStore {
    pool: Pool,
}

impl RedisStateStore {
    pub fn new(config: RedisConfig) -> StateStoreResult<Self> {
        let mut cfg = Config::from_url(config.url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_max));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn persist(&self, snapshot: &StateSnapshot) -> StateStoreResult<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;

        let mut pipe = redis::pipe();

        pipe.set(
            KEY_MAX_ACTIVE_SESSIONS,
            snapshot.registry.max_active_sessions.to_string(),
        );
        pipe.set(
            KEY_MAX_QUEUED_SESSIONS,
            snapshot.registry.max_queued_sessions.to_string(),
        );

        // Replace the hashes wholesale so terminated sessions and evicted
        // buckets do not linger from an earlier snapshot.
        pipe.del(KEY_SESSIONS);
        for (id, record) in &snapshot.registry.sessions {
            pipe.hset(KEY_SESSIONS, id, serde_json::to_string(record)?);
        }

        pipe.del(KEY_CACHE_BUCKETS);
        pipe.del(KEY_CACHE_ITEM_COUNTS);
        for (platform, items) in &snapshot.cache.buckets {
            pipe.hset(KEY_CACHE_BUCKETS, platform, serde_json::to_string(items)?);
        }
        for (platform, count) in &snapshot.cache.total_counts {
            pipe.hset(KEY_CACHE_ITEM_COUNTS, platform, count.to_string());
        }

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;

        Ok(())
    }

    async fn load(&self) -> StateStoreResult<Option<StateSnapshot>> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;

        let (max_active, max_queued): (Option<String>, Option<String>) = redis::pipe()
            .get(KEY_MAX_ACTIVE_SESSIONS)
            .get(KEY_MAX_QUEUED_SESSIONS)
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;

        let (Some(max_active), Some(max_queued)) = (max_active, max_queued) else {
            // Cold start: nothing has been persisted yet.
            return Ok(None);
        };

        let (Ok(max_active_sessions), Ok(max_queued_sessions)) =
            (max_active.parse::<usize>(), max_queued.parse::<usize>())
        else {
            warn!("persisted registry bounds are malformed, skipping rehydrate");
            return Ok(None);
        };

        let raw_sessions: HashMap<String, String> = conn
            .hgetall(KEY_SESSIONS)
            .await
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;

        let mut sessions = HashMap::with_capacity(raw_sessions.len());
        for (id, json) in raw_sessions {
            match serde_json::from_str::<SessionRecord>(&json) {
                Ok(record) => {
                    sessions.insert(id, record);
                }
                Err(e) => warn!(session = %id, error = %e, "skipping malformed session record"),
            }
        }

        let raw_buckets: HashMap<String, String> = conn
            .hgetall(KEY_CACHE_BUCKETS)
            .await
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;
        let raw_counts: HashMap<String, String> = conn
            .hgetall(KEY_CACHE_ITEM_COUNTS)
            .await
            .map_err(|e| StateStoreError::StorageError(e.to_string()))?;

        let mut buckets = HashMap::new();
        let mut total_counts = HashMap::new();
        for (platform, items_json) in raw_buckets {
            // A bucket without a matching count (or vice versa) is not restored.
            let Some(count_str) = raw_counts.get(&platform) else {
                warn!(platform = %platform, "bucket has no item count, skipping");
                continue;
            };
            let Ok(count) = count_str.parse::<u64>() else {
                warn!(platform = %platform, "bucket item count is malformed, skipping");
                continue;
            };
            match serde_json::from_str::<Value>(&items_json) {
                Ok(items) if items.is_array() => {
                    buckets.insert(platform.clone(), items);
                    total_counts.insert(platform, count);
                }
                Ok(_) => warn!(platform = %platform, "bucket items are not a list, skipping"),
                Err(e) => warn!(platform = %platform, error = %e, "skipping malformed bucket"),
            }
        }

        Ok(Some(StateSnapshot {
            registry: RegistrySnapshot {
                max_active_sessions,
                max_queued_sessions,
                sessions,
            },
            cache: CacheSnapshot {
                buckets,
                total_counts,
            },
        }))
    }
}
