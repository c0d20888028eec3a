// core.rs
//
// Core types for the data connector crate.
// Contains the snapshot data types, the storage trait, and error types
// shared by all backends.
//
// Structure:
// 1. Registry snapshot types
// 2. Cache snapshot types
// 3. StateStore trait + errors

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// PART 1: Registry snapshot
// ============================================================================

/// Activity state of a persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionActivity {
    Queued,
    Active,
}

/// One session as stored in the external medium.
///
/// Timestamps are RFC 3339; `vulnerabilitiesRead` is the scanner's absolute
/// read offset into its platform's full set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub platform: String,
    pub state: SessionActivity,
    pub created_at: DateTime<Utc>,
    pub last_heard_from: DateTime<Utc>,
    pub vulnerabilities_read: u64,
}

/// Snapshot of the session registry: its bounds plus every known session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RegistrySnapshot {
    pub max_active_sessions: usize,
    pub max_queued_sessions: usize,
    pub sessions: HashMap<String, SessionRecord>,
}

// ============================================================================
// PART 2: Cache snapshot
// ============================================================================

/// Snapshot of the bucketed cache.
///
/// `buckets` maps a platform tag to the JSON list of its resident items;
/// `total_counts` maps the same tags to the bucket's full-set size. The two
/// maps are kept in lockstep: a platform missing from either is not restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CacheSnapshot {
    pub buckets: HashMap<String, Value>,
    pub total_counts: HashMap<String, u64>,
}

/// Everything the server persists between restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StateSnapshot {
    pub registry: RegistrySnapshot,
    pub cache: CacheSnapshot,
}

// ============================================================================
// PART 3: StateStore trait
// ============================================================================

/// Result alias for state store operations
pub type StateStoreResult<T> = Result<T, StateStoreError>;

/// Error type for state store operations
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Trait describing best-effort snapshot persistence for server state.
///
/// `persist` overwrites the stored snapshot wholesale; `load` returns `None`
/// on a cold start (nothing stored yet). Implementations must return errors
/// as values, never panic; the caller keeps operating in memory when the
/// medium is unavailable.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn persist(&self, snapshot: &StateSnapshot) -> StateStoreResult<()>;

    async fn load(&self) -> StateStoreResult<Option<StateSnapshot>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_record_uses_wire_field_names() {
        let record = SessionRecord {
            platform: "ubuntu:18.04".to_string(),
            state: SessionActivity::Active,
            created_at: Utc::now(),
            last_heard_from: Utc::now(),
            vulnerabilities_read: 42,
        };

        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["platform"], "ubuntu:18.04");
        assert_eq!(json["state"], "active");
        assert_eq!(json["vulnerabilitiesRead"], 42);
        assert!(json["createdAt"].is_string());
        assert!(json["lastHeardFrom"].is_string());
    }

    #[test]
    fn session_record_round_trips() {
        let record = SessionRecord {
            platform: "alpine:3.4".to_string(),
            state: SessionActivity::Queued,
            created_at: Utc::now(),
            last_heard_from: Utc::now(),
            vulnerabilities_read: 0,
        };

        let json = serde_json::to_string(&record).expect("serialize");
        let back: SessionRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, record);
    }

    #[test]
    fn activity_state_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionActivity::Active).expect("serialize"),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&SessionActivity::Queued).expect("serialize"),
            "\"queued\""
        );
    }
}
