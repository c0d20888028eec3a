//! In-memory state store.
//!
//! Holds the latest snapshot behind a mutex. Used by tests and available as
//! a backend when running without external storage but with snapshot
//! round-trips still exercised.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{StateSnapshot, StateStore, StateStoreResult};

#[derive(Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<Option<StateSnapshot>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn persist(&self, snapshot: &StateSnapshot) -> StateStoreResult<()> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> StateStoreResult<Option<StateSnapshot>> {
        Ok(self.snapshot.lock().await.clone())
    }
}
