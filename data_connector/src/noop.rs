//! NoOp state store.
//!
//! Does nothing. Used when persistence is disabled.

use async_trait::async_trait;

use crate::core::{StateSnapshot, StateStore, StateStoreResult};

#[derive(Default, Debug, Clone)]
pub struct NoopStateStore;

impl NoopStateStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StateStore for NoopStateStore {
    async fn persist(&self, _snapshot: &StateSnapshot) -> StateStoreResult<()> {
        Ok(())
    }

    async fn load(&self) -> StateStoreResult<Option<StateSnapshot>> {
        Ok(None)
    }
}
