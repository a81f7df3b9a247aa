// SPDX-License-Identifier: MIT

//! In-memory flow state store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::store::{FlowStateQuery, FlowStateStore};
use super::types::FlowState;
use crate::error::StoreError;

#[derive(Default)]
struct Inner {
    records: HashMap<String, (u64, FlowState)>,
    next_seq: u64,
}

/// Process-local store; records live as long as the store.
///
/// Cloning shares the underlying map.
#[derive(Clone, Default)]
pub struct InMemoryFlowStateStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryFlowStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl FlowStateStore for InMemoryFlowStateStore {
    async fn load(&self, id: &str) -> Result<Option<FlowState>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(id).map(|(_, state)| state.clone()))
    }

    async fn save(&self, id: &str, state: &FlowState) -> Result<(), StoreError> {
        if id.is_empty() {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        log::debug!("save flow state {}", id);
        let mut inner = self.inner.write().await;
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.records.insert(id.to_string(), (seq, state.clone()));
        Ok(())
    }

    async fn list(&self, query: &FlowStateQuery) -> Result<Vec<FlowState>, StoreError> {
        let inner = self.inner.read().await;
        let mut entries: Vec<&(u64, FlowState)> = inner
            .records
            .values()
            .filter(|(_, state)| query.matches(state))
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries
            .into_iter()
            .take(query.effective_limit())
            .map(|(_, state)| state.clone())
            .collect())
    }
}
