// SPDX-License-Identifier: MIT

//! Persistence contract for flow execution records

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{FlowState, FlowStatus};
use crate::error::StoreError;

/// Default number of records returned by `list`
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Filter and paging for `FlowStateStore::list`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStateQuery {
    /// Maximum number of records; defaults to [`DEFAULT_LIST_LIMIT`]
    pub limit: Option<usize>,
    /// Only records in this status
    pub status: Option<FlowStatus>,
    /// Only records of this flow definition
    pub name: Option<String>,
}

impl FlowStateQuery {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn status(mut self, status: FlowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT)
    }

    /// Whether `state` passes the query's filters
    pub fn matches(&self, state: &FlowState) -> bool {
        self.status.map_or(true, |s| state.status == s)
            && self.name.as_deref().map_or(true, |n| state.name == n)
    }
}

/// Durable key-value store for flow state, keyed by flow instance id.
///
/// Every operation is atomic per key: a reader never observes a partially
/// written record.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    /// Most recently saved record for `id`; `Ok(None)` when none exists
    async fn load(&self, id: &str) -> Result<Option<FlowState>, StoreError>;

    /// Replace the record for `id` with `state`
    async fn save(&self, id: &str, state: &FlowState) -> Result<(), StoreError>;

    /// Records matching `query`, most recently saved first
    async fn list(&self, query: &FlowStateQuery) -> Result<Vec<FlowState>, StoreError>;
}

/// Parse and validate a stored payload
pub(crate) fn decode_state(id: &str, data: &str) -> Result<FlowState, StoreError> {
    let state: FlowState = serde_json::from_str(data)
        .map_err(|e| StoreError::corruption(id, e.to_string()))?;
    if state.id != id {
        return Err(StoreError::corruption(
            id,
            format!("record carries id '{}'", state.id),
        ));
    }
    state
        .validate()
        .map_err(|reason| StoreError::corruption(id, reason))?;
    Ok(state)
}
