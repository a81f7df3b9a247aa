// SPDX-License-Identifier: MIT

use super::Flow;
use crate::error::{FlowError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Flow definitions by name, for consumers that only carry a flow name.
///
/// A name identifies the definition every persisted instance was recorded
/// under, so it can be registered once.
#[derive(Clone)]
pub struct FlowRegistry {
    flows: Arc<RwLock<HashMap<String, Arc<dyn Flow>>>>,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a flow definition.
    ///
    /// Fails if the name is taken or the flow's own retry policy is invalid.
    pub async fn register(&self, flow: Arc<dyn Flow>) -> Result<()> {
        if let Some(retry) = flow.retry_config() {
            retry.validate()?;
        }

        let mut flows = self.flows.write().await;
        let name = flow.name().to_string();
        if flows.contains_key(&name) {
            return Err(FlowError::DuplicateFlow { name });
        }
        log::debug!("Registered flow definition {}", name);
        flows.insert(name, flow);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Flow>> {
        let flows = self.flows.read().await;
        flows.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let flows = self.flows.read().await;
        let mut names: Vec<String> = flows.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for FlowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
