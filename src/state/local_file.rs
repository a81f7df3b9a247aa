// SPDX-License-Identifier: MIT

//! Flow state store that persists records on local disk
//!
//! One JSON file per flow id inside an explicitly configured root directory.
//! Writes land in a hidden temporary file first and are renamed into place,
//! so readers only ever see complete records.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::store::{decode_state, FlowStateQuery, FlowStateStore};
use super::types::FlowState;
use crate::error::StoreError;

/// Local-disk `FlowStateStore` backend.
///
/// `list` orders by file modification time. Saves made by this process also
/// carry a sequence number that breaks mtime ties; records written by an
/// earlier process with identical mtimes are ordered by id.
pub struct LocalFileFlowStateStore {
    root: PathBuf,
    seq: AtomicU64,
    save_order: Mutex<HashMap<String, u64>>,
}

struct Candidate {
    id: String,
    modified: SystemTime,
    seq: u64,
}

impl LocalFileFlowStateStore {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> crate::error::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        log::info!("Using LocalFileFlowStateStore. Root: {}", root.display());
        Ok(Self {
            root,
            seq: AtomicU64::new(0),
            save_order: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_id(id) {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }

    async fn read_record(&self, id: &str, path: &Path) -> Result<Option<FlowState>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(data) => decode_state(id, &data).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(id, e)),
        }
    }
}

/// Ids must be a single, visible path component
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0'])
}

#[async_trait]
impl FlowStateStore for LocalFileFlowStateStore {
    async fn load(&self, id: &str) -> Result<Option<FlowState>, StoreError> {
        let path = self.path_for(id)?;
        self.read_record(id, &path).await
    }

    async fn save(&self, id: &str, state: &FlowState) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        log::debug!("save flow state {}", id);

        let data = serde_json::to_vec(state).map_err(|source| StoreError::Encode {
            flow_id: id.to_string(),
            source,
        })?;

        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", id, uuid::Uuid::new_v4()));
        let written = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(id, e));
        }

        // Renames happen in sequence order so later saves rank as newer
        let mut save_order = self.save_order.lock().await;
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(id, e));
        }
        save_order.insert(id.to_string(), seq);
        Ok(())
    }

    async fn list(&self, query: &FlowStateQuery) -> Result<Vec<FlowState>, StoreError> {
        let root_label = self.root.display().to_string();
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::io(&root_label, e))?;

        let save_order = self.save_order.lock().await.clone();
        let mut candidates = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&root_label, e))?
        {
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_valid_id(&id) {
                // Temporary files and foreign entries
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(&id, e)),
            };
            let modified = metadata
                .modified()
                .map_err(|e| StoreError::io(&id, e))?;
            let seq = save_order.get(&id).copied().unwrap_or(0);
            candidates.push(Candidate { id, modified, seq });
        }

        candidates.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| b.seq.cmp(&a.seq))
                .then_with(|| a.id.cmp(&b.id))
        });

        let limit = query.effective_limit();
        let mut states = Vec::with_capacity(limit.min(candidates.len()));
        for candidate in candidates {
            if states.len() >= limit {
                break;
            }
            let path = self.root.join(&candidate.id);
            if let Some(state) = self.read_record(&candidate.id, &path).await? {
                if query.matches(&state) {
                    states.push(state);
                }
            }
        }
        Ok(states)
    }
}

impl std::fmt::Debug for LocalFileFlowStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFileFlowStateStore")
            .field("root", &self.root)
            .finish()
    }
}
