// SPDX-License-Identifier: MIT

//! Flow state persistence
//!
//! This module provides:
//! - `FlowState` - the durable record of one flow instance
//! - `Operation` - the outcome snapshot returned to callers
//! - `FlowStateStore` - the storage contract, with a local-disk and an
//!   in-memory backend

mod local_file;
mod memory;
mod store;
mod types;

pub use local_file::LocalFileFlowStateStore;
pub use memory::InMemoryFlowStateStore;
pub use store::{FlowStateQuery, FlowStateStore, DEFAULT_LIST_LIMIT};
pub use types::{ErrorInfo, FlowResult, FlowState, FlowStatus, Operation};
