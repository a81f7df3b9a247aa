// SPDX-License-Identifier: MIT

//! flowkeeper-rs: durable flow execution
//!
//! Runs long-lived, interruptible units of work ("flows"), persists their
//! progress after every transition and redelivers them through a small
//! envelope protocol with bounded retry.
//!
//! - `envelope` - the six control messages (start, schedule, runScheduled,
//!   retry, resume, state)
//! - `dispatcher` - interprets messages and drives the flow lifecycle
//! - `retry` - backoff and retry eligibility
//! - `state` - flow records and the storage contract
//! - `flow` - the step-logic seam implemented by callers

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod flow;
pub mod retry;
pub mod state;

pub use config::EngineConfig;
pub use dispatcher::{Dispatcher, Scheduler};
pub use envelope::FlowInvokeEnvelopeMessage;
pub use error::{FlowError, Result, StoreError, ValidationError};
pub use flow::{Flow, FlowContext, FlowRegistry, StepError};
pub use retry::RetryConfig;
pub use state::{
    FlowState, FlowStateQuery, FlowStateStore, FlowStatus, InMemoryFlowStateStore,
    LocalFileFlowStateStore, Operation,
};
