// SPDX-License-Identifier: MIT

//! Flow definitions - the step logic the dispatcher drives
//!
//! The engine does not know what a flow does. A `Flow` receives a
//! `FlowContext` and either produces an output, asks to be paused until a
//! `resume` message arrives, or fails. Only recoverable failures go through
//! the retry policy; an unrecoverable one pauses the instance like an
//! interrupt so an operator can resume it.

mod registry;

pub use registry::FlowRegistry;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::retry::RetryConfig;

/// Everything a flow run can see about its instance
#[derive(Debug, Clone)]
pub struct FlowContext {
    pub flow_id: String,
    pub input: Value,
    /// One-based number of this execution attempt
    pub attempt: u32,
    /// Set when a `resume` message continued this run, with or without payload
    pub resumed: bool,
    /// Payload from the `resume` message that continued this run
    pub resume_payload: Option<Value>,
}

impl FlowContext {
    /// Whether this run continues an interrupted instance
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }
}

/// How a flow run ended without producing an output
#[derive(Debug, Clone, PartialEq)]
pub enum StepError {
    /// Pause until a `resume` message supplies more input
    Interrupted(Value),
    /// Transient failure; subject to the retry policy
    Recoverable { kind: String, message: String },
    /// Failure that no retry can fix; the instance waits for a `resume`
    Unrecoverable { kind: String, message: String },
}

impl StepError {
    /// Create an interrupt carrying what the flow is waiting for
    pub fn interrupt(payload: Value) -> Self {
        Self::Interrupted(payload)
    }

    /// Create a recoverable failure
    pub fn recoverable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Recoverable {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an unrecoverable failure
    pub fn unrecoverable(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unrecoverable {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Interrupted(payload) => write!(f, "interrupted: {}", payload),
            StepError::Recoverable { kind, message } => {
                write!(f, "recoverable {} failure: {}", kind, message)
            }
            StepError::Unrecoverable { kind, message } => {
                write!(f, "unrecoverable {} failure: {}", kind, message)
            }
        }
    }
}

impl std::error::Error for StepError {}

/// A named, resumable unit of work
#[async_trait]
pub trait Flow: Send + Sync {
    /// Flow definition name, recorded on every instance
    fn name(&self) -> &str;

    /// Retry policy for this flow; `None` uses the dispatcher default
    fn retry_config(&self) -> Option<RetryConfig> {
        None
    }

    /// Run the flow's step logic once
    async fn run(&self, ctx: FlowContext) -> Result<Value, StepError>;
}
