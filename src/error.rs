// SPDX-License-Identifier: MIT

//! Typed error handling for flowkeeper-rs
//!
//! Store-level failures (`StoreError`) and envelope/transition rejections
//! (`ValidationError`) propagate to callers through `FlowError`. Failures
//! raised by flow step logic are not in this hierarchy: they are captured
//! into the persisted `FlowState` (see `flow::StepError`).

use thiserror::Error;

use crate::state::FlowStatus;

/// Top-level error type for flowkeeper-rs
#[derive(Debug, Error)]
pub enum FlowError {
    /// No flow state exists for the requested id
    #[error("Flow '{flow_id}' not found")]
    NotFound { flow_id: String },

    /// No flow definition registered under this name
    #[error("Flow definition '{name}' is not registered")]
    UnknownFlow { name: String },

    /// A flow definition is already registered under this name
    #[error("Flow definition '{name}' is already registered")]
    DuplicateFlow { name: String },

    /// Persistence backend failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Envelope or state transition rejected before any write
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration errors (missing env vars, invalid config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external scheduling collaborator refused a message
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors raised by `FlowStateStore` implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Stored payload does not parse or violates the FlowState invariants
    #[error("Corrupted flow state '{flow_id}': {reason}")]
    Corruption { flow_id: String, reason: String },

    /// Id cannot be used as a storage key
    #[error("Invalid flow id '{0}'")]
    InvalidId(String),

    /// Backend I/O failure
    #[error("I/O error on flow state '{flow_id}': {source}")]
    Io {
        flow_id: String,
        #[source]
        source: std::io::Error,
    },

    /// State could not be encoded for storage
    #[error("Failed to encode flow state '{flow_id}': {source}")]
    Encode {
        flow_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Envelope and transition validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Envelope has no populated variant
    #[error("Envelope message has no populated variant")]
    EmptyEnvelope,

    /// Envelope has more than one populated variant
    #[error("Envelope message has multiple populated variants: {0:?}")]
    MultipleVariants(Vec<String>),

    /// Envelope key is not one of the six control operations
    #[error("Unknown envelope variant: {0}")]
    UnknownVariant(String),

    /// Envelope body does not match its variant's shape
    #[error("Malformed envelope message: {0}")]
    Malformed(String),

    /// Requested operation is incompatible with the stored status
    #[error("Cannot {operation} flow '{flow_id}' in status {status}")]
    InvalidTransition {
        flow_id: String,
        operation: String,
        status: FlowStatus,
    },

    /// Retry requested on a flow whose retries are exhausted
    #[error("Flow '{flow_id}' exhausted its retries after {attempts} attempts")]
    RetryExhausted { flow_id: String, attempts: u32 },

    /// Message names a flow instance that belongs to another flow definition
    #[error("Flow '{flow_id}' belongs to '{expected}', not '{actual}'")]
    FlowMismatch {
        flow_id: String,
        expected: String,
        actual: String,
    },

    /// Retry policy parameters out of range
    #[error("Invalid retry config: {0}")]
    InvalidRetryConfig(String),
}

impl FlowError {
    /// Create a not found error
    pub fn not_found(flow_id: impl Into<String>) -> Self {
        Self::NotFound {
            flow_id: flow_id.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a scheduler error
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler(message.into())
    }

    /// Whether this is a corruption error from the store
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Store(StoreError::Corruption { .. }))
    }
}

impl StoreError {
    /// Create a corruption error
    pub fn corruption(flow_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            flow_id: flow_id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(flow_id: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            flow_id: flow_id.into(),
            source,
        }
    }
}

impl ValidationError {
    /// Create an invalid transition error
    pub fn invalid_transition(
        flow_id: impl Into<String>,
        operation: impl Into<String>,
        status: FlowStatus,
    ) -> Self {
        Self::InvalidTransition {
            flow_id: flow_id.into(),
            operation: operation.into(),
            status,
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, FlowError>;
