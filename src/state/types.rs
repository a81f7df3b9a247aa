// SPDX-License-Identifier: MIT

//! Flow execution record and operation snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Lifecycle status of a flow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    Running,
    Succeeded,
    Failed,
    Interrupted,
    Scheduled,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowStatus::Running => "RUNNING",
            FlowStatus::Succeeded => "SUCCEEDED",
            FlowStatus::Failed => "FAILED",
            FlowStatus::Interrupted => "INTERRUPTED",
            FlowStatus::Scheduled => "SCHEDULED",
        };
        f.write_str(s)
    }
}

/// Successful flow output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    pub response: Value,
}

/// Failure recorded on an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Failure category reported by the step logic
    pub kind: String,
    pub message: String,
}

/// Snapshot of a flow's execution outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Flow instance id
    pub name: String,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FlowResult>,
    /// Terminal error when `done`, advisory error of a retryable failure otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Suggested wait before a `retry` message, set on retryable failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<f64>,
}

impl Operation {
    /// Operation that has not completed yet
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            result: None,
            error: None,
            retry_after_seconds: None,
        }
    }

    /// Completed successfully with `response`
    pub fn succeeded(name: impl Into<String>, response: Value) -> Self {
        Self {
            result: Some(FlowResult { response }),
            done: true,
            ..Self::pending(name)
        }
    }

    /// Completed with a terminal error
    pub fn failed(name: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            error: Some(error),
            done: true,
            ..Self::pending(name)
        }
    }

    /// Not completed; the last attempt failed and may be retried
    pub fn retryable(name: impl Into<String>, error: ErrorInfo, retry_after_seconds: f64) -> Self {
        Self {
            error: Some(error),
            retry_after_seconds: Some(retry_after_seconds),
            ..Self::pending(name)
        }
    }

    /// The successful response, if any
    pub fn response(&self) -> Option<&Value> {
        self.result.as_ref().map(|r| &r.response)
    }
}

/// Durable record of one flow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowState {
    pub id: String,
    /// Flow definition this instance runs
    pub name: String,
    pub status: FlowStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub attempts: u32,
    pub operation: Operation,
    /// Last payload supplied by `resume`; only kept while INTERRUPTED
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_payload: Option<Value>,
    /// What the step logic reported when it paused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Start of the first execution attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl FlowState {
    /// New record in `status` with a pending operation
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        status: FlowStatus,
        input: Value,
    ) -> Self {
        let id = id.into();
        let now = Utc::now();
        Self {
            operation: Operation::pending(id.clone()),
            id,
            name: name.into(),
            status,
            input,
            attempts: 0,
            resume_payload: None,
            interrupt: None,
            scheduled_at: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
        }
    }

    /// Terminal records accept no further transitions
    pub fn is_terminal(&self) -> bool {
        self.operation.done
    }

    /// FAILED but still open to a `retry` message
    pub fn is_retryable(&self) -> bool {
        self.status == FlowStatus::Failed && !self.operation.done
    }

    /// Seconds since the first execution attempt started
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        let origin = self.started_at.unwrap_or(self.created_at);
        (now - origin).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Check the record against the FlowState contract
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("empty id".to_string());
        }
        if self.operation.name != self.id {
            return Err(format!(
                "operation name '{}' does not match id",
                self.operation.name
            ));
        }

        let op = &self.operation;
        if op.result.is_some() && op.error.is_some() {
            return Err("operation has both result and error".to_string());
        }

        match (self.status, op.done) {
            (FlowStatus::Succeeded, true) => {
                if op.result.is_none() {
                    return Err("SUCCEEDED operation without result".to_string());
                }
            }
            (FlowStatus::Failed, true) => {
                if op.error.is_none() {
                    return Err("terminal FAILED operation without error".to_string());
                }
            }
            (FlowStatus::Failed, false) => {
                if op.result.is_some() {
                    return Err("retryable FAILED operation with result".to_string());
                }
            }
            (FlowStatus::Running | FlowStatus::Scheduled | FlowStatus::Interrupted, false) => {
                if op.result.is_some() || op.error.is_some() {
                    return Err(format!("{} operation carries an outcome", self.status));
                }
            }
            (status, done) => {
                return Err(format!("status {} disagrees with done={}", status, done));
            }
        }

        let scheduled = self.status == FlowStatus::Scheduled;
        if scheduled != self.next_attempt_at.is_some() {
            return Err("nextAttemptAt must be present exactly while SCHEDULED".to_string());
        }
        if self.scheduled_at.is_some() && !scheduled {
            return Err("scheduledAt present outside SCHEDULED".to_string());
        }
        if self.interrupt.is_some() && self.status != FlowStatus::Interrupted {
            return Err("interrupt present outside INTERRUPTED".to_string());
        }
        if self.resume_payload.is_some() && self.status != FlowStatus::Interrupted {
            return Err("resumePayload present outside INTERRUPTED".to_string());
        }
        Ok(())
    }
}
