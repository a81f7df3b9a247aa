// SPDX-License-Identifier: MIT

//! Retry policy for failed flow executions
//!
//! Pure computation, no I/O. Attempt numbers passed to [`RetryConfig::backoff`]
//! are zero-based; [`RetryConfig::eligible`] takes the number of attempts
//! already made.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ValidationError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_MAX_BACKOFF_SECONDS: f64 = 3600.0;
const DEFAULT_MAX_DOUBLINGS: u32 = 16;
const DEFAULT_MIN_BACKOFF_SECONDS: f64 = 0.1;

/// Retry options for flows and steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of times a flow should be attempted
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Wall-clock budget for retrying; `None` retries indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry_seconds: Option<f64>,
    /// Upper bound on the wait between attempts
    #[serde(default = "default_max_backoff_seconds")]
    pub max_backoff_seconds: f64,
    /// Number of times the backoff may double
    #[serde(default = "default_max_doublings")]
    pub max_doublings: u32,
    /// Wait before the first retry
    #[serde(default = "default_min_backoff_seconds")]
    pub min_backoff_seconds: f64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_max_backoff_seconds() -> f64 {
    DEFAULT_MAX_BACKOFF_SECONDS
}

fn default_max_doublings() -> u32 {
    DEFAULT_MAX_DOUBLINGS
}

fn default_min_backoff_seconds() -> f64 {
    DEFAULT_MIN_BACKOFF_SECONDS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_retry_seconds: None,
            max_backoff_seconds: DEFAULT_MAX_BACKOFF_SECONDS,
            max_doublings: DEFAULT_MAX_DOUBLINGS,
            min_backoff_seconds: DEFAULT_MIN_BACKOFF_SECONDS,
        }
    }
}

impl RetryConfig {
    /// Backoff in seconds before retry number `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> f64 {
        let doublings = attempt.min(self.max_doublings).min(i32::MAX as u32) as i32;
        let delay = self.min_backoff_seconds * 2f64.powi(doublings);
        delay.min(self.max_backoff_seconds)
    }

    /// Same as [`RetryConfig::backoff`], as a `Duration`
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::try_from_secs_f64(self.backoff(attempt).max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Whether another attempt is allowed after `attempt` attempts and
    /// `elapsed_seconds` of retrying
    pub fn eligible(&self, attempt: u32, elapsed_seconds: f64) -> bool {
        attempt < self.max_attempts
            && self
                .max_retry_seconds
                .map_or(true, |budget| elapsed_seconds < budget)
    }

    /// Reject parameters the backoff formula cannot work with
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidRetryConfig(
                "maxAttempts must be at least 1".to_string(),
            ));
        }
        let seconds = [
            ("maxBackoffSeconds", Some(self.max_backoff_seconds)),
            ("minBackoffSeconds", Some(self.min_backoff_seconds)),
            ("maxRetrySeconds", self.max_retry_seconds),
        ];
        for (field, value) in seconds {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ValidationError::InvalidRetryConfig(format!(
                        "{} must be a non-negative number, got {}",
                        field, v
                    )));
                }
            }
        }
        if self.min_backoff_seconds > self.max_backoff_seconds {
            return Err(ValidationError::InvalidRetryConfig(
                "minBackoffSeconds exceeds maxBackoffSeconds".to_string(),
            ));
        }
        Ok(())
    }
}
