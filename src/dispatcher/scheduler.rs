// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::envelope::FlowInvokeEnvelopeMessage;
use crate::error::FlowError;

/// Delayed delivery collaborator (task queue, cloud scheduler, ...).
///
/// The dispatcher records due times and hands the resulting `runScheduled`
/// messages to this trait; it never polls or sets timers itself. An
/// implementation is expected to call `Dispatcher::deliver` with `message`
/// for the flow named `flow_name` at or after `due_at`.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn enqueue(
        &self,
        flow_name: &str,
        message: FlowInvokeEnvelopeMessage,
        due_at: DateTime<Utc>,
    ) -> Result<(), FlowError>;
}
