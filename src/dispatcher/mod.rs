// SPDX-License-Identifier: MIT

//! Flow dispatcher
//!
//! Interprets envelope messages, drives flow execution and persists every
//! transition. Lifecycle of a flow instance:
//!
//! ```text
//! (none) --start/schedule--> RUNNING | SCHEDULED
//! SCHEDULED --runScheduled--> RUNNING
//! RUNNING --success--> SUCCEEDED (terminal)
//! RUNNING --interrupt, unrecoverable failure or cancellation--> INTERRUPTED
//! RUNNING --recoverable failure, retry eligible--> FAILED (retryable)
//! RUNNING --recoverable failure, retry not eligible--> FAILED (terminal)
//! FAILED (retryable) --retry--> RUNNING
//! FAILED (retryable) --schedule_retry--> SCHEDULED
//! INTERRUPTED --resume--> RUNNING
//! ```
//!
//! A RUNNING record found while holding its id lock has no live run in this
//! process: the previous run died before saving its outcome. `runScheduled`
//! and `retry` treat it as a redelivery and run it again.

mod locks;
mod scheduler;

pub use scheduler::Scheduler;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::envelope::FlowInvokeEnvelopeMessage;
use crate::error::{FlowError, Result, ValidationError};
use crate::flow::{Flow, FlowContext, FlowRegistry, StepError};
use crate::retry::RetryConfig;
use crate::state::{
    ErrorInfo, FlowState, FlowStateQuery, FlowStateStore, FlowStatus, Operation,
    DEFAULT_LIST_LIMIT,
};
use locks::LockTable;

/// Drives flow instances through their lifecycle
pub struct Dispatcher {
    store: Arc<dyn FlowStateStore>,
    retry: RetryConfig,
    scheduler: Option<Arc<dyn Scheduler>>,
    list_limit: usize,
    locks: LockTable,
}

/// How an execution attempt was entered
enum Entry {
    Fresh,
    Resumed(Option<Value>),
}

impl Dispatcher {
    /// Create a dispatcher over `store` with the default retry policy
    pub fn new(store: Arc<dyn FlowStateStore>) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
            scheduler: None,
            list_limit: DEFAULT_LIST_LIMIT,
            locks: LockTable::new(),
        }
    }

    /// Retry policy for flows that do not define their own
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Result<Self> {
        retry.validate()?;
        self.retry = retry;
        Ok(self)
    }

    /// Collaborator that triggers `runScheduled` messages when they are due
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Page size for `list` queries that do not set a limit
    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn FlowStateStore> {
        &self.store
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Deliver `message` for `flow` and return the resulting operation
    pub async fn deliver(
        &self,
        flow: &dyn Flow,
        message: FlowInvokeEnvelopeMessage,
    ) -> Result<Operation> {
        self.deliver_with_cancel(flow, message, std::future::pending())
            .await
    }

    /// Like [`Dispatcher::deliver`], but a run still going after `timeout`
    /// is recorded as INTERRUPTED
    pub async fn deliver_with_deadline(
        &self,
        flow: &dyn Flow,
        message: FlowInvokeEnvelopeMessage,
        timeout: Duration,
    ) -> Result<Operation> {
        self.deliver_with_cancel(flow, message, tokio::time::sleep(timeout))
            .await
    }

    /// Parse a JSON envelope and deliver it
    pub async fn deliver_json(&self, flow: &dyn Flow, envelope: &str) -> Result<Operation> {
        let message = FlowInvokeEnvelopeMessage::from_json(envelope)?;
        self.deliver(flow, message).await
    }

    /// Deliver to the flow registered under `name`
    pub async fn deliver_by_name(
        &self,
        registry: &FlowRegistry,
        name: &str,
        message: FlowInvokeEnvelopeMessage,
    ) -> Result<Operation> {
        let flow = registry.get(name).await.ok_or_else(|| FlowError::UnknownFlow {
            name: name.to_string(),
        })?;
        self.deliver(flow.as_ref(), message).await
    }

    /// Deliver `message`; if `cancel` resolves while the step logic runs,
    /// the instance is persisted as INTERRUPTED and the call returns.
    pub async fn deliver_with_cancel<C>(
        &self,
        flow: &dyn Flow,
        message: FlowInvokeEnvelopeMessage,
        cancel: C,
    ) -> Result<Operation>
    where
        C: Future<Output = ()> + Send,
    {
        message.validate()?;

        match message {
            FlowInvokeEnvelopeMessage::Start(start) => {
                let policy = self.policy_for(flow)?;
                let state = FlowState::new(
                    new_flow_id(),
                    flow.name(),
                    FlowStatus::Running,
                    start.input.unwrap_or(Value::Null),
                );
                log::info!("Starting flow {} ({})", state.id, state.name);
                let _guard = self.locks.acquire(&state.id).await;
                self.execute(flow, state, &policy, Entry::Fresh, cancel)
                    .await
            }
            FlowInvokeEnvelopeMessage::Schedule(schedule) => {
                let state = self
                    .create_scheduled(flow, schedule.input, schedule.delay.unwrap_or(0.0))
                    .await?;
                Ok(state.operation)
            }
            FlowInvokeEnvelopeMessage::RunScheduled(target) => {
                let policy = self.policy_for(flow)?;
                let _guard = self.locks.acquire(&target.flow_id).await;
                let state = self.load_for(flow, &target.flow_id).await?;
                match state.status {
                    FlowStatus::Scheduled => {}
                    FlowStatus::Running => log::warn!(
                        "Flow {} left RUNNING without an outcome, running it again",
                        state.id
                    ),
                    status => {
                        return Err(ValidationError::invalid_transition(
                            &state.id,
                            "runScheduled",
                            status,
                        )
                        .into())
                    }
                }
                self.execute(flow, state, &policy, Entry::Fresh, cancel)
                    .await
            }
            FlowInvokeEnvelopeMessage::Retry(target) => {
                let policy = self.policy_for(flow)?;
                let _guard = self.locks.acquire(&target.flow_id).await;
                let state = self.load_for(flow, &target.flow_id).await?;
                ensure_retryable(&state, &policy, Utc::now())?;
                self.execute(flow, state, &policy, Entry::Fresh, cancel)
                    .await
            }
            FlowInvokeEnvelopeMessage::Resume(resume) => {
                let policy = self.policy_for(flow)?;
                let _guard = self.locks.acquire(&resume.flow_id).await;
                let mut state = self.load_for(flow, &resume.flow_id).await?;
                if state.status != FlowStatus::Interrupted {
                    return Err(ValidationError::invalid_transition(
                        &state.id,
                        "resume",
                        state.status,
                    )
                    .into());
                }
                // A payload kept from a cancelled resumed run is reused
                let payload = resume.payload.or_else(|| state.resume_payload.take());
                self.execute(flow, state, &policy, Entry::Resumed(payload), cancel)
                    .await
            }
            FlowInvokeEnvelopeMessage::State(target) => {
                Ok(self.state(&target.flow_id).await?.operation)
            }
        }
    }

    /// Persist a flow instance without running it.
    ///
    /// `start` and `schedule` messages create a new SCHEDULED instance due
    /// after `delay_seconds` (falling back to the message's own `delay`).
    /// A `retry` message moves a retryable FAILED instance to SCHEDULED, due
    /// after `delay_seconds` or the policy backoff. Returns the flow id.
    pub async fn schedule(
        &self,
        flow: &dyn Flow,
        message: FlowInvokeEnvelopeMessage,
        delay_seconds: Option<f64>,
    ) -> Result<String> {
        message.validate()?;
        if let Some(delay) = delay_seconds {
            check_delay(delay)?;
        }

        match message {
            FlowInvokeEnvelopeMessage::Start(start) => {
                let state = self
                    .create_scheduled(flow, start.input, delay_seconds.unwrap_or(0.0))
                    .await?;
                Ok(state.id)
            }
            FlowInvokeEnvelopeMessage::Schedule(schedule) => {
                let delay = delay_seconds.or(schedule.delay).unwrap_or(0.0);
                let state = self.create_scheduled(flow, schedule.input, delay).await?;
                Ok(state.id)
            }
            FlowInvokeEnvelopeMessage::Retry(target) => {
                self.reschedule_failed(flow, &target.flow_id, delay_seconds)
                    .await?;
                Ok(target.flow_id)
            }
            other => Err(ValidationError::Malformed(format!(
                "{} messages cannot be scheduled",
                other.kind()
            ))
            .into()),
        }
    }

    /// Move a retryable FAILED instance to SCHEDULED, due after the policy
    /// backoff for its attempt count. Returns the due time.
    pub async fn schedule_retry(&self, flow: &dyn Flow, flow_id: &str) -> Result<DateTime<Utc>> {
        self.reschedule_failed(flow, flow_id, None).await
    }

    /// Current record of a flow instance
    pub async fn state(&self, flow_id: &str) -> Result<FlowState> {
        self.store
            .load(flow_id)
            .await?
            .ok_or_else(|| FlowError::not_found(flow_id))
    }

    /// Recently updated flow instances
    pub async fn list(&self, query: &FlowStateQuery) -> Result<Vec<FlowState>> {
        if query.limit.is_some() {
            return Ok(self.store.list(query).await?);
        }
        let query = FlowStateQuery {
            limit: Some(self.list_limit),
            ..query.clone()
        };
        Ok(self.store.list(&query).await?)
    }

    /// The flow's own retry policy if it has one, else the dispatcher default
    fn policy_for(&self, flow: &dyn Flow) -> Result<RetryConfig> {
        match flow.retry_config() {
            Some(policy) => {
                policy.validate()?;
                Ok(policy)
            }
            None => Ok(self.retry.clone()),
        }
    }

    async fn load_for(&self, flow: &dyn Flow, flow_id: &str) -> Result<FlowState> {
        let state = self.state(flow_id).await?;
        if state.name != flow.name() {
            return Err(ValidationError::FlowMismatch {
                flow_id: flow_id.to_string(),
                expected: state.name,
                actual: flow.name().to_string(),
            }
            .into());
        }
        Ok(state)
    }

    async fn create_scheduled(
        &self,
        flow: &dyn Flow,
        input: Option<Value>,
        delay_seconds: f64,
    ) -> Result<FlowState> {
        check_delay(delay_seconds)?;
        self.policy_for(flow)?;
        let mut state = FlowState::new(
            new_flow_id(),
            flow.name(),
            FlowStatus::Scheduled,
            input.unwrap_or(Value::Null),
        );
        let now = state.created_at;
        let due = due_after(now, delay_seconds)?;
        state.scheduled_at = Some(now);
        state.next_attempt_at = Some(due);

        self.store.save(&state.id, &state).await?;
        log::info!(
            "Scheduled flow {} ({}) for {}",
            state.id,
            state.name,
            due.to_rfc3339()
        );
        self.enqueue(&state, due).await?;
        Ok(state)
    }

    async fn reschedule_failed(
        &self,
        flow: &dyn Flow,
        flow_id: &str,
        delay_seconds: Option<f64>,
    ) -> Result<DateTime<Utc>> {
        let policy = self.policy_for(flow)?;
        let _guard = self.locks.acquire(flow_id).await;
        let mut state = self.load_for(flow, flow_id).await?;
        let now = Utc::now();
        ensure_retryable(&state, &policy, now)?;

        let delay = match delay_seconds {
            Some(d) => d,
            None => policy.backoff(state.attempts.saturating_sub(1)),
        };
        let due = due_after(now, delay)?;

        let previous = state.status;
        state.status = FlowStatus::Scheduled;
        state.scheduled_at = Some(now);
        state.next_attempt_at = Some(due);
        state.operation = Operation::pending(&state.id);
        state.updated_at = now;

        self.store.save(&state.id, &state).await?;
        log::info!(
            "Flow {} {} -> SCHEDULED, retry due {}",
            state.id,
            previous,
            due.to_rfc3339()
        );
        self.enqueue(&state, due).await?;
        Ok(due)
    }

    async fn enqueue(&self, state: &FlowState, due: DateTime<Utc>) -> Result<()> {
        if let Some(scheduler) = &self.scheduler {
            scheduler
                .enqueue(
                    &state.name,
                    FlowInvokeEnvelopeMessage::run_scheduled(&state.id),
                    due,
                )
                .await?;
        }
        Ok(())
    }

    /// Run one attempt of `state` and persist the outcome
    async fn execute<C>(
        &self,
        flow: &dyn Flow,
        mut state: FlowState,
        policy: &RetryConfig,
        entry: Entry,
        cancel: C,
    ) -> Result<Operation>
    where
        C: Future<Output = ()> + Send,
    {
        let (resumed, resume_payload) = match entry {
            Entry::Fresh => (false, None),
            Entry::Resumed(payload) => (true, payload),
        };

        let previous = state.status;
        let now = Utc::now();
        state.status = FlowStatus::Running;
        state.attempts += 1;
        state.scheduled_at = None;
        state.next_attempt_at = None;
        state.interrupt = None;
        state.resume_payload = None;
        state.started_at.get_or_insert(now);
        state.operation = Operation::pending(&state.id);
        state.updated_at = now;
        self.store.save(&state.id, &state).await?;

        log::info!(
            "Flow {} ({}) {} -> RUNNING, attempt {}",
            state.id,
            state.name,
            previous,
            state.attempts
        );

        let ctx = FlowContext {
            flow_id: state.id.clone(),
            input: state.input.clone(),
            attempt: state.attempts,
            resumed,
            resume_payload: resume_payload.clone(),
        };

        tokio::pin!(cancel);
        let outcome = tokio::select! {
            result = flow.run(ctx) => Some(result),
            _ = &mut cancel => None,
        };

        let now = Utc::now();
        match outcome {
            Some(Ok(response)) => {
                state.status = FlowStatus::Succeeded;
                state.operation = Operation::succeeded(&state.id, response);
                log::info!("Flow {} SUCCEEDED", state.id);
            }
            Some(Err(StepError::Interrupted(payload))) => {
                state.status = FlowStatus::Interrupted;
                state.interrupt = Some(payload);
                log::info!("Flow {} INTERRUPTED, awaiting resume", state.id);
            }
            Some(Err(StepError::Recoverable { kind, message })) => {
                let error = ErrorInfo { kind, message };
                state.status = FlowStatus::Failed;
                if policy.eligible(state.attempts, state.elapsed_seconds(now)) {
                    let retry_after = policy.backoff(state.attempts - 1);
                    log::warn!(
                        "Flow {} failed on attempt {}: {}; retry eligible after {:.3}s",
                        state.id,
                        state.attempts,
                        error.message,
                        retry_after
                    );
                    state.operation = Operation::retryable(&state.id, error, retry_after);
                } else {
                    log::warn!(
                        "Flow {} failed on attempt {}: {}; retries exhausted",
                        state.id,
                        state.attempts,
                        error.message
                    );
                    state.operation = Operation::failed(&state.id, error);
                }
            }
            Some(Err(StepError::Unrecoverable { kind, message })) => {
                log::error!(
                    "Flow {} hit an unrecoverable {} failure: {}; INTERRUPTED",
                    state.id,
                    kind,
                    message
                );
                state.status = FlowStatus::Interrupted;
                state.interrupt = Some(json!({ "kind": kind, "message": message }));
            }
            None => {
                log::warn!("Flow {} cancelled, recording INTERRUPTED", state.id);
                state.status = FlowStatus::Interrupted;
                state.interrupt = Some(json!({ "reason": "cancelled" }));
                state.resume_payload = resume_payload;
            }
        }

        state.updated_at = now;
        self.store.save(&state.id, &state).await?;
        Ok(state.operation)
    }
}

fn new_flow_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A retry needs an open FAILED record (or a RUNNING one left without an
/// outcome) and a policy that still allows another attempt at `now`
fn ensure_retryable(
    state: &FlowState,
    policy: &RetryConfig,
    now: DateTime<Utc>,
) -> std::result::Result<(), ValidationError> {
    let exhausted = || ValidationError::RetryExhausted {
        flow_id: state.id.clone(),
        attempts: state.attempts,
    };
    match state.status {
        FlowStatus::Failed if state.is_retryable() => {}
        FlowStatus::Running => {}
        FlowStatus::Failed => return Err(exhausted()),
        status => {
            return Err(ValidationError::invalid_transition(
                &state.id, "retry", status,
            ))
        }
    }
    if !policy.eligible(state.attempts, state.elapsed_seconds(now)) {
        return Err(exhausted());
    }
    Ok(())
}

fn check_delay(delay: f64) -> std::result::Result<(), ValidationError> {
    if !delay.is_finite() || delay < 0.0 {
        return Err(ValidationError::Malformed(format!(
            "delay must be a non-negative number of seconds, got {}",
            delay
        )));
    }
    Ok(())
}

fn due_after(
    now: DateTime<Utc>,
    delay_seconds: f64,
) -> std::result::Result<DateTime<Utc>, ValidationError> {
    let out_of_range =
        || ValidationError::Malformed(format!("delay {}s is out of range", delay_seconds));
    let delay = Duration::try_from_secs_f64(delay_seconds).map_err(|_| out_of_range())?;
    let delay = chrono::Duration::from_std(delay).map_err(|_| out_of_range())?;
    now.checked_add_signed(delay).ok_or_else(out_of_range)
}
