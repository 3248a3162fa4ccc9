//! Scriptable in-process extractor.
//!
//! Tests script the provider's behavior per submission: how many polls an
//! operation stays running, what it resolves to, and whether leading
//! submissions fail transiently. Submission and poll instants are recorded
//! so rate-limit and backoff tests can assert on spacing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use docket_core::extract::{Extractor, OperationId, PollOutcome};
use docket_core::{Error, Result};

/// Terminal behavior of a scripted operation.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Resolve with the given fields and confidence.
    Succeed {
        /// Raw field map returned by the provider.
        fields: serde_json::Value,
        /// Overall confidence.
        confidence: Option<f64>,
    },
    /// Resolve as failed.
    Fail {
        /// Provider failure message.
        message: String,
        /// Whether resubmission may succeed.
        transient: bool,
    },
    /// Stay running forever (poll-timeout tests).
    NeverFinish,
}

/// Behavior of one scripted submission.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// `Running` polls observed before the terminal outcome.
    pub polls_until_done: u32,
    /// Terminal outcome.
    pub outcome: MockOutcome,
    /// `Retry-After` hint attached to running polls.
    pub retry_after: Option<Duration>,
}

impl MockScript {
    /// Succeeds after one poll with the given fields.
    pub fn succeed(fields: serde_json::Value) -> Self {
        Self {
            polls_until_done: 0,
            outcome: MockOutcome::Succeed {
                fields,
                confidence: Some(0.95),
            },
            retry_after: None,
        }
    }

    /// Fails permanently after one poll.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            polls_until_done: 0,
            outcome: MockOutcome::Fail {
                message: message.into(),
                transient: false,
            },
            retry_after: None,
        }
    }

    /// Never reaches a terminal status.
    pub fn never_finish() -> Self {
        Self {
            polls_until_done: 0,
            outcome: MockOutcome::NeverFinish,
            retry_after: None,
        }
    }

    /// Number of running polls before the outcome applies.
    pub fn with_polls_until_done(mut self, polls: u32) -> Self {
        self.polls_until_done = polls;
        self
    }

    /// Retry-After hint attached while running.
    pub fn with_retry_after(mut self, hint: Duration) -> Self {
        self.retry_after = Some(hint);
        self
    }
}

struct OperationState {
    remaining_polls: u32,
    script: MockScript,
}

#[derive(Default)]
struct State {
    scripts: VecDeque<MockScript>,
    operations: HashMap<String, OperationState>,
    submissions: Vec<Instant>,
    polls: Vec<Instant>,
    fail_submits_remaining: u32,
    next_operation: u64,
}

/// Scriptable [`Extractor`] for tests.
pub struct MockExtractor {
    state: Mutex<State>,
    default_script: MockScript,
}

impl MockExtractor {
    /// Creates a mock whose submissions succeed with empty fields.
    pub fn new() -> Self {
        Self::with_default_script(MockScript::succeed(serde_json::json!({})))
    }

    /// Creates a mock with the given default script.
    pub fn with_default_script(default_script: MockScript) -> Self {
        Self {
            state: Mutex::new(State::default()),
            default_script,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a script consumed by the next unscripted submission.
    pub fn push_script(&self, script: MockScript) {
        self.state().scripts.push_back(script);
    }

    /// Makes the next `count` submissions fail with a transient error.
    pub fn fail_next_submits(&self, count: u32) {
        self.state().fail_submits_remaining = count;
    }

    /// Instants of every accepted or rejected submission attempt.
    pub fn submissions(&self) -> Vec<Instant> {
        self.state().submissions.clone()
    }

    /// Instants of every poll call.
    pub fn polls(&self) -> Vec<Instant> {
        self.state().polls.clone()
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Extractor for MockExtractor {
    async fn submit(&self, _model_id: &str, _payload: Bytes) -> Result<OperationId> {
        let mut state = self.state();
        state.submissions.push(Instant::now());

        if state.fail_submits_remaining > 0 {
            state.fail_submits_remaining -= 1;
            return Err(Error::extractor_transient().with_detail("scripted 429"));
        }

        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| self.default_script.clone());

        state.next_operation += 1;
        let operation = format!("mock-op-{}", state.next_operation);
        state.operations.insert(
            operation.clone(),
            OperationState {
                remaining_polls: script.polls_until_done,
                script,
            },
        );

        Ok(OperationId::new(operation))
    }

    async fn poll(&self, operation_id: &OperationId) -> Result<PollOutcome> {
        let mut state = self.state();
        state.polls.push(Instant::now());

        let Some(operation) = state.operations.get_mut(operation_id.as_str()) else {
            return Err(Error::extractor_permanent().with_detail("unknown operation"));
        };

        if operation.remaining_polls > 0 {
            operation.remaining_polls -= 1;
            return Ok(PollOutcome::Running {
                retry_after: operation.script.retry_after,
            });
        }

        match &operation.script.outcome {
            MockOutcome::NeverFinish => Ok(PollOutcome::Running {
                retry_after: operation.script.retry_after,
            }),
            MockOutcome::Succeed { fields, confidence } => Ok(PollOutcome::Succeeded {
                fields: fields.clone(),
                confidence: *confidence,
            }),
            MockOutcome::Fail { message, transient } => Ok(PollOutcome::Failed {
                message: message.clone(),
                transient: *transient,
            }),
        }
    }
}
