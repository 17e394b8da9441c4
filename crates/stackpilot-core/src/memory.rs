//! In-memory provider that mimics stack orchestration status transitions.
//!
//! Changes settle after a configurable number of status checks. Failures,
//! transport errors and pre-existing stacks can be injected so reconciler
//! behaviour can be exercised without a network.

use crate::error::ProviderError;
use crate::provider::{ProviderClient, ProviderResult};
use crate::types::{OperationHandle, PollResult, RawStatus, StackAction, StackPhase, StackRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct FakeStack {
    template: String,
    previous_template: Option<String>,
    status: String,
    phase: StackPhase,
    reason: Option<String>,
    pending: Option<Transition>,
    events: Vec<String>,
    revision: u32,
    stale: Option<StaleRead>,
}

/// Pre-submit status still served by an eventually consistent read path
#[derive(Debug, Clone)]
struct StaleRead {
    remaining: u32,
    status: String,
    phase: StackPhase,
    reason: Option<String>,
}

#[derive(Debug, Clone)]
struct Transition {
    remaining_polls: u32,
    outcome: Outcome,
}

#[derive(Debug, Clone)]
enum Outcome {
    Settle {
        status: &'static str,
        phase: StackPhase,
        reason: Option<String>,
    },
    Remove,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    reason: String,
    events: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    stacks: HashMap<String, FakeStack>,
    settle_polls: u32,
    stale_reads: u32,
    describe_failures: u32,
    submit_failure: Option<ProviderError>,
    next_failure: HashMap<String, InjectedFailure>,
    submit_calls: usize,
    describe_calls: usize,
    history: HashMap<String, Vec<String>>,
}

/// Provider double backed by a mutex-guarded map of stacks
#[derive(Debug)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                settle_polls: 2,
                ..Default::default()
            }),
        }
    }

    /// Number of in-progress status checks before a change settles
    pub fn with_settle_polls(self, polls: u32) -> Self {
        self.lock().settle_polls = polls;
        self
    }

    /// After a change is submitted over an existing stack, the next `reads`
    /// status checks still report the status it had before the submit
    pub fn with_stale_reads(self, reads: u32) -> Self {
        self.lock().stale_reads = reads;
        self
    }

    /// Insert a stack in the given state, bypassing `submit_change`
    pub fn seed_stack(&self, name: &str, template: &str, status: &'static str, phase: StackPhase) {
        self.lock().stacks.insert(
            name.to_string(),
            FakeStack {
                template: template.to_string(),
                previous_template: None,
                status: status.to_string(),
                phase,
                reason: None,
                pending: None,
                events: Vec::new(),
                revision: 1,
                stale: None,
            },
        );
    }

    /// The next change submitted for `name` rolls back with these reasons
    pub fn fail_next_change(&self, name: &str, reason: &str, events: &[&str]) {
        self.lock().next_failure.insert(
            name.to_string(),
            InjectedFailure {
                reason: reason.to_string(),
                events: events.iter().map(|e| e.to_string()).collect(),
            },
        );
    }

    /// The next `count` status checks fail with a transport error
    pub fn fail_next_describes(&self, count: u32) {
        self.lock().describe_failures = count;
    }

    /// The next `submit_change` call fails with `error`
    pub fn fail_next_submit(&self, error: ProviderError) {
        self.lock().submit_failure = Some(error);
    }

    pub fn submit_calls(&self) -> usize {
        self.lock().submit_calls
    }

    pub fn describe_calls(&self) -> usize {
        self.lock().describe_calls
    }

    /// Status names returned by `describe_status` for `name`, oldest first
    pub fn status_history(&self, name: &str) -> Vec<String> {
        self.lock().history.get(name).cloned().unwrap_or_default()
    }

    pub fn template(&self, name: &str) -> Option<String> {
        self.lock().stacks.get(name).map(|s| s.template.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn stale_read(&self, previous: &FakeStack) -> Option<StaleRead> {
        (self.stale_reads > 0).then(|| StaleRead {
            remaining: self.stale_reads,
            status: previous.status.clone(),
            phase: previous.phase,
            reason: previous.reason.clone(),
        })
    }

    fn transition(&mut self, name: &str, outcome: Outcome) -> Transition {
        Transition {
            remaining_polls: self.settle_polls,
            outcome,
        }
        .with_failure(self.next_failure.remove(name))
    }
}

impl Transition {
    fn with_failure(self, failure: Option<InjectedFailure>) -> Self {
        let Some(failure) = failure else {
            return self;
        };
        let status = match self.outcome {
            Outcome::Settle { status, .. } if status.starts_with("UPDATE") => {
                "UPDATE_ROLLBACK_COMPLETE"
            }
            Outcome::Remove => "DELETE_FAILED",
            Outcome::Settle { .. } => "ROLLBACK_COMPLETE",
        };
        Self {
            remaining_polls: self.remaining_polls,
            outcome: Outcome::Settle {
                status,
                phase: StackPhase::Failed,
                reason: Some(failure.reason),
            },
        }
    }
}

fn in_progress(status: &str, template: &str) -> FakeStack {
    FakeStack {
        template: template.to_string(),
        previous_template: None,
        status: status.to_string(),
        phase: StackPhase::InProgress,
        reason: None,
        pending: None,
        events: Vec::new(),
        revision: 1,
        stale: None,
    }
}

#[async_trait]
impl ProviderClient for InMemoryProvider {
    async fn submit_change(&self, request: &StackRequest) -> ProviderResult<OperationHandle> {
        let mut inner = self.lock();
        inner.submit_calls += 1;
        if let Some(err) = inner.submit_failure.take() {
            return Err(err);
        }

        let name = request.name();
        let failure_events = inner
            .next_failure
            .get(name)
            .map(|f| f.events.clone())
            .unwrap_or_default();

        match request.action() {
            StackAction::Create => {
                if inner
                    .stacks
                    .get(name)
                    .is_some_and(|s| s.phase != StackPhase::Failed)
                {
                    return Err(ProviderError::AlreadyExists(format!(
                        "Stack [{}] already exists",
                        name
                    )));
                }
                let transition = inner.transition(
                    name,
                    Outcome::Settle {
                        status: "CREATE_COMPLETE",
                        phase: StackPhase::Complete,
                        reason: None,
                    },
                );
                let mut stack = in_progress("CREATE_IN_PROGRESS", request.template_body());
                stack.pending = Some(transition);
                stack.events = failure_events;
                inner.stacks.insert(name.to_string(), stack);
            }
            StackAction::Update => {
                let Some(current) = inner.stacks.get(name).cloned() else {
                    return Err(ProviderError::NotFound(format!(
                        "Stack with id {} does not exist",
                        name
                    )));
                };
                if current.template == request.template_body() {
                    return Err(ProviderError::NoChanges(
                        "No updates are to be performed.".to_string(),
                    ));
                }
                let transition = inner.transition(
                    name,
                    Outcome::Settle {
                        status: "UPDATE_COMPLETE",
                        phase: StackPhase::Complete,
                        reason: None,
                    },
                );
                let mut stack = in_progress("UPDATE_IN_PROGRESS", request.template_body());
                stack.previous_template = Some(current.template.clone());
                stack.pending = Some(transition);
                stack.events = failure_events;
                stack.revision = current.revision + 1;
                stack.stale = inner.stale_read(&current);
                inner.stacks.insert(name.to_string(), stack);
            }
            StackAction::Delete => {
                let Some(current) = inner.stacks.get(name).cloned() else {
                    return Ok(OperationHandle(format!("{}/absent", name)));
                };
                let transition = inner.transition(name, Outcome::Remove);
                let mut stack = in_progress("DELETE_IN_PROGRESS", &current.template);
                stack.pending = Some(transition);
                stack.events = failure_events;
                stack.revision = current.revision;
                stack.stale = inner.stale_read(&current);
                inner.stacks.insert(name.to_string(), stack);
            }
        }

        let revision = inner.stacks.get(name).map(|s| s.revision).unwrap_or(0);
        Ok(OperationHandle(format!("{}/{}", name, revision)))
    }

    async fn describe_status(&self, name: &str) -> ProviderResult<PollResult> {
        let mut inner = self.lock();
        inner.describe_calls += 1;
        if inner.describe_failures > 0 {
            inner.describe_failures -= 1;
            return Err(ProviderError::Transport(
                "dispatch failure: connection refused".to_string(),
            ));
        }

        let mut removed = false;
        let result = match inner.stacks.get_mut(name) {
            None => PollResult::not_found(),
            Some(stack) if stack.stale.as_ref().is_some_and(|s| s.remaining > 0) => {
                let stale = stack.stale.as_mut().map(|stale| {
                    stale.remaining -= 1;
                    stale.clone()
                });
                match stale {
                    Some(stale) => {
                        let mut raw = RawStatus::new(stale.status);
                        raw.reason = stale.reason;
                        PollResult::new(stale.phase, raw)
                    }
                    None => PollResult::not_found(),
                }
            }
            Some(stack) => {
                let settle_now = match stack.pending.as_mut() {
                    Some(pending) if pending.remaining_polls > 0 => {
                        pending.remaining_polls -= 1;
                        false
                    }
                    Some(_) => true,
                    None => false,
                };

                if settle_now {
                    if let Some(pending) = stack.pending.take() {
                        match pending.outcome {
                            Outcome::Remove => removed = true,
                            Outcome::Settle {
                                status,
                                phase,
                                reason,
                            } => {
                                stack.status = status.to_string();
                                stack.phase = phase;
                                stack.reason = reason;
                                if status == "UPDATE_ROLLBACK_COMPLETE" {
                                    if let Some(previous) = stack.previous_template.take() {
                                        stack.template = previous;
                                    }
                                }
                            }
                        }
                    }
                }

                let mut raw = RawStatus::new(stack.status.clone());
                raw.reason = stack.reason.clone();
                if stack.phase == StackPhase::Complete {
                    raw.outputs
                        .insert("Revision".to_string(), stack.revision.to_string());
                }
                PollResult::new(stack.phase, raw)
            }
        };

        let result = if removed {
            inner.stacks.remove(name);
            PollResult::new(StackPhase::NotFound, RawStatus::new("DELETE_COMPLETE"))
        } else {
            result
        };

        inner
            .history
            .entry(name.to_string())
            .or_default()
            .push(result.raw.status.clone());
        Ok(result)
    }

    async fn cancel_change(&self, name: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        let Some(stack) = inner.stacks.get_mut(name) else {
            return Err(ProviderError::NotFound(format!(
                "Stack with id {} does not exist",
                name
            )));
        };
        if stack.status != "UPDATE_IN_PROGRESS" {
            return Err(ProviderError::Rejected {
                code: "ValidationError".to_string(),
                message: format!(
                    "CancelUpdateStack cannot be called from current stack status {}",
                    stack.status
                ),
            });
        }
        stack.status = "UPDATE_ROLLBACK_IN_PROGRESS".to_string();
        if let Some(pending) = stack.pending.as_mut() {
            pending.outcome = Outcome::Settle {
                status: "UPDATE_ROLLBACK_COMPLETE",
                phase: StackPhase::Failed,
                reason: Some("User Initiated".to_string()),
            };
        }
        Ok(())
    }

    async fn deployed_template(&self, name: &str) -> ProviderResult<Option<String>> {
        Ok(self.lock().stacks.get(name).map(|s| s.template.clone()))
    }

    async fn failure_reasons(&self, name: &str) -> ProviderResult<Vec<String>> {
        Ok(self
            .lock()
            .stacks
            .get(name)
            .map(|s| s.events.clone())
            .unwrap_or_default())
    }
}
