//! Drives one stack through one lifecycle action to a terminal phase

use crate::error::{ReconcileError, Result};
use crate::lock::{StackLockGuard, StackLocks};
use crate::poll::{CancelSignal, PollPolicy, PollScheduler};
use crate::provider::ProviderClient;
use crate::types::{PollResult, StackAction, StackPhase, StackRequest, StackState};
use std::sync::Arc;
use tracing::{info, warn};

/// Stack lifecycle reconciler.
///
/// Every mutating operation takes the per-name lock, checks current state,
/// issues exactly one mutating provider call and then polls until the stack
/// settles. Mutating calls are never retried here; only status checks are.
pub struct StackReconciler<P: ?Sized> {
    provider: Arc<P>,
    scheduler: PollScheduler,
    locks: StackLocks,
}

impl<P: ProviderClient + ?Sized> StackReconciler<P> {
    pub fn new(provider: Arc<P>, policy: PollPolicy) -> Self {
        Self {
            provider,
            scheduler: PollScheduler::new(policy),
            locks: StackLocks::new(),
        }
    }

    /// Share a lock set with other reconcilers in the same process
    pub fn with_locks(mut self, locks: StackLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &StackLocks {
        &self.locks
    }

    /// Dispatch on the request's action
    pub async fn apply(&self, request: &StackRequest, cancel: &CancelSignal) -> Result<StackState> {
        match request.action() {
            StackAction::Create => self.create(request, cancel).await,
            StackAction::Update => self.update(request, cancel).await,
            StackAction::Delete => self.delete(request.name(), cancel).await,
        }
    }

    pub async fn create(&self, request: &StackRequest, cancel: &CancelSignal) -> Result<StackState> {
        let name = request.name();
        let _guard = self.lock(name)?;
        let mut state = StackState::new(name);

        let current = self.describe(name).await?;
        if current.phase.is_occupied() {
            return Err(ReconcileError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let request = StackRequest::create(name, request.template_body());
        self.submit(&request).await?;
        self.settle(StackAction::Create, &mut state, cancel).await?;
        Ok(state)
    }

    pub async fn update(&self, request: &StackRequest, cancel: &CancelSignal) -> Result<StackState> {
        let name = request.name();
        let _guard = self.lock(name)?;
        let mut state = StackState::new(name);

        let current = self.describe(name).await?;
        match current.phase {
            StackPhase::NotFound => {
                return Err(ReconcileError::NotFound {
                    name: name.to_string(),
                })
            }
            StackPhase::Pending | StackPhase::InProgress => {
                return Err(ReconcileError::ConcurrentModification {
                    name: name.to_string(),
                })
            }
            StackPhase::Complete | StackPhase::Failed => {}
        }

        let deployed = self
            .provider
            .deployed_template(name)
            .await
            .map_err(|e| ReconcileError::from_provider(name, e))?
            .ok_or_else(|| ReconcileError::NotFound {
                name: name.to_string(),
            })?;
        if deployed.as_bytes() == request.template_body().as_bytes() {
            info!(stack = name, "Deployed template is unchanged, skipping update");
            return Err(ReconcileError::NoChangesDetected {
                name: name.to_string(),
            });
        }

        let request = StackRequest::update(name, request.template_body());
        self.submit(&request).await?;
        self.settle(StackAction::Update, &mut state, cancel).await?;
        Ok(state)
    }

    /// Idempotent: an absent stack is reported as `NotFound` phase, not an error
    pub async fn delete(&self, name: &str, cancel: &CancelSignal) -> Result<StackState> {
        let _guard = self.lock(name)?;
        let mut state = StackState::new(name);

        let current = self.describe(name).await?;
        if current.phase == StackPhase::NotFound {
            info!(stack = name, "Stack already absent, nothing to delete");
            state.observe(&current);
            return Ok(state);
        }

        self.submit(&StackRequest::delete(name)).await?;
        self.settle(StackAction::Delete, &mut state, cancel).await?;
        Ok(state)
    }

    /// Ask the provider to roll back an in-flight update. Does not wait.
    pub async fn cancel_update(&self, name: &str) -> Result<StackState> {
        let mut state = StackState::new(name);
        let current = self.describe(name).await?;
        if current.phase == StackPhase::NotFound {
            return Err(ReconcileError::NotFound {
                name: name.to_string(),
            });
        }

        self.provider
            .cancel_change(name)
            .await
            .map_err(|e| ReconcileError::from_provider(name, e))?;
        info!(stack = name, status = %current.raw.status, "Requested update cancellation");

        state.observe(&current);
        Ok(state)
    }

    /// Single read-only status lookup
    pub async fn status(&self, name: &str) -> Result<StackState> {
        let mut state = StackState::new(name);
        let current = self.describe(name).await?;
        state.observe(&current);
        Ok(state)
    }

    fn lock(&self, name: &str) -> Result<StackLockGuard> {
        self.locks
            .try_acquire(name)
            .ok_or_else(|| ReconcileError::ConcurrentModification {
                name: name.to_string(),
            })
    }

    async fn describe(&self, name: &str) -> Result<PollResult> {
        self.provider
            .describe_status(name)
            .await
            .map_err(|e| ReconcileError::from_provider(name, e))
    }

    async fn submit(&self, request: &StackRequest) -> Result<()> {
        let handle = self
            .provider
            .submit_change(request)
            .await
            .map_err(|e| ReconcileError::from_provider(request.name(), e))?;
        info!(
            stack = request.name(),
            action = %request.action(),
            operation = %handle,
            "Submitted stack change"
        );
        Ok(())
    }

    /// Poll until terminal and classify the outcome for `action`
    async fn settle(
        &self,
        action: StackAction,
        state: &mut StackState,
        cancel: &CancelSignal,
    ) -> Result<()> {
        let provider = &*self.provider;
        let name = state.name.clone();
        let stack = name.as_str();

        let check = move || async move {
            provider
                .describe_status(stack)
                .await
                .map(|result| view_for(action, result))
        };
        let result = self
            .scheduler
            .wait_for_terminal_with(check, |result| state.observe(result), cancel)
            .await?;

        match (action, result.phase) {
            (StackAction::Delete, StackPhase::NotFound) => {
                state.phase = StackPhase::Complete;
            }
            (_, StackPhase::Complete) => {}
            (_, StackPhase::Failed) => {
                let events = self.scan_failures(stack).await;
                warn!(
                    stack,
                    action = %action,
                    status = %result.raw.status,
                    failed_resources = events.len(),
                    "Stack change failed"
                );
                return Err(ReconcileError::RemoteFailure {
                    status: result.raw.status,
                    reason: result.raw.reason,
                    events,
                });
            }
            (_, _) => {
                return Err(ReconcileError::RemoteFailure {
                    status: result.raw.status,
                    reason: Some(format!("stack disappeared while waiting for {}", action)),
                    events: Vec::new(),
                });
            }
        }

        info!(stack, action = %action, phase = %state.phase, "Stack settled");
        Ok(())
    }

    async fn scan_failures(&self, name: &str) -> Vec<String> {
        match self.provider.failure_reasons(name).await {
            Ok(reasons) => reasons,
            Err(e) => {
                warn!(stack = name, error = %e, "Failed to read stack events");
                Vec::new()
            }
        }
    }
}

/// The only failed status a delete can end in
const DELETE_FAILED: &str = "DELETE_FAILED";

/// Status reads right after a delete is submitted may still show the stack's
/// previous settled status. While deleting, only disappearance or
/// `DELETE_FAILED` end the wait.
fn view_for(action: StackAction, result: PollResult) -> PollResult {
    match (action, result.phase) {
        (StackAction::Delete, StackPhase::Complete) => {
            PollResult::new(StackPhase::InProgress, result.raw)
        }
        (StackAction::Delete, StackPhase::Failed) if result.raw.status != DELETE_FAILED => {
            PollResult::new(StackPhase::InProgress, result.raw)
        }
        _ => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawStatus;

    #[test]
    fn test_delete_view_keeps_waiting_on_complete() {
        let result = PollResult::new(StackPhase::Complete, RawStatus::new("UPDATE_COMPLETE"));
        let viewed = view_for(StackAction::Delete, result.clone());
        assert_eq!(viewed.phase, StackPhase::InProgress);
        assert!(!viewed.terminal);

        assert_eq!(view_for(StackAction::Update, result.clone()), result);
    }

    #[test]
    fn test_delete_view_ignores_earlier_rollback() {
        for status in ["ROLLBACK_COMPLETE", "UPDATE_ROLLBACK_COMPLETE", "CREATE_FAILED"] {
            let result = PollResult::new(StackPhase::Failed, RawStatus::new(status));
            let viewed = view_for(StackAction::Delete, result.clone());
            assert_eq!(viewed.phase, StackPhase::InProgress, "{status}");
            assert_eq!(view_for(StackAction::Create, result.clone()), result);
        }

        let failed = PollResult::new(StackPhase::Failed, RawStatus::new("DELETE_FAILED"));
        assert_eq!(view_for(StackAction::Delete, failed.clone()), failed);
    }
}
