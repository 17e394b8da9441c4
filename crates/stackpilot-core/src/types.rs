//! Stack requests, phases and observed state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle action requested for a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackAction {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for StackAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackAction::Create => write!(f, "create"),
            StackAction::Update => write!(f, "update"),
            StackAction::Delete => write!(f, "delete"),
        }
    }
}

/// A single lifecycle request for one named stack.
///
/// The name cannot be changed after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    name: String,
    template_body: String,
    action: StackAction,
}

impl StackRequest {
    pub fn create(name: impl Into<String>, template_body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_body: template_body.into(),
            action: StackAction::Create,
        }
    }

    pub fn update(name: impl Into<String>, template_body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_body: template_body.into(),
            action: StackAction::Update,
        }
    }

    /// Delete requests carry no template
    pub fn delete(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_body: String::new(),
            action: StackAction::Delete,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template_body(&self) -> &str {
        &self.template_body
    }

    pub fn action(&self) -> StackAction {
        self.action
    }
}

/// Coarse lifecycle phase of a stack, independent of provider status names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackPhase {
    Pending,
    InProgress,
    Complete,
    Failed,
    NotFound,
}

impl StackPhase {
    /// No further transition happens without a new request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StackPhase::Complete | StackPhase::Failed | StackPhase::NotFound
        )
    }

    /// Stack exists and is either settled successfully or still moving
    pub fn is_occupied(&self) -> bool {
        matches!(
            self,
            StackPhase::Pending | StackPhase::InProgress | StackPhase::Complete
        )
    }
}

impl std::fmt::Display for StackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StackPhase::Pending => write!(f, "pending"),
            StackPhase::InProgress => write!(f, "in_progress"),
            StackPhase::Complete => write!(f, "complete"),
            StackPhase::Failed => write!(f, "failed"),
            StackPhase::NotFound => write!(f, "not_found"),
        }
    }
}

/// Provider-specific status payload attached to every poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStatus {
    /// Provider status name, e.g. `CREATE_IN_PROGRESS`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl RawStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Outcome of a single status check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub terminal: bool,
    pub phase: StackPhase,
    pub raw: RawStatus,
}

impl PollResult {
    pub fn new(phase: StackPhase, raw: RawStatus) -> Self {
        Self {
            terminal: phase.is_terminal(),
            phase,
            raw,
        }
    }

    pub fn not_found() -> Self {
        Self::new(StackPhase::NotFound, RawStatus::new("NOT_FOUND"))
    }
}

/// Observed state of a stack for the duration of one lifecycle call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackState {
    pub name: String,
    pub phase: StackPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl StackState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phase: StackPhase::Pending,
            last_error: None,
            last_polled_at: None,
            status: None,
            outputs: BTreeMap::new(),
        }
    }

    /// Record one poll observation
    pub fn observe(&mut self, result: &PollResult) {
        self.phase = result.phase;
        self.status = Some(result.raw.status.clone());
        self.last_polled_at = Some(Utc::now());
        if !result.raw.outputs.is_empty() {
            self.outputs = result.raw.outputs.clone();
        }
        if result.phase == StackPhase::Failed {
            self.last_error = result.raw.reason.clone();
        }
    }
}

/// Opaque handle returned by a submitted change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationHandle(pub String);

impl std::fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_phases() {
        assert!(StackPhase::Complete.is_terminal());
        assert!(StackPhase::Failed.is_terminal());
        assert!(StackPhase::NotFound.is_terminal());
        assert!(!StackPhase::Pending.is_terminal());
        assert!(!StackPhase::InProgress.is_terminal());
    }

    #[test]
    fn test_poll_result_terminal_follows_phase() {
        let result = PollResult::new(StackPhase::InProgress, RawStatus::new("CREATE_IN_PROGRESS"));
        assert!(!result.terminal);

        let result = PollResult::new(StackPhase::Failed, RawStatus::new("ROLLBACK_COMPLETE"));
        assert!(result.terminal);
    }

    #[test]
    fn test_observe_records_failure_reason() {
        let mut state = StackState::new("demo");
        assert_eq!(state.phase, StackPhase::Pending);

        let raw = RawStatus::new("CREATE_FAILED").with_reason("bucket already owned");
        state.observe(&PollResult::new(StackPhase::Failed, raw));

        assert_eq!(state.phase, StackPhase::Failed);
        assert_eq!(state.status.as_deref(), Some("CREATE_FAILED"));
        assert_eq!(state.last_error.as_deref(), Some("bucket already owned"));
        assert!(state.last_polled_at.is_some());
    }

    #[test]
    fn test_request_accessors() {
        let req = StackRequest::update("s3-bucket", "Resources: {}");
        assert_eq!(req.name(), "s3-bucket");
        assert_eq!(req.template_body(), "Resources: {}");
        assert_eq!(req.action(), StackAction::Update);

        let req = StackRequest::delete("s3-bucket");
        assert!(req.template_body().is_empty());
    }
}
