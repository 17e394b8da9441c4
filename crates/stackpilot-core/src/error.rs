//! Error types for stack reconciliation

use std::time::Duration;
use thiserror::Error;

/// Error kinds for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AlreadyExists,
    NotFound,
    NoChangesDetected,
    ConcurrentModification,
    Timeout,
    TransportError,
    RemoteFailure,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyExists => "AlreadyExists",
            Self::NotFound => "NotFound",
            Self::NoChangesDetected => "NoChangesDetected",
            Self::ConcurrentModification => "ConcurrentModification",
            Self::Timeout => "Timeout",
            Self::TransportError => "TransportError",
            Self::RemoteFailure => "RemoteFailure",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Only transport failures are safe to retry by re-submitting.
    /// A timed out or cancelled operation may still be running remotely.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransportError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the reconciler and poll scheduler
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("stack '{name}' already exists; delete or update it instead")]
    AlreadyExists { name: String },

    #[error("stack '{name}' does not exist")]
    NotFound { name: String },

    #[error("stack '{name}' already matches the requested template")]
    NoChangesDetected { name: String },

    #[error("stack '{name}' is being modified by another operation")]
    ConcurrentModification { name: String },

    #[error("gave up waiting after {elapsed:?} (last status: {last_status}); the operation may still be running, re-poll instead of re-submitting")]
    Timeout {
        elapsed: Duration,
        last_status: String,
    },

    #[error("provider unreachable after {attempts} consecutive failed attempts: {message}")]
    TransportError { attempts: u32, message: String },

    #[error("{}", format_remote_failure(.status, .reason.as_deref(), .events))]
    RemoteFailure {
        status: String,
        reason: Option<String>,
        /// Failure reasons scanned from the provider's event history
        events: Vec<String>,
    },

    #[error("wait cancelled (last status: {last_status}); the remote operation was not rolled back")]
    Cancelled { last_status: String },
}

fn format_remote_failure(status: &str, reason: Option<&str>, events: &[String]) -> String {
    let mut message = format!("provider reported {}", status);
    if let Some(reason) = reason {
        message.push_str(": ");
        message.push_str(reason);
    }
    for event in events {
        message.push_str("\n  • ");
        message.push_str(event);
    }
    message
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NoChangesDetected { .. } => ErrorKind::NoChangesDetected,
            Self::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::TransportError { .. } => ErrorKind::TransportError,
            Self::RemoteFailure { .. } => ErrorKind::RemoteFailure,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Map a provider error raised by a call about `name` into the taxonomy
    pub fn from_provider(name: &str, err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(_) => Self::NotFound {
                name: name.to_string(),
            },
            ProviderError::AlreadyExists(_) => Self::AlreadyExists {
                name: name.to_string(),
            },
            ProviderError::NoChanges(_) => Self::NoChangesDetected {
                name: name.to_string(),
            },
            ProviderError::Transport(message) => Self::TransportError {
                attempts: 1,
                message,
            },
            ProviderError::Rejected { code, message } => Self::RemoteFailure {
                status: code,
                reason: Some(message),
                events: Vec::new(),
            },
        }
    }
}

/// Errors returned by a [`crate::ProviderClient`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("stack not found: {0}")]
    NotFound(String),

    #[error("stack already exists: {0}")]
    AlreadyExists(String),

    #[error("no updates to perform: {0}")]
    NoChanges(String),

    /// Network, throttling or other failures to reach the provider
    #[error("transport error: {0}")]
    Transport(String),

    /// Provider received the request and refused it
    #[error("[{code}] {message}")]
    Rejected { code: String, message: String },
}

/// Result type alias for ReconcileError
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(ErrorKind::TransportError.is_retryable());
        assert!(!ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::RemoteFailure.is_retryable());
        assert!(!ErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_provider_errors_keep_their_kind() {
        let err = ReconcileError::from_provider("demo", ProviderError::NoChanges("x".into()));
        assert_eq!(err.kind(), ErrorKind::NoChangesDetected);

        let err = ReconcileError::from_provider("demo", ProviderError::Transport("reset".into()));
        assert_eq!(err.kind(), ErrorKind::TransportError);

        let err = ReconcileError::from_provider(
            "demo",
            ProviderError::Rejected {
                code: "InsufficientCapabilitiesException".into(),
                message: "Requires capabilities : [CAPABILITY_IAM]".into(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::RemoteFailure);
        assert!(err.to_string().contains("CAPABILITY_IAM"));
    }

    #[test]
    fn test_remote_failure_lists_events() {
        let err = ReconcileError::RemoteFailure {
            status: "ROLLBACK_COMPLETE".into(),
            reason: None,
            events: vec!["Bucket: access denied".into()],
        };
        let rendered = err.to_string();
        assert!(rendered.starts_with("provider reported ROLLBACK_COMPLETE"));
        assert!(rendered.contains("Bucket: access denied"));
    }
}
