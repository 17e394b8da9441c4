//! CloudFormation stack status classification

use stackpilot_core::StackPhase;

/// Map a CloudFormation `StackStatus` name onto a lifecycle phase.
///
/// Rollbacks count as failures of the change that triggered them. Unknown
/// statuses keep the poller waiting rather than ending it early.
pub fn classify(status: &str) -> StackPhase {
    match status {
        "CREATE_COMPLETE" | "UPDATE_COMPLETE" | "IMPORT_COMPLETE" => StackPhase::Complete,
        "DELETE_COMPLETE" => StackPhase::NotFound,
        "REVIEW_IN_PROGRESS" => StackPhase::Pending,
        "CREATE_FAILED"
        | "DELETE_FAILED"
        | "UPDATE_FAILED"
        | "ROLLBACK_COMPLETE"
        | "ROLLBACK_FAILED"
        | "UPDATE_ROLLBACK_COMPLETE"
        | "UPDATE_ROLLBACK_FAILED"
        | "IMPORT_ROLLBACK_COMPLETE"
        | "IMPORT_ROLLBACK_FAILED" => StackPhase::Failed,
        _ => StackPhase::InProgress,
    }
}

/// Resource statuses worth reporting when a stack change fails
pub fn is_failed_resource_status(status: &str) -> bool {
    status.ends_with("_FAILED")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settled_statuses() {
        assert_eq!(classify("CREATE_COMPLETE"), StackPhase::Complete);
        assert_eq!(classify("UPDATE_COMPLETE"), StackPhase::Complete);
        assert_eq!(classify("IMPORT_COMPLETE"), StackPhase::Complete);
        assert_eq!(classify("DELETE_COMPLETE"), StackPhase::NotFound);
    }

    #[test]
    fn test_rollbacks_are_failures() {
        for status in [
            "CREATE_FAILED",
            "ROLLBACK_COMPLETE",
            "ROLLBACK_FAILED",
            "DELETE_FAILED",
            "UPDATE_FAILED",
            "UPDATE_ROLLBACK_COMPLETE",
            "UPDATE_ROLLBACK_FAILED",
            "IMPORT_ROLLBACK_COMPLETE",
            "IMPORT_ROLLBACK_FAILED",
        ] {
            assert_eq!(classify(status), StackPhase::Failed, "{status}");
        }
    }

    #[test]
    fn test_moving_statuses_keep_waiting() {
        for status in [
            "CREATE_IN_PROGRESS",
            "ROLLBACK_IN_PROGRESS",
            "DELETE_IN_PROGRESS",
            "UPDATE_IN_PROGRESS",
            "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
            "UPDATE_ROLLBACK_IN_PROGRESS",
            "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
            "IMPORT_IN_PROGRESS",
        ] {
            let phase = classify(status);
            assert_eq!(phase, StackPhase::InProgress, "{status}");
            assert!(!phase.is_terminal());
        }
        assert_eq!(classify("REVIEW_IN_PROGRESS"), StackPhase::Pending);
    }

    #[test]
    fn test_failed_resource_status() {
        assert!(is_failed_resource_status("CREATE_FAILED"));
        assert!(is_failed_resource_status("UPDATE_FAILED"));
        assert!(!is_failed_resource_status("CREATE_COMPLETE"));
    }
}
