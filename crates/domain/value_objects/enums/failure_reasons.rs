use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Machine-readable reason stored in `recordings.failure_reason`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    CaptureStartFailed,
    CaptureRestartFailed,
    ConcatenationFailed,
    EmptyDeliverable,
    DeliverableMissing,
    RecoveryNoArtifacts,
    RecoveryStreamMissing,
    RecoveryDependencyMissing,
    RecoveryLookupFailed,
    RecoveryFinalizeFailed,
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            FailureReason::CaptureStartFailed => "capture_start_failed",
            FailureReason::CaptureRestartFailed => "capture_restart_failed",
            FailureReason::ConcatenationFailed => "concatenation_failed",
            FailureReason::EmptyDeliverable => "empty_deliverable",
            FailureReason::DeliverableMissing => "deliverable_missing",
            FailureReason::RecoveryNoArtifacts => "recovery_no_artifacts",
            FailureReason::RecoveryStreamMissing => "recovery_stream_missing",
            FailureReason::RecoveryDependencyMissing => "recovery_dependency_missing",
            FailureReason::RecoveryLookupFailed => "recovery_lookup_failed",
            FailureReason::RecoveryFinalizeFailed => "recovery_finalize_failed",
        };
        write!(f, "{}", reason)
    }
}
