use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

#[derive(Default, Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    #[default]
    Recording,
    Completed,
    Failed,
    Stopped,
}

impl RecordingStatus {
    /// Completed and failed recordings are immutable.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordingStatus::Completed | RecordingStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RecordingStatus) -> bool {
        match self {
            RecordingStatus::Recording => next != RecordingStatus::Recording,
            // A user stop can still be finalized into a deliverable or fail while doing so.
            RecordingStatus::Stopped => {
                matches!(next, RecordingStatus::Completed | RecordingStatus::Failed)
            }
            RecordingStatus::Completed | RecordingStatus::Failed => false,
        }
    }
}

impl Display for RecordingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let recording_status = match self {
            RecordingStatus::Recording => "recording",
            RecordingStatus::Completed => "completed",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Stopped => "stopped",
        };
        write!(f, "{}", recording_status)
    }
}

impl FromStr for RecordingStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "recording" => Ok(RecordingStatus::Recording),
            "completed" => Ok(RecordingStatus::Completed),
            "failed" => Ok(RecordingStatus::Failed),
            "stopped" => Ok(RecordingStatus::Stopped),
            other => Err(format!("Unknown recording status: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_reject_every_transition() {
        for next in [
            RecordingStatus::Recording,
            RecordingStatus::Completed,
            RecordingStatus::Failed,
            RecordingStatus::Stopped,
        ] {
            assert!(!RecordingStatus::Completed.can_transition_to(next));
            assert!(!RecordingStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn recording_can_leave_but_not_reenter() {
        assert!(RecordingStatus::Recording.can_transition_to(RecordingStatus::Completed));
        assert!(RecordingStatus::Recording.can_transition_to(RecordingStatus::Stopped));
        assert!(!RecordingStatus::Recording.can_transition_to(RecordingStatus::Recording));
        assert!(!RecordingStatus::Stopped.can_transition_to(RecordingStatus::Recording));
    }

    #[test]
    fn parses_database_text() {
        assert_eq!(
            "completed".parse::<RecordingStatus>().unwrap(),
            RecordingStatus::Completed
        );
        assert!("live_recording".parse::<RecordingStatus>().is_err());
    }
}
