use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Remux,
    Metadata,
    Thumbnail,
}

impl TaskType {
    /// Post-processing steps queued for every finalized recording, in order.
    pub const POST_PROCESSING: [TaskType; 3] =
        [TaskType::Remux, TaskType::Metadata, TaskType::Thumbnail];
}

impl Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let task_type = match self {
            TaskType::Remux => "remux",
            TaskType::Metadata => "metadata",
            TaskType::Thumbnail => "thumbnail",
        };
        write!(f, "{}", task_type)
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "remux" => Ok(TaskType::Remux),
            "metadata" => Ok(TaskType::Metadata),
            "thumbnail" => Ok(TaskType::Thumbnail),
            other => Err(format!("Unsupported task type: {}", other)),
        }
    }
}
