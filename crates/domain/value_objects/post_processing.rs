use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload carried by every post-processing task so completion can update the recording.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostProcessingPayload {
    pub recording_id: Uuid,
    pub stream_id: Uuid,
    pub recording_path: String,
}
