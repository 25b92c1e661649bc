use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

const SEGMENT_PREFIX: &str = "segment_";

/// Output path layout under the recording root.
#[derive(Debug, Clone)]
pub struct RecordingPaths {
    root: PathBuf,
    extension: String,
}

impl RecordingPaths {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn single_file_path(&self, stream_id: Uuid, recording_id: Uuid) -> PathBuf {
        self.root.join(format!(
            "stream_{}_{}.{}",
            stream_id, recording_id, self.extension
        ))
    }

    pub fn segment_dir(&self, stream_id: Uuid, recording_id: Uuid) -> PathBuf {
        self.root
            .join(format!("stream_{}_{}_segments", stream_id, recording_id))
    }

    pub fn segment_path(&self, segment_dir: &Path, number: u32) -> PathBuf {
        segment_dir.join(format!("{}{:03}.{}", SEGMENT_PREFIX, number, self.extension))
    }
}

pub fn parse_segment_number(file_name: &str) -> Option<u32> {
    let rest = file_name.strip_prefix(SEGMENT_PREFIX)?;
    let digits = rest.split('.').next()?;
    digits.parse().ok()
}

/// Segment files in `segment_dir`, ordered by segment number. A missing directory is empty.
pub async fn list_segments(segment_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut entries = match tokio::fs::read_dir(segment_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", segment_dir.display()));
        }
    };

    let mut segments = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(number) = name.to_str().and_then(parse_segment_number) else {
            continue;
        };
        segments.push((number, entry.path()));
    }
    segments.sort_by_key(|(number, _)| *number);
    Ok(segments)
}

pub async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Runtime state of a recording that has been split into segments.
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    pub segment_dir: PathBuf,
    pub segment_count: u32,
    pub current_segment_path: PathBuf,
    pub segment_start_time: DateTime<Utc>,
    segment_started: Instant,
    /// Every segment file in concatenation order, including one adopted from outside
    /// `segment_dir` if it could not be moved in.
    segments: Vec<PathBuf>,
}

impl SegmentInfo {
    /// State after `existing` files have been written; `segment_count` is the highest number used.
    pub fn from_existing(segment_dir: PathBuf, segment_count: u32, existing: Vec<PathBuf>) -> Self {
        let current_segment_path = existing.last().cloned().unwrap_or_else(|| segment_dir.clone());
        Self {
            segment_dir,
            segment_count,
            current_segment_path,
            segment_start_time: Utc::now(),
            segment_started: Instant::now(),
            segments: existing,
        }
    }

    /// Moves to the next segment number and returns its path.
    pub fn advance(&mut self, paths: &RecordingPaths) -> PathBuf {
        self.segment_count += 1;
        self.current_segment_path = paths.segment_path(&self.segment_dir, self.segment_count);
        self.segment_start_time = Utc::now();
        self.segment_started = Instant::now();
        self.segments.push(self.current_segment_path.clone());
        self.current_segment_path.clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.segment_started.elapsed()
    }

    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }
}

/// Moves a single-file recording into `segment_dir` as its first segment.
/// On failure the file stays where it is and is still used as the first segment.
pub async fn adopt_single_file(
    paths: &RecordingPaths,
    single_file: &Path,
    segment_dir: &Path,
) -> SegmentInfo {
    if let Err(e) = tokio::fs::create_dir_all(segment_dir).await {
        warn!(
            segment_dir = %segment_dir.display(),
            error = %e,
            "segments: failed to create segment directory"
        );
    }

    let first = paths.segment_path(segment_dir, 1);
    let adopted = match tokio::fs::metadata(single_file).await {
        Ok(_) => match tokio::fs::rename(single_file, &first).await {
            Ok(()) => vec![first],
            Err(e) => {
                warn!(
                    from = %single_file.display(),
                    to = %first.display(),
                    error = %e,
                    "segments: could not move single file, adopting it in place"
                );
                vec![single_file.to_path_buf()]
            }
        },
        // Nothing was written yet; segment 1 is simply empty.
        Err(_) => vec![],
    };

    SegmentInfo::from_existing(segment_dir.to_path_buf(), 1, adopted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    Duration,
    Size,
    ProcessExited,
    Manual,
}

#[derive(Debug, Clone, Copy)]
pub struct RotationThresholds {
    pub max_duration: Duration,
    pub max_bytes: u64,
}

impl RotationThresholds {
    pub fn evaluate(&self, elapsed: Duration, size_bytes: u64) -> Option<RotationTrigger> {
        if elapsed >= self.max_duration {
            Some(RotationTrigger::Duration)
        } else if size_bytes >= self.max_bytes {
            Some(RotationTrigger::Size)
        } else {
            None
        }
    }
}
