use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use crates::domain::{
    repositories::recordings::RecordingRepository,
    value_objects::post_processing::PostProcessingPayload,
};
use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};
use tokio::process::Command;
use tracing::info;

use super::{TaskContext, TaskHandler};

const STDERR_TAIL_BYTES: usize = 2_000;

/// Remuxes the deliverable into a faststart mp4 and points the recording at it.
pub struct RemuxHandler {
    ffmpeg_program: String,
    recordings: Arc<dyn RecordingRepository + Send + Sync>,
}

impl RemuxHandler {
    pub fn new(
        ffmpeg_program: impl Into<String>,
        recordings: Arc<dyn RecordingRepository + Send + Sync>,
    ) -> Self {
        Self {
            ffmpeg_program: ffmpeg_program.into(),
            recordings,
        }
    }
}

pub fn remux_target(source: &Path) -> PathBuf {
    source.with_extension("mp4")
}

pub fn remux_args(source: &Path, target: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        source.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        target.to_string_lossy().into_owned(),
    ]
}

#[async_trait]
impl TaskHandler for RemuxHandler {
    async fn run(&self, ctx: TaskContext) -> Result<()> {
        let payload: PostProcessingPayload =
            serde_json::from_value(ctx.payload.clone()).context("remux payload is invalid")?;
        let source = PathBuf::from(&payload.recording_path);

        if source.extension().is_some_and(|ext| ext == "mp4") {
            info!(
                task_id = %ctx.task_id,
                recording_id = %payload.recording_id,
                "remux: deliverable is already mp4"
            );
            return Ok(());
        }

        let source_size = tokio::fs::metadata(&source)
            .await
            .with_context(|| format!("remux source {} is missing", source.display()))?
            .len();
        let target = remux_target(&source);
        ctx.report_progress(5);

        let output = Command::new(&self.ffmpeg_program)
            .args(remux_args(&source, &target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.ffmpeg_program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
            let tail = stderr.get(start..).unwrap_or(stderr.as_ref());
            let _ = tokio::fs::remove_file(&target).await;
            bail!("ffmpeg exited with {}: {}", output.status, tail.trim());
        }

        let target_size = tokio::fs::metadata(&target)
            .await
            .with_context(|| format!("remux output {} is missing", target.display()))?
            .len();
        if target_size == 0 {
            bail!("remux output {} is empty", target.display());
        }
        ctx.report_progress(90);

        self.recordings
            .update_recording_path(payload.recording_id, target.to_string_lossy().into_owned())
            .await?;

        info!(
            task_id = %ctx.task_id,
            recording_id = %payload.recording_id,
            source_size,
            target_size,
            target = %target.display(),
            "remux: finished"
        );
        ctx.report_progress(100);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_swaps_the_extension() {
        assert_eq!(
            remux_target(Path::new("/rec/stream_a_b.ts")),
            PathBuf::from("/rec/stream_a_b.mp4")
        );
    }

    #[test]
    fn args_copy_streams_with_faststart() {
        let args = remux_args(Path::new("/rec/a.ts"), Path::new("/rec/a.mp4"));
        assert_eq!(args.first().map(String::as_str), Some("-hide_banner"));
        assert!(args.windows(2).any(|w| w == ["-c", "copy"]));
        assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
        assert_eq!(args.last().map(String::as_str), Some("/rec/a.mp4"));
    }
}
