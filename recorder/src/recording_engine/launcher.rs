use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{path::PathBuf, process::Stdio};
use tokio::process::Command;
use tracing::info;

use super::process_handle::{CaptureProcess, OsCaptureProcess};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureOptions {
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub process_id: String,
    pub url: String,
    pub quality: String,
    pub output_path: PathBuf,
    pub options: CaptureOptions,
}

/// Spawns capture processes. Tests substitute a fake.
#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    async fn launch(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>>;
}

pub struct CommandCaptureLauncher {
    program: String,
    extra_args: Vec<String>,
}

impl CommandCaptureLauncher {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    pub fn build_args(&self, request: &CaptureRequest) -> Vec<String> {
        let mut args = self.extra_args.clone();
        if let Some(proxy) = request.options.proxy.as_deref().filter(|p| !p.is_empty()) {
            args.push("--http-proxy".to_string());
            args.push(proxy.to_string());
        }
        args.push("--output".to_string());
        args.push(request.output_path.to_string_lossy().into_owned());
        args.push(request.url.clone());
        args.push(request.quality.clone());
        args
    }
}

#[async_trait]
impl CaptureLauncher for CommandCaptureLauncher {
    async fn launch(&self, request: &CaptureRequest) -> Result<Box<dyn CaptureProcess>> {
        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let child = Command::new(&self.program)
            .args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.program))?;

        info!(
            process_id = %request.process_id,
            pid = ?child.id(),
            output_path = %request.output_path.display(),
            "capture: process spawned"
        );

        Ok(Box::new(OsCaptureProcess::new(child, &request.process_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(proxy: Option<&str>) -> CaptureRequest {
        CaptureRequest {
            process_id: "stream_1".to_string(),
            url: "https://twitch.tv/someone".to_string(),
            quality: "best".to_string(),
            output_path: PathBuf::from("/rec/out.ts"),
            options: CaptureOptions {
                proxy: proxy.map(str::to_string),
            },
        }
    }

    #[test]
    fn args_without_proxy() {
        let launcher = CommandCaptureLauncher::new("streamlink", vec![]);
        assert_eq!(
            launcher.build_args(&request(None)),
            vec!["--output", "/rec/out.ts", "https://twitch.tv/someone", "best"]
        );
    }

    #[test]
    fn proxy_and_extra_args_come_first() {
        let launcher = CommandCaptureLauncher::new("streamlink", vec!["--retry-open".into(), "3".into()]);
        assert_eq!(
            launcher.build_args(&request(Some("http://proxy:8080"))),
            vec![
                "--retry-open",
                "3",
                "--http-proxy",
                "http://proxy:8080",
                "--output",
                "/rec/out.ts",
                "https://twitch.tv/someone",
                "best"
            ]
        );
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let launcher = CommandCaptureLauncher::new("definitely-not-a-capture-tool", vec![]);
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(None);
        req.output_path = dir.path().join("nested").join("out.ts");

        let err = launcher.launch(&req).await.err().unwrap();
        assert!(err.to_string().contains("failed to spawn"));
        assert!(dir.path().join("nested").is_dir());
    }
}
