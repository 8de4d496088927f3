//! Failure artifacts
//!
//! When a test fails, the error text goes to the step that was running at the
//! time (or to the test when no step was). If a screen capture capability is
//! available and a step failed, a screenshot rides along as an attachment.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stepmirror_common::{Attachment, Error, ItemId, LogLevel, Result};
use tokio::process::Command as TokioCommand;
use tracing::debug;
use uuid::Uuid;

use crate::events::TestFailure;
use crate::remote::{swallow, Remote};
use crate::state::CorrelationTable;

/// Placeholder replaced with the target file in a capture command
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Something that can save the current screen to a file
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn save_screenshot(&self, path: &Path) -> Result<()>;
}

/// Captures by running an external command
#[derive(Debug, Clone)]
pub struct CommandScreenCapture {
    program: String,
    args: Vec<String>,
}

impl CommandScreenCapture {
    /// Build from `[program, args...]`; `None` when the command is empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl ScreenCapture for CommandScreenCapture {
    async fn save_screenshot(&self, path: &Path) -> Result<()> {
        let target = path.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(PATH_PLACEHOLDER, &target))
            .collect();

        debug!(program = %self.program, ?args, "capturing screenshot");
        let output = TokioCommand::new(&self.program)
            .args(&args)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Capture(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Collects and sends failure artifacts
#[derive(Clone)]
pub struct FailureArtifactCollector {
    capture: Option<Arc<dyn ScreenCapture>>,
    scratch_dir: PathBuf,
}

impl FailureArtifactCollector {
    pub fn new(capture: Option<Arc<dyn ScreenCapture>>) -> Self {
        Self {
            capture,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory screenshots are written to before upload
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    /// Capture a screenshot and read it back as an attachment
    ///
    /// The temporary file is removed whether or not the read succeeds.
    pub async fn screenshot(&self) -> Result<Attachment> {
        let capture = self
            .capture
            .as_ref()
            .ok_or_else(|| Error::Capture("no screen capture available".to_string()))?;

        let path = self
            .scratch_dir
            .join(format!("stepmirror-{}.png", Uuid::new_v4()));
        let saved = capture.save_screenshot(&path).await;
        let content = match saved {
            Ok(()) => tokio::fs::read(&path).await.map_err(Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "could not remove screenshot");
            }
        }

        Ok(Attachment {
            name: "screenshot.png".to_string(),
            mime: "image/png".to_string(),
            content: content?,
        })
    }

    /// Send the failure to the failed step, or to `owner` when no step failed
    ///
    /// `owner` is the test (or suite, for failures outside a test); `None`
    /// logs against the launch.
    pub async fn collect(
        &self,
        remote: &Remote,
        table: &CorrelationTable,
        failed_step: Option<ItemId>,
        owner: Option<ItemId>,
        failure: &TestFailure,
    ) {
        let attachment = match failed_step {
            Some(_) if self.has_capture() => match self.screenshot().await {
                Ok(attachment) => Some(attachment),
                Err(e) => {
                    swallow("capture screenshot", "failed step", e);
                    None
                }
            },
            _ => None,
        };

        let target = failed_step.or(owner);
        remote
            .send_log(table, target, LogLevel::Error, failure.text(), attachment)
            .await;
    }
}
