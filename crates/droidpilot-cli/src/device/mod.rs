//! Device-facing collaborators.
//!
//! The executor talks to a device only through these traits:
//! - [`DeviceChannel`]: run one shell command on a device
//! - [`SnapshotProvider`]: capture screenshot, UI tree and screen size
//! - [`ImageMatcher`]: find a template image inside a screenshot
//!
//! [`adb`] implements the first two over the `adb` binary and [`matcher`]
//! adapts an external matcher program.

pub mod adb;
pub mod matcher;
#[cfg(test)]
pub mod testing;

use std::path::Path;

use async_trait::async_trait;
use droidpilot_core::error::EngineError;
use droidpilot_core::ui::{Bounds, UiSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Captured output of a successful device command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Both streams, for failure-marker scans.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to start device tool: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("device command exited with {}: {}", exit_label(.exit_code), .stderr.trim())]
    Failed {
        stdout: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// Exited cleanly but reported that it did not do its job.
    #[error("{command} reported: {}", .output.trim())]
    Rejected { command: String, output: String },
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| c.to_string())
}

impl ChannelError {
    /// Convert to the step-level error for `command`.
    pub fn into_engine_error(self, command: &str) -> EngineError {
        match self {
            ChannelError::Spawn(e) => EngineError::device_command_failed(command, Some(&e.to_string())),
            ChannelError::Failed { stdout, stderr, .. } => {
                let detail = if stderr.trim().is_empty() { stdout } else { stderr };
                EngineError::device_command_failed(command, Some(&detail))
            }
            ChannelError::Rejected { output, .. } => {
                EngineError::device_command_failed(command, Some(&output))
            }
        }
    }
}

#[async_trait]
pub trait DeviceChannel: Send + Sync {
    /// Run `command` in the device shell.
    async fn execute(&self, device: &str, command: &str) -> Result<CommandOutput, ChannelError>;
}

#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn capture(&self, device: &str) -> Result<UiSnapshot, ChannelError>;
}

/// Matcher verdict, as emitted by the external matcher program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub success: bool,
    #[serde(default)]
    pub center_x: i32,
    #[serde(default)]
    pub center_y: i32,
    /// `[left, top, right, bottom]` of the matched region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<[i32; 4]>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MatchOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Matched region, or a 1px box at the centre when the matcher gave none.
    pub fn bounds(&self) -> Bounds {
        match self.bounding_box {
            Some([l, t, r, b]) => Bounds::new(l, t, r, b),
            None => Bounds::new(self.center_x, self.center_y, self.center_x + 1, self.center_y + 1),
        }
    }
}

#[async_trait]
pub trait ImageMatcher: Send + Sync {
    /// Locate `template` inside the screenshot stored at `screenshot`.
    ///
    /// Failures are reported in the outcome, never as errors.
    async fn locate(&self, screenshot: &Path, template: &Path) -> MatchOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_outcome_parses_camel_case() {
        let json = r#"{"success":true,"centerX":50,"centerY":60,"boundingBox":[40,50,60,70],"confidence":0.93}"#;
        let outcome: MatchOutcome = serde_json::from_str(json).unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.bounds(), Bounds::new(40, 50, 60, 70));
        assert_eq!(outcome.bounds().center(), (50, 60));
    }

    #[test]
    fn test_match_outcome_failure_defaults() {
        let outcome: MatchOutcome =
            serde_json::from_str(r#"{"success":false,"error":"no match"}"#).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("no match"));
    }

    #[test]
    fn test_channel_failure_prefers_stderr() {
        let err = ChannelError::Failed {
            stdout: "partial".into(),
            stderr: "device offline".into(),
            exit_code: Some(1),
        };
        assert!(err.to_string().contains("exited with 1"));
        let engine = err.into_engine_error("input tap 1 2");
        assert!(engine.message.contains("device offline"));
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            stdout: "Starting".into(),
            stderr: "Error: boom".into(),
        };
        assert!(out.combined().contains("Error: boom"));
        let ok = CommandOutput {
            stdout: "ok".into(),
            ..CommandOutput::default()
        };
        assert_eq!(ok.combined(), "ok");
    }
}
