//! Test doubles for the device traits.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use droidpilot_core::ui::{ScreenSize, UiElement, UiSnapshot};

use super::{ChannelError, CommandOutput, DeviceChannel, ImageMatcher, MatchOutcome, SnapshotProvider};

enum Reply {
    Output(String),
    Fail(String),
}

/// Records every command; replies are chosen by command prefix.
#[derive(Default)]
pub struct RecordingChannel {
    commands: Mutex<Vec<String>>,
    replies: Vec<(String, Reply)>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `stdout` to commands starting with `prefix`.
    pub fn respond(mut self, prefix: &str, stdout: &str) -> Self {
        self.replies
            .push((prefix.to_string(), Reply::Output(stdout.to_string())));
        self
    }

    /// Fail commands starting with `prefix`.
    pub fn fail(mut self, prefix: &str, stderr: &str) -> Self {
        self.replies
            .push((prefix.to_string(), Reply::Fail(stderr.to_string())));
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceChannel for RecordingChannel {
    async fn execute(&self, _device: &str, command: &str) -> Result<CommandOutput, ChannelError> {
        self.commands.lock().unwrap().push(command.to_string());
        match self
            .replies
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            Some((_, Reply::Output(stdout))) => Ok(CommandOutput {
                stdout: stdout.clone(),
                ..CommandOutput::default()
            }),
            Some((_, Reply::Fail(stderr))) => Err(ChannelError::Failed {
                stdout: String::new(),
                stderr: stderr.clone(),
                exit_code: Some(1),
            }),
            None => Ok(CommandOutput::default()),
        }
    }
}

/// Serves snapshots in order; the last one repeats forever.
pub struct ScriptedSnapshots {
    frames: Mutex<VecDeque<UiSnapshot>>,
    captures: AtomicUsize,
    failing: bool,
}

pub const TEST_SCREEN: ScreenSize = ScreenSize {
    width: 1080,
    height: 1920,
};

fn frame(elements: Vec<UiElement>) -> UiSnapshot {
    UiSnapshot {
        screenshot: vec![0x89, b'P', b'N', b'G'],
        elements,
        screen_size: Some(TEST_SCREEN),
    }
}

impl ScriptedSnapshots {
    pub fn new(elements: Vec<UiElement>) -> Self {
        Self {
            frames: Mutex::new(VecDeque::from([frame(elements)])),
            captures: AtomicUsize::new(0),
            failing: false,
        }
    }

    /// Queue another frame after the existing ones.
    pub fn then(self, elements: Vec<UiElement>) -> Self {
        self.frames.lock().unwrap().push_back(frame(elements));
        self
    }

    /// A provider whose every capture fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotProvider for ScriptedSnapshots {
    async fn capture(&self, _device: &str) -> Result<UiSnapshot, ChannelError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(ChannelError::Failed {
                stdout: String::new(),
                stderr: "ERROR: null root node returned by UiTestAutomationBridge.".into(),
                exit_code: Some(1),
            });
        }
        let mut frames = self.frames.lock().unwrap();
        if frames.len() > 1 {
            Ok(frames.pop_front().unwrap())
        } else {
            Ok(frames.front().cloned().unwrap_or_default())
        }
    }
}

/// Returns a fixed outcome and records the template paths it was asked for.
pub struct FixedMatcher {
    outcome: MatchOutcome,
    templates: Mutex<Vec<PathBuf>>,
}

impl FixedMatcher {
    pub fn found(center_x: i32, center_y: i32, confidence: f64) -> Self {
        Self::new(MatchOutcome {
            success: true,
            center_x,
            center_y,
            bounding_box: Some([center_x - 10, center_y - 10, center_x + 10, center_y + 10]),
            confidence,
            error: None,
        })
    }

    pub fn new(outcome: MatchOutcome) -> Self {
        Self {
            outcome,
            templates: Mutex::new(Vec::new()),
        }
    }

    pub fn templates(&self) -> Vec<PathBuf> {
        self.templates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageMatcher for FixedMatcher {
    async fn locate(&self, _screenshot: &Path, template: &Path) -> MatchOutcome {
        self.templates.lock().unwrap().push(template.to_path_buf());
        self.outcome.clone()
    }
}
