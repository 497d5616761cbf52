//! Image matcher adapters.
//!
//! Template matching is delegated to an external program, configured with
//! `DROIDPILOT_MATCHER`. It is invoked as
//!
//! ```text
//! <program> <screenshot.png> <template.png>
//! ```
//!
//! and must print a JSON object on its last non-empty stdout line:
//!
//! ```json
//! {"success": true, "centerX": 540, "centerY": 1200, "boundingBox": [480, 1150, 600, 1250], "confidence": 0.92}
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{ImageMatcher, MatchOutcome};

/// Runs an external matcher program per lookup.
#[derive(Debug, Clone)]
pub struct CommandImageMatcher {
    program: PathBuf,
}

impl CommandImageMatcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ImageMatcher for CommandImageMatcher {
    async fn locate(&self, screenshot: &Path, template: &Path) -> MatchOutcome {
        debug!(
            "Matching {} in {} with {}",
            template.display(),
            screenshot.display(),
            self.program.display()
        );
        let output = match Command::new(&self.program)
            .arg(screenshot)
            .arg(template)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return MatchOutcome::failure(format!(
                    "failed to run matcher {}: {}",
                    self.program.display(),
                    e
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_outcome(&stdout) {
            Some(outcome) => outcome,
            None if !output.status.success() => MatchOutcome::failure(format!(
                "matcher exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            None => MatchOutcome::failure("matcher printed no result"),
        }
    }
}

/// Parse the last JSON line of matcher output.
fn parse_outcome(stdout: &str) -> Option<MatchOutcome> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| serde_json::from_str(line).ok())
}

/// Stand-in when no matcher is configured: every lookup fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMatcher;

#[async_trait]
impl ImageMatcher for NullMatcher {
    async fn locate(&self, _screenshot: &Path, template: &Path) -> MatchOutcome {
        MatchOutcome::failure(format!(
            "no image matcher configured for {} (set DROIDPILOT_MATCHER)",
            template.display()
        ))
    }
}
