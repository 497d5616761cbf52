//! Execution result records.
//!
//! One [`ExecutionResult`] is produced per run and persisted as pretty JSON
//! under the project's `results/` directory.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::script::{CommandType, Parameter, Script, Step};

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 0-based position in the executed step list.
    pub index: usize,
    /// 1-based source line of the step.
    pub line: usize,
    pub command: CommandType,
    pub parameters: Vec<Parameter>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    pub duration_ms: u64,
}

impl StepRecord {
    pub fn new(index: usize, step: &Step, outcome: Result<(), EngineError>, duration_ms: u64) -> Self {
        Self {
            index,
            line: step.line,
            command: step.command,
            parameters: step.parameters.clone(),
            success: outcome.is_ok(),
            error: outcome.err(),
            duration_ms,
        }
    }
}

/// Record of one whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub run_id: String,
    pub case_id: String,
    pub script_name: String,
    pub device_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    /// Index of the step that ended the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<usize>,
    /// Source line of that step, for editor highlighting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_line: Option<usize>,
    pub steps: Vec<StepRecord>,
}

impl ExecutionResult {
    /// Start a record for `script`; it stays unsuccessful until finished.
    pub fn begin(run_id: impl Into<String>, script: &Script, device_id: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            case_id: script.case_id.clone(),
            script_name: script.script_name.clone(),
            device_id: device_id.to_string(),
            start_time: now,
            end_time: now,
            success: false,
            error: None,
            failed_step: None,
            failed_line: None,
            steps: Vec::new(),
        }
    }

    /// Close the record.
    ///
    /// A failed run without an explicit `error` takes the error of the
    /// last failed step, which is the one that ended the run.
    pub fn finish(&mut self, success: bool, error: Option<EngineError>) {
        self.end_time = Utc::now();
        self.success = success;
        if success {
            return;
        }
        if error.is_some() {
            self.error = error;
            return;
        }
        if let Some(step) = self.steps.iter().rev().find(|s| !s.success) {
            self.failed_step = Some(step.index);
            self.failed_line = Some(step.line);
            self.error = step.error.clone();
        }
    }

    pub fn status(&self) -> RunStatus {
        if self.success {
            RunStatus::Pass
        } else {
            RunStatus::Fail
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.end_time - self.start_time).num_milliseconds()
    }
}

/// Overall run verdict as it appears in file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pass,
    Fail,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pass => "PASS",
            RunStatus::Fail => "FAIL",
        }
    }
}

/// File name for a persisted result: `{script}_{YYYYmmdd_HHMMSS}_{PASS|FAIL}.json`.
///
/// `script_file` may be a path; only its stem is used. An empty stem
/// falls back to `script`. A non-zero `collision` numbers the name
/// (`_2`, `_3`, ...) ahead of the status so runs started in the same
/// second never share a file.
pub fn record_file_name(
    script_file: &str,
    timestamp: DateTime<Utc>,
    status: RunStatus,
    collision: usize,
) -> String {
    let stem = Path::new(script_file)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("script");
    let stamp = timestamp.format("%Y%m%d_%H%M%S");
    if collision == 0 {
        format!("{}_{}_{}.json", stem, stamp, status.as_str())
    } else {
        format!("{}_{}_{}_{}.json", stem, stamp, collision + 1, status.as_str())
    }
}
