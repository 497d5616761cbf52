//! Execution error types with actionable suggestions.
//!
//! Every failure a step can raise is an [`EngineError`]. The error is
//! serializable so it can be stored verbatim in an execution result record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::script::CommandType;

/// Error codes recorded on failed steps and runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingArgument,
    ElementNotFound,
    DeviceCommandFailure,
    AssertionFailure,
    Aborted,
    Timeout,
    InvalidInput,
    InternalError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::MissingArgument => write!(f, "MISSING_ARGUMENT"),
            ErrorCode::ElementNotFound => write!(f, "ELEMENT_NOT_FOUND"),
            ErrorCode::DeviceCommandFailure => write!(f, "DEVICE_COMMAND_FAILURE"),
            ErrorCode::AssertionFailure => write!(f, "ASSERTION_FAILURE"),
            ErrorCode::Aborted => write!(f, "ABORTED"),
            ErrorCode::Timeout => write!(f, "TIMEOUT"),
            ErrorCode::InvalidInput => write!(f, "INVALID_INPUT"),
            ErrorCode::InternalError => write!(f, "INTERNAL_ERROR"),
        }
    }
}

/// A step or run failure with context for whoever reads the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (hint: {})", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// A required positional parameter was absent.
    ///
    /// `position` is 1-based to match how script authors count arguments.
    pub fn missing_argument(command: CommandType, position: usize, what: &str) -> Self {
        Self {
            code: ErrorCode::MissingArgument,
            message: format!(
                "'{}' is missing argument {} ({})",
                command.keyword(),
                position,
                what
            ),
            suggestion: Some(format!(
                "Write the command as: {}",
                command.usage()
            )),
        }
    }

    /// A required value was absent from both the parameters and the script details.
    pub fn missing_detail(command: CommandType, what: &str, keys: &[&str]) -> Self {
        Self {
            code: ErrorCode::MissingArgument,
            message: format!("'{}' needs {} but none was given", command.keyword(), what),
            suggestion: Some(format!(
                "Pass it as a parameter or add one of [{}] to the details block",
                keys.join(", ")
            )),
        }
    }

    /// A parameter had the wrong shape for the command.
    pub fn invalid_argument(command: CommandType, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: format!("'{}': {}", command.keyword(), message.into()),
            suggestion: Some(format!("Expected usage: {}", command.usage())),
        }
    }

    pub fn element_not_found(selector: &str) -> Self {
        Self {
            code: ErrorCode::ElementNotFound,
            message: format!("Element '{}' not found on screen", selector),
            suggestion: Some(
                "Check the locator definition, or add a wait before this step so the screen can settle"
                    .into(),
            ),
        }
    }

    /// A device command failed, with stderr appended when present.
    pub fn device_command_failed(command: &str, stderr: Option<&str>) -> Self {
        let message = match stderr {
            Some(err) if !err.trim().is_empty() => {
                format!("Device command '{}' failed\nstderr: {}", command, err.trim())
            }
            _ => format!("Device command '{}' failed", command),
        };
        Self {
            code: ErrorCode::DeviceCommandFailure,
            message,
            suggestion: Some("Check that the device is connected: 'adb devices'".into()),
        }
    }

    /// A device command ran but its output contained a failure marker.
    pub fn device_reported_failure(command: &str, output: &str) -> Self {
        Self {
            code: ErrorCode::DeviceCommandFailure,
            message: format!(
                "Device command '{}' reported failure: {}",
                command,
                output.trim()
            ),
            suggestion: Some(
                "Verify the package and activity names with 'adb shell pm list packages'".into(),
            ),
        }
    }

    pub fn assertion_failed(
        target: &str,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self {
            code: ErrorCode::AssertionFailure,
            message: format!(
                "Assertion on '{}' failed: expected {}, actual {}",
                target, expected, actual
            ),
            suggestion: Some("Inspect the final screen state in the result record".into()),
        }
    }

    pub fn aborted() -> Self {
        Self {
            code: ErrorCode::Aborted,
            message: "Execution aborted by stop request".to_string(),
            suggestion: Some("Run the script again to resume from the beginning".into()),
        }
    }

    pub fn timeout(what: &str, waited_ms: u128) -> Self {
        Self {
            code: ErrorCode::Timeout,
            message: format!("Timed out after {}ms waiting for '{}'", waited_ms, what),
            suggestion: Some(
                "Increase --wait-timeout or check that the element actually appears".into(),
            ),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InvalidInput,
            message: message.into(),
            suggestion: Some("Check the script syntax and try again".into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::InternalError,
            message: message.into(),
            suggestion: Some("This is an internal error. Please report it if it persists.".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_has_suggestion(err: &EngineError, context: &str) {
        assert!(
            err.suggestion.is_some(),
            "{} should have a suggestion, but got None",
            context
        );
    }

    #[test]
    fn test_missing_argument_names_command_and_position() {
        let err = EngineError::missing_argument(CommandType::Click, 1, "target");
        assert_has_suggestion(&err, "missing_argument");
        assert_eq!(err.code, ErrorCode::MissingArgument);
        assert!(err.message.contains("click"));
        assert!(err.message.contains("argument 1"));
    }

    #[test]
    fn test_missing_detail_lists_keys() {
        let err = EngineError::missing_detail(
            CommandType::LaunchApp,
            "an activity",
            &["activity", "appActivity"],
        );
        assert_has_suggestion(&err, "missing_detail");
        assert!(err.suggestion.as_ref().unwrap().contains("appActivity"));
    }

    #[test]
    fn test_device_command_failed_with_stderr() {
        let err = EngineError::device_command_failed("input tap 1 2", Some("device offline"));
        assert_has_suggestion(&err, "device_command_failed");
        assert!(err.message.contains("device offline"));
    }

    #[test]
    fn test_device_command_failed_blank_stderr() {
        let err = EngineError::device_command_failed("input tap 1 2", Some("  "));
        assert!(!err.message.contains("stderr:"));
    }

    #[test]
    fn test_assertion_failed_carries_expected_and_actual() {
        let err = EngineError::assertion_failed("title", "text \"Welcome\"", "text \"Login\"");
        assert_eq!(err.code, ErrorCode::AssertionFailure);
        assert!(err.message.contains("Welcome"));
        assert!(err.message.contains("Login"));
    }

    #[test]
    fn test_timeout_mentions_target() {
        let err = EngineError::timeout("登录按钮", 30000);
        assert_eq!(err.code, ErrorCode::Timeout);
        assert!(err.message.contains("登录按钮"));
        assert!(err.message.contains("30000ms"));
    }

    #[test]
    fn test_display_format_with_suggestion() {
        let err = EngineError::aborted();
        let display = format!("{}", err);
        assert!(display.contains("[ABORTED]"));
        assert!(display.contains("(hint:"));
    }

    #[test]
    fn test_json_round_trip_uses_screaming_codes() {
        let err = EngineError::element_not_found("logo");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("ELEMENT_NOT_FOUND"));

        let back: EngineError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
