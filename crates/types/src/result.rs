//! Execution results, per step and per workflow.

use serde::{Deserialize, Serialize};

/// Outcome of executing a single request.
///
/// Execution faults (non-zero exits, Docker command failures, filesystem
/// errors) are captured here rather than raised, so that a workflow with
/// partial success can still be reported coherently. Equality is
/// structural, which the engine's tests rely on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OperationResult {
    /// Label of the originating request, when one was attached.
    #[serde(default)]
    pub label: Option<String>,
    pub success: bool,
    /// Exit code of the underlying subprocess, when one ran.
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Failure description for faults that never produced process output
    /// (spawn errors, timeouts, filesystem errors).
    #[serde(default)]
    pub error_message: Option<String>,
    /// Mirrors the originating request's `allow_failure` flag so callers
    /// can fold results without the request in hand.
    #[serde(default)]
    pub allow_failure: bool,
    /// Mirrors the originating request's `show_output` flag for the
    /// presentation layer.
    #[serde(default)]
    pub show_output: bool,
}

impl OperationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn ok_with_output(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Best available failure description: the explicit error message when
    /// present, otherwise captured stderr, otherwise a generic line with
    /// the exit code.
    pub fn error_output(&self) -> String {
        if let Some(message) = &self.error_message {
            return message.clone();
        }
        if !self.stderr.trim().is_empty() {
            return self.stderr.trim().to_string();
        }
        match self.exit_code {
            Some(code) => format!("command exited with status {code}"),
            None => "operation failed".to_string(),
        }
    }
}

/// Aggregated outcome of one workflow invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkflowExecutionResult {
    /// True iff every non-`allow_failure` step succeeded.
    pub success: bool,
    /// Per-step results of the main sequence, in submission order.
    pub results: Vec<OperationResult>,
    /// Results of environment preparation steps that ran before the main
    /// sequence (empty for local runs).
    pub preparation_results: Vec<OperationResult>,
    /// Failure messages of steps that aborted or marred the run.
    pub errors: Vec<String>,
    /// Non-fatal advisories: `allow_failure` step failures and other
    /// degraded-mode notes.
    pub warnings: Vec<String>,
}

impl WorkflowExecutionResult {
    /// A run that failed before any step executed.
    pub fn aborted(errors: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            warnings,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_output_prefers_explicit_message() {
        let result = OperationResult {
            success: false,
            error_message: Some("timed out after 300s".into()),
            stderr: "noise".into(),
            ..OperationResult::default()
        };
        assert_eq!(result.error_output(), "timed out after 300s");
    }

    #[test]
    fn error_output_falls_back_to_stderr_then_exit_code() {
        let result = OperationResult {
            success: false,
            stderr: "  compile error\n".into(),
            exit_code: Some(1),
            ..OperationResult::default()
        };
        assert_eq!(result.error_output(), "compile error");

        let bare = OperationResult {
            success: false,
            exit_code: Some(2),
            ..OperationResult::default()
        };
        assert_eq!(bare.error_output(), "command exited with status 2");
    }

    #[test]
    fn workflow_result_equality_is_structural() {
        let a = WorkflowExecutionResult::aborted(vec!["missing steps".into()], vec![]);
        let b = WorkflowExecutionResult::aborted(vec!["missing steps".into()], vec![]);
        assert_eq!(a, b);
    }
}
