// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Error types
//!
//! Every failure expflow can report lives in [`ExpflowError`]. Variants fall
//! into three families: configuration errors (raised before any stage runs),
//! stage execution errors (isolated to the pipeline that raised them) and
//! resource arbitration errors.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for expflow operations
pub type ExpflowResult<T> = Result<T, ExpflowError>;

/// Main error type for expflow
#[derive(Error, Debug, Diagnostic)]
pub enum ExpflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Experiment file not found: {path}")]
    #[diagnostic(
        code(expflow::experiment_not_found),
        help("Pass the path of a .yaml, .json or .toml experiment description")
    )]
    ExperimentNotFound { path: PathBuf },

    #[error("Invalid experiment: {reason}")]
    #[diagnostic(code(expflow::invalid_experiment))]
    InvalidExperiment {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Circular dependency between artifacts: {}", .artifacts.join(" -> "))]
    #[diagnostic(
        code(expflow::circular_dependency),
        help("An artifact may not feed, directly or transitively, back into itself")
    )]
    CircularDependency { artifacts: Vec<String> },

    #[error("Artifact '{artifact}' has no edges in the experiment tree")]
    #[diagnostic(
        code(expflow::unknown_artifact),
        help("Every experiment input must be a key of the tree")
    )]
    UnknownArtifact { artifact: String },

    #[error("Stage '{stage}' not found")]
    #[diagnostic(
        code(expflow::stage_not_found),
        help("Run 'expflow stages' to list the registered stages")
    )]
    StageNotFound { stage: String },

    #[error("Invalid pattern '{pattern}': {message}")]
    #[diagnostic(code(expflow::invalid_pattern))]
    InvalidPattern { pattern: String, message: String },

    #[error("Stage '{consumer}' expects {expected} but '{producer}' produces {found}")]
    #[diagnostic(
        code(expflow::type_mismatch),
        help("Strict type checking is enabled, so adjacent stage types must agree")
    )]
    TypeMismatch {
        producer: String,
        consumer: String,
        expected: String,
        found: String,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Stage Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Stage '{stage}' expected {expected} but received {found}")]
    #[diagnostic(code(expflow::unexpected_value))]
    UnexpectedValue {
        stage: String,
        expected: String,
        found: String,
    },

    #[error("Tool '{tool}' not found")]
    #[diagnostic(code(expflow::tool_not_found), help("{suggestion}"))]
    ToolNotFound { tool: String, suggestion: String },

    #[error("External task '{command}' exited with code {exit_code}")]
    #[diagnostic(code(expflow::external_task_failed))]
    ExternalTaskFailed {
        command: String,
        exit_code: i32,
        stderr: String,
        #[help]
        help: Option<String>,
    },

    #[error("External task '{command}' produced malformed output: {message}")]
    #[diagnostic(code(expflow::malformed_output))]
    MalformedOutput { command: String, message: String },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(expflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(expflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Resource Arbitration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Timed out after {waited_ms}ms waiting for exclusive access to '{resource}'")]
    #[diagnostic(
        code(expflow::arbiter_timeout),
        help("The current holder may never release it; a stalled stage keeps the resource forever")
    )]
    ArbiterTimeout { resource: String, waited_ms: u64 },

    #[error("Arbiter for '{resource}' dropped a pending grant")]
    #[diagnostic(code(expflow::arbiter_closed))]
    ArbiterClosed { resource: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(expflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(expflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(expflow::json_error))]
    Json { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(expflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for ExpflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for ExpflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for ExpflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl From<toml::de::Error> for ExpflowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

impl ExpflowError {
    /// Whether this error describes a broken experiment rather than a runtime failure.
    ///
    /// Configuration errors are always raised before execution starts.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ExperimentNotFound { .. }
                | Self::InvalidExperiment { .. }
                | Self::CircularDependency { .. }
                | Self::UnknownArtifact { .. }
                | Self::StageNotFound { .. }
                | Self::InvalidPattern { .. }
                | Self::TypeMismatch { .. }
                | Self::Yaml { .. }
                | Self::Json { .. }
                | Self::Toml { .. }
        )
    }

    /// Create a tool not found error with installation suggestion
    pub fn tool_not_found(tool: &str) -> Self {
        let suggestion = match tool {
            "python" | "python3" => {
                "Install Python and set --python to its executable".to_string()
            }
            "zcat" => "Install gzip; zcat ships with it".to_string(),
            _ => format!("Install {} and ensure it's in your PATH", tool),
        };

        Self::ToolNotFound {
            tool: tool.to_string(),
            suggestion,
        }
    }

    /// Create an invalid pattern error from a regex failure
    pub fn invalid_pattern(pattern: &str, error: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            message: error.to_string(),
        }
    }

    /// Create an external task failure with a hint derived from stderr
    pub fn task_failed(command: &str, exit_code: i32, stderr: String) -> Self {
        let help = Self::help_for_task_stderr(&stderr);
        Self::ExternalTaskFailed {
            command: command.to_string(),
            exit_code,
            stderr,
            help,
        }
    }

    fn help_for_task_stderr(stderr: &str) -> Option<String> {
        if stderr.contains("ModuleNotFoundError") || stderr.contains("ImportError") {
            Some("Telemetry modules are missing; point --chromium at a Chromium checkout".into())
        } else if stderr.contains("No such file or directory") {
            Some("A script or input file is missing; check --telemetry-dir".into())
        } else if stderr.contains("not in gzip format") {
            Some("The input is not gzip-compressed".into())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(ExpflowError::StageNotFound { stage: "x".into() }.is_configuration());
        assert!(ExpflowError::CircularDependency {
            artifacts: vec!["a".into(), "a".into()]
        }
        .is_configuration());
        assert!(!ExpflowError::Io { message: "boom".into() }.is_configuration());
        assert!(!ExpflowError::ArbiterTimeout {
            resource: "browser".into(),
            waited_ms: 10
        }
        .is_configuration());
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = ExpflowError::CircularDependency {
            artifacts: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "Circular dependency between artifacts: a -> b -> a"
        );
    }

    #[test]
    fn test_task_failed_help() {
        let err = ExpflowError::task_failed("python", 1, "ImportError: telemetry".into());
        match err {
            ExpflowError::ExternalTaskFailed { help, .. } => assert!(help.is_some()),
            _ => panic!("Expected ExternalTaskFailed"),
        }
    }
}
