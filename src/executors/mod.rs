// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! External collaborators
//!
//! Stages never spawn processes or touch the disk directly. They go through
//! a [`TaskRunner`] and a [`FileStore`], so tests can swap in fakes and the
//! core stays free of platform details.

mod files;
mod process;

pub use files::LocalFileStore;
pub use process::ProcessTaskRunner;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{ExpflowError, ExpflowResult};

/// An external command to run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub current_dir: Option<PathBuf>,
    /// Bytes written to the child's stdin
    pub stdin: Option<Vec<u8>>,
}

impl TaskSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
}

impl TaskOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Runs external commands
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run a command to completion.
    ///
    /// A non-zero exit status is an `ExternalTaskFailed` error.
    async fn run(&self, task: TaskSpec) -> ExpflowResult<TaskOutput>;

    /// Run a command and parse its stdout as JSON
    async fn run_json(&self, task: TaskSpec) -> ExpflowResult<serde_json::Value> {
        let command = task.to_string();
        let output = self.run(task).await?;
        serde_json::from_slice(&output.stdout).map_err(|e| ExpflowError::MalformedOutput {
            command,
            message: e.to_string(),
        })
    }

    /// Whether `program` can be launched
    async fn check_available(&self, program: &str) -> ExpflowResult<bool>;
}

/// Reads and writes artifacts
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &Path) -> ExpflowResult<Vec<u8>>;

    async fn write(&self, path: &Path, contents: &[u8]) -> ExpflowResult<()>;

    /// Names of the entries directly inside `dir`, sorted
    async fn list(&self, dir: &Path) -> ExpflowResult<Vec<String>>;

    async fn read_to_string(&self, path: &Path) -> ExpflowResult<String> {
        let bytes = self.read(path).await?;
        String::from_utf8(bytes).map_err(|e| ExpflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_spec_display() {
        let task = TaskSpec::new("python")
            .arg("telemetry/save.py")
            .args(["--browser=system", "--", "http://example.com"]);
        assert_eq!(
            task.to_string(),
            "python telemetry/save.py --browser=system -- http://example.com"
        );
    }
}
