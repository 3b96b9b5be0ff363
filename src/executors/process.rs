// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Process-backed task runner

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{TaskOutput, TaskRunner, TaskSpec};
use crate::errors::{ExpflowError, ExpflowResult};

/// Runs tasks as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessTaskRunner;

impl ProcessTaskRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskRunner for ProcessTaskRunner {
    async fn run(&self, task: TaskSpec) -> ExpflowResult<TaskOutput> {
        let command = task.to_string();
        let start = Instant::now();

        let mut cmd = Command::new(&task.program);
        cmd.args(&task.args)
            .envs(&task.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Cancelling the run kills the child
            .kill_on_drop(true)
            .stdin(if task.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        if let Some(dir) = &task.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExpflowError::tool_not_found(&task.program),
            _ => ExpflowError::Io {
                message: format!("failed to start '{}': {}", command, e),
            },
        })?;

        // Feed stdin from its own task so a child filling its stdout pipe
        // cannot stall on us. Dropping the handle closes the child's stdin.
        let feeder = match (task.stdin, child.stdin.take()) {
            (Some(input), Some(mut stdin)) => Some(tokio::spawn(async move {
                stdin.write_all(&input).await
            })),
            _ => None,
        };

        let output = child.wait_with_output().await?;
        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                // The child may exit without reading everything
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => {
                    return Err(ExpflowError::Io {
                        message: format!("stdin writer for '{}' failed: {}", command, e),
                    })
                }
            }
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        tracing::debug!(
            command = %command,
            exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "task finished"
        );

        if !output.status.success() {
            return Err(ExpflowError::task_failed(&command, exit_code, stderr));
        }

        Ok(TaskOutput {
            stdout: output.stdout,
            stderr,
            exit_code,
        })
    }

    async fn check_available(&self, program: &str) -> ExpflowResult<bool> {
        Ok(which::which(program).is_ok())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let output = ProcessTaskRunner::new()
            .run(TaskSpec::new("sh").args(["-c", "echo hello"]))
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout_text().trim(), "hello");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let err = ProcessTaskRunner::new()
            .run(TaskSpec::new("sh").args(["-c", "echo broken >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            ExpflowError::ExternalTaskFailed { exit_code, stderr, .. } => {
                assert_eq!(exit_code, 3);
                assert!(stderr.contains("broken"));
            }
            other => panic!("Expected ExternalTaskFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = ProcessTaskRunner::new();
        let err = runner
            .run(TaskSpec::new("expflow-no-such-program"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpflowError::ToolNotFound { .. }));
        assert!(!runner.check_available("expflow-no-such-program").await.unwrap());
        assert!(runner.check_available("sh").await.unwrap());
    }

    #[tokio::test]
    async fn test_run_json_and_env() {
        let runner = ProcessTaskRunner::new();
        let value = runner
            .run_json(
                TaskSpec::new("sh")
                    .args(["-c", "echo \"{\\\"browser\\\": \\\"$BROWSER_NAME\\\"}\""])
                    .env("BROWSER_NAME", "system"),
            )
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!({"browser": "system"}));

        let err = runner
            .run_json(TaskSpec::new("sh").args(["-c", "echo not json"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpflowError::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let output = ProcessTaskRunner::new()
            .run(TaskSpec::new("cat").stdin("piped text"))
            .await
            .unwrap();
        assert_eq!(output.stdout_text(), "piped text");
    }

    #[tokio::test]
    async fn test_cancelled_task_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");

        let task = TaskSpec::new("sh")
            .args(["-c", "sleep 0.3; touch marker"])
            .current_dir(dir.path());
        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), ProcessTaskRunner::new().run(task)).await;
        assert!(cancelled.is_err());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!marker.exists());
    }
}
