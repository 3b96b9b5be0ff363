// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Stages backed by external processes
//!
//! Telemetry stages drive the single browser, so each one holds the
//! browser arbiter for the whole lifetime of its script.

use std::path::PathBuf;

use super::StageContext;
use crate::config::RunOptions;
use crate::errors::{ExpflowError, ExpflowResult};
use crate::executors::TaskSpec;
use crate::stage::{fn_stage, StageRef, Value};
use crate::types::TypeExpr;

/// Build the command line for a telemetry script
///
/// Runs `<python> <telemetry_dir>/<script> --browser=<browser> -- <url>` in
/// the working directory, with the Chromium tool directories appended to
/// `PYTHONPATH` when a checkout is configured.
pub fn telemetry_task(options: &RunOptions, script: &str, url: &str) -> TaskSpec {
    let script_path = options.telemetry_dir.join(script);
    let mut task = TaskSpec::new(options.python.clone())
        .arg(script_path.to_string_lossy())
        .arg(format!("--browser={}", options.browser))
        .arg("--")
        .arg(url)
        .current_dir(options.working_dir.clone());

    let extra = options.python_path_entries();
    if !extra.is_empty() {
        let mut paths: Vec<PathBuf> = std::env::var_os("PYTHONPATH")
            .map(|existing| std::env::split_paths(&existing).collect())
            .unwrap_or_default();
        paths.extend(extra);
        match std::env::join_paths(paths) {
            Ok(joined) => task = task.env("PYTHONPATH", joined.to_string_lossy()),
            Err(e) => tracing::warn!("Could not extend PYTHONPATH: {}", e),
        }
    }

    task
}

fn telemetry_stage(ctx: &StageContext, name: &'static str, script: &'static str) -> StageRef {
    let ctx = ctx.clone();
    fn_stage(name, TypeExpr::string(), TypeExpr::json(), move |input| {
        run_telemetry(ctx.clone(), name, script, input)
    })
}

async fn run_telemetry(
    ctx: StageContext,
    name: &'static str,
    script: &'static str,
    input: Value,
) -> ExpflowResult<Value> {
    let url = input.into_text(name)?;
    let task = telemetry_task(&ctx.options, script, &url);

    if !ctx.tasks.check_available(&task.program).await? {
        return Err(ExpflowError::tool_not_found(&task.program));
    }

    let mut browser = match ctx.options.browser_timeout() {
        Some(timeout) => ctx.browser.acquire_timeout(timeout).await?,
        None => ctx.browser.acquire().await?,
    };
    browser.set_hold_warning(ctx.options.hold_warning());
    tracing::info!(stage = name, url = %url, ticket = browser.ticket(), "running telemetry");

    let json = ctx.tasks.run_json(task).await?;
    drop(browser);
    Ok(Value::Json(json))
}

/// `string -> JSON`: save the page at a URL through the browser
pub fn fetch(ctx: &StageContext) -> StageRef {
    telemetry_stage(ctx, "fetch", "save.py")
}

/// `string -> JSON`: save a page with its styles inlined
pub fn fetch_with_inline_style(ctx: &StageContext) -> StageRef {
    telemetry_stage(ctx, "fetchWithInlineStyle", "save-no-style.py")
}

/// `string -> JSON`: record a performance trace of a page
pub fn trace_url(ctx: &StageContext) -> StageRef {
    telemetry_stage(ctx, "traceURL", "perf.py")
}

/// `string -> string`: decompress a file that was gzipped twice
pub fn read_and_gunzip_twice(ctx: &StageContext) -> StageRef {
    let ctx = ctx.clone();
    fn_stage("readAndGunzipTwice", TypeExpr::string(), TypeExpr::string(), move |input| {
        gunzip_twice(ctx.clone(), input)
    })
}

async fn gunzip_twice(ctx: StageContext, input: Value) -> ExpflowResult<Value> {
    let path = input.into_text("readAndGunzipTwice")?;
    let dir = ctx.options.working_dir.clone();

    let once = ctx
        .tasks
        .run(TaskSpec::new("zcat").arg(path).current_dir(dir.clone()))
        .await?;
    let twice = ctx
        .tasks
        .run(TaskSpec::new("zcat").stdin(once.stdout).current_dir(dir))
        .await?;

    Ok(Value::Text(twice.stdout_text()))
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn test_telemetry_command_line() {
        let options = RunOptions {
            browser: "android-chromium".into(),
            python: "python3".into(),
            telemetry_dir: PathBuf::from("telemetry"),
            ..RunOptions::default()
        };

        let task = telemetry_task(&options, "perf.py", "http://example.com");
        assert_eq!(task.program, "python3");
        assert_eq!(
            task.args,
            vec![
                "telemetry/perf.py",
                "--browser=android-chromium",
                "--",
                "http://example.com"
            ]
        );
        assert!(!task.env.contains_key("PYTHONPATH"));
    }

    #[test]
    fn test_chromium_extends_python_path() {
        let options = RunOptions {
            chromium: Some(PathBuf::from("/src/chromium")),
            ..RunOptions::default()
        };

        let task = telemetry_task(&options, "save.py", "http://example.com");
        let python_path = &task.env["PYTHONPATH"];
        assert!(python_path.ends_with("/src/chromium/tools"));
        assert!(python_path.contains("/src/chromium/tools/telemetry"));
    }

    #[tokio::test]
    async fn test_fetch_runs_script_and_parses_json() {
        let tasks = RecordingTasks::answering(r#"{"html": "<p/>"}"#);
        let ctx = context(MemoryFiles::with(&[]), tasks.clone());

        let result = fetch(&ctx).run(Value::text("http://example.com")).await.unwrap();
        assert_eq!(result, Value::Json(serde_json::json!({"html": "<p/>"})));

        let recorded = tasks.tasks.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].args[0].ends_with("save.py"));
        assert!(!ctx.browser.is_held());
    }

    #[tokio::test]
    async fn test_malformed_telemetry_output_releases_browser() {
        let ctx = context(MemoryFiles::with(&[]), RecordingTasks::answering("Traceback"));

        let err = trace_url(&ctx).run(Value::text("http://example.com")).await.unwrap_err();
        assert!(matches!(err, ExpflowError::MalformedOutput { .. }));
        assert!(!ctx.browser.is_held());
    }

    #[tokio::test]
    async fn test_browser_timeout_applies() {
        let options = RunOptions {
            browser_timeout_secs: Some(0),
            ..RunOptions::default()
        };
        let ctx = StageContext::with_collaborators(
            options,
            RecordingTasks::answering("{}"),
            MemoryFiles::with(&[]),
        );

        let _held = ctx.browser.acquire().await.unwrap();
        let err = fetch_with_inline_style(&ctx)
            .run(Value::text("http://example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExpflowError::ArbiterTimeout { .. }));
    }

    #[tokio::test]
    async fn test_telemetry_stages_take_turns() {
        let tasks = RecordingTasks::answering("{}");
        let ctx = context(MemoryFiles::with(&[]), tasks.clone());
        let stage = crate::stage::map(trace_url(&ctx));

        let urls = Value::List(vec![Value::text("http://a"), Value::text("http://b")]);
        let result = stage.run(urls).await.unwrap();

        assert_eq!(result.into_list("test").unwrap().len(), 2);
        assert_eq!(tasks.tasks.lock().unwrap().len(), 2);
        assert!(!ctx.browser.is_held());
    }

    #[tokio::test]
    async fn test_gunzip_pipes_first_output_into_second() {
        let tasks = RecordingTasks::answering("inner");
        let ctx = context(MemoryFiles::with(&[]), tasks.clone());

        let result = read_and_gunzip_twice(&ctx)
            .run(Value::text("trace.gz.gz"))
            .await
            .unwrap();
        assert_eq!(result, Value::text("inner"));

        let recorded = tasks.tasks.lock().unwrap();
        assert_eq!(recorded[0].args, vec!["trace.gz.gz"]);
        assert_eq!(recorded[1].stdin.as_deref(), Some(&b"inner"[..]));
    }

    #[tokio::test]
    async fn test_missing_interpreter_fails_before_taking_browser() {
        let tasks = RecordingTasks::answering("{}").without("python");
        let ctx = context(MemoryFiles::with(&[]), tasks.clone());
        let _held = ctx.browser.acquire().await.unwrap();

        // Fails at once even though the browser is busy
        let err = fetch(&ctx).run(Value::text("http://example.com")).await.unwrap_err();
        assert!(matches!(err, ExpflowError::ToolNotFound { .. }));
        assert!(tasks.tasks.lock().unwrap().is_empty());
        assert_eq!(ctx.browser.waiting(), 0);
    }
}
