// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Pipeline executor
//!
//! Runs resolved pipelines. Within a pipeline each stage finishes before the
//! next one starts. A failing pipeline is logged and recorded; it never stops
//! its siblings, and a run always ends with an [`ExperimentReport`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use indicatif::ProgressBar;
use serde::Serialize;

use crate::errors::{ExpflowError, ExpflowResult};
use crate::pipeline::{plan_experiment, Experiment, ExperimentValidator, PipelinePlan};
use crate::stage::{StageRef, Value};
use crate::stages::{StageContext, StageRegistry, StageResolver};
use crate::utils::create_progress_bar;

/// Where and why a chain of stages stopped
#[derive(Debug)]
pub struct ChainFailure {
    /// Position of the failing stage in the chain
    pub index: usize,
    /// Name of the failing stage
    pub stage: String,
    pub error: ExpflowError,
}

impl fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({}) failed: {}", self.index, self.stage, self.error)
    }
}

/// Feed `input` through `stages` in order, stopping at the first failure
pub async fn run_chain(input: Value, stages: &[StageRef]) -> Result<Value, ChainFailure> {
    let mut value = input;
    for (index, stage) in stages.iter().enumerate() {
        tracing::debug!(index, stage = stage.name(), "running stage");
        value = stage.run(value).await.map_err(|error| ChainFailure {
            index,
            stage: stage.name().to_string(),
            error,
        })?;
    }
    Ok(value)
}

/// A resolved pipeline: concrete stages from an input to an output
pub struct Pipeline {
    pub input: String,
    pub output: String,
    pub stages: Vec<StageRef>,
}

impl Pipeline {
    /// Run every stage starting from the unit value
    pub async fn run(&self) -> Result<Value, ChainFailure> {
        run_chain(Value::Unit, &self.stages).await
    }
}

/// How one pipeline ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PipelineStatus {
    Succeeded,
    Failed { stage: String, message: String },
}

/// Outcome of one pipeline within a run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Position in enumeration order
    pub index: usize,
    pub input: String,
    pub output: String,
    #[serde(flatten)]
    pub status: PipelineStatus,
    pub duration: Duration,
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        self.status == PipelineStatus::Succeeded
    }
}

/// Summary of a finished experiment run
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReport {
    pub experiment: String,
    pub outcomes: Vec<PipelineOutcome>,
    pub duration: Duration,
}

impl ExperimentReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &PipelineOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// An experiment that passed every check and is ready to run
pub struct PreparedExperiment {
    pub name: String,
    pub context: StageContext,
    pub plans: Vec<PipelinePlan>,
    pub pipelines: Vec<Pipeline>,
    pub warnings: Vec<String>,
}

/// Runs experiments against a stage registry
pub struct ExperimentRunner {
    registry: Arc<StageRegistry>,
    context: StageContext,
    progress: bool,
}

impl ExperimentRunner {
    pub fn new(registry: Arc<StageRegistry>, context: StageContext) -> Self {
        Self {
            registry,
            context,
            progress: false,
        }
    }

    /// Show a progress bar advanced once per finished pipeline
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    /// Check and resolve an experiment without running anything.
    ///
    /// Merges the experiment's flags into the run options, validates it,
    /// flattens the tree and resolves every plan. Every configuration error
    /// surfaces here.
    pub fn prepare(&self, experiment: &Experiment) -> ExpflowResult<PreparedExperiment> {
        let options = self.context.options.with_flags(&experiment.flags)?;
        let context = self.context.with_options(options);

        let warnings = ExperimentValidator::validate(experiment, &self.registry).into_result()?;
        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let plans = plan_experiment(experiment)?;
        let resolver = StageResolver::new(&self.registry, &context);
        let pipelines = plans
            .iter()
            .map(|plan| resolver.resolve(plan))
            .collect::<ExpflowResult<Vec<_>>>()?;

        tracing::info!(
            experiment = %experiment.name,
            pipelines = pipelines.len(),
            "experiment prepared"
        );

        Ok(PreparedExperiment {
            name: experiment.name.clone(),
            context,
            plans,
            pipelines,
            warnings,
        })
    }

    /// Prepare and run an experiment, resolving once every pipeline finished
    pub async fn run(&self, experiment: &Experiment) -> ExpflowResult<ExperimentReport> {
        let prepared = self.prepare(experiment)?;
        Ok(self.run_prepared(&prepared).await)
    }

    /// Run prepared pipelines, sequentially unless the `parallel` option is set
    pub async fn run_prepared(&self, prepared: &PreparedExperiment) -> ExperimentReport {
        let start = Instant::now();
        let bar = self
            .progress
            .then(|| create_progress_bar(prepared.pipelines.len() as u64, &prepared.name));

        let outcomes = if prepared.context.options.parallel {
            join_all(
                prepared
                    .pipelines
                    .iter()
                    .enumerate()
                    .map(|(index, pipeline)| run_one(index, pipeline, bar.as_ref())),
            )
            .await
        } else {
            let mut outcomes = Vec::with_capacity(prepared.pipelines.len());
            for (index, pipeline) in prepared.pipelines.iter().enumerate() {
                outcomes.push(run_one(index, pipeline, bar.as_ref()).await);
            }
            outcomes
        };

        if let Some(bar) = bar {
            bar.finish_and_clear();
        }

        let report = ExperimentReport {
            experiment: prepared.name.clone(),
            outcomes,
            duration: start.elapsed(),
        };
        tracing::info!(
            experiment = %report.experiment,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "experiment finished"
        );
        report
    }
}

async fn run_one(index: usize, pipeline: &Pipeline, bar: Option<&ProgressBar>) -> PipelineOutcome {
    let start = Instant::now();
    tracing::info!(index, input = %pipeline.input, output = %pipeline.output, "starting pipeline");

    let status = match pipeline.run().await {
        Ok(_) => PipelineStatus::Succeeded,
        Err(failure) => {
            tracing::error!(
                index,
                input = %pipeline.input,
                output = %pipeline.output,
                stage = %failure.stage,
                "failed pipeline: {}",
                failure.error
            );
            PipelineStatus::Failed {
                stage: failure.stage,
                message: failure.error.to_string(),
            }
        }
    };

    if let Some(bar) = bar {
        bar.inc(1);
    }

    PipelineOutcome {
        index,
        input: pipeline.input.clone(),
        output: pipeline.output.clone(),
        status,
        duration: start.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunOptions;
    use crate::stage::fn_stage;
    use crate::stages::testing::{context, MemoryFiles, RecordingTasks};
    use crate::types::TypeExpr;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recording(name: &'static str, log: Log) -> StageRef {
        fn_stage(name, TypeExpr::fresh_var(), TypeExpr::fresh_var(), move |v: Value| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(name.to_string());
                Ok::<_, ExpflowError>(v)
            }
        })
    }

    fn failing(name: &'static str) -> StageRef {
        fn_stage(name, TypeExpr::fresh_var(), TypeExpr::fresh_var(), move |_: Value| async move {
            Err::<Value, _>(ExpflowError::Io {
                message: format!("{} exploded", name),
            })
        })
    }

    #[tokio::test]
    async fn test_run_chain_in_order() {
        let log: Log = Arc::default();
        let stages = vec![
            recording("first", log.clone()),
            recording("second", log.clone()),
            recording("third", log.clone()),
        ];

        let result = run_chain(Value::text("x"), &stages).await.unwrap();
        assert_eq!(result, Value::text("x"));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_second_stage_failure_stops_chain() {
        let log: Log = Arc::default();
        let stages = vec![
            recording("first", log.clone()),
            failing("second"),
            recording("third", log.clone()),
        ];

        let failure = run_chain(Value::Unit, &stages).await.unwrap_err();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.stage, "second");
        assert_eq!(*log.lock().unwrap(), vec!["first"]);
    }

    fn runner_with(registry: StageRegistry, files: Arc<MemoryFiles>, options: RunOptions) -> ExperimentRunner {
        let ctx = context(files, RecordingTasks::answering("")).with_options(options);
        ExperimentRunner::new(Arc::new(registry), ctx)
    }

    const TWO_BRANCHES: &str = r#"
name: branches
inputs: [a.json]
tree:
  a.json:
    - stages: [first, second, third]
      output: broken.json
    - stages: [first]
      output: fine.json
"#;

    #[tokio::test]
    async fn test_failing_pipeline_is_isolated() {
        let log: Log = Arc::default();
        let mut registry = StageRegistry::new();
        for name in ["first", "third"] {
            let log = log.clone();
            registry.register(name, "records itself", move |_| recording(name, log.clone()));
        }
        registry.register("second", "always fails", |_| failing("second"));
        registry.register("fileToJSON", "reads JSON", crate::stages::file_to_json);

        let files = MemoryFiles::with(&[("a.json", "{}")]);
        let runner = runner_with(registry, files.clone(), RunOptions::default());
        let experiment = Experiment::from_yaml(TWO_BRANCHES).unwrap();

        let report = runner.run(&experiment).await.unwrap();

        assert_eq!(report.experiment, "branches");
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());

        let failure = report.failures().next().unwrap();
        assert_eq!(failure.output, "broken.json");
        assert!(matches!(
            &failure.status,
            PipelineStatus::Failed { stage, .. } if stage == "map(left(second))"
        ));

        // first ran for both pipelines, third never ran
        assert_eq!(*log.lock().unwrap(), vec!["first", "first"]);
        assert!(files.contents("fine.json").is_some());
        assert!(files.contents("broken.json").is_none());
    }

    #[tokio::test]
    async fn test_parallel_run_reports_in_enumeration_order() {
        let files = MemoryFiles::with(&[("a.json", "1")]);
        let options = RunOptions {
            parallel: true,
            ..RunOptions::default()
        };
        let runner = runner_with(StageRegistry::with_builtins(), files.clone(), options);
        let experiment = Experiment::from_yaml(
            r#"
inputs: [a.json]
tree:
  a.json:
    - stages: [consoleOutput]
      output: x.json
    - stages: []
      output: y.json
"#,
        )
        .unwrap();

        let report = runner.run(&experiment).await.unwrap();
        assert!(report.is_success());
        let outputs: Vec<_> = report.outcomes.iter().map(|o| o.output.as_str()).collect();
        assert_eq!(outputs, vec!["x.json", "y.json"]);
        assert_eq!(files.contents("y.json").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_configuration_errors_before_execution() {
        let files = MemoryFiles::with(&[("a.json", "{}")]);
        let runner = runner_with(StageRegistry::with_builtins(), files.clone(), RunOptions::default());
        let experiment = Experiment::from_yaml(
            r#"
inputs: [a.json]
tree:
  a.json:
    - stages: [consoleOutput]
      output: written.json
    - stages: [noSuchStage]
      output: never.json
"#,
        )
        .unwrap();

        let err = runner.run(&experiment).await.err().unwrap();
        assert!(matches!(err, ExpflowError::StageNotFound { .. }));
        // Nothing ran, not even the valid pipeline
        assert!(files.contents("written.json").is_none());
    }

    #[test]
    fn test_prepare_merges_flags() {
        let runner = runner_with(
            StageRegistry::with_builtins(),
            MemoryFiles::with(&[]),
            RunOptions::default(),
        );
        let experiment = Experiment::from_yaml(
            r#"
inputs: [a.json]
flags:
  browser: android-chromium
tree:
  a.json:
    - stages: [fetch]
      output: b.json
"#,
        )
        .unwrap();

        let prepared = runner.prepare(&experiment).unwrap();
        assert_eq!(prepared.context.options.browser, "android-chromium");
        assert_eq!(prepared.plans.len(), 1);
        assert_eq!(prepared.pipelines[0].output, "b.json");
        // The runner's own options are unchanged
        assert_eq!(runner.context.options.browser, "system");
    }

    #[tokio::test]
    async fn test_working_dir_flag_does_not_split_reads_from_listing() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("a.json"), r#"{"n": 1}"#).unwrap();
        std::fs::create_dir(root.path().join("data")).unwrap();

        let options = RunOptions {
            working_dir: root.path().to_path_buf(),
            ..RunOptions::default()
        };
        let runner = ExperimentRunner::new(Arc::new(StageRegistry::with_builtins()), StageContext::new(options));
        let experiment = Experiment::from_yaml(
            r#"
inputs: [a.json]
flags:
  workingDir: data
tree:
  a.json:
    - stages: [consoleOutput]
      output: out.json
"#,
        )
        .unwrap();

        let report = runner.run(&experiment).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.succeeded(), 1);
        assert!(root.path().join("out.json").exists());
    }

    #[test]
    fn test_report_serializes_status() {
        let outcome = PipelineOutcome {
            index: 0,
            input: "a".into(),
            output: "b".into(),
            status: PipelineStatus::Failed {
                stage: "s".into(),
                message: "boom".into(),
            },
            duration: Duration::from_millis(5),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["stage"], "s");
    }
}
