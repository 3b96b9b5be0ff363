// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Plan command - show the pipelines an experiment expands to

use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;
use std::sync::Arc;

use super::{current_dir, load_experiment, OptionArgs, OutputFormat};
use crate::pipeline::ExperimentRunner;
use crate::stage::describe;
use crate::stages::{StageContext, StageRegistry};

/// Print the plans of an experiment after full resolution
pub async fn run(experiment_path: PathBuf, args: OptionArgs, format: OutputFormat, verbose: bool) -> Result<()> {
    let experiment = load_experiment(&experiment_path)?;
    let options = args.into_options(current_dir()?);

    let runner = ExperimentRunner::new(Arc::new(StageRegistry::with_builtins()), StageContext::new(options));
    let prepared = runner.prepare(&experiment)?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&prepared.plans).into_diagnostic()?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            for (i, (plan, pipeline)) in prepared.plans.iter().zip(&prepared.pipelines).enumerate() {
                println!("{}. {}", i + 1, plan.to_string().bold());
                if verbose {
                    for stage in &pipeline.stages {
                        println!("     {}", describe(stage.as_ref()).dimmed());
                    }
                }
            }
        }
    }

    Ok(())
}
