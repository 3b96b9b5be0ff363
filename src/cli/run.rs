// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Run command - execute every pipeline of an experiment

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;
use std::sync::Arc;

use super::{current_dir, load_experiment, OptionArgs};
use crate::pipeline::{ExperimentReport, ExperimentRunner, PipelineStatus};
use crate::stages::{StageContext, StageRegistry};
use crate::utils::{print_error, print_success, print_warning};

/// Run the experiment
pub async fn run(experiment_path: PathBuf, args: OptionArgs, no_progress: bool, verbose: bool) -> Result<()> {
    let experiment = load_experiment(&experiment_path)?;
    let options = args.into_options(current_dir()?);

    let registry = Arc::new(StageRegistry::with_builtins());
    let runner = ExperimentRunner::new(registry, StageContext::new(options)).with_progress(!no_progress);

    let prepared = runner.prepare(&experiment)?;

    println!();
    println!("{}: {}", "Experiment".bold(), prepared.name);
    println!("{}", "═".repeat(50));
    println!(
        "{} pipeline{} ({})",
        prepared.pipelines.len(),
        if prepared.pipelines.len() == 1 { "" } else { "s" },
        if prepared.context.options.parallel { "parallel" } else { "sequential" }
    );
    if verbose {
        for warning in &prepared.warnings {
            print_warning(warning);
        }
        for plan in &prepared.plans {
            println!("  {}", plan.to_string().dimmed());
        }
    }
    println!();

    let report = runner.run_prepared(&prepared).await;
    print_report(&report);

    if report.is_success() {
        Ok(())
    } else {
        Err(miette::miette!(
            "{} of {} pipelines failed",
            report.failed(),
            report.outcomes.len()
        ))
    }
}

fn print_report(report: &ExperimentReport) {
    for outcome in &report.outcomes {
        let line = format!(
            "{} -> {} ({:.2}s)",
            outcome.input,
            outcome.output,
            outcome.duration.as_secs_f64()
        );
        match &outcome.status {
            PipelineStatus::Succeeded => print_success(&line),
            PipelineStatus::Failed { stage, message } => {
                print_error(&line);
                println!("      {} {}", format!("at {}:", stage).dimmed(), message);
            }
        }
    }

    println!();
    let summary = format!(
        "{} succeeded, {} failed in {:.2}s",
        report.succeeded(),
        report.failed(),
        report.duration.as_secs_f64()
    );
    if report.is_success() {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.red());
    }
}
