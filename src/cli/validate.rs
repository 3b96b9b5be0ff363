// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Validate command - check an experiment without running it

use colored::Colorize;
use miette::Result;
use std::path::PathBuf;

use super::load_experiment;
use crate::pipeline::{plan_experiment, ExperimentValidator};
use crate::stages::StageRegistry;
use crate::utils::{print_error, print_success, print_warning};

/// Run the validate command
pub async fn run(experiment_path: PathBuf, verbose: bool) -> Result<()> {
    println!("{}", "Validating experiment...".bold());
    println!();

    let experiment = match load_experiment(&experiment_path) {
        Ok(e) => e,
        Err(e) => {
            print_error("Failed to parse experiment");
            println!();
            return Err(e);
        }
    };
    print_success("Experiment file parses");

    let registry = StageRegistry::with_builtins();
    let validation = ExperimentValidator::validate(&experiment, &registry);

    if !validation.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &validation.errors {
            print_error(&error.to_string());
        }
    }

    if !validation.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &validation.warnings {
            print_warning(warning);
        }
    }

    if verbose && validation.is_valid() {
        if let Ok(plans) = plan_experiment(&experiment) {
            println!();
            println!("{}:", "Experiment summary".bold());
            println!("  Name: {}", experiment.name);
            println!("  Inputs: {}", experiment.inputs.join(", "));
            println!("  Pipelines: {}", plans.len());
        }
    }

    println!();

    if !validation.is_valid() {
        return Err(miette::miette!("Experiment validation failed"));
    }
    if validation.has_warnings() {
        println!("{}", "Experiment is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Experiment is valid!".green().bold());
    }
    Ok(())
}
