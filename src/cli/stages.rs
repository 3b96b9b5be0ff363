// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Stages command - list the registered stages

use colored::Colorize;
use miette::Result;

use super::current_dir;
use crate::config::RunOptions;
use crate::stages::{StageContext, StageRegistry};
use crate::utils::print_header;

/// List every registered stage with its type
pub async fn run(verbose: bool) -> Result<()> {
    let registry = StageRegistry::with_builtins();
    let ctx = StageContext::new(RunOptions {
        working_dir: current_dir()?,
        ..RunOptions::default()
    });

    print_header("Stages");
    for name in registry.names() {
        let stage = registry.get(name, &ctx)?;
        println!(
            "  {:<22} {} -> {}",
            name.bold(),
            stage.input_type(),
            stage.output_type()
        );
        if verbose {
            if let Some(summary) = registry.summary(name) {
                println!("  {:<22} {}", "", summary.dimmed());
            }
        }
    }

    Ok(())
}
