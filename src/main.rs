// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! expflow - experiment pipeline runner

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use expflow::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "expflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let cli = Cli::parse();

    if !expflow::utils::should_use_colors() {
        colored::control::set_override(false);
    }

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            experiment,
            options,
            no_progress,
        } => expflow::cli::run::run(experiment, options, no_progress, cli.verbose).await,
        Commands::Plan {
            experiment,
            options,
            format,
        } => expflow::cli::plan::run(experiment, options, format, cli.verbose).await,
        Commands::Validate { experiment } => {
            expflow::cli::validate::run(experiment, cli.verbose).await
        }
        Commands::Graph { experiment, format } => {
            expflow::cli::graph::run(experiment, format, cli.verbose).await
        }
        Commands::Stages => expflow::cli::stages::run(cli.verbose).await,
    }
}
