// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for expflow.

pub mod graph;
pub mod plan;
pub mod run;
pub mod stages;
pub mod validate;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::RunOptions;
use crate::pipeline::Experiment;

/// Experiment pipeline runner
///
/// Flatten experiment trees into pipelines of typed stages and run them.
#[derive(Parser, Debug)]
#[clap(
    name = "expflow",
    version,
    about = "Run experiment pipelines built from typed stages",
    long_about = None,
    after_help = "Examples:\n\
        expflow plan experiment.yaml          Show the pipelines an experiment expands to\n\
        expflow run experiment.yaml           Run every pipeline of an experiment\n\
        expflow graph experiment.yaml -f dot  Render the artifact graph\n\
        expflow stages                        List the available stages\n\n\
        See 'expflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every pipeline of an experiment
    Run {
        /// Experiment file (YAML, JSON or TOML)
        experiment: PathBuf,

        #[clap(flatten)]
        options: OptionArgs,

        /// Hide the progress bar
        #[clap(long)]
        no_progress: bool,
    },

    /// Show the pipelines an experiment expands to
    Plan {
        /// Experiment file
        experiment: PathBuf,

        #[clap(flatten)]
        options: OptionArgs,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Validate an experiment without running it
    Validate {
        /// Experiment file
        experiment: PathBuf,
    },

    /// Show the artifact graph of an experiment
    Graph {
        /// Experiment file
        experiment: PathBuf,

        /// Output format
        #[clap(short, long, value_enum, default_value = "text")]
        format: GraphFormat,
    },

    /// List the registered stages
    Stages,
}

/// Run options settable from the command line or environment
#[derive(Args, Debug, Clone)]
pub struct OptionArgs {
    /// Browser handed to telemetry scripts
    #[clap(long, env = "EXPFLOW_BROWSER", default_value = "system")]
    pub browser: String,

    /// Chromium checkout providing the telemetry modules
    #[clap(long, env = "EXPFLOW_CHROMIUM", value_name = "DIR")]
    pub chromium: Option<PathBuf>,

    /// Python interpreter for telemetry scripts
    #[clap(long, env = "EXPFLOW_PYTHON", default_value = "python")]
    pub python: String,

    /// Directory holding the telemetry scripts
    #[clap(long, env = "EXPFLOW_TELEMETRY_DIR", default_value = "telemetry", value_name = "DIR")]
    pub telemetry_dir: PathBuf,

    /// Run independent pipelines concurrently
    #[clap(long)]
    pub parallel: bool,

    /// Reject pipelines whose adjacent stage types disagree
    #[clap(long)]
    pub strict_types: bool,

    /// Give up waiting for the browser after this many seconds
    #[clap(long, value_name = "SECS")]
    pub browser_timeout: Option<u64>,

    /// Warn when the browser is held longer than this many seconds
    #[clap(long, value_name = "SECS")]
    pub hold_warning: Option<u64>,
}

impl OptionArgs {
    pub fn into_options(self, working_dir: PathBuf) -> RunOptions {
        RunOptions {
            browser: self.browser,
            chromium: self.chromium,
            python: self.python,
            telemetry_dir: self.telemetry_dir,
            working_dir,
            parallel: self.parallel,
            strict_types: self.strict_types,
            browser_timeout_secs: self.browser_timeout,
            hold_warning_secs: self.hold_warning,
        }
    }
}

/// Output format for the plan command
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

/// Load an experiment file, reporting failures as diagnostics
pub(crate) fn load_experiment(path: &Path) -> miette::Result<Experiment> {
    Ok(Experiment::from_file(path)?)
}

pub(crate) fn current_dir() -> miette::Result<PathBuf> {
    std::env::current_dir().map_err(|e| miette::miette!("Failed to get current directory: {}", e))
}
