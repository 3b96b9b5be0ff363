// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Graph command - visualize the artifact graph

use miette::Result;
use std::path::PathBuf;

use super::{load_experiment, GraphFormat};
use crate::pipeline::ExperimentGraph;

/// Run the graph command
pub async fn run(experiment_path: PathBuf, format: GraphFormat, _verbose: bool) -> Result<()> {
    let experiment = load_experiment(&experiment_path)?;
    let graph = ExperimentGraph::build(&experiment)?;

    let output = match format {
        GraphFormat::Text => graph.to_text()?,
        GraphFormat::Dot => graph.to_dot(),
        GraphFormat::Mermaid => graph.to_mermaid(),
    };

    println!("{}", output);

    Ok(())
}
