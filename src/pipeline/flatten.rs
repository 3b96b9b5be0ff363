// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Experiment tree flattening
//!
//! Turns the dependency tree of an experiment into the linear pipelines that
//! produce every requested output. Each pipeline starts at an experiment
//! input and ends at a leaf artifact. Intermediate artifacts along the way are
//! written out by a synthetic `output:NAME` stage unless their name carries
//! the non-materializing marker.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use super::definition::{is_internal, is_non_materializing, Experiment, ExperimentTree, OUTPUT_STAGE_PREFIX};
use crate::errors::ExpflowError;

/// A pipeline before stage resolution: names only
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PipelinePlan {
    /// Experiment input the pipeline starts from
    pub input: String,
    /// Stage names, including synthetic `output:` stages
    pub stages: Vec<String>,
    /// Leaf artifact the pipeline materializes
    pub output: String,
}

impl fmt::Display for PipelinePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.input)?;
        for stage in &self.stages {
            write!(f, " -> {}", stage)?;
        }
        write!(f, " => {}", self.output)
    }
}

/// Flatten the edges reachable from `input` into pipelines.
///
/// Fails with `UnknownArtifact` when `input` is not a tree key and with
/// `CircularDependency` when an artifact is reachable from itself.
/// Identical pipelines produced by duplicate edges are kept once.
pub fn flatten(tree: &ExperimentTree, input: &str) -> Result<Vec<PipelinePlan>, ExpflowError> {
    if !tree.contains_key(input) {
        return Err(ExpflowError::UnknownArtifact {
            artifact: input.to_string(),
        });
    }

    let mut plans = Vec::new();
    let mut path = vec![input.to_string()];
    append_edges(tree, input, input, &[], &mut path, &mut plans)?;

    let mut seen = HashSet::new();
    plans.retain(|plan| seen.insert(plan.clone()));

    Ok(plans)
}

/// Flatten every input of an experiment, in input order
pub fn plan_experiment(experiment: &Experiment) -> Result<Vec<PipelinePlan>, ExpflowError> {
    let mut plans = Vec::new();
    for input in &experiment.inputs {
        plans.extend(flatten(&experiment.tree, input)?);
    }
    Ok(plans)
}

fn append_edges(
    tree: &ExperimentTree,
    input: &str,
    artifact: &str,
    prefix: &[String],
    path: &mut Vec<String>,
    plans: &mut Vec<PipelinePlan>,
) -> Result<(), ExpflowError> {
    let Some(edges) = tree.get(artifact) else {
        return Ok(());
    };

    for edge in edges {
        let mut stages: Vec<String> = prefix.iter().chain(&edge.stages).cloned().collect();

        if !is_internal(tree, &edge.output) {
            plans.push(PipelinePlan {
                input: input.to_string(),
                stages,
                output: edge.output.clone(),
            });
            continue;
        }

        if path.contains(&edge.output) {
            let mut artifacts = path.clone();
            artifacts.push(edge.output.clone());
            return Err(ExpflowError::CircularDependency { artifacts });
        }

        if !is_non_materializing(&edge.output) {
            stages.push(format!("{}{}", OUTPUT_STAGE_PREFIX, edge.output));
        }

        path.push(edge.output.clone());
        append_edges(tree, input, &edge.output, &stages, path, plans)?;
        path.pop();
    }

    Ok(())
}
