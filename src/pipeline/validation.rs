// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Experiment validation
//!
//! Validates an experiment before anything runs. Problems that would stop a
//! run are errors; suspicious but runnable shapes are warnings.

use std::collections::HashSet;

use crate::errors::ExpflowError;
use crate::pipeline::{is_internal, is_non_materializing, Experiment, ExperimentGraph, OUTPUT_STAGE_PREFIX};
use crate::stages::{is_url, StageRegistry};

/// Experiment validator
pub struct ExperimentValidator;

impl ExperimentValidator {
    /// Validate an experiment against the stages of `registry`
    pub fn validate(experiment: &Experiment, registry: &StageRegistry) -> ValidationResult {
        let mut result = ValidationResult::new();

        if experiment.inputs.is_empty() {
            result.add_error(ExpflowError::InvalidExperiment {
                reason: "experiment has no inputs".into(),
                help: Some("List at least one tree key under 'inputs'".into()),
            });
        }

        let mut seen = HashSet::new();
        for input in &experiment.inputs {
            if !seen.insert(input) {
                result.add_warning(format!("Input '{}' is listed more than once", input));
            }
            match experiment.edges(input) {
                None => result.add_error(ExpflowError::UnknownArtifact {
                    artifact: input.clone(),
                }),
                Some([]) => result.add_warning(format!("Input '{}' has no edges and produces nothing", input)),
                Some(_) => {}
            }
            if !is_url(input) {
                if let Err(e) = regex::Regex::new(input) {
                    result.add_error(ExpflowError::invalid_pattern(input, e));
                }
            }
        }

        let graph = match ExperimentGraph::build(experiment) {
            Ok(graph) => Some(graph),
            Err(e) => {
                result.add_error(e);
                None
            }
        };

        for stage in experiment.stage_names() {
            if stage.starts_with(OUTPUT_STAGE_PREFIX) || registry.contains(stage) {
                continue;
            }
            result.add_error(ExpflowError::StageNotFound {
                stage: stage.to_string(),
            });
        }

        for (artifact, edges) in &experiment.tree {
            for edge in edges {
                if is_non_materializing(&edge.output) && !is_internal(&experiment.tree, &edge.output) {
                    result.add_warning(format!(
                        "Leaf '{}' carries the join marker but is written out anyway",
                        edge.output
                    ));
                }
            }

            if let Some(graph) = &graph {
                let reachable = experiment
                    .inputs
                    .iter()
                    .any(|input| input == artifact || graph.derives(input, artifact));
                if !reachable {
                    result.add_warning(format!("Artifact '{}' is not reachable from any input", artifact));
                }
            }
        }

        result
    }
}

/// Result of experiment validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ExpflowError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ExpflowError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Fold the errors into one: a single error is returned as is
    pub fn into_result(mut self) -> Result<Vec<String>, ExpflowError> {
        match self.errors.len() {
            0 => Ok(self.warnings),
            1 => Err(self.errors.remove(0)),
            _ => Err(ExpflowError::InvalidExperiment {
                reason: self
                    .errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
                help: Some("Run 'expflow validate' for the full list".into()),
            }),
        }
    }
}
