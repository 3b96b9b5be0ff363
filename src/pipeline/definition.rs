// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Experiment definition structures
//!
//! Defines the schema for experiment description files (YAML, JSON or TOML).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::errors::ExpflowError;

/// Suffix marking an artifact as a virtual join point that is never written out
pub const NON_MATERIALIZING_MARKER: char = '*';

/// Prefix of the synthetic stage that writes an intermediate artifact
pub const OUTPUT_STAGE_PREFIX: &str = "output:";

/// Artifact name -> outgoing edges
pub type ExperimentTree = BTreeMap<String, Vec<Edge>>;

/// Experiment description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Experiment name
    #[serde(default = "default_name")]
    pub name: String,

    /// Experiment description
    #[serde(default)]
    pub description: Option<String>,

    /// Starting artifacts, in execution order
    pub inputs: Vec<String>,

    /// Option overrides applied for the duration of this experiment
    #[serde(default)]
    pub flags: BTreeMap<String, serde_json::Value>,

    /// Dependency tree of artifacts
    pub tree: ExperimentTree,
}

fn default_name() -> String {
    "experiment".to_string()
}

impl Experiment {
    /// Load an experiment, choosing the parser from the file extension
    pub fn from_file(path: &Path) -> Result<Self, ExpflowError> {
        if !path.exists() {
            return Err(ExpflowError::ExperimentNotFound {
                path: path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(path).map_err(|e| ExpflowError::FileReadError {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse experiment from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ExpflowError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Parse experiment from JSON string
    pub fn from_json(json: &str) -> Result<Self, ExpflowError> {
        serde_json::from_str(json).map_err(Into::into)
    }

    /// Parse experiment from TOML string
    pub fn from_toml(source: &str) -> Result<Self, ExpflowError> {
        toml::from_str(source).map_err(Into::into)
    }

    /// Serialize experiment to YAML
    pub fn to_yaml(&self) -> Result<String, ExpflowError> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Edges leaving `artifact`, if it is a tree key
    pub fn edges(&self, artifact: &str) -> Option<&[Edge]> {
        self.tree.get(artifact).map(Vec::as_slice)
    }

    /// All stage names referenced by any edge, sorted and unique
    pub fn stage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tree
            .values()
            .flatten()
            .flat_map(|edge| edge.stages.iter().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

/// One step of the tree: a chain of stages producing an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Stage names applied in order
    #[serde(default)]
    pub stages: Vec<String>,

    /// Artifact produced
    pub output: String,
}

impl Edge {
    pub fn new<S: Into<String>>(stages: impl IntoIterator<Item = S>, output: impl Into<String>) -> Self {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
            output: output.into(),
        }
    }
}

/// Whether an artifact is a virtual join point
pub fn is_non_materializing(artifact: &str) -> bool {
    artifact.ends_with(NON_MATERIALIZING_MARKER)
}

/// Whether `artifact` is an internal node of `tree`.
///
/// A key with an empty edge list counts as an explicitly terminal artifact.
pub fn is_internal(tree: &ExperimentTree, artifact: &str) -> bool {
    tree.get(artifact).is_some_and(|edges| !edges.is_empty())
}
