// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Experiments and pipelines
//!
//! An experiment file describes a tree of artifacts. This module loads it,
//! flattens the tree into linear pipeline plans, checks it and runs the
//! resolved pipelines.

mod dag;
mod definition;
mod executor;
mod flatten;
mod validation;

pub use dag::ExperimentGraph;
pub use definition::*;
pub use executor::{
    run_chain, ChainFailure, ExperimentReport, ExperimentRunner, Pipeline, PipelineOutcome,
    PipelineStatus, PreparedExperiment,
};
pub use flatten::{flatten, plan_experiment, PipelinePlan};
pub use validation::{ExperimentValidator, ValidationResult};
