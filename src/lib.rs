// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! # expflow - experiment pipeline runner
//!
//! `expflow` runs experiments described as a tree of artifacts. Each edge of
//! the tree is a chain of named stages; the tree is flattened into linear
//! pipelines that are resolved against a stage registry and executed
//! asynchronously.
//!
//! ## Features
//!
//! - **Stage combinators** - `map`, `tee`, `left`, `right`, `just_left` and
//!   `compose` with advisory type tags and an optional strict check
//! - **Tree flattening** - one pipeline per requested output, with
//!   intermediate artifacts written along the way
//! - **Browser arbitration** - telemetry stages take turns on the single
//!   browser in request order
//! - **Failure isolation** - a failing pipeline is reported, its siblings run
//!
//! ## Quick Start
//!
//! ```bash
//! # Show the pipelines an experiment expands to
//! expflow plan experiment.yaml
//!
//! # Run them
//! expflow run experiment.yaml --browser android-chromium
//! ```

pub mod arbiter;
pub mod cli;
pub mod config;
pub mod errors;
pub mod executors;
pub mod pipeline;
pub mod stage;
pub mod stages;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use arbiter::{ResourceArbiter, ResourceGuard};
pub use config::RunOptions;
pub use errors::{ExpflowError, ExpflowResult};
pub use pipeline::{Experiment, ExperimentReport, ExperimentRunner, PipelinePlan};
pub use stage::{Stage, StageRef, Value};
pub use stages::{StageContext, StageRegistry};
pub use types::TypeExpr;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
