// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Plan resolution
//!
//! Turns a [`PipelinePlan`] of stage names into a runnable [`Pipeline`].
//! Every pipeline carries a list of `(data, source name)` pairs: inputs are
//! listed and read, each named stage transforms the data half, and the
//! source name is finally rewritten into the output name for writing.

use super::io::{file_inputs, file_to_json, is_url, output_name, to_file};
use super::{StageContext, StageRegistry};
use crate::errors::ExpflowResult;
use crate::pipeline::{Pipeline, PipelinePlan, OUTPUT_STAGE_PREFIX};
use crate::stage::{compose_checked, just_left, left, map, right, tee, StageRef, TypeCheck};

/// Resolves stage names against a registry for one run
pub struct StageResolver<'a> {
    registry: &'a StageRegistry,
    ctx: &'a StageContext,
}

impl<'a> StageResolver<'a> {
    pub fn new(registry: &'a StageRegistry, ctx: &'a StageContext) -> Self {
        Self { registry, ctx }
    }

    fn type_check(&self) -> TypeCheck {
        self.ctx.options.type_check()
    }

    /// Build the full pipeline for a plan.
    ///
    /// Fails with a configuration error for unknown stage names, bad input
    /// patterns and, under strict typing, incompatible neighbours.
    pub fn resolve(&self, plan: &PipelinePlan) -> ExpflowResult<Pipeline> {
        let mut stages = vec![file_inputs(self.ctx, &plan.input)?, map(tee())];
        if !is_url(&plan.input) {
            stages.push(map(left(file_to_json(self.ctx))));
        }
        for name in &plan.stages {
            stages.push(self.stage_for(name, &plan.input)?);
        }
        stages.push(map(right(output_name(&plan.input, &plan.output)?)));
        stages.push(map(to_file(self.ctx)));

        // Checked as one chain; run stage by stage so failures name the stage
        compose_checked(stages.clone(), self.type_check())?;

        Ok(Pipeline {
            input: plan.input.clone(),
            output: plan.output.clone(),
            stages,
        })
    }

    /// Resolve one stage name as it appears inside a plan
    pub fn stage_for(&self, name: &str, input_spec: &str) -> ExpflowResult<StageRef> {
        if let Some(artifact) = name.strip_prefix(OUTPUT_STAGE_PREFIX) {
            return self.write_through(input_spec, artifact);
        }
        let stage = self.registry.get(name, self.ctx)?;
        Ok(map(left(stage)))
    }

    /// Write an intermediate artifact without disturbing the data flow
    fn write_through(&self, input_spec: &str, artifact: &str) -> ExpflowResult<StageRef> {
        compose_checked(
            vec![
                tee(),
                right(map(right(output_name(input_spec, artifact)?))),
                right(map(to_file(self.ctx))),
                just_left(),
            ],
            self.type_check(),
        )
    }
}
