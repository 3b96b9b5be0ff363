// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Stages and the combinators that build them
//!
//! A [`Stage`] is a named asynchronous unit with one input and one output,
//! labelled with advisory [`TypeExpr`] tags. Larger stages are assembled from
//! smaller ones with the combinators in [`combinators`]: `map`, `tee`,
//! `left`, `right`, `just_left` and `compose`.

pub mod combinators;
mod value;

pub use combinators::{compose, compose_checked, just_left, left, map, right, tee, TypeCheck};
pub use value::Value;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use crate::errors::ExpflowResult;
use crate::types::TypeExpr;

/// Shared handle to an immutable stage
pub type StageRef = Arc<dyn Stage>;

/// A named, typed asynchronous unit of computation
///
/// `run` resolves exactly once, either with the produced value or with the
/// error that stopped it. Implementations must not mutate shared state that
/// another concurrent `run` of the same stage could observe.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Human-readable stage name
    fn name(&self) -> &str;

    /// Type of the value this stage consumes
    fn input_type(&self) -> &TypeExpr;

    /// Type of the value this stage produces
    fn output_type(&self) -> &TypeExpr;

    /// Process one input
    async fn run(&self, input: Value) -> ExpflowResult<Value>;
}

type StageFn = Arc<dyn Fn(Value) -> BoxFuture<'static, ExpflowResult<Value>> + Send + Sync>;

/// Stage backed by an async closure
pub struct FnStage {
    name: String,
    input_type: TypeExpr,
    output_type: TypeExpr,
    run: StageFn,
}

#[async_trait]
impl Stage for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_type(&self) -> &TypeExpr {
        &self.input_type
    }

    fn output_type(&self) -> &TypeExpr {
        &self.output_type
    }

    async fn run(&self, input: Value) -> ExpflowResult<Value> {
        (self.run)(input).await
    }
}

/// Lift an async closure into a stage
pub fn fn_stage<F, Fut>(
    name: impl Into<String>,
    input_type: TypeExpr,
    output_type: TypeExpr,
    f: F,
) -> StageRef
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExpflowResult<Value>> + Send + 'static,
{
    Arc::new(FnStage {
        name: name.into(),
        input_type,
        output_type,
        run: Arc::new(move |input| Box::pin(f(input))),
    })
}

/// One-line description, e.g. `left(fileToJSON) : ('t3 -> 't4)`
pub fn describe(stage: &dyn Stage) -> String {
    format!(
        "{} : {} -> {}",
        stage.name(),
        stage.input_type(),
        stage.output_type()
    )
}
