// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Stage combinators
//!
//! Each combinator allocates its own type variables, so a variable never
//! appears in the contract of an unrelated stage.

use async_trait::async_trait;
use futures::future::try_join_all;
use std::sync::Arc;

use super::{Stage, StageRef, Value};
use crate::errors::{ExpflowError, ExpflowResult};
use crate::pipeline::run_chain;
use crate::types::TypeExpr;

/// How strictly `compose_checked` compares adjacent stage types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeCheck {
    /// Accept any adjacent types
    #[default]
    Permissive,
    /// Reject adjacent stages whose types are structurally incompatible
    Strict,
}

/// Lift `T -> U` to `[T] -> [U]`
pub fn map(stage: StageRef) -> StageRef {
    Arc::new(Map {
        name: format!("map({})", stage.name()),
        input_type: TypeExpr::list(stage.input_type().clone()),
        output_type: TypeExpr::list(stage.output_type().clone()),
        inner: stage,
    })
}

/// `T -> (T, T)`
pub fn tee() -> StageRef {
    let t = TypeExpr::fresh_var();
    Arc::new(Tee {
        input_type: t.clone(),
        output_type: TypeExpr::tuple(t.clone(), t),
    })
}

/// Apply `stage` to the left half of a pair, `(A, C) -> (B, C)`
pub fn left(stage: StageRef) -> StageRef {
    let c = TypeExpr::fresh_var();
    Arc::new(Side {
        name: format!("left({})", stage.name()),
        input_type: TypeExpr::tuple(stage.input_type().clone(), c.clone()),
        output_type: TypeExpr::tuple(stage.output_type().clone(), c),
        inner: stage,
        side: PairSide::Left,
    })
}

/// Apply `stage` to the right half of a pair, `(C, A) -> (C, B)`
pub fn right(stage: StageRef) -> StageRef {
    let c = TypeExpr::fresh_var();
    Arc::new(Side {
        name: format!("right({})", stage.name()),
        input_type: TypeExpr::tuple(c.clone(), stage.input_type().clone()),
        output_type: TypeExpr::tuple(c, stage.output_type().clone()),
        inner: stage,
        side: PairSide::Right,
    })
}

/// `(A, B) -> A`
pub fn just_left() -> StageRef {
    let a = TypeExpr::fresh_var();
    let b = TypeExpr::fresh_var();
    Arc::new(JustLeft {
        input_type: TypeExpr::tuple(a.clone(), b),
        output_type: a,
    })
}

/// Run `stages` in sequence as a single stage.
///
/// An empty list is the identity.
pub fn compose(stages: Vec<StageRef>) -> StageRef {
    let (input_type, output_type) = match (stages.first(), stages.last()) {
        (Some(first), Some(last)) => (first.input_type().clone(), last.output_type().clone()),
        _ => {
            let t = TypeExpr::fresh_var();
            (t.clone(), t)
        }
    };
    let name = format!(
        "compose({})",
        stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
    );

    Arc::new(Compose {
        name,
        input_type,
        output_type,
        stages,
    })
}

/// `compose` with an optional check of adjacent stage types
pub fn compose_checked(stages: Vec<StageRef>, check: TypeCheck) -> ExpflowResult<StageRef> {
    if check == TypeCheck::Strict {
        for pair in stages.windows(2) {
            let (producer, consumer) = (&pair[0], &pair[1]);
            if !producer.output_type().is_compatible_with(consumer.input_type()) {
                return Err(ExpflowError::TypeMismatch {
                    producer: producer.name().to_string(),
                    consumer: consumer.name().to_string(),
                    expected: consumer.input_type().to_string(),
                    found: producer.output_type().to_string(),
                });
            }
        }
    }

    Ok(compose(stages))
}

struct Map {
    name: String,
    input_type: TypeExpr,
    output_type: TypeExpr,
    inner: StageRef,
}

#[async_trait]
impl Stage for Map {
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
        let items = input.into_list(&self.name)?;
        // try_join_all keeps results in input order whatever order they finish in
        let outputs = try_join_all(items.into_iter().map(|item| self.inner.run(item))).await?;
        Ok(Value::List(outputs))
    }
}

struct Tee {
    input_type: TypeExpr,
    output_type: TypeExpr,
}

#[async_trait]
impl Stage for Tee {
    fn name(&self) -> &str {
        "tee"
    }

    fn input_type(&self) -> &TypeExpr {
        &self.input_type
    }

    fn output_type(&self) -> &TypeExpr {
        &self.output_type
    }

    async fn run(&self, input: Value) -> ExpflowResult<Value> {
        Ok(Value::pair(input.clone(), input))
    }
}

#[derive(Clone, Copy)]
enum PairSide {
    Left,
    Right,
}

struct Side {
    name: String,
    input_type: TypeExpr,
    output_type: TypeExpr,
    inner: StageRef,
    side: PairSide,
}

#[async_trait]
impl Stage for Side {
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
        let (l, r) = input.into_pair(&self.name)?;
        match self.side {
            PairSide::Left => Ok(Value::pair(self.inner.run(l).await?, r)),
            PairSide::Right => Ok(Value::pair(l, self.inner.run(r).await?)),
        }
    }
}

struct JustLeft {
    input_type: TypeExpr,
    output_type: TypeExpr,
}

#[async_trait]
impl Stage for JustLeft {
    fn name(&self) -> &str {
        "justLeft"
    }

    fn input_type(&self) -> &TypeExpr {
        &self.input_type
    }

    fn output_type(&self) -> &TypeExpr {
        &self.output_type
    }

    async fn run(&self, input: Value) -> ExpflowResult<Value> {
        let (l, _) = input.into_pair("justLeft")?;
        Ok(l)
    }
}

struct Compose {
    name: String,
    input_type: TypeExpr,
    output_type: TypeExpr,
    stages: Vec<StageRef>,
}

#[async_trait]
impl Stage for Compose {
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
        run_chain(input, &self.stages).await.map_err(|failure| failure.error)
    }
}
