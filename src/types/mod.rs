// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Type tags for stage contracts
//!
//! Stages advertise what they consume and produce with a [`TypeExpr`]. The
//! tags document pipelines and drive the optional strict composition check;
//! no inference or unification happens at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TYPE_VAR: AtomicU64 = AtomicU64::new(0);

/// A stage input or output type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of", rename_all = "lowercase")]
pub enum TypeExpr {
    /// Named atomic type (`string`, `JSON`, ...)
    Atom(String),
    /// Type variable, unique per allocation
    Var(u64),
    /// Homogeneous list
    List(Box<TypeExpr>),
    /// Two-element tuple, the shape of a pair
    Tuple(Box<TypeExpr>, Box<TypeExpr>),
}

impl TypeExpr {
    pub fn atom(name: impl Into<String>) -> Self {
        Self::Atom(name.into())
    }

    pub fn unit() -> Self {
        Self::atom("unit")
    }

    pub fn string() -> Self {
        Self::atom("string")
    }

    pub fn json() -> Self {
        Self::atom("JSON")
    }

    pub fn list(inner: TypeExpr) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn tuple(left: TypeExpr, right: TypeExpr) -> Self {
        Self::Tuple(Box::new(left), Box::new(right))
    }

    /// Allocate a type variable distinct from every variable handed out before.
    pub fn fresh_var() -> Self {
        Self::Var(NEXT_TYPE_VAR.fetch_add(1, Ordering::Relaxed))
    }

    pub fn is_var(&self) -> bool {
        matches!(self, Self::Var(_))
    }

    /// Structural equality where a variable on either side matches anything.
    ///
    /// Variables are not bound, so `(a, a)` is compatible with `(string, JSON)`.
    pub fn is_compatible_with(&self, other: &TypeExpr) -> bool {
        match (self, other) {
            (Self::Var(_), _) | (_, Self::Var(_)) => true,
            (Self::Atom(a), Self::Atom(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.is_compatible_with(b),
            (Self::Tuple(a1, a2), Self::Tuple(b1, b2)) => {
                a1.is_compatible_with(b1) && a2.is_compatible_with(b2)
            }
            _ => false,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom(name) => write!(f, "{}", name),
            Self::Var(id) => write!(f, "'t{}", id),
            Self::List(inner) => write!(f, "[{}]", inner),
            Self::Tuple(left, right) => write!(f, "({},{})", left, right),
        }
    }
}
