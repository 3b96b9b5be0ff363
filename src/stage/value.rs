// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Values flowing between stages

use std::fmt;

use crate::errors::{ExpflowError, ExpflowResult};

/// A datum produced or consumed by a stage
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Text(String),
    Json(serde_json::Value),
    List(Vec<Value>),
    Pair(Box<Value>, Box<Value>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn pair(left: Value, right: Value) -> Self {
        Self::Pair(Box::new(left), Box::new(right))
    }

    /// Short shape description used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Text(_) => "text",
            Self::Json(_) => "JSON",
            Self::List(_) => "list",
            Self::Pair(..) => "pair",
        }
    }

    pub fn into_pair(self, stage: &str) -> ExpflowResult<(Value, Value)> {
        match self {
            Self::Pair(left, right) => Ok((*left, *right)),
            other => Err(unexpected(stage, "pair", &other)),
        }
    }

    pub fn into_list(self, stage: &str) -> ExpflowResult<Vec<Value>> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(unexpected(stage, "list", &other)),
        }
    }

    /// Text content; a JSON string is accepted as text too.
    pub fn into_text(self, stage: &str) -> ExpflowResult<String> {
        match self {
            Self::Text(s) => Ok(s),
            Self::Json(serde_json::Value::String(s)) => Ok(s),
            other => Err(unexpected(stage, "text", &other)),
        }
    }

    /// JSON rendering. Pairs become `{"left": .., "right": ..}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Unit => serde_json::Value::Null,
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Json(v) => v.clone(),
            Self::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Self::Pair(left, right) => serde_json::json!({
                "left": left.to_json(),
                "right": right.to_json(),
            }),
        }
    }

    /// Bytes to store when this value is written to a file.
    ///
    /// Text is written as is; everything else is serialized as JSON.
    pub fn to_file_contents(&self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.clone().into_bytes(),
            other => other.to_json().to_string().into_bytes(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

fn unexpected(stage: &str, expected: &str, found: &Value) -> ExpflowError {
    ExpflowError::UnexpectedValue {
        stage: stage.to_string(),
        expected: expected.to_string(),
        found: found.kind().to_string(),
    }
}
