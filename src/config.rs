// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Run options
//!
//! Options come from defaults, then the command line (or `EXPFLOW_*`
//! environment variables), then the `flags` section of the experiment being
//! run. They travel with the [`StageContext`](crate::stages::StageContext);
//! nothing reads them from global state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::ExpflowError;
use crate::stage::TypeCheck;

/// Options the file store is rooted at; experiments cannot change them
/// mid-run
const INVOCATION_ONLY: &[&str] = &["workingDir"];

/// Options shared by every stage of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunOptions {
    /// Browser handed to telemetry scripts
    pub browser: String,
    /// Chromium checkout providing the telemetry python modules
    pub chromium: Option<PathBuf>,
    /// Python interpreter used for telemetry scripts
    pub python: String,
    /// Directory holding the telemetry scripts
    pub telemetry_dir: PathBuf,
    /// Directory input patterns are matched in and relative paths resolve against
    pub working_dir: PathBuf,
    /// Run independent pipelines concurrently
    pub parallel: bool,
    /// Reject compositions whose adjacent types disagree
    pub strict_types: bool,
    /// Give up waiting for the browser after this many seconds
    pub browser_timeout_secs: Option<u64>,
    /// Warn when the browser is held longer than this many seconds
    pub hold_warning_secs: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            browser: "system".to_string(),
            chromium: None,
            python: "python".to_string(),
            telemetry_dir: PathBuf::from("telemetry"),
            working_dir: PathBuf::from("."),
            parallel: false,
            strict_types: false,
            browser_timeout_secs: None,
            hold_warning_secs: None,
        }
    }
}

impl RunOptions {
    pub fn type_check(&self) -> TypeCheck {
        if self.strict_types {
            TypeCheck::Strict
        } else {
            TypeCheck::Permissive
        }
    }

    pub fn browser_timeout(&self) -> Option<Duration> {
        self.browser_timeout_secs.map(Duration::from_secs)
    }

    pub fn hold_warning(&self) -> Option<Duration> {
        self.hold_warning_secs.map(Duration::from_secs)
    }

    /// Return a copy with experiment flags applied on top.
    ///
    /// Each flag that changes a value is logged. Unknown flags, and flags
    /// naming options fixed by the invocation (`workingDir`), are ignored
    /// with a warning.
    pub fn with_flags(
        &self,
        flags: &BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, ExpflowError> {
        if flags.is_empty() {
            return Ok(self.clone());
        }

        let mut merged = match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        for (key, value) in flags {
            if INVOCATION_ONLY.contains(&key.as_str()) {
                tracing::warn!(
                    "Ignoring experiment flag '{}': it can only be set on the command line",
                    key
                );
                continue;
            }
            match merged.get(key) {
                Some(current) if current != value => {
                    tracing::warn!(
                        "Overriding option {} from {} to {}",
                        key,
                        current,
                        value
                    );
                }
                Some(_) => {}
                None => {
                    tracing::warn!("Ignoring unknown experiment flag '{}'", key);
                    continue;
                }
            }
            merged.insert(key.clone(), value.clone());
        }

        serde_json::from_value(serde_json::Value::Object(merged)).map_err(|e| {
            ExpflowError::InvalidExperiment {
                reason: format!("invalid flags: {}", e),
                help: Some("Flags use the same names as run options, e.g. browser, strictTypes".into()),
            }
        })
    }

    /// Extra `PYTHONPATH` entries for telemetry scripts
    pub fn python_path_entries(&self) -> Vec<PathBuf> {
        match &self.chromium {
            Some(chromium) => {
                let tools = chromium.join("tools");
                vec![tools.join("perf"), tools.join("telemetry"), tools]
            }
            None => vec![],
        }
    }
}
