// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Stage registry and built-in stages
//!
//! Experiments refer to stages by name. The [`StageRegistry`] maps each name
//! to a constructor that builds a fresh stage from the [`StageContext`] of
//! the run, so stages pick up the run's options and collaborators without
//! reaching for global state.

mod io;
mod resolver;
mod telemetry;

pub use io::{
    console_output, file_inputs, file_output, file_reader, file_to_json, file_to_string,
    json_reader, output_name, tagged_console_output, to_file,
};
pub(crate) use io::is_url;
pub use resolver::StageResolver;
pub use telemetry::{fetch, fetch_with_inline_style, read_and_gunzip_twice, telemetry_task, trace_url};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::arbiter::ResourceArbiter;
use crate::config::RunOptions;
use crate::errors::{ExpflowError, ExpflowResult};
use crate::executors::{FileStore, LocalFileStore, ProcessTaskRunner, TaskRunner};
use crate::stage::StageRef;

/// Name of the resource telemetry stages serialize on
pub const BROWSER_RESOURCE: &str = "browser";

/// Everything a stage may need from the surrounding run
#[derive(Clone)]
pub struct StageContext {
    pub options: Arc<RunOptions>,
    pub tasks: Arc<dyn TaskRunner>,
    pub files: Arc<dyn FileStore>,
    /// Shared by every stage that drives the browser
    pub browser: Arc<ResourceArbiter>,
}

impl StageContext {
    /// Context backed by real processes and the local filesystem
    pub fn new(options: RunOptions) -> Self {
        let files = Arc::new(LocalFileStore::new(options.working_dir.clone()));
        Self::with_collaborators(options, Arc::new(ProcessTaskRunner::new()), files)
    }

    pub fn with_collaborators(
        options: RunOptions,
        tasks: Arc<dyn TaskRunner>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        let browser = ResourceArbiter::with_hold_warning(BROWSER_RESOURCE, options.hold_warning());
        Self {
            options: Arc::new(options),
            tasks,
            files,
            browser,
        }
    }

    /// Same collaborators and arbiter, different options
    pub fn with_options(&self, options: RunOptions) -> Self {
        Self {
            options: Arc::new(options),
            ..self.clone()
        }
    }
}

type Constructor = Arc<dyn Fn(&StageContext) -> StageRef + Send + Sync>;

struct Registration {
    summary: String,
    constructor: Constructor,
}

/// Name -> stage constructor
#[derive(Default)]
pub struct StageRegistry {
    stages: BTreeMap<String, Registration>,
}

impl StageRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in stage
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("fileToJSON", "read a file and parse it as JSON", file_to_json);
        registry.register("fileToString", "read a file as text", file_to_string);
        registry.register("consoleOutput", "print the value and pass it through", |_| console_output());
        registry.register(
            "taggedConsoleOutput",
            "print a (value, tag) pair under its tag",
            |_| tagged_console_output(),
        );
        registry.register("toFile", "write the left value to the path on the right", to_file);
        registry.register(
            "readAndGunzipTwice",
            "decompress a doubly gzipped file",
            read_and_gunzip_twice,
        );
        registry.register("fetch", "save a page through the browser", fetch);
        registry.register(
            "fetchWithInlineStyle",
            "save a page with styles inlined through the browser",
            fetch_with_inline_style,
        );
        registry.register("traceURL", "record a performance trace of a page", trace_url);
        registry
    }

    /// Register a constructor, replacing any previous one with the same name
    pub fn register<F>(&mut self, name: impl Into<String>, summary: impl Into<String>, constructor: F)
    where
        F: Fn(&StageContext) -> StageRef + Send + Sync + 'static,
    {
        let name = name.into();
        if self.stages.contains_key(&name) {
            tracing::debug!("Replacing stage '{}'", name);
        }
        self.stages.insert(
            name,
            Registration {
                summary: summary.into(),
                constructor: Arc::new(constructor),
            },
        );
    }

    /// Build the stage registered under `name`
    pub fn get(&self, name: &str, ctx: &StageContext) -> ExpflowResult<StageRef> {
        self.stages
            .get(name)
            .map(|registration| (registration.constructor)(ctx))
            .ok_or_else(|| ExpflowError::StageNotFound {
                stage: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stages.keys().map(String::as_str)
    }

    pub fn summary(&self, name: &str) -> Option<&str> {
        self.stages.get(name).map(|r| r.summary.as_str())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators for stage tests

    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use super::*;
    use crate::executors::{TaskOutput, TaskSpec};

    #[derive(Default)]
    pub struct MemoryFiles {
        pub files: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
    }

    impl MemoryFiles {
        pub fn with(entries: &[(&str, &str)]) -> Arc<Self> {
            let store = Self::default();
            {
                let mut files = store.files.lock().unwrap();
                for (path, contents) in entries {
                    files.insert(PathBuf::from(path), contents.as_bytes().to_vec());
                }
            }
            Arc::new(store)
        }

        pub fn contents(&self, path: &str) -> Option<String> {
            self.files
                .lock()
                .unwrap()
                .get(Path::new(path))
                .map(|b| String::from_utf8_lossy(b).into_owned())
        }
    }

    #[async_trait]
    impl FileStore for MemoryFiles {
        async fn read(&self, path: &Path) -> ExpflowResult<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| ExpflowError::FileReadError {
                    path: path.to_path_buf(),
                    error: "not found".into(),
                })
        }

        async fn write(&self, path: &Path, contents: &[u8]) -> ExpflowResult<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), contents.to_vec());
            Ok(())
        }

        async fn list(&self, _dir: &Path) -> ExpflowResult<Vec<String>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .keys()
                .map(|p| p.to_string_lossy().into_owned())
                .collect())
        }
    }

    /// Records every task and answers with canned stdout
    #[derive(Default)]
    pub struct RecordingTasks {
        pub tasks: Mutex<Vec<TaskSpec>>,
        pub stdout: Mutex<Vec<u8>>,
        pub missing: Mutex<Vec<String>>,
    }

    impl RecordingTasks {
        pub fn answering(stdout: &str) -> Arc<Self> {
            let runner = Self::default();
            *runner.stdout.lock().unwrap() = stdout.as_bytes().to_vec();
            Arc::new(runner)
        }

        /// Report `program` as not installed
        pub fn without(self: Arc<Self>, program: &str) -> Arc<Self> {
            self.missing.lock().unwrap().push(program.to_string());
            self
        }
    }

    #[async_trait]
    impl TaskRunner for RecordingTasks {
        async fn run(&self, task: TaskSpec) -> ExpflowResult<TaskOutput> {
            self.tasks.lock().unwrap().push(task);
            Ok(TaskOutput {
                stdout: self.stdout.lock().unwrap().clone(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn check_available(&self, program: &str) -> ExpflowResult<bool> {
            Ok(!self.missing.lock().unwrap().iter().any(|p| p == program))
        }
    }

    pub fn context(files: Arc<MemoryFiles>, tasks: Arc<RecordingTasks>) -> StageContext {
        StageContext::with_collaborators(RunOptions::default(), tasks, files)
    }
}
