// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 expflow contributors

//! Local filesystem store

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::FileStore;
use crate::errors::{ExpflowError, ExpflowResult};

/// File store rooted at a working directory
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` against the root; absolute paths are kept
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &Path) -> ExpflowResult<Vec<u8>> {
        let full = self.resolve(path);
        tokio::fs::read(&full)
            .await
            .map_err(|e| ExpflowError::FileReadError {
                path: full,
                error: e.to_string(),
            })
    }

    async fn write(&self, path: &Path, contents: &[u8]) -> ExpflowResult<()> {
        let full = self.resolve(path);
        if let Some(parent) = full.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ExpflowError::FileWriteError {
                        path: full.clone(),
                        error: e.to_string(),
                    })?;
            }
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|e| ExpflowError::FileWriteError {
                path: full.clone(),
                error: e.to_string(),
            })?;
        tracing::debug!(path = %full.display(), bytes = contents.len(), "wrote file");
        Ok(())
    }

    async fn list(&self, dir: &Path) -> ExpflowResult<Vec<String>> {
        let full = self.resolve(dir);
        let read_err = |e: std::io::Error| ExpflowError::FileReadError {
            path: full.clone(),
            error: e.to_string(),
        };

        let mut entries = tokio::fs::read_dir(&full).await.map_err(read_err)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_err)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}
