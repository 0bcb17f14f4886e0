//! Read-only views of a materialized source tree version.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;

/// One version of the source tree (old or new).
pub trait SourceTree {
    /// True if `file` (repository-relative) exists in this version.
    fn exists(&self, file: &str) -> bool {
        self.resolve(file).exists()
    }

    /// Absolute path of `file` inside this version.
    fn resolve(&self, file: &str) -> PathBuf;
}

/// A tree rooted at an existing directory (e.g. the working copy).
#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceTree for DirTree {
    fn resolve(&self, file: &str) -> PathBuf {
        self.root.join(file)
    }
}

/// An ephemeral tree; the directory is removed when this value is dropped.
#[derive(Debug)]
pub struct TempTree {
    dir: TempDir,
}

impl TempTree {
    pub fn new(label: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("gate-{label}-"))
            .tempdir()
            .with_context(|| format!("create {label} source tree"))?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

impl SourceTree for TempTree {
    fn resolve(&self, file: &str) -> PathBuf {
        self.dir.path().join(file)
    }
}

/// A tree with no files, standing in for a missing previous version.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyTree;

impl SourceTree for EmptyTree {
    fn exists(&self, _file: &str) -> bool {
        false
    }

    fn resolve(&self, file: &str) -> PathBuf {
        PathBuf::from(file)
    }
}
