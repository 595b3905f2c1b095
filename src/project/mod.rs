//! Project file access.
//!
//! - [`FileStore`] - async read/write of project-relative files
//! - [`paths`] - where a source file's test belongs
//! - [`targets`] - glob-driven selection of source files for batch runs

pub mod paths;
pub mod targets;

pub use paths::OutputStrategy;
pub use targets::collect_targets;

use crate::error::KintsugiError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Abstraction for project file access.
///
/// Paths are relative to the project root. Failures surface as errors, never
/// as sentinel values.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a file as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist or can't be read.
    async fn read_file(&self, path: &Path) -> Result<String>;

    /// Write a file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be written.
    async fn write_file(&self, path: &Path, content: &str) -> Result<()>;

    /// Check whether a file exists.
    async fn exists(&self, path: &Path) -> bool;
}

/// [`FileStore`] backed by the real filesystem, rooted at a project directory.
#[derive(Debug, Clone)]
pub struct ProjectFileStore {
    root: PathBuf,
}

impl ProjectFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path, refusing anything that escapes the root.
    ///
    /// Refusals are [`KintsugiError::Config`] errors: retrying the same path
    /// cannot succeed.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).map_err(|_| {
                KintsugiError::config_with_path(
                    format!("{} is outside the project", path.display()),
                    path.to_path_buf(),
                )
            })?
        } else {
            path
        };

        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(KintsugiError::config_with_path(
                format!("{} escapes the project root", path.display()),
                path.to_path_buf(),
            )
            .into());
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for ProjectFileStore {
    async fn read_file(&self, path: &Path) -> Result<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn write_file(&self, path: &Path, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, content)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))
    }

    async fn exists(&self, path: &Path) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::try_exists(full).await.unwrap_or(false),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let temp = TempDir::new().unwrap();
        let store = ProjectFileStore::new(temp.path());

        store
            .write_file(Path::new("src/deep/add.test.ts"), "test('x', () => {})")
            .await
            .unwrap();

        let content = store.read_file(Path::new("src/deep/add.test.ts")).await.unwrap();
        assert_eq!(content, "test('x', () => {})");
        assert!(store.exists(Path::new("src/deep/add.test.ts")).await);
    }

    #[tokio::test]
    async fn test_read_missing_file_errors() {
        let temp = TempDir::new().unwrap();
        let store = ProjectFileStore::new(temp.path());
        let err = store.read_file(Path::new("nope.ts")).await.unwrap_err();
        assert!(err.to_string().contains("nope.ts"));
        assert!(!store.exists(Path::new("nope.ts")).await);
    }

    #[test]
    fn test_resolve_rejects_parent_traversal() {
        let store = ProjectFileStore::new("/project");
        assert!(store.resolve(Path::new("../etc/passwd")).is_err());
        assert!(store.resolve(Path::new("src/../../x")).is_err());

        let err = store.resolve(Path::new("../etc/passwd")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<KintsugiError>(),
            Some(KintsugiError::Config { .. })
        ));
    }

    #[test]
    fn test_resolve_accepts_absolute_paths_inside_root() {
        let store = ProjectFileStore::new("/project");
        let resolved = store.resolve(Path::new("/project/src/a.ts")).unwrap();
        assert_eq!(resolved, PathBuf::from("/project/src/a.ts"));
        assert!(store.resolve(Path::new("/elsewhere/a.ts")).is_err());
    }
}
