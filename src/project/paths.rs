//! Test path strategy.
//!
//! Maps a source path to the path its generated test is written to.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where generated tests are placed relative to their source files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStrategy {
    /// Next to the source file: `src/add.ts` -> `src/add.test.ts`.
    #[default]
    Colocated,
    /// Mirrored under a test root: `src/add.ts` -> `__tests__/src/add.test.ts`.
    Directory,
}

impl OutputStrategy {
    /// Compute the test path for `source`.
    ///
    /// Python sources follow the `test_<name>.py` convention and ignore
    /// `suffix`; everything else gets `<stem><suffix>.<ext>`.
    #[must_use]
    pub fn test_path_for(&self, source: &Path, directory: &Path, suffix: &str) -> PathBuf {
        let file_name = test_file_name(source, suffix);
        let parent = source.parent().unwrap_or_else(|| Path::new(""));

        match self {
            Self::Colocated => parent.join(file_name),
            Self::Directory => directory.join(parent).join(file_name),
        }
    }
}

fn test_file_name(source: &Path, suffix: &str) -> String {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = source.extension().map(|e| e.to_string_lossy().into_owned());

    match extension.as_deref() {
        Some("py") => format!("test_{stem}.py"),
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    }
}

/// Whether a path looks like a test file rather than a source file.
#[must_use]
pub fn is_test_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    name.contains(".test.")
        || name.contains(".spec.")
        || (name.starts_with("test_") && name.ends_with(".py"))
        || name.ends_with("_test.py")
        || path
            .components()
            .any(|c| c.as_os_str() == "__tests__" || c.as_os_str() == "__snapshots__")
}
