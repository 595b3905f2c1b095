//! Batch target selection.
//!
//! Walks the project (honouring `.gitignore`) and keeps source files that
//! match an include glob, match no exclude glob, and are not tests
//! themselves.

use super::paths::is_test_file;
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::debug;

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).with_context(|| format!("Invalid glob '{}'", pattern))?;
        builder.add(glob);
    }
    builder.build().context("Failed to build glob set")
}

/// Collect project-relative source paths for a batch run, sorted.
///
/// # Errors
///
/// Returns an error if any pattern is not a valid glob.
pub fn collect_targets(
    project_dir: &Path,
    include: &[String],
    exclude: &[String],
) -> Result<Vec<PathBuf>> {
    let include = build_globset(include)?;
    let exclude = build_globset(exclude)?;

    let mut targets: Vec<PathBuf> = WalkBuilder::new(project_dir)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(project_dir)
                .ok()
                .map(Path::to_path_buf)
        })
        .filter(|rel| include.is_match(rel) && !exclude.is_match(rel) && !is_test_file(rel))
        .collect();

    targets.sort();
    debug!("Collected {} batch target(s)", targets.len());
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "export {}").unwrap();
    }

    #[test]
    fn test_collects_matching_sources_and_skips_tests() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/add.ts");
        touch(temp.path(), "src/sub/mul.ts");
        touch(temp.path(), "src/add.test.ts");
        touch(temp.path(), "src/types.d.ts");
        touch(temp.path(), "README.md");

        let targets = collect_targets(
            temp.path(),
            &["src/**/*.ts".to_string()],
            &["**/*.d.ts".to_string()],
        )
        .unwrap();

        assert_eq!(
            targets,
            vec![PathBuf::from("src/add.ts"), PathBuf::from("src/sub/mul.ts")]
        );
    }

    #[test]
    fn test_respects_gitignore() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "src/keep.ts");
        touch(temp.path(), "src/generated/skip.ts");
        fs::write(temp.path().join(".gitignore"), "src/generated/\n").unwrap();

        let targets = collect_targets(temp.path(), &["src/**/*.ts".to_string()], &[]).unwrap();
        assert_eq!(targets, vec![PathBuf::from("src/keep.ts")]);
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = collect_targets(temp.path(), &["src/[".to_string()], &[]).unwrap_err();
        assert!(err.to_string().contains("Invalid glob"));
    }
}
