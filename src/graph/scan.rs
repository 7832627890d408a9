//! Project walk.
//!
//! Collects the files an index run extracts, with the reason for every path it
//! leaves out. Output is sorted so runs over the same tree see the same order.

use anyhow::Result;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::filter::FileFilter;
use crate::config::IndexConfig;
use crate::diagnostics::{FileDiagnostic, SkipReason};
use crate::ingest::{detect_language, Language};

/// A file selected for extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    /// Relative to the root, `/`-separated
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub language: Language,
}

#[derive(Debug, Clone, Default)]
pub struct WalkResult {
    /// Sorted by relative path
    pub files: Vec<WalkedFile>,
    pub skipped: Vec<FileDiagnostic>,
    /// Every directory holding a selected file, ancestors included, without the root.
    pub directories: BTreeSet<String>,
}

impl WalkResult {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.rel_path.as_str())
    }
}

/// Walk `config.root` and select supported files.
///
/// Ignored and hidden directories are pruned without descending. Symlinks are
/// not followed.
pub fn collect_files(config: &IndexConfig) -> Result<WalkResult> {
    let filter = FileFilter::from_config(config)?;
    let mut result = WalkResult::default();

    let mut walker = walkdir::WalkDir::new(&config.root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "walk error");
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }
        let path = entry.path();
        let rel_path = filter.relative_path(path);

        if entry.file_type().is_dir() {
            if let Some(reason) = filter.skip_dir(path) {
                result.skipped.push(FileDiagnostic::skipped(rel_path, reason));
                walker.skip_current_dir();
            }
            continue;
        }

        if let Some(reason) = filter.should_skip(path) {
            // Unsupported files are the common case; keep them out of the log.
            if reason != SkipReason::UnsupportedLanguage {
                tracing::debug!(file = %rel_path, reason = %reason, "skipping");
            }
            result.skipped.push(FileDiagnostic::skipped(rel_path, reason));
            continue;
        }

        let Some(language) = detect_language(path) else {
            continue;
        };

        let mut parent = rel_path.as_str();
        while let Some((dir, _)) = parent.rsplit_once('/') {
            result.directories.insert(dir.to_string());
            parent = dir;
        }
        result.files.push(WalkedFile {
            rel_path,
            abs_path: path.to_path_buf(),
            language,
        });
    }

    result.files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    result.skipped.sort();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_sorted_with_directories() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src/models")).unwrap();
        fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        fs::write(root.join("src/models/user.py"), "class User: pass").unwrap();
        fs::write(root.join("src/app.ts"), "export const x = 1;").unwrap();
        fs::write(root.join("main.py"), "print(1)").unwrap();
        fs::write(root.join("README.md"), "# readme").unwrap();
        fs::write(root.join("node_modules/lib/index.js"), "module.exports = 1").unwrap();

        let result = collect_files(&IndexConfig::new(root)).unwrap();
        let paths: Vec<&str> = result.paths().collect();
        assert_eq!(paths, vec!["main.py", "src/app.ts", "src/models/user.py"]);
        assert_eq!(result.files[1].language, Language::TypeScript);

        let dirs: Vec<&str> = result.directories.iter().map(String::as_str).collect();
        assert_eq!(dirs, vec!["src", "src/models"]);

        assert!(result
            .skipped
            .contains(&FileDiagnostic::skipped("node_modules", SkipReason::IgnoredDirectory)));
        assert!(result
            .skipped
            .contains(&FileDiagnostic::skipped("README.md", SkipReason::UnsupportedLanguage)));
    }

    #[test]
    fn test_store_directory_is_not_walked() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join(".cartograph")).unwrap();
        fs::write(root.join(".cartograph/graph.db"), "x").unwrap();
        fs::write(root.join("a.py"), "x = 1").unwrap();

        let result = collect_files(&IndexConfig::new(root)).unwrap();
        assert_eq!(result.files.len(), 1);
        assert!(result.directories.is_empty());
    }

    #[test]
    fn test_exclude_glob_applies() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("tests")).unwrap();
        fs::write(root.join("tests/test_a.py"), "x = 1").unwrap();
        fs::write(root.join("a.py"), "x = 1").unwrap();

        let mut config = IndexConfig::new(root);
        config.exclude = vec!["tests/**".to_string()];
        let result = collect_files(&config).unwrap();
        assert_eq!(result.paths().collect::<Vec<_>>(), vec!["a.py"]);
    }
}
