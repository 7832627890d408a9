//! Path filtering for the project walk.
//!
//! Precedence, first match wins:
//! 1. Store database files
//! 2. Configured ignore directories and hidden paths
//! 3. Gitignore-style rules (`.gitignore`, `.ignore` at the root)
//! 4. Exclude globs
//! 5. Language detection
//!
//! Same inputs always produce the same decision.

use anyhow::Result;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::{Path, PathBuf};

use crate::config::IndexConfig;
use crate::diagnostics::SkipReason;
use crate::ingest::detect_language;

/// File name suffixes of SQLite databases and their side files.
const INTERNAL_IGNORE_SUFFIXES: &[&str] = &[
    ".db",
    ".db-journal",
    ".db-wal",
    ".db-shm",
    ".sqlite",
    ".sqlite3",
];

pub struct FileFilter {
    root: PathBuf,
    ignore_dirs: Vec<String>,
    include_hidden: bool,
    gitignore: Option<Gitignore>,
    exclude_patterns: Vec<globset::GlobMatcher>,
}

impl FileFilter {
    pub fn new(
        root: &Path,
        ignore_dirs: &[String],
        include_hidden: bool,
        exclude_patterns: &[String],
    ) -> Result<Self> {
        let gitignore = Self::load_gitignore(root)?;
        let exclude_patterns = Self::compile_globs(exclude_patterns)?;

        Ok(Self {
            root: root.to_path_buf(),
            ignore_dirs: ignore_dirs.to_vec(),
            include_hidden,
            gitignore,
            exclude_patterns,
        })
    }

    pub fn from_config(config: &IndexConfig) -> Result<Self> {
        Self::new(
            &config.root,
            &config.ignore_dirs,
            config.include_hidden,
            &config.exclude,
        )
    }

    fn load_gitignore(root: &Path) -> Result<Option<Gitignore>> {
        let mut builder = GitignoreBuilder::new(root);
        let mut any = false;

        for name in [".gitignore", ".ignore"] {
            let path = root.join(name);
            if !path.exists() {
                continue;
            }
            // A malformed ignore file must not stop the walk.
            if let Some(err) = builder.add(&path) {
                tracing::warn!(file = %path.display(), error = %err, "failed to load ignore file");
            }
            any = true;
        }

        if !any {
            return Ok(None);
        }
        Ok(Some(builder.build()?))
    }

    fn compile_globs(patterns: &[String]) -> Result<Vec<globset::GlobMatcher>> {
        let mut matchers = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let glob = globset::Glob::new(pattern)
                .map_err(|e| anyhow::anyhow!("Invalid glob pattern '{}': {}", pattern, e))?;
            matchers.push(glob.compile_matcher());
        }
        Ok(matchers)
    }

    /// Whether a directory is pruned from the walk, and why.
    pub fn skip_dir(&self, path: &Path) -> Option<SkipReason> {
        let name = path.file_name()?.to_string_lossy();
        if self.ignore_dirs.iter().any(|d| d.as_str() == name) {
            return Some(SkipReason::IgnoredDirectory);
        }
        if !self.include_hidden && name.starts_with('.') {
            return Some(SkipReason::Hidden);
        }
        if self.is_gitignored(path, true) {
            return Some(SkipReason::IgnoredByGitignore);
        }
        let rel_path = self.relative_path(path);
        if self
            .exclude_patterns
            .iter()
            .any(|m| m.is_match(&rel_path) || m.is_match(format!("{}/", rel_path)))
        {
            return Some(SkipReason::ExcludedByGlob);
        }
        None
    }

    /// Whether a file is skipped, and why. `None` means it gets indexed.
    pub fn should_skip(&self, path: &Path) -> Option<SkipReason> {
        if !path.is_file() {
            return Some(SkipReason::NotAFile);
        }
        if self.is_database_file(path) {
            return Some(SkipReason::IgnoredInternal);
        }
        if !self.include_hidden {
            let hidden = path
                .file_name()
                .map(|n| n.to_string_lossy().starts_with('.'))
                .unwrap_or(false);
            if hidden {
                return Some(SkipReason::Hidden);
            }
        }
        if self.is_gitignored(path, false) {
            return Some(SkipReason::IgnoredByGitignore);
        }
        if !self.exclude_patterns.is_empty() {
            let rel_path = self.relative_path(path);
            if self.exclude_patterns.iter().any(|m| m.is_match(&rel_path)) {
                return Some(SkipReason::ExcludedByGlob);
            }
        }
        if detect_language(path).is_none() {
            return Some(SkipReason::UnsupportedLanguage);
        }
        None
    }

    fn is_gitignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(gitignore) = &self.gitignore else {
            return false;
        };
        let check_path = path.strip_prefix(&self.root).unwrap_or(path);
        gitignore
            .matched_path_or_any_parents(check_path, is_dir)
            .is_ignore()
    }

    /// Path relative to the root with `/` separators.
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| path.to_string_lossy().into_owned())
    }

    pub fn is_database_file(&self, path: &Path) -> bool {
        let lower = path.to_string_lossy().to_lowercase();
        INTERNAL_IGNORE_SUFFIXES.iter().any(|s| lower.ends_with(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn default_dirs() -> Vec<String> {
        crate::config::DEFAULT_IGNORE_DIRS
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_ignored_and_hidden_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        fs::create_dir_all(root.join("src")).unwrap();

        let filter = FileFilter::new(root, &default_dirs(), false, &[]).unwrap();
        assert_eq!(
            filter.skip_dir(&root.join("node_modules")),
            Some(SkipReason::IgnoredDirectory)
        );
        assert_eq!(filter.skip_dir(&root.join(".cache")), Some(SkipReason::Hidden));
        assert_eq!(filter.skip_dir(&root.join("src")), None);

        let filter = FileFilter::new(root, &default_dirs(), true, &[]).unwrap();
        assert_eq!(filter.skip_dir(&root.join(".cache")), None);
    }

    #[test]
    fn test_database_and_unsupported_files() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("graph.db"), "data").unwrap();
        fs::write(root.join("notes.txt"), "text").unwrap();
        fs::write(root.join("app.py"), "x = 1").unwrap();
        fs::write(root.join("Program.cs"), "class P {}").unwrap();

        let filter = FileFilter::new(root, &default_dirs(), false, &[]).unwrap();
        assert_eq!(
            filter.should_skip(&root.join("graph.db")),
            Some(SkipReason::IgnoredInternal)
        );
        assert_eq!(
            filter.should_skip(&root.join("notes.txt")),
            Some(SkipReason::UnsupportedLanguage)
        );
        assert_eq!(filter.should_skip(&root.join("app.py")), None);
        assert_eq!(filter.should_skip(&root.join("Program.cs")), None);
        assert_eq!(
            filter.should_skip(&root.join("missing.py")),
            Some(SkipReason::NotAFile)
        );
    }

    #[test]
    fn test_gitignore_filtering() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join(".gitignore"), "ignored.py\ngenerated/\n").unwrap();
        fs::write(root.join("ignored.py"), "x = 1").unwrap();
        fs::write(root.join("kept.py"), "x = 1").unwrap();
        fs::create_dir_all(root.join("generated")).unwrap();
        fs::write(root.join("generated/out.py"), "x = 1").unwrap();

        let filter = FileFilter::new(root, &[], false, &[]).unwrap();
        assert_eq!(
            filter.should_skip(&root.join("ignored.py")),
            Some(SkipReason::IgnoredByGitignore)
        );
        assert_eq!(filter.should_skip(&root.join("kept.py")), None);
        assert_eq!(
            filter.skip_dir(&root.join("generated")),
            Some(SkipReason::IgnoredByGitignore)
        );
        assert_eq!(
            filter.should_skip(&root.join("generated/out.py")),
            Some(SkipReason::IgnoredByGitignore)
        );
    }

    #[test]
    fn test_exclude_patterns() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/lib.ts"), "export {}").unwrap();
        fs::write(root.join("src/lib.test.ts"), "export {}").unwrap();

        let filter = FileFilter::new(root, &[], false, &["**/*.test.ts".to_string()]).unwrap();
        assert_eq!(filter.should_skip(&root.join("src/lib.ts")), None);
        assert_eq!(
            filter.should_skip(&root.join("src/lib.test.ts")),
            Some(SkipReason::ExcludedByGlob)
        );
    }

    #[test]
    fn test_invalid_glob_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(FileFilter::new(temp_dir.path(), &[], false, &["a[".to_string()]).is_err());
    }
}
