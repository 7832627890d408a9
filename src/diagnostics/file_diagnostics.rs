//! File diagnostics: why a path was skipped, or where its processing failed.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::ingest::ExtractError;

/// Reason why a path was skipped during the walk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Not a regular file (socket, broken symlink, ...)
    NotAFile,
    /// No extractor for the file extension
    UnsupportedLanguage,
    /// Database files of the store itself
    IgnoredInternal,
    /// Directory name in the configured ignore list
    IgnoredDirectory,
    /// Name starts with `.`
    Hidden,
    /// Matched by `.gitignore` / `.ignore`
    IgnoredByGitignore,
    /// Matched by a configured exclude glob
    ExcludedByGlob,
}

impl SkipReason {
    /// Lower values are reported first.
    pub fn sort_key(&self) -> u8 {
        match self {
            SkipReason::IgnoredInternal => 0,
            SkipReason::IgnoredDirectory => 1,
            SkipReason::Hidden => 2,
            SkipReason::IgnoredByGitignore => 3,
            SkipReason::ExcludedByGlob => 4,
            SkipReason::UnsupportedLanguage => 5,
            SkipReason::NotAFile => 6,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SkipReason::NotAFile => "not a regular file",
            SkipReason::UnsupportedLanguage => "language not supported",
            SkipReason::IgnoredInternal => "internal ignore rule",
            SkipReason::IgnoredDirectory => "ignored directory",
            SkipReason::Hidden => "hidden path",
            SkipReason::IgnoredByGitignore => "matched by gitignore",
            SkipReason::ExcludedByGlob => "excluded by pattern",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl PartialOrd for SkipReason {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SkipReason {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Pipeline stage where a file failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStage {
    Read,
    Parse,
    Timeout,
    Extract,
    /// The write batch holding the file was rolled back.
    Store,
}

impl DiagnosticStage {
    pub fn sort_key(&self) -> u8 {
        match self {
            DiagnosticStage::Read => 0,
            DiagnosticStage::Parse => 1,
            DiagnosticStage::Timeout => 2,
            DiagnosticStage::Extract => 3,
            DiagnosticStage::Store => 4,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DiagnosticStage::Read => "reading file",
            DiagnosticStage::Parse => "parsing source",
            DiagnosticStage::Timeout => "parsing source (timeout)",
            DiagnosticStage::Extract => "extracting graph",
            DiagnosticStage::Store => "writing batch",
        }
    }

    /// Stage an extraction error belongs to.
    pub fn of(error: &ExtractError) -> Self {
        match error {
            ExtractError::Read(_) => DiagnosticStage::Read,
            ExtractError::Syntax { .. } => DiagnosticStage::Parse,
            ExtractError::Timeout(_) => DiagnosticStage::Timeout,
            ExtractError::Language(_) | ExtractError::Unsupported(_) => DiagnosticStage::Extract,
        }
    }
}

impl fmt::Display for DiagnosticStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl PartialOrd for DiagnosticStage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DiagnosticStage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// A skipped or failed file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileDiagnostic {
    Skipped {
        /// Path relative to root
        path: String,
        reason: SkipReason,
    },
    Error {
        path: String,
        stage: DiagnosticStage,
        message: String,
    },
}

impl FileDiagnostic {
    pub fn path(&self) -> &str {
        match self {
            FileDiagnostic::Skipped { path, .. } => path,
            FileDiagnostic::Error { path, .. } => path,
        }
    }

    /// Path first, then errors before skips, then stage/reason.
    pub fn sort_key(&self) -> (&str, u8, u8) {
        match self {
            FileDiagnostic::Error { path, stage, .. } => (path, 0, stage.sort_key()),
            FileDiagnostic::Skipped { path, reason } => (path, 1, reason.sort_key()),
        }
    }

    pub fn skipped(path: impl Into<String>, reason: SkipReason) -> Self {
        FileDiagnostic::Skipped {
            path: path.into(),
            reason,
        }
    }

    pub fn error(path: impl Into<String>, stage: DiagnosticStage, message: impl Into<String>) -> Self {
        FileDiagnostic::Error {
            path: path.into(),
            stage,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FileDiagnostic::Error { .. })
    }

    /// One line for stderr, e.g. `ERROR src/bad.py: parsing source: ...`.
    pub fn format_stderr(&self) -> String {
        match self {
            FileDiagnostic::Skipped { path, reason } => format!("SKIP {}: {}", path, reason),
            FileDiagnostic::Error {
                path,
                stage,
                message,
            } => format!("ERROR {}: {}: {}", path, stage, message),
        }
    }
}

impl fmt::Display for FileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_stderr())
    }
}

impl PartialOrd for FileDiagnostic {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileDiagnostic {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}
