//! Run configuration.
//!
//! Loaded from an optional JSON file and then overridden by command-line flags.
//! Every field has a default so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::StoreOptions;
use crate::model::NodeKind;

/// Directories never descended into, by name.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    "__pycache__",
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "bin",
    "obj",
    ".vs",
    ".vscode",
    "build",
    "dist",
    "target",
    ".idea",
    ".pytest_cache",
    ".cartograph",
];

/// Database location relative to the project root.
pub const DEFAULT_DB_RELATIVE: &str = ".cartograph/graph.db";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("project root is not set")]
    MissingRoot,

    #[error("project root {0} does not exist or is not a directory")]
    RootNotADirectory(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Which entities extractors emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub include_variables: bool,
    pub include_parameters: bool,
    pub include_imports: bool,
    pub include_exports: bool,
    pub include_classes: bool,
    pub include_methods: bool,
    pub include_functions: bool,
    pub track_external_libraries: bool,
    /// Store source text in `raw_code`.
    pub capture_content: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            include_variables: false,
            include_parameters: true,
            include_imports: true,
            include_exports: true,
            include_classes: true,
            include_methods: true,
            include_functions: true,
            track_external_libraries: true,
            capture_content: true,
        }
    }
}

impl ExtractorConfig {
    /// Whether nodes of `kind` are emitted.
    pub fn includes(&self, kind: NodeKind) -> bool {
        match kind {
            NodeKind::Variable => self.include_variables,
            NodeKind::Parameter => self.include_parameters,
            NodeKind::Import => self.include_imports,
            NodeKind::Export => self.include_exports,
            NodeKind::Class | NodeKind::Interface => self.include_classes,
            NodeKind::Method => self.include_methods,
            NodeKind::Function => self.include_functions,
            NodeKind::ExternalLibrary => self.track_external_libraries,
            NodeKind::File | NodeKind::Directory => true,
        }
    }
}

/// Configuration of one index run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub root: PathBuf,
    /// `None` means `<root>/.cartograph/graph.db`.
    pub db_path: Option<PathBuf>,
    pub extractor: ExtractorConfig,
    pub ignore_dirs: Vec<String>,
    /// Globs matched against root-relative paths.
    pub exclude: Vec<String>,
    pub include_hidden: bool,
    /// Upper bound on nodes plus relationships per write transaction.
    pub batch_size: usize,
    /// Extraction worker threads.
    pub jobs: usize,
    pub parse_timeout_ms: u64,
    pub store_timeout_ms: u64,
    /// Re-extract unchanged files.
    pub force: bool,
    pub embedding_dimensions: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            db_path: None,
            extractor: ExtractorConfig::default(),
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
            exclude: Vec::new(),
            include_hidden: false,
            batch_size: 1000,
            jobs: 5,
            parse_timeout_ms: 10_000,
            store_timeout_ms: 5_000,
            force: false,
            embedding_dimensions: 768,
        }
    }
}

impl IndexConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.root.join(DEFAULT_DB_RELATIVE))
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Options every store opened for this configuration uses.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: self.store_timeout(),
            embedding_dimensions: self.embedding_dimensions,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.as_os_str().is_empty() {
            return Err(ConfigError::MissingRoot);
        }
        if !self.root.is_dir() {
            return Err(ConfigError::RootNotADirectory(self.root.clone()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "batch_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.jobs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "jobs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.embedding_dimensions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding_dimensions",
                reason: "must be greater than zero".into(),
            });
        }
        for pattern in &self.exclude {
            if let Err(e) = globset::Glob::new(pattern) {
                return Err(ConfigError::InvalidValue {
                    field: "exclude",
                    reason: format!("invalid glob '{}': {}", pattern, e),
                });
            }
        }
        Ok(())
    }
}
