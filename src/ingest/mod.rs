//! Per-language extraction.
//!
//! Each extractor parses one file with its tree-sitter grammar and emits the
//! nodes and relationships local to that file, plus pending links for
//! references it cannot bind without the rest of the project. Extractors never
//! touch storage.

pub mod builder;
pub mod csharp;
pub mod detect;
pub mod external;
pub mod javascript;
pub mod manifest;
pub mod pool;
pub mod project;
pub mod python;

pub use builder::{CallTarget, Emission, GraphBuilder, ScopeKind};
pub use csharp::CSharpExtractor;
pub use detect::{detect_language, Grammar, Language};
pub use external::{ExternalRegistry, ImportTarget};
pub use javascript::JavaScriptExtractor;
pub use manifest::ManifestIndex;
pub use project::ProjectIndex;
pub use python::PythonExtractor;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ExtractorConfig;
use crate::identity::IdRegistry;
use crate::model::{Node, PendingLink, Relationship};

/// Errors that make one file's extraction fail. None of them abort a run.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to read file: {0}")]
    Read(#[from] std::io::Error),

    #[error("grammar setup failed: {0}")]
    Language(String),

    #[error("parse timed out after {0:?}")]
    Timeout(Duration),

    #[error("syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },

    #[error("no extractor registered for {0}")]
    Unsupported(String),
}

/// Output of one file's extraction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileGraph {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub references: Vec<PendingLink>,
}

impl FileGraph {
    /// Records this graph contributes to a write batch.
    pub fn weight(&self) -> usize {
        self.nodes.len() + self.relationships.len()
    }
}

/// State shared by every extraction of one run.
///
/// Owns the id-collision map and the external-library table; dropped when the
/// run ends.
#[derive(Debug, Default)]
pub struct RunContext {
    pub ids: IdRegistry,
    pub externals: ExternalRegistry,
    pub manifests: ManifestIndex,
    pub project: ProjectIndex,
}

impl RunContext {
    pub fn new(manifests: ManifestIndex, project: ProjectIndex) -> Self {
        Self {
            ids: IdRegistry::new(),
            externals: ExternalRegistry::new(),
            manifests,
            project,
        }
    }
}

/// Inputs for extracting one file.
pub struct ExtractContext<'a> {
    /// Project-relative path with `/` separators.
    pub rel_path: &'a str,
    pub abs_path: &'a Path,
    pub checksum: &'a str,
    pub config: &'a ExtractorConfig,
    pub run: &'a RunContext,
    pub parse_timeout: Duration,
}

/// A language front-end.
pub trait Extractor: Send + Sync {
    fn language(&self) -> Language;

    /// File extensions handled, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    fn extract(&self, ctx: &ExtractContext<'_>, source: &[u8]) -> Result<FileGraph, ExtractError>;
}

/// Default extractor for a language.
pub fn extractor_for(language: Language) -> Arc<dyn Extractor> {
    match language {
        Language::Python => Arc::new(PythonExtractor::new()),
        Language::CSharp => Arc::new(CSharpExtractor::new()),
        Language::JavaScript => Arc::new(JavaScriptExtractor::new(Language::JavaScript)),
        Language::TypeScript => Arc::new(JavaScriptExtractor::new(Language::TypeScript)),
    }
}

/// Parse with the pooled parser and reject trees containing syntax errors.
pub(crate) fn parse_checked(
    grammar: Grammar,
    source: &[u8],
    timeout: Duration,
) -> Result<tree_sitter::Tree, ExtractError> {
    let tree = pool::parse(grammar, source, timeout)?;
    let root = tree.root_node();
    if root.has_error() {
        let (line, column) = first_error(&root)
            .map(|n| (n.start_position().row + 1, n.start_position().column))
            .unwrap_or((1, 0));
        return Err(ExtractError::Syntax { line, column });
    }
    Ok(tree)
}

fn first_error<'t>(node: &tree_sitter::Node<'t>) -> Option<tree_sitter::Node<'t>> {
    if node.is_error() || node.is_missing() {
        return Some(*node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.has_error() {
            if let Some(found) = first_error(&child) {
                return Some(found);
            }
        }
    }
    None
}

/// UTF-8 text of a syntax node; empty when the bytes are not valid UTF-8.
pub(crate) fn node_text<'s>(node: &tree_sitter::Node, source: &'s [u8]) -> &'s str {
    node.utf8_text(source).unwrap_or("")
}

/// Separator between scope components in qualified names.
pub const SCOPE_SEPARATOR: &str = ".";

/// Stack of enclosing scope names used to build qualified names.
///
/// ```
/// use cartograph::ingest::ScopeStack;
///
/// let mut stack = ScopeStack::new();
/// stack.push("Models");
/// stack.push("User");
/// assert_eq!(stack.fqn_for_symbol("save"), "Models.User.save");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopeStack {
    scopes: Vec<String>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scope: impl Into<String>) {
        self.scopes.push(scope.into());
    }

    pub fn pop(&mut self) -> Option<String> {
        self.scopes.pop()
    }

    /// Empty for top-level symbols.
    pub fn current_fqn(&self) -> String {
        self.scopes.join(SCOPE_SEPARATOR)
    }

    pub fn fqn_for_symbol(&self, symbol_name: &str) -> String {
        let current = self.current_fqn();
        if current.is_empty() {
            symbol_name.to_string()
        } else if symbol_name.is_empty() {
            current
        } else {
            format!("{}{}{}", current, SCOPE_SEPARATOR, symbol_name)
        }
    }

    pub fn components(&self) -> &[String] {
        &self.scopes
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}
