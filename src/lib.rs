//! cartograph: code graph extraction and incremental indexing
//!
//! cartograph parses C#, Python, JavaScript and TypeScript sources with
//! tree-sitter, normalizes what it finds into one typed graph of code entities
//! and relationships, and merges repeated runs into a SQLite store without
//! duplicating or orphaning data.
//!
//! # Position Conventions
//!
//! - **Line positions**: 1-indexed (line 1 is the first line)
//! - **Column positions**: 0-indexed byte columns, as tree-sitter reports them
//!
//! # Layout
//!
//! - [`model`]: node, relationship and document types shared by every stage
//! - [`ingest`]: per-language extractors, manifests and external libraries
//! - [`graph`]: the store, merge engine, deletion, linker and queries
//! - [`indexer`]: the run orchestrator
//! - [`summarize`]: bottom-up summarization driven by an external summarizer

pub mod change;
pub mod config;
pub mod diagnostics;
pub mod graph;
pub mod identity;
pub mod indexer;
pub mod ingest;
pub mod model;
pub mod summarize;

pub use config::{ConfigError, ExtractorConfig, IndexConfig};
pub use diagnostics::{DiagnosticStage, FileDiagnostic, SkipReason};
pub use graph::{GraphStore, GraphSummary, StoreError, StoreOptions};
pub use indexer::{FileFailure, Indexer, RunReport};
pub use ingest::{detect_language, ExtractError, Extractor, FileGraph, Language};
pub use model::{
    ExtractionDocument, ModelError, Node, NodeKind, Relationship, RelationshipType,
    SourceLocation,
};
pub use summarize::{Summarizer, SummaryRequest};
