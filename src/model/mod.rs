//! Common graph schema.
//!
//! Every extractor populates these types identically regardless of source
//! language. See [`node`] for the vertex and edge records and [`document`] for
//! the intermediate format exchanged between extraction and ingestion.

pub mod document;
pub mod node;

pub use document::{DocumentMetadata, ExtractionDocument, LinkKind, PendingLink, DOCUMENT_VERSION};
pub use node::{Node, NodeKind, Relationship, RelationshipType, SourceLocation};

/// Validation and decoding errors for model records.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("{record} is missing required field `{field}`")]
    MissingField {
        record: &'static str,
        field: &'static str,
    },

    #[error("malformed {record}: {reason}")]
    Malformed { record: &'static str, reason: String },

    #[error("unknown node kind: {0}")]
    UnknownNodeKind(String),

    #[error("unknown relationship type: {0}")]
    UnknownRelationshipType(String),

    #[error("document is not a JSON object")]
    NotAnObject,

    #[error("invalid document JSON: {0}")]
    Json(#[from] serde_json::Error),
}
