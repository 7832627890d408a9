//! Intermediate extraction document.
//!
//! The single contract between extraction and ingestion. Every language
//! produces the same shape; ingestion never branches on `language`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::{ModelError, Node, NodeKind, Relationship, RelationshipType};

pub const DOCUMENT_VERSION: &str = "1.0.0";

/// Kind of cross-file reference awaiting resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Call of a name defined in another file. Resolves to CALLS, or
    /// INSTANTIATES when the target turns out to be a class.
    Calls,
    /// Explicit construction (`new Foo()`).
    Instantiates,
    /// Base type in another file. EXTENDS for classes, IMPLEMENTS for interfaces.
    Inherits,
    /// Imported symbol in another project file.
    Imports,
    /// Symbol re-exported from another project file.
    Exports,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Calls => "calls",
            LinkKind::Instantiates => "instantiates",
            LinkKind::Inherits => "inherits",
            LinkKind::Imports => "imports",
            LinkKind::Exports => "exports",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "calls" => Some(LinkKind::Calls),
            "instantiates" => Some(LinkKind::Instantiates),
            "inherits" => Some(LinkKind::Inherits),
            "imports" => Some(LinkKind::Imports),
            "exports" => Some(LinkKind::Exports),
            _ => None,
        }
    }

    pub fn accepts(&self, target: NodeKind) -> bool {
        match self {
            LinkKind::Calls => target.is_callable() || target == NodeKind::Class,
            LinkKind::Instantiates => target == NodeKind::Class,
            LinkKind::Inherits => target.is_type(),
            LinkKind::Imports | LinkKind::Exports => !matches!(
                target,
                NodeKind::File | NodeKind::Directory | NodeKind::Import | NodeKind::Export
            ),
        }
    }

    /// Edge type to emit once both endpoint kinds are known.
    ///
    /// An interface inheriting from an interface extends it; a class
    /// inheriting from one implements it.
    pub fn relationship_for(&self, source: NodeKind, target: NodeKind) -> Option<RelationshipType> {
        if !self.accepts(target) {
            return None;
        }
        Some(match (self, target) {
            (LinkKind::Calls, NodeKind::Class) => RelationshipType::Instantiates,
            (LinkKind::Calls, _) => RelationshipType::Calls,
            (LinkKind::Instantiates, _) => RelationshipType::Instantiates,
            (LinkKind::Inherits, NodeKind::Interface) if source != NodeKind::Interface => {
                RelationshipType::Implements
            }
            (LinkKind::Inherits, _) => RelationshipType::Extends,
            (LinkKind::Imports, _) => RelationshipType::Imports,
            (LinkKind::Exports, _) => RelationshipType::Exports,
        })
    }
}

/// A reference from a node in one file to a symbol that may live in another.
///
/// `candidates` are fully-qualified names in priority order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLink {
    pub source_id: String,
    pub kind: LinkKind,
    pub candidates: Vec<String>,
    pub file_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub relationship_count: usize,
    #[serde(default)]
    pub nodes_by_kind: BTreeMap<String, usize>,
    #[serde(default)]
    pub relationships_by_type: BTreeMap<String, usize>,
    #[serde(default)]
    pub failed_files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDocument {
    pub language: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub processed_files: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<PendingLink>,
}

fn default_version() -> String {
    DOCUMENT_VERSION.to_string()
}

impl ExtractionDocument {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            version: default_version(),
            processed_files: Vec::new(),
            nodes: Vec::new(),
            relationships: Vec::new(),
            metadata: DocumentMetadata::default(),
            references: Vec::new(),
        }
    }

    /// Recompute `metadata` counts from the current contents.
    pub fn refresh_metadata(&mut self) {
        let mut nodes_by_kind = BTreeMap::new();
        for node in &self.nodes {
            *nodes_by_kind.entry(node.kind.to_string()).or_insert(0) += 1;
        }
        let mut relationships_by_type = BTreeMap::new();
        for rel in &self.relationships {
            *relationships_by_type
                .entry(rel.rel_type.to_string())
                .or_insert(0) += 1;
        }
        self.metadata.node_count = self.nodes.len();
        self.metadata.relationship_count = self.relationships.len();
        self.metadata.nodes_by_kind = nodes_by_kind;
        self.metadata.relationships_by_type = relationships_by_type;
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for node in &self.nodes {
            node.validate()?;
        }
        for rel in &self.relationships {
            rel.validate()?;
        }
        Ok(())
    }

    /// Parse a document, keeping every well-formed record.
    ///
    /// Malformed nodes and relationships are returned as errors alongside the
    /// document instead of failing the whole parse. Only a document that is not
    /// a JSON object with a `language` field is rejected outright.
    pub fn parse_lenient(json: &str) -> Result<(Self, Vec<ModelError>), ModelError> {
        let mut value: Value = serde_json::from_str(json)?;
        let obj = value.as_object_mut().ok_or(ModelError::NotAnObject)?;

        let raw_nodes = match obj.remove("nodes") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let raw_rels = match obj.remove("relationships") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };

        let mut doc: ExtractionDocument = serde_json::from_value(value)?;
        let mut rejected = Vec::new();

        for raw in raw_nodes {
            match serde_json::from_value::<Node>(raw) {
                Ok(node) => match node.validate() {
                    Ok(()) => doc.nodes.push(node),
                    Err(e) => rejected.push(e),
                },
                Err(e) => rejected.push(ModelError::Malformed {
                    record: "node",
                    reason: e.to_string(),
                }),
            }
        }
        for raw in raw_rels {
            match serde_json::from_value::<Relationship>(raw) {
                Ok(rel) => match rel.validate() {
                    Ok(()) => doc.relationships.push(rel),
                    Err(e) => rejected.push(e),
                },
                Err(e) => rejected.push(ModelError::Malformed {
                    record: "relationship",
                    reason: e.to_string(),
                }),
            }
        }

        Ok((doc, rejected))
    }
}
