//! Node and relationship records shared by every extractor.
//!
//! These are the wire types of the intermediate format: extractors build them,
//! the merge engine persists them. Nothing here knows about a particular
//! source language.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::ModelError;

/// Kind of code entity a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Directory,
    Class,
    Interface,
    Method,
    Function,
    Variable,
    Parameter,
    Import,
    Export,
    ExternalLibrary,
}

impl NodeKind {
    pub const ALL: [NodeKind; 11] = [
        NodeKind::File,
        NodeKind::Directory,
        NodeKind::Class,
        NodeKind::Interface,
        NodeKind::Method,
        NodeKind::Function,
        NodeKind::Variable,
        NodeKind::Parameter,
        NodeKind::Import,
        NodeKind::Export,
        NodeKind::ExternalLibrary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::File => "File",
            NodeKind::Directory => "Directory",
            NodeKind::Class => "Class",
            NodeKind::Interface => "Interface",
            NodeKind::Method => "Method",
            NodeKind::Function => "Function",
            NodeKind::Variable => "Variable",
            NodeKind::Parameter => "Parameter",
            NodeKind::Import => "Import",
            NodeKind::Export => "Export",
            NodeKind::ExternalLibrary => "ExternalLibrary",
        }
    }

    /// Lowercase prefix used when composing node ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Directory => "directory",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Method => "method",
            NodeKind::Function => "function",
            NodeKind::Variable => "variable",
            NodeKind::Parameter => "parameter",
            NodeKind::Import => "import",
            NodeKind::Export => "export",
            NodeKind::ExternalLibrary => "external",
        }
    }

    /// Kinds that own other nodes through containment edges.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            NodeKind::File
                | NodeKind::Directory
                | NodeKind::Class
                | NodeKind::Interface
                | NodeKind::Method
                | NodeKind::Function
        )
    }

    pub fn is_type(&self) -> bool {
        matches!(self, NodeKind::Class | NodeKind::Interface)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, NodeKind::Method | NodeKind::Function)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ModelError::UnknownNodeKind(s.to_string()))
    }
}

/// Directed relationship types between nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Contains,
    Defines,
    Declares,
    HasMember,
    Calls,
    Instantiates,
    Extends,
    Implements,
    Imports,
    Exports,
    References,
}

impl RelationshipType {
    pub const ALL: [RelationshipType; 11] = [
        RelationshipType::Contains,
        RelationshipType::Defines,
        RelationshipType::Declares,
        RelationshipType::HasMember,
        RelationshipType::Calls,
        RelationshipType::Instantiates,
        RelationshipType::Extends,
        RelationshipType::Implements,
        RelationshipType::Imports,
        RelationshipType::Exports,
        RelationshipType::References,
    ];

    /// Relationship types that express lexical ownership.
    pub const CONTAINMENT: [RelationshipType; 3] = [
        RelationshipType::Contains,
        RelationshipType::Defines,
        RelationshipType::Declares,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contains => "CONTAINS",
            RelationshipType::Defines => "DEFINES",
            RelationshipType::Declares => "DECLARES",
            RelationshipType::HasMember => "HAS_MEMBER",
            RelationshipType::Calls => "CALLS",
            RelationshipType::Instantiates => "INSTANTIATES",
            RelationshipType::Extends => "EXTENDS",
            RelationshipType::Implements => "IMPLEMENTS",
            RelationshipType::Imports => "IMPORTS",
            RelationshipType::Exports => "EXPORTS",
            RelationshipType::References => "REFERENCES",
        }
    }

    pub fn is_containment(&self) -> bool {
        Self::CONTAINMENT.contains(self)
    }

    /// Containment edge type from a parent of `parent` kind to a child of `child` kind.
    pub fn containment(parent: NodeKind, child: NodeKind) -> RelationshipType {
        match (parent, child) {
            (NodeKind::Class | NodeKind::Interface, NodeKind::Method) => RelationshipType::Defines,
            (
                NodeKind::Class | NodeKind::Interface,
                NodeKind::Variable | NodeKind::Parameter,
            ) => RelationshipType::Declares,
            (
                NodeKind::Function | NodeKind::Method,
                NodeKind::Variable | NodeKind::Parameter,
            ) => RelationshipType::Declares,
            _ => RelationshipType::Contains,
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationshipType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationshipType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| ModelError::UnknownRelationshipType(s.to_string()))
    }
}

/// Source span of an entity.
///
/// Lines are 1-indexed, columns are 0-indexed byte columns (tree-sitter convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub start_line: usize,
    pub end_line: usize,
    pub start_column: usize,
    pub end_column: usize,
}

impl SourceLocation {
    pub fn of(node: &tree_sitter::Node) -> Self {
        Self {
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
            start_column: node.start_position().column,
            end_column: node.end_position().column,
        }
    }
}

/// A graph vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "label")]
    pub kind: NodeKind,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: id.into(),
            kind,
            full_name: name.clone(),
            name,
            raw_code: None,
            location: None,
            properties: Map::new(),
            generated_summary: None,
            embedding: None,
        }
    }

    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = full_name.into();
        self
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    /// Owning file path, when the node was extracted from a file.
    pub fn file_path(&self) -> Option<&str> {
        self.property_str("file_path")
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.id.trim().is_empty() {
            return Err(ModelError::MissingField {
                record: "node",
                field: "id",
            });
        }
        if self.name.trim().is_empty() {
            return Err(ModelError::MissingField {
                record: "node",
                field: "name",
            });
        }
        Ok(())
    }
}

/// A directed, typed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Relationship {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        rel_type: RelationshipType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            rel_type,
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Upsert key.
    pub fn key(&self) -> (String, String, RelationshipType) {
        (
            self.source_id.clone(),
            self.target_id.clone(),
            self.rel_type,
        )
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.source_id.trim().is_empty() {
            return Err(ModelError::MissingField {
                record: "relationship",
                field: "source_id",
            });
        }
        if self.target_id.trim().is_empty() {
            return Err(ModelError::MissingField {
                record: "relationship",
                field: "target_id",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_properties_are_preserved() {
        let value = json!({
            "id": "class-Foo-1",
            "kind": "Class",
            "name": "Foo",
            "full_name": "a.Foo",
            "properties": {"is_abstract": true, "vendor_flag": {"nested": [1, 2]}}
        });
        let node: Node = serde_json::from_value(value).unwrap();
        assert_eq!(node.properties["vendor_flag"], json!({"nested": [1, 2]}));

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["properties"]["vendor_flag"]["nested"][1], 2);
    }

    #[test]
    fn test_label_alias_for_kind() {
        let node: Node =
            serde_json::from_value(json!({"id": "x", "label": "Method", "name": "run"})).unwrap();
        assert_eq!(node.kind, NodeKind::Method);
    }

    #[test]
    fn test_validate_rejects_blank_fields() {
        let node = Node::new("", NodeKind::Function, "f");
        assert!(node.validate().is_err());
        let node = Node::new("function-f-1", NodeKind::Function, " ");
        assert!(node.validate().is_err());

        let rel = Relationship::new("a", "", RelationshipType::Calls);
        assert!(rel.validate().is_err());
        assert!(Relationship::new("a", "b", RelationshipType::Calls)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_relationship_type_wire_names() {
        let rel = Relationship::new("a", "b", RelationshipType::HasMember);
        let value = serde_json::to_value(&rel).unwrap();
        assert_eq!(value["type"], "HAS_MEMBER");
        assert_eq!(
            "has_member".parse::<RelationshipType>().unwrap(),
            RelationshipType::HasMember
        );
    }

    #[test]
    fn test_containment_rules() {
        use NodeKind::*;
        assert_eq!(
            RelationshipType::containment(Class, Method),
            RelationshipType::Defines
        );
        assert_eq!(
            RelationshipType::containment(Method, Parameter),
            RelationshipType::Declares
        );
        assert_eq!(
            RelationshipType::containment(File, Class),
            RelationshipType::Contains
        );
        assert_eq!(
            RelationshipType::containment(Class, Class),
            RelationshipType::Contains
        );
    }
}
