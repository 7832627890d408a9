//! Read queries, graph statistics and embedding search.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use super::{decode_embedding, encode_embedding, GraphStore, StoreError, StoreResult};
use crate::model::{Node, NodeKind, Relationship, RelationshipType, SourceLocation};

const NODE_COLUMNS: &str = "id, kind, name, full_name, raw_code, start_line, end_line,
     start_column, end_column, properties, generated_summary, embedding";

/// Counts describing the stored graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSummary {
    pub total_nodes: usize,
    pub total_relationships: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub relationships_by_type: BTreeMap<String, usize>,
    pub file_count: usize,
    /// File count per language
    pub languages: BTreeMap<String, usize>,
    /// Sum of file sizes in bytes
    pub total_size: u64,
    pub pending_links: usize,
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMatch {
    pub id: String,
    pub kind: NodeKind,
    pub full_name: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Columns of a node row before the fallible decoding steps.
struct RawNode {
    id: String,
    kind: String,
    name: String,
    full_name: String,
    raw_code: Option<String>,
    location: Option<SourceLocation>,
    properties: String,
    generated_summary: Option<String>,
    embedding: Option<Vec<u8>>,
}

impl RawNode {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let start_line: Option<i64> = row.get(5)?;
        let location = match start_line {
            Some(start_line) => Some(SourceLocation {
                start_line: start_line as usize,
                end_line: row.get::<_, Option<i64>>(6)?.unwrap_or(start_line) as usize,
                start_column: row.get::<_, Option<i64>>(7)?.unwrap_or(0) as usize,
                end_column: row.get::<_, Option<i64>>(8)?.unwrap_or(0) as usize,
            }),
            None => None,
        };
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            name: row.get(2)?,
            full_name: row.get(3)?,
            raw_code: row.get(4)?,
            location,
            properties: row.get(9)?,
            generated_summary: row.get(10)?,
            embedding: row.get(11)?,
        })
    }

    fn decode(self) -> StoreResult<Node> {
        let kind: NodeKind = self
            .kind
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("node {} has kind '{}'", self.id, self.kind)))?;
        let properties: Map<String, Value> = serde_json::from_str(&self.properties)?;
        let embedding = self.embedding.as_deref().map(decode_embedding).transpose()?;
        Ok(Node {
            id: self.id,
            kind,
            name: self.name,
            full_name: self.full_name,
            raw_code: self.raw_code,
            location: self.location,
            properties,
            generated_summary: self.generated_summary,
            embedding,
        })
    }
}

struct RawRelationship {
    source_id: String,
    target_id: String,
    rel_type: String,
    properties: String,
}

impl RawRelationship {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            source_id: row.get(0)?,
            target_id: row.get(1)?,
            rel_type: row.get(2)?,
            properties: row.get(3)?,
        })
    }

    fn decode(self) -> StoreResult<Relationship> {
        let rel_type: RelationshipType = self
            .rel_type
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("relationship type '{}'", self.rel_type)))?;
        Ok(Relationship {
            source_id: self.source_id,
            target_id: self.target_id,
            rel_type,
            properties: serde_json::from_str(&self.properties)?,
        })
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl GraphStore {
    fn query_nodes(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> StoreResult<Vec<Node>> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let rows = stmt.query_map(args, RawNode::from_row)?;
        let mut nodes = Vec::new();
        for row in rows {
            nodes.push(row?.decode()?);
        }
        Ok(nodes)
    }

    fn query_relationships(&self, sql: &str, id: &str) -> StoreResult<Vec<Relationship>> {
        let mut stmt = self.conn().prepare_cached(sql)?;
        let rows = stmt.query_map(params![id], RawRelationship::from_row)?;
        let mut rels = Vec::new();
        for row in rows {
            rels.push(row?.decode()?);
        }
        Ok(rels)
    }

    pub fn get_node(&self, id: &str) -> StoreResult<Option<Node>> {
        let sql = format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS);
        let found = self
            .conn()
            .query_row(&sql, params![id], RawNode::from_row)
            .optional()?;
        found.map(RawNode::decode).transpose()
    }

    /// Nodes of one kind ordered by full name, then id.
    pub fn nodes_by_kind(&self, kind: NodeKind) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE kind = ?1 ORDER BY full_name, id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![kind.as_str()])
    }

    pub fn nodes_by_full_name(&self, full_name: &str) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE full_name = ?1 ORDER BY id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![full_name])
    }

    pub fn outgoing(&self, id: &str) -> StoreResult<Vec<Relationship>> {
        self.query_relationships(
            "SELECT source_id, target_id, type, properties FROM relationships
             WHERE source_id = ?1 ORDER BY type, target_id",
            id,
        )
    }

    pub fn incoming(&self, id: &str) -> StoreResult<Vec<Relationship>> {
        self.query_relationships(
            "SELECT source_id, target_id, type, properties FROM relationships
             WHERE target_id = ?1 ORDER BY type, source_id",
            id,
        )
    }

    /// Nodes directly owned by `id` over containment edges, ordered by name.
    pub fn children(&self, id: &str) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE id IN (
                 SELECT target_id FROM relationships
                 WHERE source_id = ?1 AND type IN ('CONTAINS', 'DEFINES', 'DECLARES'))
             ORDER BY name, id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![id])
    }

    /// Targets of CALLS and REFERENCES edges from `id`, ordered by name.
    pub fn related(&self, id: &str) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE id IN (
                 SELECT target_id FROM relationships
                 WHERE source_id = ?1 AND type IN ('CALLS', 'REFERENCES'))
             ORDER BY name, id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![id])
    }

    /// Nodes of `kind` without a summary, ordered by id.
    pub fn unsummarized(&self, kind: NodeKind) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE kind = ?1 AND generated_summary IS NULL ORDER BY id",
            NODE_COLUMNS
        );
        self.query_nodes(&sql, params![kind.as_str()])
    }

    /// `(total, summarized)` node counts for one kind.
    pub fn summary_counts(&self, kind: NodeKind) -> StoreResult<(usize, usize)> {
        let (total, done): (i64, i64) = self.conn().query_row(
            "SELECT COUNT(*), COUNT(generated_summary) FROM nodes WHERE kind = ?1",
            params![kind.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total as usize, done as usize))
    }

    /// Stored checksum of every indexed file, keyed by relative path.
    pub fn file_checksums(&self) -> StoreResult<HashMap<String, String>> {
        let mut stmt = self.conn().prepare_cached(
            "SELECT file_path, json_extract(properties, '$.checksum') FROM nodes
             WHERE kind = 'File' AND file_path IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut checksums = HashMap::new();
        for row in rows {
            let (path, checksum) = row?;
            checksums.insert(path, checksum.unwrap_or_default());
        }
        Ok(checksums)
    }

    pub fn count_nodes(&self) -> StoreResult<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn count_relationships(&self) -> StoreResult<usize> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Relationships with an endpoint that is not a stored node. Always zero
    /// unless the database was edited outside this store.
    pub fn dangling_relationships(&self) -> StoreResult<usize> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM relationships r
             WHERE NOT EXISTS (SELECT 1 FROM nodes WHERE id = r.source_id)
                OR NOT EXISTS (SELECT 1 FROM nodes WHERE id = r.target_id)",
            [],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    pub fn summary(&self) -> StoreResult<GraphSummary> {
        let conn = self.conn();
        let mut summary = GraphSummary {
            total_nodes: self.count_nodes()?,
            total_relationships: self.count_relationships()?,
            ..GraphSummary::default()
        };

        let mut stmt = conn.prepare_cached("SELECT kind, COUNT(*) FROM nodes GROUP BY kind")?;
        for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))? {
            let (kind, n) = row?;
            summary.nodes_by_kind.insert(kind, n as usize);
        }

        let mut stmt =
            conn.prepare_cached("SELECT type, COUNT(*) FROM relationships GROUP BY type")?;
        for row in stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))? {
            let (rel_type, n) = row?;
            summary.relationships_by_type.insert(rel_type, n as usize);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT json_extract(properties, '$.language'), COUNT(*),
                    COALESCE(SUM(json_extract(properties, '$.size')), 0)
             FROM nodes WHERE kind = 'File' GROUP BY 1",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (language, files, size) = row?;
            summary.file_count += files as usize;
            summary.total_size += size as u64;
            summary
                .languages
                .insert(language.unwrap_or_else(|| "unknown".into()), files as usize);
        }

        let pending: i64 = conn.query_row("SELECT COUNT(*) FROM pending_links", [], |row| row.get(0))?;
        summary.pending_links = pending as usize;
        Ok(summary)
    }

    /// Store an embedding. Its length must equal the configured dimension.
    pub fn set_embedding(&mut self, id: &str, embedding: &[f32]) -> StoreResult<()> {
        let expected = self.options().embedding_dimensions;
        if embedding.len() != expected {
            return Err(StoreError::EmbeddingDimension {
                id: id.to_string(),
                expected,
                actual: embedding.len(),
            });
        }
        let n = self.conn().execute(
            "UPDATE nodes SET embedding = ?2 WHERE id = ?1",
            params![id, encode_embedding(embedding)],
        )?;
        if n == 0 {
            return Err(StoreError::UnknownNode(id.to_string()));
        }
        Ok(())
    }

    pub fn set_summary(&mut self, id: &str, summary: &str) -> StoreResult<()> {
        let n = self.conn().execute(
            "UPDATE nodes SET generated_summary = ?2 WHERE id = ?1",
            params![id, summary],
        )?;
        if n == 0 {
            return Err(StoreError::UnknownNode(id.to_string()));
        }
        Ok(())
    }

    /// The `k` embedded nodes most similar to `query`, best first.
    ///
    /// Brute force over the rows the partial `(kind) WHERE embedding IS NOT NULL`
    /// index selects.
    pub fn nearest_by_embedding(
        &self,
        kind: Option<NodeKind>,
        query: &[f32],
        k: usize,
    ) -> StoreResult<Vec<NodeMatch>> {
        let expected = self.options().embedding_dimensions;
        if query.len() != expected {
            return Err(StoreError::EmbeddingDimension {
                id: "<query>".to_string(),
                expected,
                actual: query.len(),
            });
        }

        let mut stmt = self.conn().prepare_cached(
            "SELECT id, kind, full_name, embedding FROM nodes
             WHERE embedding IS NOT NULL AND (?1 IS NULL OR kind = ?1)",
        )?;
        let rows = stmt.query_map(params![kind.map(|k| k.as_str())], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut matches = Vec::new();
        for row in rows {
            let (id, kind, full_name, blob) = row?;
            let kind: NodeKind = kind
                .parse()
                .map_err(|_| StoreError::Corrupt(format!("node {} has kind '{}'", id, kind)))?;
            let embedding = decode_embedding(&blob)?;
            matches.push(NodeMatch {
                score: cosine(query, &embedding),
                id,
                kind,
                full_name,
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Batch, StoreOptions};

    fn store() -> GraphStore {
        let mut store = GraphStore::open_in_memory(StoreOptions {
            embedding_dimensions: 2,
            ..StoreOptions::default()
        })
        .unwrap();
        let file = Node::new("file-a", NodeKind::File, "a.py")
            .with_property("file_path", "a.py")
            .with_property("checksum", "abc")
            .with_property("language", "python")
            .with_property("size", 120u64);
        let ts = Node::new("file-b", NodeKind::File, "b.ts")
            .with_property("file_path", "b.ts")
            .with_property("checksum", "def")
            .with_property("language", "typescript")
            .with_property("size", 30u64);
        let f = Node::new("function-f", NodeKind::Function, "f").with_full_name("a.f");
        let g = Node::new("function-g", NodeKind::Function, "g").with_full_name("a.g");
        store
            .apply_batch(&Batch {
                nodes: vec![file, ts, f, g],
                relationships: vec![
                    Relationship::new("file-a", "function-f", RelationshipType::Contains),
                    Relationship::new("file-a", "function-g", RelationshipType::Contains),
                    Relationship::new("function-f", "function-g", RelationshipType::Calls),
                ],
                ..Batch::default()
            })
            .unwrap();
        store
    }

    #[test]
    fn test_node_round_trip() {
        let store = store();
        let node = store.get_node("file-a").unwrap().unwrap();
        assert_eq!(node.kind, NodeKind::File);
        assert_eq!(node.property_str("checksum"), Some("abc"));
        assert!(store.get_node("missing").unwrap().is_none());
    }

    #[test]
    fn test_edges_and_children() {
        let store = store();
        assert_eq!(store.outgoing("file-a").unwrap().len(), 2);
        assert_eq!(store.incoming("function-g").unwrap().len(), 2);

        let children: Vec<String> = store
            .children("file-a")
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(children, vec!["f", "g"]);
        assert_eq!(store.related("function-f").unwrap()[0].id, "function-g");
    }

    #[test]
    fn test_file_checksums() {
        let checksums = store().file_checksums().unwrap();
        assert_eq!(checksums.len(), 2);
        assert_eq!(checksums["a.py"], "abc");
    }

    #[test]
    fn test_summary() {
        let summary = store().summary().unwrap();
        assert_eq!(summary.total_nodes, 4);
        assert_eq!(summary.total_relationships, 3);
        assert_eq!(summary.nodes_by_kind["Function"], 2);
        assert_eq!(summary.relationships_by_type["CONTAINS"], 2);
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.languages["python"], 1);
        assert_eq!(summary.total_size, 150);
    }

    #[test]
    fn test_embedding_dimension_is_enforced() {
        let mut store = store();
        assert!(matches!(
            store.set_embedding("function-f", &[1.0, 0.0, 0.0]),
            Err(StoreError::EmbeddingDimension { expected: 2, actual: 3, .. })
        ));
        assert!(matches!(
            store.set_embedding("missing", &[1.0, 0.0]),
            Err(StoreError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_nearest_by_embedding() {
        let mut store = store();
        store.set_embedding("function-f", &[1.0, 0.0]).unwrap();
        store.set_embedding("function-g", &[0.0, 1.0]).unwrap();
        store.set_embedding("file-a", &[0.9, 0.1]).unwrap();

        let hits = store
            .nearest_by_embedding(Some(NodeKind::Function), &[0.8, 0.2], 1)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "function-f");

        let hits = store.nearest_by_embedding(None, &[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].id, "function-f");
        assert_eq!(hits[1].id, "file-a");
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_summary_counts() {
        let mut store = store();
        store.set_summary("function-f", "calls g").unwrap();
        assert_eq!(store.summary_counts(NodeKind::Function).unwrap(), (2, 1));
        assert_eq!(store.unsummarized(NodeKind::Function).unwrap().len(), 1);
    }
}
