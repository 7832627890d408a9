//! Batch merge engine.
//!
//! A batch is applied in one transaction: file units replace everything their
//! file previously owned, then nodes and relationships are upserted by key.
//! Relationships whose endpoints do not exist after the node upserts are
//! rejected and counted, never stored.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;

use super::delete::owned_ids;
use super::{encode_embedding, GraphStore, StoreResult};
use crate::identity;
use crate::ingest::FileGraph;
use crate::model::{ExtractionDocument, Node, PendingLink, Relationship};

/// One file's complete extraction output, replacing whatever the file owned before.
#[derive(Debug, Clone, Default)]
pub struct FileUnit {
    /// Project-relative path
    pub path: String,
    pub graph: FileGraph,
}

impl FileUnit {
    pub fn new(path: impl Into<String>, graph: FileGraph) -> Self {
        Self {
            path: path.into(),
            graph,
        }
    }
}

/// Records written in one transaction.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub files: Vec<FileUnit>,
    /// Nodes not owned by a file unit (directories, document records).
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl Batch {
    pub fn weight(&self) -> usize {
        self.files.iter().map(|u| u.graph.weight()).sum::<usize>()
            + self.nodes.len()
            + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|u| u.path.clone()).collect()
    }
}

/// Group file units into batches of at most `batch_size` records.
///
/// A unit heavier than `batch_size` gets a batch of its own; units are never split.
pub fn plan_batches(units: Vec<FileUnit>, batch_size: usize) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch::default();

    for unit in units {
        let weight = unit.graph.weight();
        if !current.is_empty() && current.weight() + weight > batch_size {
            batches.push(std::mem::take(&mut current));
        }
        current.files.push(unit);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Counts from applying one or more batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub nodes_deleted: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub relationships_rejected: usize,
    pub relationships_deleted: usize,
    pub pending_links: usize,
}

impl BatchOutcome {
    pub fn absorb(&mut self, other: &BatchOutcome) {
        self.nodes_created += other.nodes_created;
        self.nodes_updated += other.nodes_updated;
        self.nodes_deleted += other.nodes_deleted;
        self.relationships_created += other.relationships_created;
        self.relationships_updated += other.relationships_updated;
        self.relationships_rejected += other.relationships_rejected;
        self.relationships_deleted += other.relationships_deleted;
        self.pending_links += other.pending_links;
    }
}

/// Result of ingesting a whole document in chunks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentOutcome {
    pub totals: BatchOutcome,
    pub chunks_applied: usize,
    pub chunks_failed: usize,
}

/// Scalar columns of a node row, compared to decide whether an upsert changes anything.
#[derive(Debug, PartialEq)]
struct NodeRow {
    kind: String,
    name: String,
    full_name: String,
    file_path: Option<String>,
    raw_code: Option<String>,
    start_line: Option<i64>,
    end_line: Option<i64>,
    start_column: Option<i64>,
    end_column: Option<i64>,
    properties: String,
}

impl NodeRow {
    fn from_node(node: &Node) -> StoreResult<Self> {
        let loc = node.location;
        Ok(Self {
            kind: node.kind.as_str().to_string(),
            name: node.name.clone(),
            full_name: node.full_name.clone(),
            file_path: node.file_path().map(str::to_string),
            raw_code: node.raw_code.clone(),
            start_line: loc.map(|l| l.start_line as i64),
            end_line: loc.map(|l| l.end_line as i64),
            start_column: loc.map(|l| l.start_column as i64),
            end_column: loc.map(|l| l.end_column as i64),
            properties: serde_json::to_string(&node.properties)?,
        })
    }
}

impl GraphStore {
    /// Apply one batch atomically.
    pub fn apply_batch(&mut self, batch: &Batch) -> StoreResult<BatchOutcome> {
        let dimensions = self.options().embedding_dimensions;
        let tx = self.conn_mut().transaction()?;
        let mut outcome = BatchOutcome::default();

        for unit in &batch.files {
            replace_owned(&tx, unit, &mut outcome)?;
        }

        let nodes = batch
            .files
            .iter()
            .flat_map(|u| u.graph.nodes.iter())
            .chain(batch.nodes.iter());
        for node in nodes {
            upsert_node(&tx, node, dimensions, &mut outcome)?;
        }

        let relationships = batch
            .files
            .iter()
            .flat_map(|u| u.graph.relationships.iter())
            .chain(batch.relationships.iter());
        for rel in relationships {
            if !endpoints_exist(&tx, rel)? {
                tracing::debug!(
                    source = %rel.source_id,
                    target = %rel.target_id,
                    rel_type = %rel.rel_type,
                    "rejecting relationship with missing endpoint"
                );
                outcome.relationships_rejected += 1;
                continue;
            }
            upsert_relationship(&tx, rel, &mut outcome)?;
        }

        for unit in &batch.files {
            outcome.pending_links += replace_pending_links(&tx, &unit.path, &unit.graph.references)?;
        }

        tx.commit()?;
        Ok(outcome)
    }

    /// Ingest an arbitrary document: nodes first, then relationships, then
    /// pending links, each chunk in its own transaction.
    ///
    /// A failed chunk is logged and skipped; the others still land.
    pub fn apply_document(
        &mut self,
        doc: &ExtractionDocument,
        batch_size: usize,
    ) -> DocumentOutcome {
        let batch_size = batch_size.max(1);
        let mut result = DocumentOutcome::default();

        let node_chunks = doc.nodes.chunks(batch_size).map(|chunk| Batch {
            nodes: chunk.to_vec(),
            ..Batch::default()
        });
        let rel_chunks = doc.relationships.chunks(batch_size).map(|chunk| Batch {
            relationships: chunk.to_vec(),
            ..Batch::default()
        });

        for (index, batch) in node_chunks.chain(rel_chunks).enumerate() {
            match self.apply_batch(&batch) {
                Ok(outcome) => {
                    result.totals.absorb(&outcome);
                    result.chunks_applied += 1;
                }
                Err(e) => {
                    tracing::warn!(chunk = index, error = %e, "document chunk failed");
                    result.chunks_failed += 1;
                }
            }
        }

        let mut by_file: Vec<(&str, Vec<PendingLink>)> = Vec::new();
        for link in &doc.references {
            match by_file.iter_mut().find(|(path, _)| *path == link.file_path) {
                Some((_, links)) => links.push(link.clone()),
                None => by_file.push((&link.file_path, vec![link.clone()])),
            }
        }
        for (path, links) in by_file {
            match self.store_pending_links(path, &links) {
                Ok(n) => result.totals.pending_links += n,
                Err(e) => {
                    tracing::warn!(file = %path, error = %e, "pending links failed");
                    result.chunks_failed += 1;
                }
            }
        }

        result
    }

    fn store_pending_links(&mut self, path: &str, links: &[PendingLink]) -> StoreResult<usize> {
        let tx = self.conn_mut().transaction()?;
        let stored = replace_pending_links(&tx, path, links)?;
        tx.commit()?;
        Ok(stored)
    }
}

/// Delete what a file owned before and is absent from its new unit, plus
/// outgoing edges of surviving owned nodes that the new unit no longer has.
fn replace_owned(conn: &Connection, unit: &FileUnit, outcome: &mut BatchOutcome) -> StoreResult<()> {
    let file_id = identity::file_id(&unit.path);
    let previous = owned_ids(conn, &file_id)?;
    if previous.is_empty() {
        return Ok(());
    }

    let new_ids: HashSet<&str> = unit.graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let new_edges: HashSet<(&str, &str, &str)> = unit
        .graph
        .relationships
        .iter()
        .map(|r| (r.source_id.as_str(), r.target_id.as_str(), r.rel_type.as_str()))
        .collect();

    for id in &previous {
        if new_ids.contains(id.as_str()) {
            continue;
        }
        outcome.relationships_deleted += conn.execute(
            "DELETE FROM relationships WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        outcome.nodes_deleted += conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
    }

    let mut select = conn.prepare_cached(
        "SELECT target_id, type FROM relationships WHERE source_id = ?1",
    )?;
    let mut delete = conn.prepare_cached(
        "DELETE FROM relationships WHERE source_id = ?1 AND target_id = ?2 AND type = ?3",
    )?;
    for id in previous.iter().filter(|id| new_ids.contains(id.as_str())) {
        let edges: Vec<(String, String)> = select
            .query_map(params![id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<_, _>>()?;
        for (target, rel_type) in edges {
            if !new_edges.contains(&(id.as_str(), target.as_str(), rel_type.as_str())) {
                outcome.relationships_deleted += delete.execute(params![id, target, rel_type])?;
            }
        }
    }
    Ok(())
}

fn upsert_node(
    conn: &Connection,
    node: &Node,
    dimensions: usize,
    outcome: &mut BatchOutcome,
) -> StoreResult<()> {
    node.validate()?;
    let row = NodeRow::from_node(node)?;

    let embedding = match &node.embedding {
        Some(values) if values.len() != dimensions => {
            tracing::warn!(
                id = %node.id,
                expected = dimensions,
                actual = values.len(),
                "dropping embedding with wrong dimension"
            );
            None
        }
        Some(values) => Some(encode_embedding(values)),
        None => None,
    };

    let existing = conn
        .query_row(
            "SELECT kind, name, full_name, file_path, raw_code, start_line, end_line,
                    start_column, end_column, properties
             FROM nodes WHERE id = ?1",
            params![node.id],
            |r| {
                Ok(NodeRow {
                    kind: r.get(0)?,
                    name: r.get(1)?,
                    full_name: r.get(2)?,
                    file_path: r.get(3)?,
                    raw_code: r.get(4)?,
                    start_line: r.get(5)?,
                    end_line: r.get(6)?,
                    start_column: r.get(7)?,
                    end_column: r.get(8)?,
                    properties: r.get(9)?,
                })
            },
        )
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO nodes (id, kind, name, full_name, file_path, raw_code,
                                    start_line, end_line, start_column, end_column,
                                    properties, generated_summary, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    node.id,
                    row.kind,
                    row.name,
                    row.full_name,
                    row.file_path,
                    row.raw_code,
                    row.start_line,
                    row.end_line,
                    row.start_column,
                    row.end_column,
                    row.properties,
                    node.generated_summary,
                    embedding,
                ],
            )?;
            outcome.nodes_created += 1;
        }
        Some(previous) => {
            if previous == row && node.generated_summary.is_none() && embedding.is_none() {
                return Ok(());
            }
            // SET expressions see the old row, so `raw_code IS ?6` compares old to new.
            conn.execute(
                "UPDATE nodes SET
                    kind = ?2, name = ?3, full_name = ?4, file_path = ?5,
                    generated_summary = CASE
                        WHEN ?12 IS NOT NULL THEN ?12
                        WHEN raw_code IS ?6 THEN generated_summary
                        ELSE NULL END,
                    embedding = CASE
                        WHEN ?13 IS NOT NULL THEN ?13
                        WHEN raw_code IS ?6 THEN embedding
                        ELSE NULL END,
                    raw_code = ?6,
                    start_line = ?7, end_line = ?8, start_column = ?9, end_column = ?10,
                    properties = ?11
                 WHERE id = ?1",
                params![
                    node.id,
                    row.kind,
                    row.name,
                    row.full_name,
                    row.file_path,
                    row.raw_code,
                    row.start_line,
                    row.end_line,
                    row.start_column,
                    row.end_column,
                    row.properties,
                    node.generated_summary,
                    embedding,
                ],
            )?;
            outcome.nodes_updated += 1;
        }
    }
    Ok(())
}

fn endpoints_exist(conn: &Connection, rel: &Relationship) -> StoreResult<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM nodes WHERE id = ?1)
            AND EXISTS(SELECT 1 FROM nodes WHERE id = ?2)",
        params![rel.source_id, rel.target_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn upsert_relationship(
    conn: &Connection,
    rel: &Relationship,
    outcome: &mut BatchOutcome,
) -> StoreResult<()> {
    let properties = serde_json::to_string(&rel.properties)?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT properties FROM relationships
             WHERE source_id = ?1 AND target_id = ?2 AND type = ?3",
            params![rel.source_id, rel.target_id, rel.rel_type.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO relationships (source_id, target_id, type, properties)
                 VALUES (?1, ?2, ?3, ?4)",
                params![rel.source_id, rel.target_id, rel.rel_type.as_str(), properties],
            )?;
            outcome.relationships_created += 1;
        }
        Some(previous) if previous != properties => {
            conn.execute(
                "UPDATE relationships SET properties = ?4
                 WHERE source_id = ?1 AND target_id = ?2 AND type = ?3",
                params![rel.source_id, rel.target_id, rel.rel_type.as_str(), properties],
            )?;
            outcome.relationships_updated += 1;
        }
        Some(_) => {}
    }
    Ok(())
}

/// Replace a file's pending links. Links whose source node is absent are dropped.
fn replace_pending_links(conn: &Connection, path: &str, links: &[PendingLink]) -> StoreResult<usize> {
    conn.execute("DELETE FROM pending_links WHERE file_path = ?1", params![path])?;

    let mut insert = conn.prepare_cached(
        "INSERT INTO pending_links (file_path, source_id, kind, candidates)
         SELECT ?1, ?2, ?3, ?4 WHERE EXISTS(SELECT 1 FROM nodes WHERE id = ?2)",
    )?;
    let mut stored = 0;
    for link in links {
        let candidates = serde_json::to_string(&link.candidates)?;
        let n = insert.execute(params![path, link.source_id, link.kind.as_str(), candidates])?;
        if n == 0 {
            tracing::debug!(file = %path, source = %link.source_id, "dropping pending link without source node");
        }
        stored += n;
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StoreError, StoreOptions};
    use crate::model::{LinkKind, NodeKind, RelationshipType};

    fn store() -> GraphStore {
        GraphStore::open_in_memory(StoreOptions {
            embedding_dimensions: 3,
            ..StoreOptions::default()
        })
        .unwrap()
    }

    fn file_node(path: &str) -> Node {
        Node::new(identity::file_id(path), NodeKind::File, path)
            .with_property("file_path", path)
    }

    fn function(path: &str, name: &str, code: &str) -> Node {
        let mut node = Node::new(format!("function-{}-{}", name, path), NodeKind::Function, name)
            .with_property("file_path", path);
        node.raw_code = Some(code.to_string());
        node
    }

    fn unit(path: &str, functions: &[(&str, &str)]) -> FileUnit {
        let file = file_node(path);
        let mut graph = FileGraph::default();
        for (name, code) in functions {
            let f = function(path, name, code);
            graph
                .relationships
                .push(Relationship::new(&file.id, &f.id, RelationshipType::Contains));
            graph.nodes.push(f);
        }
        graph.nodes.insert(0, file);
        FileUnit::new(path, graph)
    }

    fn batch_of(units: Vec<FileUnit>) -> Batch {
        Batch {
            files: units,
            ..Batch::default()
        }
    }

    #[test]
    fn test_plan_batches_never_splits_a_unit() {
        let units = vec![
            unit("a.py", &[("f", "def f(): pass")]),
            unit("b.py", &[("g", "def g(): pass"), ("h", "def h(): pass")]),
            unit("c.py", &[]),
        ];
        // weights: 3, 5, 1
        let batches = plan_batches(units, 4);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].paths(), vec!["a.py"]);
        assert_eq!(batches[1].paths(), vec!["b.py"]);
        assert_eq!(batches[2].paths(), vec!["c.py"]);

        let batches = plan_batches(vec![unit("a.py", &[]), unit("b.py", &[])], 10);
        assert_eq!(batches.len(), 1);
    }

    #[test]
    fn test_reapplying_is_a_no_op() {
        let mut store = store();
        let batch = batch_of(vec![unit("a.py", &[("f", "def f(): pass")])]);

        let first = store.apply_batch(&batch).unwrap();
        assert_eq!(first.nodes_created, 2);
        assert_eq!(first.relationships_created, 1);

        let second = store.apply_batch(&batch).unwrap();
        assert_eq!(second, BatchOutcome::default());
        assert_eq!(store.count_nodes().unwrap(), 2);
    }

    #[test]
    fn test_replacement_removes_stale_nodes() {
        let mut store = store();
        store
            .apply_batch(&batch_of(vec![unit(
                "a.py",
                &[("f", "def f(): pass"), ("g", "def g(): pass")],
            )]))
            .unwrap();

        let outcome = store
            .apply_batch(&batch_of(vec![unit("a.py", &[("f", "def f(): pass")])]))
            .unwrap();
        assert_eq!(outcome.nodes_deleted, 1);
        assert_eq!(outcome.relationships_deleted, 1);
        assert!(store.get_node("function-g-a.py").unwrap().is_none());
        assert_eq!(store.dangling_relationships().unwrap(), 0);
    }

    #[test]
    fn test_summary_survives_unless_code_changes() {
        let mut store = store();
        store
            .apply_batch(&batch_of(vec![unit("a.py", &[("f", "def f(): pass")])]))
            .unwrap();
        store.set_summary("function-f-a.py", "does nothing").unwrap();
        store.set_embedding("function-f-a.py", &[0.1, 0.2, 0.3]).unwrap();

        // Same code, different properties: summary kept.
        let mut changed = unit("a.py", &[("f", "def f(): pass")]);
        changed.graph.nodes[1]
            .properties
            .insert("is_async".into(), true.into());
        let outcome = store.apply_batch(&batch_of(vec![changed])).unwrap();
        assert_eq!(outcome.nodes_updated, 1);
        let node = store.get_node("function-f-a.py").unwrap().unwrap();
        assert_eq!(node.generated_summary.as_deref(), Some("does nothing"));
        assert_eq!(node.embedding.as_ref().map(Vec::len), Some(3));

        // New code: summary and embedding cleared.
        store
            .apply_batch(&batch_of(vec![unit("a.py", &[("f", "def f(): return 1")])]))
            .unwrap();
        let node = store.get_node("function-f-a.py").unwrap().unwrap();
        assert!(node.generated_summary.is_none());
        assert!(node.embedding.is_none());
    }

    #[test]
    fn test_dangling_relationship_is_rejected() {
        let mut store = store();
        let mut u = unit("a.py", &[("f", "def f(): pass")]);
        u.graph.relationships.push(Relationship::new(
            "function-f-a.py",
            "function-missing",
            RelationshipType::Calls,
        ));

        let outcome = store.apply_batch(&batch_of(vec![u])).unwrap();
        assert_eq!(outcome.relationships_rejected, 1);
        assert_eq!(outcome.relationships_created, 1);
        assert_eq!(store.count_relationships().unwrap(), 1);
    }

    #[test]
    fn test_relationship_to_node_of_same_batch_is_accepted() {
        let mut store = store();
        let mut a = unit("a.py", &[("f", "def f(): pass")]);
        a.graph.relationships.push(Relationship::new(
            "function-f-a.py",
            "function-g-b.py",
            RelationshipType::Calls,
        ));
        let b = unit("b.py", &[("g", "def g(): pass")]);

        let outcome = store.apply_batch(&batch_of(vec![a, b])).unwrap();
        assert_eq!(outcome.relationships_rejected, 0);
        assert_eq!(outcome.relationships_created, 3);
    }

    #[test]
    fn test_pending_links_are_replaced_per_file() {
        let mut store = store();
        let mut u = unit("a.py", &[("f", "def f(): pass")]);
        u.graph.references.push(PendingLink {
            source_id: "function-f-a.py".into(),
            kind: LinkKind::Calls,
            candidates: vec!["b.g".into()],
            file_path: "a.py".into(),
        });
        let outcome = store.apply_batch(&batch_of(vec![u])).unwrap();
        assert_eq!(outcome.pending_links, 1);

        let outcome = store
            .apply_batch(&batch_of(vec![unit("a.py", &[("f", "def f(): pass")])]))
            .unwrap();
        assert_eq!(outcome.pending_links, 0);
        assert_eq!(store.summary().unwrap().pending_links, 0);
    }

    #[test]
    fn test_invalid_node_fails_whole_batch() {
        let mut store = store();
        let mut bad = unit("b.py", &[("g", "def g(): pass")]);
        bad.graph.nodes.push(Node::new("function-blank", NodeKind::Function, " "));
        let batch = Batch {
            files: vec![unit("a.py", &[("f", "def f(): pass")]), bad],
            ..Batch::default()
        };

        let err = store.apply_batch(&batch).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert_eq!(store.count_nodes().unwrap(), 0);
        assert_eq!(store.count_relationships().unwrap(), 0);
    }

    #[test]
    fn test_apply_document_counts_rejections() {
        let mut store = store();
        let mut doc = ExtractionDocument::new("python");
        doc.nodes.push(file_node("a.py"));
        doc.nodes.push(function("a.py", "f", "def f(): pass"));
        doc.relationships.push(Relationship::new(
            identity::file_id("a.py"),
            "function-f-a.py",
            RelationshipType::Contains,
        ));
        doc.relationships.push(Relationship::new(
            "function-f-a.py",
            "nowhere",
            RelationshipType::Calls,
        ));

        let result = store.apply_document(&doc, 1);
        assert_eq!(result.chunks_failed, 0);
        assert_eq!(result.chunks_applied, 4);
        assert_eq!(result.totals.nodes_created, 2);
        assert_eq!(result.totals.relationships_created, 1);
        assert_eq!(result.totals.relationships_rejected, 1);
    }
}
