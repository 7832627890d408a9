//! Deletion of file subtrees and orphan pruning.
//!
//! A file owns every node reachable from its File node over containment edges
//! (CONTAINS, DEFINES, DECLARES). Deleting the file deletes that set, every
//! relationship touching it, and the pending links it produced.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::{GraphStore, StoreResult};

/// Counts from a delete operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteResult {
    pub nodes_deleted: usize,
    pub relationships_deleted: usize,
    pub pending_links_deleted: usize,
}

impl DeleteResult {
    pub fn is_empty(&self) -> bool {
        self.nodes_deleted == 0 && self.relationships_deleted == 0 && self.pending_links_deleted == 0
    }

    pub fn absorb(&mut self, other: &DeleteResult) {
        self.nodes_deleted += other.nodes_deleted;
        self.relationships_deleted += other.relationships_deleted;
        self.pending_links_deleted += other.pending_links_deleted;
    }
}

/// Ids reachable from `root_id` over containment edges, root included.
///
/// Empty when the root does not exist.
pub(crate) fn owned_ids(conn: &Connection, root_id: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "WITH RECURSIVE owned(id) AS (
             SELECT id FROM nodes WHERE id = ?1
             UNION
             SELECT r.target_id FROM relationships r
             JOIN owned o ON r.source_id = o.id
             WHERE r.type IN ('CONTAINS', 'DEFINES', 'DECLARES')
         )
         SELECT id FROM owned ORDER BY id",
    )?;
    let ids = stmt
        .query_map(params![root_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn delete_ids(conn: &Connection, ids: &[String]) -> StoreResult<DeleteResult> {
    let mut result = DeleteResult::default();
    for id in ids {
        result.pending_links_deleted +=
            conn.execute("DELETE FROM pending_links WHERE source_id = ?1", params![id])?;
        result.relationships_deleted += conn.execute(
            "DELETE FROM relationships WHERE source_id = ?1 OR target_id = ?1",
            params![id],
        )?;
        result.nodes_deleted += conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
    }
    Ok(result)
}

impl GraphStore {
    /// Delete a node and everything it contains.
    pub fn delete_subtree(&mut self, id: &str) -> StoreResult<DeleteResult> {
        let tx = self.conn_mut().transaction()?;
        let ids = owned_ids(&tx, id)?;
        let result = delete_ids(&tx, &ids)?;
        tx.commit()?;
        Ok(result)
    }

    /// Delete everything extracted from `path`. Deleting an unknown path is a no-op.
    pub fn delete_file(&mut self, path: &str) -> StoreResult<DeleteResult> {
        let tx = self.conn_mut().transaction()?;

        let file_id: Option<String> = tx
            .query_row(
                "SELECT id FROM nodes WHERE kind = 'File' AND file_path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()?;

        let mut result = match file_id {
            Some(id) => {
                let ids = owned_ids(&tx, &id)?;
                delete_ids(&tx, &ids)?
            }
            None => DeleteResult::default(),
        };
        // Links recorded for the file whose source node is already gone.
        result.pending_links_deleted +=
            tx.execute("DELETE FROM pending_links WHERE file_path = ?1", params![path])?;

        tx.commit()?;
        if !result.is_empty() {
            tracing::debug!(file = %path, nodes = result.nodes_deleted, "deleted file subtree");
        }
        Ok(result)
    }

    /// Remove Directory nodes with nothing inside and ExternalLibrary nodes
    /// nothing points to. Repeats until a pass removes nothing, since emptying a
    /// directory can empty its parent.
    pub fn prune_orphans(&mut self) -> StoreResult<DeleteResult> {
        let tx = self.conn_mut().transaction()?;
        let mut total = DeleteResult::default();

        loop {
            let orphans: Vec<String> = {
                let mut stmt = tx.prepare_cached(
                    "SELECT n.id FROM nodes n
                     WHERE (n.kind = 'Directory' AND NOT EXISTS (
                                SELECT 1 FROM relationships r
                                WHERE r.source_id = n.id AND r.type = 'CONTAINS'))
                        OR (n.kind = 'ExternalLibrary' AND NOT EXISTS (
                                SELECT 1 FROM relationships r WHERE r.target_id = n.id))
                     ORDER BY n.id",
                )?;
                let rows = stmt.query_map([], |row| row.get(0))?;
                rows.collect::<Result<_, _>>()?
            };
            if orphans.is_empty() {
                break;
            }
            total.absorb(&delete_ids(&tx, &orphans)?);
        }

        tx.commit()?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Batch, FileUnit, StoreOptions};
    use crate::identity;
    use crate::ingest::FileGraph;
    use crate::model::{LinkKind, Node, NodeKind, PendingLink, Relationship, RelationshipType};

    fn seeded() -> GraphStore {
        let mut store = GraphStore::open_in_memory(StoreOptions::default()).unwrap();

        let file = Node::new(identity::file_id("pkg/a.py"), NodeKind::File, "a.py")
            .with_property("file_path", "pkg/a.py");
        let class = Node::new("class-A", NodeKind::Class, "A").with_property("file_path", "pkg/a.py");
        let method = Node::new("method-run", NodeKind::Method, "run").with_property("file_path", "pkg/a.py");
        let lib = Node::new(identity::external_library_id("requests"), NodeKind::ExternalLibrary, "requests");
        let other = Node::new(identity::file_id("b.py"), NodeKind::File, "b.py")
            .with_property("file_path", "b.py");
        let dir = Node::new(identity::directory_id("pkg"), NodeKind::Directory, "pkg");

        let graph = FileGraph {
            nodes: vec![file.clone(), class.clone(), method.clone(), lib.clone()],
            relationships: vec![
                Relationship::new(&file.id, &class.id, RelationshipType::Contains),
                Relationship::new(&class.id, &method.id, RelationshipType::Defines),
                Relationship::new(&file.id, &lib.id, RelationshipType::Imports),
            ],
            references: vec![PendingLink {
                source_id: method.id.clone(),
                kind: LinkKind::Calls,
                candidates: vec!["b.helper".into()],
                file_path: "pkg/a.py".into(),
            }],
        };
        let other_graph = FileGraph {
            nodes: vec![other.clone()],
            ..FileGraph::default()
        };
        let batch = Batch {
            files: vec![FileUnit::new("pkg/a.py", graph), FileUnit::new("b.py", other_graph)],
            nodes: vec![dir.clone()],
            relationships: vec![
                Relationship::new(&dir.id, &file.id, RelationshipType::Contains),
                Relationship::new(&other.id, &class.id, RelationshipType::Imports),
            ],
        };
        store.apply_batch(&batch).unwrap();
        store
    }

    #[test]
    fn test_delete_file_cascades() {
        let mut store = seeded();
        let result = store.delete_file("pkg/a.py").unwrap();

        assert_eq!(result.nodes_deleted, 3);
        // CONTAINS, DEFINES, IMPORTS lib, dir CONTAINS file, b IMPORTS A
        assert_eq!(result.relationships_deleted, 5);
        assert_eq!(result.pending_links_deleted, 1);
        assert_eq!(store.dangling_relationships().unwrap(), 0);
        assert!(store.get_node("class-A").unwrap().is_none());
        assert!(store.get_node(&identity::file_id("b.py")).unwrap().is_some());
    }

    #[test]
    fn test_delete_file_is_idempotent() {
        let mut store = seeded();
        store.delete_file("pkg/a.py").unwrap();
        let again = store.delete_file("pkg/a.py").unwrap();
        assert!(again.is_empty());
        assert!(store.delete_file("never/seen.py").unwrap().is_empty());
    }

    #[test]
    fn test_prune_orphans_after_delete() {
        let mut store = seeded();
        assert!(store.prune_orphans().unwrap().is_empty());

        store.delete_file("pkg/a.py").unwrap();
        let pruned = store.prune_orphans().unwrap();
        // Empty `pkg` directory and the unreferenced library.
        assert_eq!(pruned.nodes_deleted, 2);
        assert!(store.nodes_by_kind(NodeKind::ExternalLibrary).unwrap().is_empty());
        assert!(store.nodes_by_kind(NodeKind::Directory).unwrap().is_empty());
    }

    #[test]
    fn test_delete_subtree() {
        let mut store = seeded();
        let result = store.delete_subtree("class-A").unwrap();
        assert_eq!(result.nodes_deleted, 2);
        assert!(store.get_node(&identity::file_id("pkg/a.py")).unwrap().is_some());
        assert_eq!(store.dangling_relationships().unwrap(), 0);
    }
}
