//! Cross-file reference resolution.
//!
//! Extractors record references they cannot bind inside one file as pending
//! links carrying candidate full names in priority order. Once every file of a
//! run is stored, `link` binds each one to a node with a matching `full_name`
//! and a kind the link accepts. The first candidate with any match decides:
//! one match creates the edge, several leave the link ambiguous.

use rusqlite::params;
use serde::Serialize;

use super::{GraphStore, StoreError, StoreResult};
use crate::model::{LinkKind, NodeKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub ambiguous: usize,
}

struct StoredLink {
    source_id: String,
    source_kind: NodeKind,
    kind: LinkKind,
    candidates: Vec<String>,
}

enum Resolution {
    Unique(String, NodeKind),
    Ambiguous,
    Missing,
}

impl GraphStore {
    /// Resolve every pending link. Safe to run repeatedly.
    ///
    /// Edges created here are never revisited on their own. They belong to the
    /// source node's file and are cleared only when that file is re-extracted.
    /// If a second node with the same `full_name` appears later in another
    /// file, a previously unique edge stays in place, and the link is only
    /// reported as ambiguous on this and later runs.
    pub fn link(&mut self) -> StoreResult<LinkStats> {
        let tx = self.conn_mut().transaction()?;
        let links = {
            let mut stmt = tx.prepare(
                "SELECT p.source_id, n.kind, p.kind, p.candidates
                 FROM pending_links p JOIN nodes n ON n.id = p.source_id
                 ORDER BY p.id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            let mut links = Vec::new();
            for row in rows {
                let (source_id, source_kind, kind, candidates) = row?;
                let source_kind: NodeKind = source_kind
                    .parse()
                    .map_err(|_| StoreError::Corrupt(format!("node kind '{}'", source_kind)))?;
                let Some(kind) = LinkKind::parse(&kind) else {
                    tracing::warn!(kind = %kind, "skipping pending link of unknown kind");
                    continue;
                };
                links.push(StoredLink {
                    source_id,
                    source_kind,
                    kind,
                    candidates: serde_json::from_str(&candidates)?,
                });
            }
            links
        };

        let mut stats = LinkStats::default();
        {
            let mut lookup = tx.prepare_cached(
                "SELECT id, kind FROM nodes WHERE full_name = ?1 ORDER BY id",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT OR IGNORE INTO relationships (source_id, target_id, type, properties)
                 VALUES (?1, ?2, ?3, '{\"via\":\"linker\"}')",
            )?;

            for link in &links {
                let mut resolution = Resolution::Missing;
                for candidate in &link.candidates {
                    let mut matches: Vec<(String, NodeKind)> = lookup
                        .query_map(params![candidate], |row| {
                            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                        })?
                        .filter_map(|row| row.ok())
                        .filter_map(|(id, kind)| kind.parse::<NodeKind>().ok().map(|k| (id, k)))
                        .filter(|(id, kind)| link.kind.accepts(*kind) && *id != link.source_id)
                        .collect();
                    resolution = match matches.len() {
                        0 => continue,
                        1 => {
                            let (id, kind) = matches.remove(0);
                            Resolution::Unique(id, kind)
                        }
                        _ => Resolution::Ambiguous,
                    };
                    break;
                }

                match resolution {
                    Resolution::Unique(target_id, target_kind) => {
                        let Some(rel_type) = link.kind.relationship_for(link.source_kind, target_kind)
                        else {
                            stats.unresolved += 1;
                            continue;
                        };
                        insert.execute(params![link.source_id, target_id, rel_type.as_str()])?;
                        stats.resolved += 1;
                    }
                    Resolution::Ambiguous => {
                        tracing::debug!(
                            source = %link.source_id,
                            candidates = ?link.candidates,
                            "ambiguous cross-file reference"
                        );
                        stats.ambiguous += 1;
                    }
                    Resolution::Missing => stats.unresolved += 1,
                }
            }
        }

        tx.commit()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Batch, FileUnit, StoreOptions};
    use crate::identity;
    use crate::ingest::FileGraph;
    use crate::model::{Node, PendingLink, Relationship, RelationshipType};

    fn node(id: &str, kind: NodeKind, full_name: &str, path: &str) -> Node {
        let name = full_name.rsplit('.').next().unwrap_or(full_name);
        Node::new(id, kind, name)
            .with_full_name(full_name)
            .with_property("file_path", path)
    }

    fn unit(path: &str, members: Vec<Node>, references: Vec<PendingLink>) -> FileUnit {
        let file = Node::new(identity::file_id(path), NodeKind::File, path).with_property("file_path", path);
        let relationships = members
            .iter()
            .map(|m| Relationship::new(&file.id, &m.id, RelationshipType::Contains))
            .collect();
        let mut nodes = vec![file];
        nodes.extend(members);
        FileUnit::new(
            path,
            FileGraph {
                nodes,
                relationships,
                references,
            },
        )
    }

    fn pending(source: &str, kind: LinkKind, candidates: &[&str], path: &str) -> PendingLink {
        PendingLink {
            source_id: source.into(),
            kind,
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            file_path: path.into(),
        }
    }

    fn store_with(units: Vec<FileUnit>) -> GraphStore {
        let mut store = GraphStore::open_in_memory(StoreOptions::default()).unwrap();
        store
            .apply_batch(&Batch {
                files: units,
                ..Batch::default()
            })
            .unwrap();
        store
    }

    #[test]
    fn test_call_and_instantiation() {
        let mut store = store_with(vec![
            unit(
                "a.py",
                vec![node("function-main", NodeKind::Function, "a.main", "a.py")],
                vec![
                    pending("function-main", LinkKind::Calls, &["b.helper"], "a.py"),
                    pending("function-main", LinkKind::Calls, &["b.Service"], "a.py"),
                ],
            ),
            unit(
                "b.py",
                vec![
                    node("function-helper", NodeKind::Function, "b.helper", "b.py"),
                    node("class-service", NodeKind::Class, "b.Service", "b.py"),
                ],
                vec![],
            ),
        ]);

        let stats = store.link().unwrap();
        assert_eq!(stats.resolved, 2);
        let out = store.outgoing("function-main").unwrap();
        assert!(out
            .iter()
            .any(|r| r.target_id == "function-helper" && r.rel_type == RelationshipType::Calls));
        assert!(out.iter().any(
            |r| r.target_id == "class-service" && r.rel_type == RelationshipType::Instantiates
        ));

        // Running again adds nothing.
        let before = store.count_relationships().unwrap();
        store.link().unwrap();
        assert_eq!(store.count_relationships().unwrap(), before);
    }

    #[test]
    fn test_inherits_picks_extends_or_implements() {
        let mut store = store_with(vec![
            unit(
                "Models.cs",
                vec![node("class-user", NodeKind::Class, "App.User", "Models.cs")],
                vec![pending(
                    "class-user",
                    LinkKind::Inherits,
                    &["App.Missing", "App.IEntity"],
                    "Models.cs",
                )],
            ),
            unit(
                "IEntity.cs",
                vec![node("interface-ientity", NodeKind::Interface, "App.IEntity", "IEntity.cs")],
                vec![],
            ),
        ]);

        let stats = store.link().unwrap();
        assert_eq!(stats.resolved, 1);
        let out = store.outgoing("class-user").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rel_type, RelationshipType::Implements);
    }

    #[test]
    fn test_ambiguous_and_unresolved() {
        let mut store = store_with(vec![
            unit(
                "a.py",
                vec![node("function-main", NodeKind::Function, "a.main", "a.py")],
                vec![
                    pending("function-main", LinkKind::Calls, &["dup.run"], "a.py"),
                    pending("function-main", LinkKind::Calls, &["nowhere.run"], "a.py"),
                ],
            ),
            unit("x.py", vec![node("function-run-x", NodeKind::Function, "dup.run", "x.py")], vec![]),
            unit("y.py", vec![node("function-run-y", NodeKind::Function, "dup.run", "y.py")], vec![]),
        ]);

        let stats = store.link().unwrap();
        assert_eq!(stats.resolved, 0);
        assert_eq!(stats.ambiguous, 1);
        assert_eq!(stats.unresolved, 1);
        assert!(store.outgoing("function-main").unwrap().is_empty());
    }

    #[test]
    fn test_unique_edge_outlives_new_duplicate_until_source_reextracted() {
        let caller = || {
            unit(
                "a.py",
                vec![node("function-main", NodeKind::Function, "a.main", "a.py")],
                vec![pending("function-main", LinkKind::Calls, &["b.helper"], "a.py")],
            )
        };
        let mut store = store_with(vec![
            caller(),
            unit("b.py", vec![node("function-helper-b", NodeKind::Function, "b.helper", "b.py")], vec![]),
        ]);
        assert_eq!(store.link().unwrap().resolved, 1);

        store
            .apply_batch(&Batch {
                files: vec![unit(
                    "c.py",
                    vec![node("function-helper-c", NodeKind::Function, "b.helper", "c.py")],
                    vec![],
                )],
                ..Batch::default()
            })
            .unwrap();
        assert_eq!(store.link().unwrap().ambiguous, 1);
        assert!(store
            .outgoing("function-main")
            .unwrap()
            .iter()
            .any(|r| r.target_id == "function-helper-b"));

        store
            .apply_batch(&Batch {
                files: vec![caller()],
                ..Batch::default()
            })
            .unwrap();
        assert_eq!(store.link().unwrap().ambiguous, 1);
        assert!(store.outgoing("function-main").unwrap().is_empty());
    }

    #[test]
    fn test_kind_filter_skips_wrong_targets() {
        let mut store = store_with(vec![
            unit(
                "a.ts",
                vec![node("function-main", NodeKind::Function, "a.main", "a.ts")],
                vec![pending("function-main", LinkKind::Instantiates, &["b.make"], "a.ts")],
            ),
            unit("b.ts", vec![node("function-make", NodeKind::Function, "b.make", "b.ts")], vec![]),
        ]);

        let stats = store.link().unwrap();
        assert_eq!(stats.unresolved, 1);
    }
}
