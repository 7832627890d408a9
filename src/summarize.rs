//! Bottom-up summarization of stored nodes.
//!
//! Leaves are summarized first so each parent sees its children's summaries.
//! The summarizer itself (an LLM client, usually) lives outside this crate;
//! this module only decides order and readiness and writes the results.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::graph::{GraphStore, StoreResult};
use crate::model::{Node, NodeKind};

/// Processing order, leaves first.
pub const SUMMARY_LEVELS: [NodeKind; 8] = [
    NodeKind::Parameter,
    NodeKind::Variable,
    NodeKind::Method,
    NodeKind::Function,
    NodeKind::Class,
    NodeKind::Interface,
    NodeKind::File,
    NodeKind::Directory,
];

/// Context lines kept per section of a prompt.
const MAX_CHILDREN: usize = 10;
const MAX_RELATED: usize = 5;

/// Everything a summarizer sees for one node.
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub node: Node,
    /// `(name, summary)` of contained nodes, ordered by name
    pub children: Vec<(String, String)>,
    /// `(name, summary)` of CALLS / REFERENCES targets
    pub related: Vec<(String, String)>,
}

impl SummaryRequest {
    /// Plain-text prompt for text-completion summarizers.
    pub fn prompt(&self) -> String {
        let mut out = format!(
            "Summarize this {}: {}\n",
            self.node.kind.as_str().to_lowercase(),
            self.node.name
        );
        if let Some(code) = &self.node.raw_code {
            out.push_str(&format!("\nCode:\n{}\n", code));
        }
        if !self.children.is_empty() {
            out.push_str("\nContains:\n");
            for (name, summary) in self.children.iter().take(MAX_CHILDREN) {
                out.push_str(&format!("- {}: {}\n", name, summary));
            }
        }
        if !self.related.is_empty() {
            out.push_str("\nUses:\n");
            for (name, summary) in self.related.iter().take(MAX_RELATED) {
                out.push_str(&format!("- {}: {}\n", name, summary));
            }
        }
        out.push_str(&format!("\nFocus on {}.\n", focus(self.node.kind)));
        out.push_str("Answer with a concise technical summary of two to four sentences.\n");
        out
    }
}

fn focus(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Parameter => "its type, purpose and default value",
        NodeKind::Variable => "its type, purpose and scope",
        NodeKind::Method | NodeKind::Function => "purpose, inputs, return value and side effects",
        NodeKind::Class | NodeKind::Interface => "its responsibility and key members",
        NodeKind::File => "its main purpose and key definitions",
        _ => "what it groups together",
    }
}

/// Produces a summary for one node.
pub trait Summarizer {
    fn summarize(&self, request: &SummaryRequest) -> Result<String>;
}

impl<F> Summarizer for F
where
    F: Fn(&SummaryRequest) -> Result<String>,
{
    fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        self(request)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryStats {
    pub summarized: usize,
    pub failed: usize,
    /// Left unsummarized because a child has no summary
    pub blocked: usize,
    pub by_kind: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelProgress {
    pub kind: NodeKind,
    pub total: usize,
    pub completed: usize,
}

fn summarizable(kind: NodeKind) -> bool {
    SUMMARY_LEVELS.contains(&kind)
}

/// Summaries of `nodes` as `(name, summary)`, skipping unsummarized ones.
fn summaries(nodes: &[Node]) -> Vec<(String, String)> {
    nodes
        .iter()
        .filter_map(|n| {
            n.generated_summary
                .as_ref()
                .filter(|s| !s.trim().is_empty())
                .map(|s| (n.name.clone(), s.clone()))
        })
        .collect()
}

/// Summarize every ready node, level by level.
///
/// A node is ready when all its summarizable children have summaries. Nodes
/// are processed `batch_size` at a time; a summarizer error leaves the node
/// unsummarized for this pass.
pub fn run_summaries(
    store: &mut GraphStore,
    summarizer: &dyn Summarizer,
    batch_size: usize,
) -> StoreResult<SummaryStats> {
    let batch_size = batch_size.max(1);
    let mut stats = SummaryStats::default();
    let mut failed: HashSet<String> = HashSet::new();

    for kind in SUMMARY_LEVELS {
        let mut done = 0;
        loop {
            let mut ready = Vec::new();
            for node in store.unsummarized(kind)? {
                if failed.contains(&node.id) {
                    continue;
                }
                let children = store.children(&node.id)?;
                if children
                    .iter()
                    .any(|c| summarizable(c.kind) && c.generated_summary.is_none())
                {
                    continue;
                }
                ready.push((node, children));
                if ready.len() == batch_size {
                    break;
                }
            }
            if ready.is_empty() {
                break;
            }

            for (node, children) in ready {
                let request = SummaryRequest {
                    children: summaries(&children),
                    related: summaries(&store.related(&node.id)?),
                    node,
                };
                match summarizer.summarize(&request) {
                    Ok(text) if !text.trim().is_empty() => {
                        store.set_summary(&request.node.id, text.trim())?;
                        done += 1;
                    }
                    Ok(_) => {
                        tracing::warn!(id = %request.node.id, "summarizer returned empty text");
                        failed.insert(request.node.id.clone());
                        stats.failed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(id = %request.node.id, error = %e, "summarization failed");
                        failed.insert(request.node.id.clone());
                        stats.failed += 1;
                    }
                }
            }
        }

        let (total, completed) = store.summary_counts(kind)?;
        let left = total - completed;
        let failed_here = store
            .unsummarized(kind)?
            .iter()
            .filter(|n| failed.contains(&n.id))
            .count();
        stats.blocked += left - failed_here;
        stats.summarized += done;
        if done > 0 {
            stats.by_kind.insert(kind.as_str().to_string(), done);
            tracing::info!(kind = %kind, summarized = done, "summarized level");
        }
    }
    Ok(stats)
}

/// Summarized versus total node counts per level.
pub fn progress(store: &GraphStore) -> StoreResult<Vec<LevelProgress>> {
    SUMMARY_LEVELS
        .iter()
        .map(|&kind| {
            let (total, completed) = store.summary_counts(kind)?;
            Ok(LevelProgress {
                kind,
                total,
                completed,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Batch, StoreOptions};
    use crate::model::{Relationship, RelationshipType};
    use std::cell::RefCell;

    fn store() -> GraphStore {
        let mut store = GraphStore::open_in_memory(StoreOptions::default()).unwrap();
        let nodes = vec![
            Node::new("file-a", NodeKind::File, "a.py"),
            Node::new("class-foo", NodeKind::Class, "Foo"),
            Node::new("method-bar", NodeKind::Method, "bar"),
            Node::new("parameter-x", NodeKind::Parameter, "x"),
            Node::new("function-helper", NodeKind::Function, "helper"),
        ];
        let relationships = vec![
            Relationship::new("file-a", "class-foo", RelationshipType::Contains),
            Relationship::new("file-a", "function-helper", RelationshipType::Contains),
            Relationship::new("class-foo", "method-bar", RelationshipType::Defines),
            Relationship::new("method-bar", "parameter-x", RelationshipType::Declares),
            Relationship::new("function-helper", "method-bar", RelationshipType::Calls),
        ];
        store
            .apply_batch(&Batch {
                nodes,
                relationships,
                ..Batch::default()
            })
            .unwrap();
        store
    }

    #[test]
    fn test_bottom_up_order_and_context() {
        let mut store = store();
        let seen = RefCell::new(Vec::new());
        let summarizer = |req: &SummaryRequest| -> Result<String> {
            seen.borrow_mut().push(req.node.name.clone());
            if req.node.name == "bar" {
                assert_eq!(req.children, vec![("x".to_string(), "summary of x".to_string())]);
            }
            if req.node.name == "helper" {
                assert_eq!(
                    req.related,
                    vec![("bar".to_string(), "summary of bar".to_string())]
                );
            }
            Ok(format!("summary of {}", req.node.name))
        };

        let stats = run_summaries(&mut store, &summarizer, 10).unwrap();
        assert_eq!(stats.summarized, 5);
        assert_eq!(stats.failed, 0);
        assert_eq!(
            *seen.borrow(),
            vec!["x", "bar", "helper", "Foo", "a.py"]
        );
        assert!(progress(&store)
            .unwrap()
            .iter()
            .all(|p| p.total == p.completed));
    }

    #[test]
    fn test_failure_blocks_parents() {
        let mut store = store();
        let summarizer = |req: &SummaryRequest| -> Result<String> {
            if req.node.name == "bar" {
                anyhow::bail!("model unavailable");
            }
            Ok("ok".to_string())
        };

        let stats = run_summaries(&mut store, &summarizer, 1).unwrap();
        assert_eq!(stats.failed, 1);
        // x and helper; Foo and a.py wait on bar
        assert_eq!(stats.summarized, 2);
        assert_eq!(stats.blocked, 2);

        let class = store.get_node("class-foo").unwrap().unwrap();
        assert!(class.generated_summary.is_none());
    }

    #[test]
    fn test_prompt_mentions_context() {
        let mut node = Node::new("function-f", NodeKind::Function, "f");
        node.raw_code = Some("def f(): pass".into());
        let request = SummaryRequest {
            node,
            children: vec![("x".into(), "the input".into())],
            related: vec![],
        };
        let prompt = request.prompt();
        assert!(prompt.starts_with("Summarize this function: f"));
        assert!(prompt.contains("def f(): pass"));
        assert!(prompt.contains("- x: the input"));
        assert!(!prompt.contains("Uses:"));
    }
}
