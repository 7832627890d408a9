//! Index run coordinator.
//!
//! One run walks the project, extracts new and modified files on a rayon pool,
//! writes the results in bounded batches, reconciles deletions and resolves
//! cross-file references.
//!
//! # Ordering
//!
//! 1. Extraction runs in parallel per chunk of files; nothing is written yet.
//! 2. Batches of one chunk are written sequentially, one transaction each.
//! 3. Directory hierarchy, deletions and orphan pruning run strictly after the
//!    whole walk is ingested.
//! 4. Linking runs last so every candidate target is stored.
//!
//! Cancellation is checked between files and between batches. A cancelled run
//! keeps what it committed and skips deletion reconciliation.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::change::{self, FileStatus};
use crate::config::IndexConfig;
use crate::diagnostics::{DiagnosticStage, FileDiagnostic};
use crate::graph::run_log::new_execution_id;
use crate::graph::{
    collect_files, merge::plan_batches, Batch, BatchOutcome, FileUnit, GraphStore, WalkResult,
    WalkedFile,
};
use crate::identity;
use crate::ingest::{
    extractor_for, ExtractContext, Extractor, FileGraph, Language, ManifestIndex, ProjectIndex,
    RunContext,
};
use crate::model::{ExtractionDocument, Node, NodeKind, Relationship, RelationshipType};

/// Files extracted before their results are written.
const FILES_PER_JOB_CHUNK: usize = 16;

/// A file that could not be indexed in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub stage: DiagnosticStage,
    pub reason: String,
}

impl From<&FileFailure> for FileDiagnostic {
    fn from(f: &FileFailure) -> Self {
        FileDiagnostic::error(&f.path, f.stage, &f.reason)
    }
}

/// Aggregate counts of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub execution_id: String,
    pub files_discovered: usize,
    pub files_new: usize,
    pub files_modified: usize,
    pub files_unchanged: usize,
    pub files_deleted: usize,
    /// Files whose extraction output was committed
    pub files_processed: usize,
    pub files_failed: Vec<FileFailure>,
    pub files_skipped: usize,
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub nodes_deleted: usize,
    pub relationships_created: usize,
    pub relationships_updated: usize,
    pub relationships_rejected: usize,
    pub relationships_deleted: usize,
    pub links_resolved: usize,
    pub links_unresolved: usize,
    pub links_ambiguous: usize,
    pub batches_failed: usize,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl RunReport {
    fn absorb(&mut self, outcome: &BatchOutcome) {
        self.nodes_created += outcome.nodes_created;
        self.nodes_updated += outcome.nodes_updated;
        self.nodes_deleted += outcome.nodes_deleted;
        self.relationships_created += outcome.relationships_created;
        self.relationships_updated += outcome.relationships_updated;
        self.relationships_rejected += outcome.relationships_rejected;
        self.relationships_deleted += outcome.relationships_deleted;
    }

    /// Run-log outcome label.
    pub fn outcome(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else if !self.files_failed.is_empty() || self.batches_failed > 0 {
            "partial"
        } else {
            "success"
        }
    }
}

enum FileOutcome {
    Unchanged,
    Extracted {
        status: FileStatus,
        graph: FileGraph,
    },
    Failed(FileFailure),
    Cancelled,
}

pub struct Indexer {
    config: IndexConfig,
    extractors: HashMap<Language, Arc<dyn Extractor>>,
    cancel: Arc<AtomicBool>,
}

impl Indexer {
    pub fn new(config: IndexConfig) -> Self {
        let extractors = Language::ALL
            .iter()
            .map(|&language| (language, extractor_for(language)))
            .collect();
        Self {
            config,
            extractors,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the extractor used for one language.
    pub fn with_extractor(mut self, language: Language, extractor: Arc<dyn Extractor>) -> Self {
        self.extractors.insert(language, extractor);
        self
    }

    /// Share a cancellation flag, typically set from a signal handler.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run one index pass.
    ///
    /// Errors only when the run cannot start (bad config, store unavailable)
    /// or the store fails outside a batch; per-file and per-batch failures are
    /// reported in the returned report.
    pub fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        self.config.validate()?;

        let db_path = self.config.db_path();
        let mut store = GraphStore::open(&db_path, self.config.store_options())
            .with_context(|| format!("failed to open graph store at {}", db_path.display()))?;

        let execution_id = new_execution_id();
        let root = self.config.root.to_string_lossy().to_string();
        store.start_run(&execution_id, &root)?;
        tracing::info!(execution_id = %execution_id, root = %root, "index run started");

        let result = self.run_with_store(&mut store, &execution_id, started);
        match &result {
            Ok(report) => {
                let json = serde_json::to_string(report)?;
                if let Err(e) = store.finish_run(&execution_id, report.outcome(), None, Some(&json)) {
                    tracing::warn!(error = %e, "failed to record run outcome");
                }
                tracing::info!(
                    processed = report.files_processed,
                    failed = report.files_failed.len(),
                    unchanged = report.files_unchanged,
                    deleted = report.files_deleted,
                    nodes_created = report.nodes_created,
                    relationships_rejected = report.relationships_rejected,
                    duration_ms = report.duration_ms,
                    "index run finished"
                );
            }
            Err(e) => {
                let message = format!("{:#}", e);
                if let Err(log_err) = store.finish_run(&execution_id, "error", Some(&message), None) {
                    tracing::warn!(error = %log_err, "failed to record run outcome");
                }
            }
        }
        result
    }

    fn run_with_store(
        &self,
        store: &mut GraphStore,
        execution_id: &str,
        started: Instant,
    ) -> Result<RunReport> {
        let config = &self.config;
        let mut report = RunReport {
            execution_id: execution_id.to_string(),
            ..RunReport::default()
        };

        let manifests = ManifestIndex::scan(&config.root, &config.ignore_dirs);
        let walk = collect_files(config)?;
        report.files_discovered = walk.files.len();
        report.files_skipped = walk.skipped.len();

        let run = RunContext::new(manifests, project_index(&config.root, &walk));
        let stored = store.file_checksums()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.jobs)
            .build()
            .context("failed to build extraction thread pool")?;

        let mut committed: HashSet<String> = HashSet::new();

        for chunk in walk.files.chunks(config.jobs * FILES_PER_JOB_CHUNK) {
            if self.cancelled() {
                report.cancelled = true;
                break;
            }

            let outcomes: Vec<(String, FileOutcome)> = pool.install(|| {
                chunk
                    .par_iter()
                    .map(|file| (file.rel_path.clone(), self.process_file(file, &stored, &run)))
                    .collect()
            });

            let mut units = Vec::new();
            for (path, outcome) in outcomes {
                match outcome {
                    FileOutcome::Unchanged => report.files_unchanged += 1,
                    FileOutcome::Extracted { status, graph } => {
                        match status {
                            FileStatus::New => report.files_new += 1,
                            FileStatus::Modified => report.files_modified += 1,
                            _ => report.files_unchanged += 1,
                        }
                        units.push(FileUnit::new(path, graph));
                    }
                    FileOutcome::Failed(failure) => {
                        report.files_failed.push(failure);
                    }
                    FileOutcome::Cancelled => report.cancelled = true,
                }
            }

            for (index, batch) in plan_batches(units, config.batch_size).into_iter().enumerate() {
                if self.cancelled() {
                    report.cancelled = true;
                    break;
                }
                match store.apply_batch(&batch) {
                    Ok(outcome) => {
                        report.absorb(&outcome);
                        report.files_processed += batch.files.len();
                        committed.extend(batch.paths());
                    }
                    Err(e) => {
                        tracing::warn!(batch = index, files = batch.files.len(), error = %e, "batch failed");
                        report.batches_failed += 1;
                        for path in batch.paths() {
                            report.files_failed.push(FileFailure {
                                path,
                                stage: DiagnosticStage::Store,
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        // Files present in the store after this run: committed now, or kept from before.
        let present: BTreeSet<&str> = walk
            .files
            .iter()
            .map(|f| f.rel_path.as_str())
            .filter(|p| committed.contains(*p) || stored.contains_key(*p))
            .collect();
        let directories = directory_batch(config, &present);
        match store.apply_batch(&directories) {
            Ok(outcome) => report.absorb(&outcome),
            Err(e) => {
                tracing::warn!(error = %e, "directory batch failed");
                report.batches_failed += 1;
            }
        }

        if !report.cancelled {
            let seen: HashSet<String> = walk.paths().map(str::to_string).collect();
            for path in change::deleted_paths(&stored, &seen) {
                let deleted = store.delete_file(&path)?;
                tracing::debug!(file = %path, nodes = deleted.nodes_deleted, "removed deleted file");
                report.files_deleted += 1;
                report.nodes_deleted += deleted.nodes_deleted;
                report.relationships_deleted += deleted.relationships_deleted;
            }
            let pruned = store.prune_orphans()?;
            report.nodes_deleted += pruned.nodes_deleted;
            report.relationships_deleted += pruned.relationships_deleted;
        } else {
            tracing::warn!("run cancelled; skipping deletion reconciliation");
        }

        let links = store.link()?;
        report.links_resolved = links.resolved;
        report.links_unresolved = links.unresolved;
        report.links_ambiguous = links.ambiguous;

        report.files_failed.sort_by(|a, b| a.path.cmp(&b.path));
        report.duration_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    fn process_file(
        &self,
        file: &WalkedFile,
        stored: &HashMap<String, String>,
        run: &RunContext,
    ) -> FileOutcome {
        if self.cancelled() {
            return FileOutcome::Cancelled;
        }

        let bytes = match std::fs::read(&file.abs_path) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(file = %file.rel_path, error = %e, "failed to read file");
                return FileOutcome::Failed(FileFailure {
                    path: file.rel_path.clone(),
                    stage: DiagnosticStage::Read,
                    reason: e.to_string(),
                });
            }
        };
        let checksum = change::checksum(&bytes);
        let status = FileStatus::classify(stored.get(&file.rel_path).map(String::as_str), &checksum);
        if !status.needs_extraction() && !self.config.force {
            return FileOutcome::Unchanged;
        }

        match self.extract(file, &checksum, &bytes, run) {
            Ok(graph) => FileOutcome::Extracted { status, graph },
            Err(failure) => FileOutcome::Failed(failure),
        }
    }

    fn extract(
        &self,
        file: &WalkedFile,
        checksum: &str,
        bytes: &[u8],
        run: &RunContext,
    ) -> Result<FileGraph, FileFailure> {
        let Some(extractor) = self.extractors.get(&file.language) else {
            return Err(FileFailure {
                path: file.rel_path.clone(),
                stage: DiagnosticStage::Extract,
                reason: format!("no extractor registered for {}", file.language),
            });
        };
        let ctx = ExtractContext {
            rel_path: &file.rel_path,
            abs_path: &file.abs_path,
            checksum,
            config: &self.config.extractor,
            run,
            parse_timeout: self.config.parse_timeout(),
        };
        extractor.extract(&ctx, bytes).map_err(|e| {
            tracing::warn!(file = %file.rel_path, error = %e, "extraction failed");
            FileFailure {
                path: file.rel_path.clone(),
                stage: DiagnosticStage::of(&e),
                reason: e.to_string(),
            }
        })
    }

    /// Extract without a store and return the intermediate document.
    ///
    /// `paths` restricts extraction to those root-relative files; empty means
    /// every file the walk selects.
    pub fn extract_document(&self, paths: &[String]) -> Result<ExtractionDocument> {
        let config = &self.config;
        config.validate()?;

        let manifests = ManifestIndex::scan(&config.root, &config.ignore_dirs);
        let walk = collect_files(config)?;
        let run = RunContext::new(manifests, project_index(&config.root, &walk));

        let wanted: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let files: Vec<&WalkedFile> = walk
            .files
            .iter()
            .filter(|f| wanted.is_empty() || wanted.contains(f.rel_path.as_str()))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.jobs)
            .build()
            .context("failed to build extraction thread pool")?;
        let results: Vec<Result<FileGraph, FileFailure>> = pool.install(|| {
            files
                .par_iter()
                .map(|file| {
                    let bytes = std::fs::read(&file.abs_path).map_err(|e| FileFailure {
                        path: file.rel_path.clone(),
                        stage: DiagnosticStage::Read,
                        reason: e.to_string(),
                    })?;
                    let checksum = change::checksum(&bytes);
                    self.extract(file, &checksum, &bytes, &run)
                })
                .collect()
        });

        let languages: BTreeSet<&str> = files.iter().map(|f| f.language.as_str()).collect();
        let language = match languages.len() {
            1 => languages.iter().next().copied().unwrap_or("mixed"),
            _ => "mixed",
        };

        let mut doc = ExtractionDocument::new(language);
        for (file, result) in files.iter().zip(results) {
            match result {
                Ok(graph) => {
                    doc.processed_files.push(file.rel_path.clone());
                    doc.nodes.extend(graph.nodes);
                    doc.relationships.extend(graph.relationships);
                    doc.references.extend(graph.references);
                }
                Err(failure) => doc.metadata.failed_files.push(failure.path),
            }
        }
        // Library nodes repeat across files; keep the first of each.
        let mut seen = HashSet::new();
        doc.nodes.retain(|n| seen.insert(n.id.clone()));
        let mut seen = HashSet::new();
        doc.relationships.retain(|r| seen.insert(r.key()));
        doc.refresh_metadata();
        Ok(doc)
    }
}

/// Module map of the walked files, with the namespaces their C# sources declare.
fn project_index(root: &std::path::Path, walk: &WalkResult) -> ProjectIndex {
    let mut project = ProjectIndex::from_paths(walk.paths());
    project.scan_csharp_namespaces(root);
    project
}

/// Directory nodes for every directory holding a present file, the root included,
/// with CONTAINS edges down to subdirectories and files.
fn directory_batch(config: &IndexConfig, present: &BTreeSet<&str>) -> Batch {
    let root_name = config
        .root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string());

    let mut directories: BTreeSet<String> = BTreeSet::new();
    let mut batch = Batch::default();
    if present.is_empty() {
        return batch;
    }
    directories.insert(String::new());

    for path in present {
        let parent = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        batch.relationships.push(Relationship::new(
            identity::directory_id(parent),
            identity::file_id(path),
            RelationshipType::Contains,
        ));
        let mut dir = parent;
        while !dir.is_empty() {
            directories.insert(dir.to_string());
            dir = dir.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        }
    }

    for dir in &directories {
        let name = match dir.rsplit_once('/') {
            Some((_, name)) => name.to_string(),
            None if dir.is_empty() => root_name.clone(),
            None => dir.clone(),
        };
        let full_name = if dir.is_empty() { "." } else { dir.as_str() };
        batch.nodes.push(
            Node::new(identity::directory_id(dir), NodeKind::Directory, name)
                .with_full_name(full_name)
                .with_property("path", full_name)
                .with_property(
                    "absolute_path",
                    config.root.join(dir).to_string_lossy().to_string(),
                ),
        );
        if !dir.is_empty() {
            let parent = dir.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
            batch.relationships.push(Relationship::new(
                identity::directory_id(parent),
                identity::directory_id(dir),
                RelationshipType::Contains,
            ));
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_batch() {
        let config = IndexConfig::new("/work/project");
        let present: BTreeSet<&str> = ["main.py", "src/app/models.py", "src/util.py"]
            .into_iter()
            .collect();
        let batch = directory_batch(&config, &present);

        let names: Vec<&str> = batch.nodes.iter().map(|n| n.full_name.as_str()).collect();
        assert_eq!(names, vec![".", "src", "src/app"]);
        assert_eq!(batch.nodes[0].name, "project");
        // three files plus two directory links
        assert_eq!(batch.relationships.len(), 5);
        assert!(batch.relationships.contains(&Relationship::new(
            identity::directory_id("src"),
            identity::directory_id("src/app"),
            RelationshipType::Contains,
        )));
        assert!(batch.relationships.contains(&Relationship::new(
            identity::directory_id(""),
            identity::file_id("main.py"),
            RelationshipType::Contains,
        )));
    }

    #[test]
    fn test_directory_batch_empty_project() {
        let config = IndexConfig::new("/work/project");
        assert!(directory_batch(&config, &BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_report_outcome() {
        let mut report = RunReport::default();
        assert_eq!(report.outcome(), "success");
        report.batches_failed = 1;
        assert_eq!(report.outcome(), "partial");
        report.cancelled = true;
        assert_eq!(report.outcome(), "cancelled");
    }
}
