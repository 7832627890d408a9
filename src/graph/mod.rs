//! Graph persistence layer on SQLite.
//!
//! `GraphStore` owns the only connection that writes persistent state. The
//! operations are split across submodules that each add an `impl GraphStore`
//! block: merge (batch upserts), delete (file removal and orphan pruning),
//! linker (cross-file references), query (reads, embeddings) and run_log.
mod schema;

pub mod delete;
pub mod filter;
pub mod linker;
pub mod merge;
pub mod query;
pub mod run_log;
pub mod scan;


use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use delete::DeleteResult;
pub use filter::FileFilter;
pub use linker::LinkStats;
pub use merge::{Batch, BatchOutcome, FileUnit};
pub use query::{GraphSummary, NodeMatch};
pub use run_log::RunRecord;
pub use scan::{collect_files, WalkResult, WalkedFile};
pub use schema::SCHEMA_VERSION;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    Invalid(#[from] crate::model::ModelError),

    #[error("embedding for {id} has {actual} dimensions, store expects {expected}")]
    EmbeddingDimension {
        id: String,
        expected: usize,
        actual: usize,
    },

    #[error("no node with id {0}")]
    UnknownNode(String),

    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Fixed length of every stored embedding.
    pub embedding_dimensions: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            embedding_dimensions: 768,
        }
    }
}

/// Property graph store.
pub struct GraphStore {
    conn: Connection,
    options: StoreOptions,
}

impl GraphStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path, options: StoreOptions) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        // WAL lets `status` read while an index run writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn, options)
    }

    pub fn open_in_memory(options: StoreOptions) -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, options)
    }

    fn init(conn: Connection, options: StoreOptions) -> StoreResult<Self> {
        conn.busy_timeout(options.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::ensure_schema(&conn)?;
        Ok(Self { conn, options })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

/// Encode an embedding as little-endian f32 bytes.
pub(crate) fn encode_embedding(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_embedding(bytes: &[u8]) -> StoreResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Corrupt(format!(
            "embedding blob of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
