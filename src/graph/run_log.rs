//! Run log for tracking index runs
//!
//! Records every run with an execution id, timestamps, outcome and the
//! serialized report, so `status` can describe the last run.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{GraphStore, StoreResult};

/// Run log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub execution_id: String,
    pub tool_version: String,
    pub root: String,
    /// RFC 3339
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    /// "running", "success", "partial", "cancelled" or "error"
    pub outcome: String,
    pub error_message: Option<String>,
    /// JSON-serialized run report
    pub report: Option<String>,
}

impl RunRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            execution_id: row.get(0)?,
            tool_version: row.get(1)?,
            root: row.get(2)?,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
            duration_ms: row.get(5)?,
            outcome: row.get(6)?,
            error_message: row.get(7)?,
            report: row.get(8)?,
        })
    }
}

const RUN_COLUMNS: &str = "execution_id, tool_version, root, started_at, finished_at,
     duration_ms, outcome, error_message, report";

/// New execution id.
pub fn new_execution_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl GraphStore {
    /// Record the start of a run.
    pub fn start_run(&mut self, execution_id: &str, root: &str) -> StoreResult<()> {
        self.conn().execute(
            "INSERT INTO run_log (execution_id, tool_version, root, started_at, outcome)
             VALUES (?1, ?2, ?3, ?4, 'running')",
            params![
                execution_id,
                env!("CARGO_PKG_VERSION"),
                root,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Record the end of a run. The duration is measured from the stored start.
    pub fn finish_run(
        &mut self,
        execution_id: &str,
        outcome: &str,
        error_message: Option<&str>,
        report: Option<&str>,
    ) -> StoreResult<()> {
        let finished = Utc::now();
        let started: Option<String> = self
            .conn()
            .query_row(
                "SELECT started_at FROM run_log WHERE execution_id = ?1",
                params![execution_id],
                |row| row.get(0),
            )
            .optional()?;
        let duration_ms = started
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|s| (finished - s.with_timezone(&Utc)).num_milliseconds());

        self.conn().execute(
            "UPDATE run_log
             SET finished_at = ?2, duration_ms = ?3, outcome = ?4, error_message = ?5, report = ?6
             WHERE execution_id = ?1",
            params![
                execution_id,
                finished.to_rfc3339(),
                duration_ms,
                outcome,
                error_message,
                report
            ],
        )?;
        Ok(())
    }

    /// Most recently started run.
    pub fn last_run(&self) -> StoreResult<Option<RunRecord>> {
        let sql = format!("SELECT {} FROM run_log ORDER BY id DESC LIMIT 1", RUN_COLUMNS);
        Ok(self
            .conn()
            .query_row(&sql, [], RunRecord::from_row)
            .optional()?)
    }

    /// Runs newest first.
    pub fn list_runs(&self, limit: usize) -> StoreResult<Vec<RunRecord>> {
        let sql = format!("SELECT {} FROM run_log ORDER BY id DESC LIMIT ?1", RUN_COLUMNS);
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], RunRecord::from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::StoreOptions;

    #[test]
    fn test_run_lifecycle() {
        let mut store = GraphStore::open_in_memory(StoreOptions::default()).unwrap();
        assert!(store.last_run().unwrap().is_none());

        let id = new_execution_id();
        store.start_run(&id, "/project").unwrap();
        let running = store.last_run().unwrap().unwrap();
        assert_eq!(running.outcome, "running");
        assert!(running.finished_at.is_none());

        store
            .finish_run(&id, "success", None, Some(r#"{"processed":3}"#))
            .unwrap();
        let done = store.last_run().unwrap().unwrap();
        assert_eq!(done.execution_id, id);
        assert_eq!(done.outcome, "success");
        assert!(done.duration_ms.unwrap() >= 0);
        assert!(DateTime::parse_from_rfc3339(done.finished_at.as_deref().unwrap()).is_ok());
    }

    #[test]
    fn test_list_runs_newest_first() {
        let mut store = GraphStore::open_in_memory(StoreOptions::default()).unwrap();
        let first = new_execution_id();
        let second = new_execution_id();
        assert_ne!(first, second);
        store.start_run(&first, "/p").unwrap();
        store.start_run(&second, "/p").unwrap();

        let runs = store.list_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].execution_id, second);
    }
}
