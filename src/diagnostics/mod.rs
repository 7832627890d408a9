//! Structured diagnostics for skipped and failed files.
//!
//! Deterministically ordered so reports and JSON output are stable across runs.

pub mod file_diagnostics;

pub use file_diagnostics::{DiagnosticStage, FileDiagnostic, SkipReason};
