//! Content hashing and per-file change classification.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// SHA-256 of file bytes as 64 lowercase hex characters.
pub fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Status of one file relative to the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    New,
    Modified,
    Unchanged,
    Deleted,
}

impl FileStatus {
    /// Classify a file present on disk against its stored checksum, if any.
    pub fn classify(previous: Option<&str>, current: &str) -> FileStatus {
        match previous {
            None => FileStatus::New,
            Some(prev) if prev == current => FileStatus::Unchanged,
            Some(_) => FileStatus::Modified,
        }
    }

    pub fn needs_extraction(&self) -> bool {
        matches!(self, FileStatus::New | FileStatus::Modified)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::New => "new",
            FileStatus::Modified => "modified",
            FileStatus::Unchanged => "unchanged",
            FileStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Stored paths absent from the current walk, sorted.
pub fn deleted_paths(stored: &HashMap<String, String>, seen: &HashSet<String>) -> Vec<String> {
    let mut gone: Vec<String> = stored
        .keys()
        .filter(|path| !seen.contains(*path))
        .cloned()
        .collect();
    gone.sort();
    gone
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_sha256_hex() {
        let sum = checksum(b"abc");
        assert_eq!(
            sum,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(checksum(b"").len(), 64);
    }

    #[test]
    fn test_classify() {
        let sum = checksum(b"print(1)\n");
        assert_eq!(FileStatus::classify(None, &sum), FileStatus::New);
        assert_eq!(FileStatus::classify(Some(&sum), &sum), FileStatus::Unchanged);
        assert_eq!(
            FileStatus::classify(Some("0000"), &sum),
            FileStatus::Modified
        );
        assert!(!FileStatus::Unchanged.needs_extraction());
    }

    #[test]
    fn test_deleted_paths_sorted() {
        let stored: HashMap<String, String> = [("b.py", "1"), ("a.py", "2"), ("c.py", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let seen: HashSet<String> = ["c.py".to_string()].into_iter().collect();
        assert_eq!(deleted_paths(&stored, &seen), vec!["a.py", "b.py"]);
    }
}
