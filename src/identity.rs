//! Deterministic node identity.
//!
//! Ids are derived only from re-derivable inputs (kind, file path, enclosing
//! scope chain, name, start line) so that extracting unchanged code twice
//! yields the same ids without a persisted registry.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::{NodeKind, SourceLocation};

/// Maximum length of the readable name segment of an id.
const NAME_SEGMENT_LEN: usize = 40;

/// Hex characters of the BLAKE3 digest kept in an id (128 bits).
const HASH_SEGMENT_LEN: usize = 32;

/// Generate the id of an entity extracted from a file.
///
/// Format: `{kind}-{sanitized name}-{hash}`. Without a location the id still
/// derives from kind, name, scope and path.
pub fn generate_id(
    kind: NodeKind,
    name: &str,
    file_path: &str,
    scope: &[String],
    location: Option<&SourceLocation>,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(&[0]);
    hasher.update(file_path.as_bytes());
    hasher.update(&[0]);
    hasher.update(scope.join(".").as_bytes());
    hasher.update(&[0]);
    hasher.update(name.as_bytes());
    if let Some(loc) = location {
        hasher.update(&[0]);
        hasher.update(loc.start_line.to_string().as_bytes());
    }
    compose(kind, name, hasher.finalize())
}

/// Id of a File node; depends on the project-relative path only.
pub fn file_id(rel_path: &str) -> String {
    path_id(NodeKind::File, rel_path)
}

/// Id of a Directory node; depends on the project-relative path only.
pub fn directory_id(rel_path: &str) -> String {
    path_id(NodeKind::Directory, rel_path)
}

/// Id of an external library; one per library name across the project.
pub fn external_library_id(name: &str) -> String {
    let digest = blake3::hash(format!("{}\0{}", NodeKind::ExternalLibrary, name).as_bytes());
    compose(NodeKind::ExternalLibrary, name, digest)
}

fn path_id(kind: NodeKind, rel_path: &str) -> String {
    let digest = blake3::hash(format!("{}\0{}", kind, rel_path).as_bytes());
    let display = rel_path.rsplit('/').next().unwrap_or(rel_path);
    compose(kind, display, digest)
}

fn compose(kind: NodeKind, name: &str, digest: blake3::Hash) -> String {
    let hex = digest.to_hex();
    format!(
        "{}-{}-{}",
        kind.id_prefix(),
        sanitize(name),
        &hex.as_str()[..HASH_SEGMENT_LEN]
    )
}

/// Keep `[A-Za-z0-9_]`, map everything else to `_`, cap the length.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .take(NAME_SEGMENT_LEN)
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Run-wide guard that no two distinct entities share an id.
///
/// Each claim carries a fingerprint of the entity (kind, span). Reclaiming an
/// id with the same fingerprint returns the same id; a different fingerprint
/// gets a deterministic `~N` ordinal suffix.
#[derive(Debug, Default)]
pub struct IdRegistry {
    claims: Mutex<HashMap<String, Vec<String>>>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, id: String, fingerprint: &str) -> String {
        let mut claims = self
            .claims
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let owners = claims.entry(id.clone()).or_default();

        let ordinal = match owners.iter().position(|f| f == fingerprint) {
            Some(pos) => pos,
            None => {
                owners.push(fingerprint.to_string());
                owners.len() - 1
            }
        };

        if ordinal == 0 {
            id
        } else {
            tracing::warn!(id = %id, ordinal, "node id collision, appending ordinal");
            format!("{}~{}", id, ordinal)
        }
    }

    pub fn len(&self) -> usize {
        self.claims
            .lock()
            .map(|c| c.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
