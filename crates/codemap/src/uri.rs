//! Path and URI utilities: `file://` mapping, node id derivation, git root
//! discovery.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Convert a filesystem path to a `file://` URI.
///
/// The path should be absolute; relative paths are passed through with the
/// scheme prepended so the mapping stays invertible.
pub fn path_to_uri(path: &Path) -> String {
    let p = path.to_string_lossy();
    if cfg!(windows) {
        format!("file:///{}", p.replace('\\', "/"))
    } else {
        format!("file://{}", p)
    }
}

/// Convert a `file://` URI back to a filesystem path.
///
/// Tolerates the `file://localhost/...` authority form some servers emit.
/// Non-`file` strings are returned unchanged as a path.
pub fn uri_to_path(uri: &str) -> PathBuf {
    let rest = match uri.strip_prefix("file://") {
        Some(rest) => rest,
        None => return PathBuf::from(uri),
    };
    let rest = rest.strip_prefix("localhost").unwrap_or(rest);
    if cfg!(windows) {
        // file:///C:/... carries a leading slash before the drive letter
        let trimmed = rest.strip_prefix('/').unwrap_or(rest);
        PathBuf::from(trimmed.replace('/', "\\"))
    } else {
        PathBuf::from(rest)
    }
}

/// Derive the deterministic node id for a `(file_path, name)` pair.
///
/// First 32 hex characters of SHA-256 over `"{path}|{name}"`. Pure: equal
/// inputs always produce equal ids, across processes and runs.
pub fn node_id(file_path: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"|");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..32].to_string()
}

/// Walk up from `start` looking for a directory containing `.git`.
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    let mut current = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::fs::canonicalize(start).ok()?
    };
    loop {
        if current.join(".git").exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}
