// Work discovery: scan the input root for processable video files.
//
// The scan is a pure read. Output order is always lexicographic on the
// normalized path so repeated runs (and tests) see the same sequence no
// matter how the filesystem iterates.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Container formats the extraction engine is expected to handle.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mov", "mkv", "flv", "webm", "m4v", "wmv", "3gp", "ogv",
];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("input directory does not exist: {0}")]
    NotFound(PathBuf),
    #[error("input path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to scan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One candidate file. Immutable once discovered; consumed exactly once by
/// the scheduler.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl WorkItem {
    /// Stable identity correlating this file with its ledger entry across
    /// runs: SHA-256 over the absolute path and the whole-second mtime.
    /// Touching or rewriting the file yields a fresh identity.
    pub fn identity(&self) -> String {
        let mtime = self
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let digest = Sha256::digest(format!("{}_{}", self.path.display(), mtime).as_bytes());
        format!("{:x}", digest)
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

fn collect(dir: &Path, recursive: bool, found: &mut Vec<WorkItem>) -> Result<(), DiscoveryError> {
    let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("skipping unreadable directory entry under {}: {}", dir.display(), e);
                continue;
            }
        };
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                collect(&path, recursive, found)?;
            }
        } else if has_supported_extension(&path) {
            match entry.metadata() {
                Ok(meta) => found.push(WorkItem {
                    path,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(UNIX_EPOCH),
                }),
                Err(e) => warn!("skipping {}: cannot read metadata: {}", path.display(), e),
            }
        }
    }
    Ok(())
}

/// Scan the input root and return the sorted set of candidate files.
pub fn scan(root: &Path, recursive: bool) -> Result<Vec<WorkItem>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::NotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory(root.to_path_buf()));
    }

    let mut found = Vec::new();
    collect(root, recursive, &mut found)?;
    found.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(found)
}
