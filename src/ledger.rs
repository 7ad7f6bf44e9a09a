// Processing ledger: the persisted history of per-file outcomes.
//
// Source of truth for skip decisions and cross-run statistics. The document
// is a single JSON file rewritten whole on every update, behind one async
// mutex so concurrent tasks serialize instead of interleaving writes. The
// rewrite goes through a temp file and an atomic rename; a reader never
// observes a partially written ledger.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Default file name, hidden inside the output directory.
pub const LEDGER_FILE_NAME: &str = ".processing_history.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub processed_at: DateTime<Utc>,
    pub source_path: String,
    pub output_file: String,
    /// Media duration in seconds.
    #[serde(default)]
    pub duration: f64,
    /// Wall time spent processing, in seconds.
    #[serde(default)]
    pub processing_time: f64,
    #[serde(default)]
    pub model_used: String,
    pub success: bool,
    /// Empty on success.
    #[serde(default)]
    pub error: String,
}

/// Cross-run aggregate, updated on every record and persisted with the
/// entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerStats {
    #[serde(default)]
    pub total_processed: u64,
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub failed: u64,
    #[serde(default)]
    pub total_duration: f64,
    #[serde(default)]
    pub total_processing_time: f64,
}

/// On-disk document. Unknown fields are ignored on load and optional fields
/// default, so older and newer readers can share the same file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerDocument {
    #[serde(default)]
    processed_files: HashMap<String, LedgerEntry>,
    #[serde(default)]
    statistics: LedgerStats,
}

pub struct Ledger {
    path: PathBuf,
    inner: Mutex<LedgerDocument>,
}

impl Ledger {
    /// Load the ledger, falling back to an empty one (with a warning) when
    /// the file is missing, unreadable or corrupt. A bad history file must
    /// never abort a batch.
    pub fn load_or_default(path: PathBuf) -> Self {
        let document = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<LedgerDocument>(&raw) {
                Ok(doc) => {
                    debug!(
                        "loaded ledger with {} entries from {}",
                        doc.processed_files.len(),
                        path.display()
                    );
                    doc
                }
                Err(e) => {
                    warn!(
                        "ledger {} is corrupt ({}); starting with an empty history",
                        path.display(),
                        e
                    );
                    LedgerDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LedgerDocument::default(),
            Err(e) => {
                warn!(
                    "failed to read ledger {} ({}); starting with an empty history",
                    path.display(),
                    e
                );
                LedgerDocument::default()
            }
        };

        Ledger {
            path,
            inner: Mutex::new(document),
        }
    }

    /// True iff a prior successful entry exists for this identity and the
    /// recorded output file still exists and is non-empty. Everything else
    /// means reprocess — the safe default.
    pub async fn should_skip(&self, identity: &str, output_path: &Path) -> bool {
        let doc = self.inner.lock().await;
        let Some(entry) = doc.processed_files.get(identity) else {
            return false;
        };
        if !entry.success {
            return false;
        }
        match std::fs::metadata(output_path) {
            Ok(meta) => meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Append or overwrite the entry for this identity, update the
    /// aggregate, and persist the whole document. Serialized across callers.
    pub async fn record(&self, identity: &str, entry: LedgerEntry) -> Result<()> {
        let mut doc = self.inner.lock().await;

        doc.statistics.total_processed += 1;
        if entry.success {
            doc.statistics.successful += 1;
        } else {
            doc.statistics.failed += 1;
        }
        doc.statistics.total_duration += entry.duration;
        doc.statistics.total_processing_time += entry.processing_time;

        doc.processed_files.insert(identity.to_string(), entry);
        self.persist(&doc)
    }

    pub async fn stats(&self) -> LedgerStats {
        self.inner.lock().await.statistics.clone()
    }

    pub async fn entry(&self, identity: &str) -> Option<LedgerEntry> {
        self.inner.lock().await.processed_files.get(identity).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.processed_files.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whole-file rewrite through a sibling temp file + rename. Called with
    /// the document lock held, so the temp path cannot race with itself.
    fn persist(&self, doc: &LedgerDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let serialized =
            serde_json::to_string_pretty(doc).context("failed to serialize ledger")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(success: bool, output: &Path) -> LedgerEntry {
        LedgerEntry {
            processed_at: Utc::now(),
            source_path: "/videos/a.mp4".to_string(),
            output_file: output.to_string_lossy().to_string(),
            duration: 60.0,
            processing_time: 12.0,
            model_used: "whisper-cpp/medium".to_string(),
            success,
            error: if success { String::new() } else { "boom".to_string() },
        }
    }

    #[tokio::test]
    async fn test_record_and_reload() {
        let dir = tempdir().unwrap();
        let ledger_path = dir.path().join(LEDGER_FILE_NAME);
        let output = dir.path().join("a.txt");
        std::fs::write(&output, b"text").unwrap();

        let ledger = Ledger::load_or_default(ledger_path.clone());
        ledger.record("id-1", entry(true, &output)).await.unwrap();

        // A fresh load sees the persisted state.
        let reloaded = Ledger::load_or_default(ledger_path);
        assert_eq!(reloaded.len().await, 1);
        assert!(reloaded.should_skip("id-1", &output).await);
        let stats = reloaded.stats().await;
        assert_eq!(stats.total_processed, 1);
        assert_eq!(stats.successful, 1);
    }

    #[tokio::test]
    async fn test_should_skip_requires_success_and_output() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::load_or_default(dir.path().join(LEDGER_FILE_NAME));
        let output = dir.path().join("a.txt");

        // No entry at all.
        assert!(!ledger.should_skip("id-1", &output).await);

        // Failed entry.
        ledger.record("id-1", entry(false, &output)).await.unwrap();
        assert!(!ledger.should_skip("id-1", &output).await);

        // Successful entry but output missing.
        ledger.record("id-2", entry(true, &output)).await.unwrap();
        assert!(!ledger.should_skip("id-2", &output).await);

        // Successful entry but output empty.
        std::fs::write(&output, b"").unwrap();
        assert!(!ledger.should_skip("id-2", &output).await);

        // Successful entry with a non-empty output.
        std::fs::write(&output, b"text").unwrap();
        assert!(ledger.should_skip("id-2", &output).await);

        // Deleting the output makes the item eligible again.
        std::fs::remove_file(&output).unwrap();
        assert!(!ledger.should_skip("id-2", &output).await);
    }

    #[tokio::test]
    async fn test_corrupt_ledger_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        std::fs::write(&path, b"{ this is not json").unwrap();

        let ledger = Ledger::load_or_default(path);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_newer_attempt_overwrites_entry() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::load_or_default(dir.path().join(LEDGER_FILE_NAME));
        let output = dir.path().join("a.txt");

        ledger.record("id-1", entry(false, &output)).await.unwrap();
        ledger.record("id-1", entry(true, &output)).await.unwrap();

        assert_eq!(ledger.len().await, 1);
        assert!(ledger.entry("id-1").await.unwrap().success);
        // The aggregate still counts both attempts.
        let stats = ledger.stats().await;
        assert_eq!(stats.total_processed, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_unknown_fields_are_tolerated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        std::fs::write(
            &path,
            r#"{
                "processed_files": {
                    "id-1": {
                        "processed_at": "2025-01-01T00:00:00Z",
                        "source_path": "/videos/a.mp4",
                        "output_file": "/texts/a.txt",
                        "success": true,
                        "some_future_field": [1, 2, 3]
                    }
                },
                "statistics": {"total_processed": 1, "successful": 1},
                "schema_hint": "v2"
            }"#,
        )
        .unwrap();

        let ledger = Ledger::load_or_default(path);
        assert_eq!(ledger.len().await, 1);
        let entry = ledger.entry("id-1").await.unwrap();
        assert!(entry.success);
        assert_eq!(entry.model_used, "");
    }
}
