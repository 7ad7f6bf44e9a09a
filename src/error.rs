// Error taxonomy for per-file processing.
//
// Everything that can go wrong below the scheduler boundary is classified
// into one of these variants, recorded in the ledger, and folded into the
// run statistics. Nothing here aborts the batch.

use std::path::PathBuf;

use thiserror::Error;

/// Granular error types for a single file's pipeline run
#[derive(Debug, Error)]
pub enum TaskError {
    /// Input file unusable: missing, empty, no audio track, zero duration.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The audio extraction engine failed or was killed after stalling.
    #[error("audio extraction failed: {0}")]
    Extraction(String),

    /// The transcription engine failed or was killed after stalling.
    #[error("transcription failed: {0}")]
    Transcription(String),

    /// Soft failure: the engine ran but produced no usable text.
    #[error("no text extracted from audio")]
    EmptyResult,

    /// Output or ledger write failed (disk full, permissions, ...).
    #[error("failed to write output: {0}")]
    Persistence(String),

    /// Shutdown was requested mid-pipeline; the file stays eligible.
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }
}

/// Terminal state of one file's pipeline run
#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    Failed(TaskError),
    Cancelled,
}

/// Handed to the scheduler's aggregation point when a task exits
#[derive(Debug)]
pub struct TaskReport {
    pub path: PathBuf,
    pub outcome: TaskOutcome,
    /// Probed media duration in seconds (0.0 when validation never got there).
    pub media_duration: f64,
    /// Wall time spent on this file in seconds.
    pub processing_time: f64,
}

impl TaskReport {
    pub fn cancelled(path: PathBuf) -> Self {
        TaskReport {
            path,
            outcome: TaskOutcome::Cancelled,
            media_duration: 0.0,
            processing_time: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TaskError::Validation("file is empty".to_string());
        assert_eq!(err.to_string(), "validation failed: file is empty");
        assert!(!err.is_cancelled());
        assert!(TaskError::Cancelled.is_cancelled());
    }

    #[test]
    fn test_empty_result_is_distinct() {
        let err = TaskError::EmptyResult;
        assert_eq!(err.to_string(), "no text extracted from audio");
    }
}
