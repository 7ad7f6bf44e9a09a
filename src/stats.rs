// Run-level statistics.
//
// One batch run owns exactly one RunStatistics value. It is mutated at a
// single aggregation point in the scheduler (behind a mutex, same discipline
// as the ledger) and printed at the end of the run. It is not persisted;
// cross-run aggregates live in the ledger.

use std::path::PathBuf;

use crate::error::{TaskOutcome, TaskReport};

#[derive(Debug, Default, Clone)]
pub struct RunStatistics {
    /// Files discovered for this run, before skip filtering.
    pub total_files: usize,
    /// Tasks that ran to a recorded terminal state (success or failure).
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Files skipped by the ledger's dedup check.
    pub skipped: usize,
    /// Accumulated media duration of processed files, in seconds.
    pub total_duration: f64,
    /// Accumulated wall time of processed files, in seconds.
    pub total_processing_time: f64,
    /// Set when the run was cut short by a shutdown request.
    pub interrupted: bool,
    /// Failed files with their recorded error text, in completion order.
    pub failures: Vec<(PathBuf, String)>,
}

impl RunStatistics {
    /// Fold one completed task into the counters. Cancelled tasks are not
    /// counted anywhere; they remain eligible for the next run.
    pub fn record(&mut self, report: &TaskReport) {
        match &report.outcome {
            TaskOutcome::Completed => {
                self.processed += 1;
                self.successful += 1;
                self.total_duration += report.media_duration;
                self.total_processing_time += report.processing_time;
            }
            TaskOutcome::Failed(err) => {
                self.processed += 1;
                self.failed += 1;
                self.total_duration += report.media_duration;
                self.total_processing_time += report.processing_time;
                self.failures.push((report.path.clone(), err.to_string()));
            }
            TaskOutcome::Cancelled => {}
        }
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Ratio of processing time to media duration; None when no media
    /// duration was accumulated.
    pub fn realtime_factor(&self) -> Option<f64> {
        if self.total_duration > 0.0 {
            Some(self.total_processing_time / self.total_duration)
        } else {
            None
        }
    }

    /// Human-readable end-of-run summary.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("==================== Processing Summary ====================\n");
        out.push_str(&format!("Total files:    {}\n", self.total_files));
        out.push_str(&format!("Processed:      {}\n", self.processed));
        out.push_str(&format!("Successful:     {}\n", self.successful));
        out.push_str(&format!("Failed:         {}\n", self.failed));
        out.push_str(&format!("Skipped:        {}\n", self.skipped));
        if self.processed > 0 {
            let rate = (self.successful as f64 / self.processed as f64) * 100.0;
            out.push_str(&format!("Success rate:   {:.1}%\n", rate));
        }
        out.push_str(&format!("Media duration: {:.1}s\n", self.total_duration));
        out.push_str(&format!("Wall time:      {:.1}s\n", self.total_processing_time));
        if let Some(rtf) = self.realtime_factor() {
            out.push_str(&format!("Average RTF:    {:.2}\n", rtf));
        }
        if self.interrupted {
            out.push_str("Run was interrupted before completion.\n");
        }
        if !self.failures.is_empty() {
            out.push_str("\nFailed files:\n");
            for (path, error) in &self.failures {
                out.push_str(&format!("  {}: {}\n", path.display(), error));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;

    fn report(outcome: TaskOutcome, duration: f64, elapsed: f64) -> TaskReport {
        TaskReport {
            path: PathBuf::from("/videos/a.mp4"),
            outcome,
            media_duration: duration,
            processing_time: elapsed,
        }
    }

    #[test]
    fn test_record_success_and_failure() {
        let mut stats = RunStatistics::default();
        stats.record(&report(TaskOutcome::Completed, 60.0, 30.0));
        stats.record(&report(
            TaskOutcome::Failed(TaskError::EmptyResult),
            10.0,
            5.0,
        ));

        assert_eq!(stats.processed, 2);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.failures.len(), 1);
        assert!((stats.total_duration - 70.0).abs() < f64::EPSILON);
        assert!((stats.total_processing_time - 35.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cancelled_tasks_are_not_counted() {
        let mut stats = RunStatistics::default();
        stats.record(&report(TaskOutcome::Cancelled, 0.0, 0.0));
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.successful, 0);
    }

    #[test]
    fn test_realtime_factor_requires_duration() {
        let mut stats = RunStatistics::default();
        assert!(stats.realtime_factor().is_none());

        stats.record(&report(TaskOutcome::Completed, 100.0, 50.0));
        let rtf = stats.realtime_factor().unwrap();
        assert!((rtf - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_render_lists_failures() {
        let mut stats = RunStatistics::default();
        stats.total_files = 1;
        stats.record(&report(
            TaskOutcome::Failed(TaskError::Validation("file is empty".into())),
            0.0,
            0.1,
        ));
        let rendered = stats.render();
        assert!(rendered.contains("Failed:         1"));
        assert!(rendered.contains("a.mp4"));
        assert!(rendered.contains("file is empty"));
    }
}
