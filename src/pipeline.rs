// Per-file task pipeline.
//
// One call to `process_file` drives a single work item through
// validate -> extract -> transcribe -> serialize -> record -> relocate ->
// cleanup. Every stage boundary checks the shared cancellation token; a
// cancelled attempt leaves no ledger entry so the file stays eligible on
// the next run. Every other terminal state is recorded.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::discovery::WorkItem;
use crate::engine::Transcriber;
use crate::error::{TaskError, TaskOutcome, TaskReport};
use crate::files;
use crate::ledger::{Ledger, LedgerEntry};
use crate::media::AudioExtractor;
use crate::output::write_atomic;
use crate::progress::ProgressSink;

/// Everything a task needs, shared across all workers of one batch run.
pub struct TaskContext {
    pub config: BatchConfig,
    pub extractor: Arc<dyn AudioExtractor>,
    pub transcriber: Arc<dyn Transcriber>,
    pub ledger: Arc<Ledger>,
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn output_path_for(&self, source: &Path) -> PathBuf {
        let format = self.config.output_format().unwrap_or_default();
        files::output_path_for(
            &self.config.input_dir,
            &self.config.output_dir,
            source,
            format.extension(),
        )
    }
}

struct TaskRun<'a> {
    ctx: &'a TaskContext,
    item: &'a WorkItem,
    identity: String,
    output_path: PathBuf,
    started: Instant,
    media_duration: f64,
}

impl<'a> TaskRun<'a> {
    fn new(ctx: &'a TaskContext, item: &'a WorkItem) -> Self {
        TaskRun {
            ctx,
            item,
            identity: item.identity(),
            output_path: ctx.output_path_for(&item.path),
            started: Instant::now(),
            media_duration: 0.0,
        }
    }

    fn name(&self) -> String {
        self.item
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.item.path.display().to_string())
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Record a terminal outcome in the ledger. Ledger write failures are
    /// warnings; the task outcome stands either way.
    async fn record(&self, success: bool, error_text: &str) {
        let entry = LedgerEntry {
            processed_at: Utc::now(),
            source_path: self.item.path.display().to_string(),
            output_file: self.output_path.display().to_string(),
            duration: self.media_duration,
            processing_time: self.elapsed(),
            model_used: self.ctx.transcriber.engine_id(),
            success,
            error: if success {
                String::new()
            } else {
                error_text.to_string()
            },
        };
        if let Err(e) = self.ctx.ledger.record(&self.identity, entry).await {
            warn!("failed to persist ledger update for {}: {:#}", self.name(), e);
        }
    }

    async fn fail(&self, err: TaskError) -> TaskReport {
        error!("{}: {}", self.name(), err);
        self.record(false, &err.to_string()).await;
        TaskReport {
            path: self.item.path.clone(),
            outcome: TaskOutcome::Failed(err),
            media_duration: self.media_duration,
            processing_time: self.elapsed(),
        }
    }

    fn cancelled(&self, temp_wav: Option<&Path>) -> TaskReport {
        if let Some(wav) = temp_wav {
            files::remove_quietly(wav);
        }
        debug!("{}: abandoned due to shutdown request", self.name());
        TaskReport::cancelled(self.item.path.clone())
    }

    fn stage_sink(&self, stage: &'static str) -> ProgressSink {
        let name = self.name();
        ProgressSink::new(Arc::new(move |fraction| {
            debug!("{}: {} {:.0}%", name, stage, fraction * 100.0);
        }))
    }
}

pub async fn process_file(ctx: &TaskContext, item: &WorkItem) -> TaskReport {
    let mut run = TaskRun::new(ctx, item);

    if ctx.cancel.is_cancelled() {
        return run.cancelled(None);
    }

    // Validate.
    if item.size == 0 {
        return run.fail(TaskError::Validation("file is empty".to_string())).await;
    }
    let info = match ctx.extractor.probe(&item.path).await {
        Ok(info) => info,
        Err(e) => {
            return run
                .fail(TaskError::Validation(format!("failed to analyze media: {:#}", e)))
                .await;
        }
    };
    if !info.has_audio {
        return run
            .fail(TaskError::Validation("no audio stream found".to_string()))
            .await;
    }
    if info.duration <= 0.0 {
        return run
            .fail(TaskError::Validation(
                "media duration is zero or unknown".to_string(),
            ))
            .await;
    }
    run.media_duration = info.duration;

    // Extract audio.
    if ctx.cancel.is_cancelled() {
        return run.cancelled(None);
    }
    let wav = files::temp_audio_path(&ctx.config.temp_audio_dir(), item);
    if let Some(parent) = wav.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            return run
                .fail(TaskError::Extraction(format!(
                    "failed to create temp directory {}: {}",
                    parent.display(),
                    e
                )))
                .await;
        }
    }
    info!("{}: extracting audio ({:.1}s of media)", run.name(), info.duration);
    let sink = run.stage_sink("extracting");
    match ctx
        .extractor
        .extract(&item.path, &wav, info.duration, &sink, &ctx.cancel)
        .await
    {
        Ok(()) => {}
        Err(TaskError::Cancelled) => return run.cancelled(Some(&wav)),
        Err(e) => {
            files::remove_quietly(&wav);
            return run.fail(e).await;
        }
    }

    // Transcribe.
    if ctx.cancel.is_cancelled() {
        return run.cancelled(Some(&wav));
    }
    info!("{}: transcribing", run.name());
    let sink = run.stage_sink("transcribing");
    let result = match ctx
        .transcriber
        .transcribe(&wav, &ctx.config.language, &sink, &ctx.cancel)
        .await
    {
        Ok(result) => result,
        Err(TaskError::Cancelled) => return run.cancelled(Some(&wav)),
        Err(e) => {
            files::remove_quietly(&wav);
            return run.fail(e).await;
        }
    };

    if result.is_empty() {
        // Soft failure: recorded, batch continues.
        warn!("{}: engine produced no text", run.name());
        files::remove_quietly(&wav);
        return run.fail(TaskError::EmptyResult).await;
    }

    // Serialize output.
    if ctx.cancel.is_cancelled() {
        return run.cancelled(Some(&wav));
    }
    let format = ctx.config.output_format().unwrap_or_default();
    let rendered = match format.render(&result, &ctx.transcriber.engine_id()) {
        Ok(rendered) => rendered,
        Err(e) => {
            files::remove_quietly(&wav);
            return run.fail(TaskError::Persistence(format!("{:#}", e))).await;
        }
    };
    if let Err(e) = write_atomic(&run.output_path, &rendered) {
        files::remove_quietly(&wav);
        return run.fail(e).await;
    }

    // Record success before any optional post-processing.
    run.record(true, "").await;

    // Relocate the source if configured. A failed move is a warning, not a
    // task failure; the transcript already exists.
    if let Some(done_dir) = &ctx.config.done_dir {
        if let Err(e) = files::relocate(&item.path, done_dir) {
            warn!("{}: failed to move to done directory: {:#}", run.name(), e);
        }
    }

    // Cleanup.
    if !ctx.config.keep_temp {
        files::remove_quietly(&wav);
    }

    let elapsed = run.elapsed();
    let rtf = if info.duration > 0.0 {
        elapsed / info.duration
    } else {
        0.0
    };
    info!(
        "{}: completed in {:.1}s (RTF {:.2}, language {}) -> {}",
        run.name(),
        elapsed,
        rtf,
        result.language,
        run.output_path.display()
    );

    TaskReport {
        path: item.path.clone(),
        outcome: TaskOutcome::Completed,
        media_duration: info.duration,
        processing_time: elapsed,
    }
}
