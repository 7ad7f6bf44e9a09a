// Media handling: probing input files and driving the external audio
// extraction engine (ffmpeg).

pub mod ffmpeg;

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::progress::ProgressSink;

pub use ffmpeg::{find_ffmpeg, FfmpegExtractor};

/// What the probe learned about an input file.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    /// Container duration in seconds; 0.0 when unknown.
    pub duration: f64,
    pub has_audio: bool,
    pub has_video: bool,
    pub size_bytes: u64,
}

/// The capability the pipeline needs from the extraction engine. The real
/// implementation shells out to ffmpeg; tests substitute a mock.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    /// Inspect a media file. Errors here mean the file cannot be analyzed
    /// at all; the pipeline classifies that as a validation failure.
    async fn probe(&self, media: &Path) -> Result<MediaInfo>;

    /// Extract a mono 16-bit PCM wav suitable for transcription, reporting
    /// normalized progress against `total_duration`.
    async fn extract(
        &self,
        media: &Path,
        wav_out: &Path,
        total_duration: f64,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError>;
}
