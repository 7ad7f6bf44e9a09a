// Speech-to-text engine abstraction.
//
// The pipeline only sees the Transcriber trait; the concrete engine is a
// whisper.cpp CLI subprocess in production and a mock in tests.

pub mod types;
pub mod whisper_cli;

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::progress::ProgressSink;

pub use types::{TranscriptSegment, TranscriptionResult};
pub use whisper_cli::WhisperCli;

/// Model names the whisper family ships with.
pub const WHISPER_MODELS: &[&str] = &[
    "tiny", "base", "small", "medium", "large", "large-v2", "large-v3",
];

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an extracted wav file. Progress is discrete and
    /// normalized through the sink. Empty text is not an error here; the
    /// pipeline classifies it.
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, TaskError>;

    /// Identifier recorded in the ledger, e.g. "whisper-cpp/medium".
    fn engine_id(&self) -> String;
}
