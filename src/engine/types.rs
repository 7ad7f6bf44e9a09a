// Transcription result types shared by all engine implementations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Segment start in seconds from the beginning of the audio.
    pub start: f64,
    /// Segment end in seconds.
    pub end: f64,
    pub text: String,
    /// Mean token probability for the segment, when the engine exposes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcript text, trimmed.
    pub text: String,
    /// Ordered timed segments.
    pub segments: Vec<TranscriptSegment>,
    /// Detected (or hinted) language code.
    pub language: String,
    /// Source media duration in seconds, as seen by the engine.
    pub duration: f64,
    /// Engine wall time in seconds.
    pub processing_time: f64,
}

impl TranscriptionResult {
    /// Empty or whitespace-only text is the soft-failure condition.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }

    /// Mean of the per-segment confidences that are present; 0.0 when the
    /// engine reported none.
    pub fn average_confidence(&self) -> f32 {
        let known: Vec<f32> = self
            .segments
            .iter()
            .filter_map(|segment| segment.confidence)
            .collect();
        if known.is_empty() {
            0.0
        } else {
            known.iter().sum::<f32>() / known.len() as f32
        }
    }
}
