// Output serialization: render a transcription result into one of the
// supported text/subtitle encodings and write it atomically.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;

use crate::engine::TranscriptionResult;
use crate::error::TaskError;

/// The closed set of output encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Plain text, optionally interleaved with [start --> end] markers.
    Text { timestamps: bool },
    /// SubRip subtitles with sequential numeric cues.
    Srt,
    /// WebVTT subtitles.
    Vtt,
    /// Structured JSON carrying the full result plus derived metadata.
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text { timestamps: false }
    }
}

impl OutputFormat {
    pub fn from_name(name: &str, timestamps: bool) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "txt" | "text" => Some(OutputFormat::Text { timestamps }),
            "srt" => Some(OutputFormat::Srt),
            "vtt" => Some(OutputFormat::Vtt),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text { .. } => "txt",
            OutputFormat::Srt => "srt",
            OutputFormat::Vtt => "vtt",
            OutputFormat::Json => "json",
        }
    }

    pub fn render(&self, result: &TranscriptionResult, model: &str) -> Result<String> {
        match self {
            OutputFormat::Text { timestamps } => Ok(render_text(result, *timestamps)),
            OutputFormat::Srt => Ok(render_srt(result)),
            OutputFormat::Vtt => Ok(render_vtt(result)),
            OutputFormat::Json => render_json(result, model),
        }
    }
}

/// Truncating "HH:MM:SS" for plain-text markers.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// "HH:MM:SS,mmm" for SRT cues.
pub fn format_timestamp_srt(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let millis = ((seconds - seconds.trunc()) * 1000.0) as u32;
    format!("{},{:03}", format_timestamp(seconds), millis)
}

/// "HH:MM:SS.mmm" for WebVTT cues.
pub fn format_timestamp_vtt(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let millis = ((seconds - seconds.trunc()) * 1000.0) as u32;
    format!("{}.{:03}", format_timestamp(seconds), millis)
}

fn render_text(result: &TranscriptionResult, timestamps: bool) -> String {
    if timestamps && !result.segments.is_empty() {
        let mut out = String::new();
        for segment in &result.segments {
            out.push_str(&format!(
                "[{} --> {}] {}\n",
                format_timestamp(segment.start),
                format_timestamp(segment.end),
                segment.text.trim()
            ));
        }
        out
    } else {
        let mut out = result.text.clone();
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

fn render_srt(result: &TranscriptionResult) -> String {
    let mut out = String::new();
    for (index, segment) in result.segments.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_timestamp_srt(segment.start),
            format_timestamp_srt(segment.end),
            segment.text.trim()
        ));
    }
    out
}

fn render_vtt(result: &TranscriptionResult) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for segment in &result.segments {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_timestamp_vtt(segment.start),
            format_timestamp_vtt(segment.end),
            segment.text.trim()
        ));
    }
    out
}

fn render_json(result: &TranscriptionResult, model: &str) -> Result<String> {
    let document = json!({
        "text": result.text,
        "language": result.language,
        "duration": result.duration,
        "processing_time": result.processing_time,
        "model_used": model,
        "segments": result.segments,
        "metadata": {
            "average_confidence": result.average_confidence(),
            "total_segments": result.segments.len(),
            "total_words": result.word_count(),
        },
    });
    serde_json::to_string_pretty(&document).context("failed to serialize transcript JSON")
}

/// Write output through a sibling temp file and rename it into place, so a
/// failed write never leaves a truncated file visible.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), TaskError> {
    let parent = path
        .parent()
        .ok_or_else(|| TaskError::Persistence(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| {
        TaskError::Persistence(format!("failed to create {}: {}", parent.display(), e))
    })?;

    let tmp = path.with_extension("part");
    std::fs::write(&tmp, contents)
        .map_err(|e| TaskError::Persistence(format!("failed to write {}: {}", tmp.display(), e)))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        TaskError::Persistence(format!("failed to replace {}: {}", path.display(), e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TranscriptSegment;
    use tempfile::tempdir;

    fn sample_result() -> TranscriptionResult {
        TranscriptionResult {
            text: "Hello there. General.".to_string(),
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 2.5,
                    text: "Hello there.".to_string(),
                    confidence: Some(0.8),
                },
                TranscriptSegment {
                    start: 3725.25,
                    end: 3727.0,
                    text: "General.".to_string(),
                    confidence: Some(0.6),
                },
            ],
            language: "en".to_string(),
            duration: 3727.0,
            processing_time: 42.0,
        }
    }

    #[test]
    fn test_timestamp_round_trip_values() {
        assert_eq!(format_timestamp(3725.25), "01:02:05");
        assert_eq!(format_timestamp_srt(3725.25), "01:02:05,250");
        assert_eq!(format_timestamp_vtt(3725.25), "01:02:05.250");
    }

    #[test]
    fn test_timestamp_edge_values() {
        assert_eq!(format_timestamp(0.0), "00:00:00");
        assert_eq!(format_timestamp_srt(-1.0), "00:00:00,000");
        assert_eq!(format_timestamp_vtt(59.999), "00:00:59.999");
    }

    #[test]
    fn test_render_plain_text_has_trailing_newline() {
        let format = OutputFormat::Text { timestamps: false };
        let rendered = format.render(&sample_result(), "m").unwrap();
        assert_eq!(rendered, "Hello there. General.\n");
    }

    #[test]
    fn test_render_text_with_timestamps() {
        let format = OutputFormat::Text { timestamps: true };
        let rendered = format.render(&sample_result(), "m").unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "[00:00:00 --> 00:00:02] Hello there.");
        assert_eq!(lines[1], "[01:02:05 --> 01:02:07] General.");
    }

    #[test]
    fn test_render_srt() {
        let rendered = OutputFormat::Srt.render(&sample_result(), "m").unwrap();
        assert_eq!(
            rendered,
            "1\n00:00:00,000 --> 00:00:02,500\nHello there.\n\n\
             2\n01:02:05,250 --> 01:02:07,000\nGeneral.\n\n"
        );
    }

    #[test]
    fn test_render_vtt_has_header() {
        let rendered = OutputFormat::Vtt.render(&sample_result(), "m").unwrap();
        assert!(rendered.starts_with("WEBVTT\n\n"));
        assert!(rendered.contains("01:02:05.250 --> 01:02:07.000"));
    }

    #[test]
    fn test_render_json_metadata() {
        let rendered = OutputFormat::Json
            .render(&sample_result(), "whisper-cpp/medium")
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["model_used"], "whisper-cpp/medium");
        assert_eq!(value["metadata"]["total_segments"], 2);
        assert_eq!(value["metadata"]["total_words"], 3);
        let confidence = value["metadata"]["average_confidence"].as_f64().unwrap();
        assert!((confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            OutputFormat::from_name("TXT", true),
            Some(OutputFormat::Text { timestamps: true })
        );
        assert_eq!(OutputFormat::from_name("srt", false), Some(OutputFormat::Srt));
        assert_eq!(OutputFormat::from_name("docx", false), None);
    }

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deep/out.txt");
        write_atomic(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(!path.with_extension("part").exists());
    }
}
