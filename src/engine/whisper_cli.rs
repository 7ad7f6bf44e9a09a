// whisper.cpp CLI binding.
//
// Runs the whisper-cli binary against an extracted wav, watches its stderr
// for `progress = N%` lines through the progress bridge, and parses the
// JSON sidecar it writes with `-ojf`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{Transcriber, TranscriptSegment, TranscriptionResult};
use crate::error::TaskError;
use crate::files::remove_quietly;
use crate::progress::{run_supervised, ProgressEvent, ProgressSink};

/// whisper.cpp prints "whisper_print_progress_callback: progress =  42%".
static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"progress\s*=\s*(\d+)%").unwrap());

/// Binary names whisper.cpp has shipped under.
const BINARY_NAMES: &[&str] = &["whisper-cli", "whisper-cpp"];

pub fn find_whisper_cli() -> Option<PathBuf> {
    for name in BINARY_NAMES {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }
    ["/usr/local/bin/whisper-cli", "/opt/homebrew/bin/whisper-cli"]
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

pub struct WhisperCli {
    binary: PathBuf,
    model_path: PathBuf,
    model_name: String,
    stall_timeout: Duration,
}

impl WhisperCli {
    pub fn new(
        binary: PathBuf,
        model_path: PathBuf,
        model_name: String,
        stall_timeout: Duration,
    ) -> Self {
        WhisperCli {
            binary,
            model_path,
            model_name,
            stall_timeout,
        }
    }

    /// Locate the binary and check the model file exists up front, so a bad
    /// setup aborts before any task is scheduled.
    pub fn discover(
        model_path: PathBuf,
        model_name: String,
        stall_timeout: Duration,
    ) -> Result<Self> {
        let binary = find_whisper_cli().ok_or_else(|| {
            anyhow!("whisper.cpp CLI not found; install whisper-cli and put it on PATH")
        })?;
        if !model_path.exists() {
            return Err(anyhow!(
                "model file not found: {} (download a ggml model for '{}')",
                model_path.display(),
                model_name
            ));
        }
        info!(
            "using whisper.cpp at {} with model {}",
            binary.display(),
            model_path.display()
        );
        Ok(Self::new(binary, model_path, model_name, stall_timeout))
    }
}

fn progress_event(line: &str) -> Option<ProgressEvent> {
    let caps = PROGRESS_RE.captures(line)?;
    let percent: f64 = caps[1].parse().ok()?;
    Some(ProgressEvent::Fraction(percent / 100.0))
}

// Shape of the `-ojf` JSON sidecar.

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    result: Option<WhisperResultMeta>,
    #[serde(default)]
    transcription: Vec<WhisperJsonSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperResultMeta {
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperJsonSegment {
    offsets: WhisperOffsets,
    text: String,
    #[serde(default)]
    tokens: Vec<WhisperToken>,
}

#[derive(Debug, Deserialize)]
struct WhisperOffsets {
    /// Milliseconds.
    from: i64,
    to: i64,
}

#[derive(Debug, Deserialize)]
struct WhisperToken {
    #[serde(default)]
    p: Option<f32>,
}

fn parse_output(raw: &str) -> Result<(Vec<TranscriptSegment>, Option<String>)> {
    let output: WhisperOutput =
        serde_json::from_str(raw).context("failed to parse whisper JSON output")?;

    let segments = output
        .transcription
        .into_iter()
        .map(|segment| {
            let probabilities: Vec<f32> =
                segment.tokens.iter().filter_map(|t| t.p).collect();
            let confidence = if probabilities.is_empty() {
                None
            } else {
                Some(probabilities.iter().sum::<f32>() / probabilities.len() as f32)
            };
            TranscriptSegment {
                start: segment.offsets.from as f64 / 1000.0,
                end: segment.offsets.to as f64 / 1000.0,
                text: segment.text.trim().to_string(),
                confidence,
            }
        })
        .collect();

    let language = output.result.and_then(|meta| meta.language);
    Ok((segments, language))
}

#[async_trait]
impl Transcriber for WhisperCli {
    async fn transcribe(
        &self,
        audio: &Path,
        language: &str,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionResult, TaskError> {
        // whisper.cpp appends ".json" to the -of base path.
        let out_base = audio.with_extension("");
        let json_path = out_base.with_extension("json");
        let started = Instant::now();

        let mut child = Command::new(&self.binary)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(audio)
            .arg("-of")
            .arg(&out_base)
            .arg("-ojf")
            .arg("-pp")
            .args(["-l", language])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TaskError::Transcription(format!("failed to spawn whisper: {}", e)))?;

        // Progress lands on stderr; stdout carries the segment echo.
        let stdout = child.stdout.take().ok_or_else(|| {
            TaskError::Transcription("failed to capture whisper stdout".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TaskError::Transcription("failed to capture whisper stderr".to_string())
        })?;

        let supervised = run_supervised(
            "whisper",
            &mut child,
            stderr,
            stdout,
            progress_event,
            sink,
            self.stall_timeout,
            cancel,
        )
        .await;

        if let Err(failure) = supervised {
            remove_quietly(&json_path);
            if failure.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            return Err(TaskError::Transcription(failure.to_string()));
        }

        let raw = std::fs::read_to_string(&json_path).map_err(|e| {
            TaskError::Transcription(format!(
                "whisper produced no output file {}: {}",
                json_path.display(),
                e
            ))
        })?;
        remove_quietly(&json_path);

        let (segments, detected) =
            parse_output(&raw).map_err(|e| TaskError::Transcription(format!("{:#}", e)))?;

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let duration = segments.last().map(|s| s.end).unwrap_or(0.0);
        let language = detected.unwrap_or_else(|| language.to_string());
        let processing_time = started.elapsed().as_secs_f64();

        if segments.is_empty() {
            warn!("whisper returned no segments for {}", audio.display());
        }
        debug!(
            "whisper finished {} in {:.1}s ({} segments, language {})",
            audio.display(),
            processing_time,
            segments.len(),
            language
        );

        sink.finish();
        Ok(TranscriptionResult {
            text,
            segments,
            language,
            duration,
            processing_time,
        })
    }

    fn engine_id(&self) -> String {
        format!("whisper-cpp/{}", self.model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_event_parsing() {
        assert_eq!(
            progress_event("whisper_print_progress_callback: progress =  42%"),
            Some(ProgressEvent::Fraction(0.42))
        );
        assert_eq!(
            progress_event("progress = 100%"),
            Some(ProgressEvent::Fraction(1.0))
        );
        assert_eq!(progress_event("whisper_init_from_file_with_params..."), None);
    }

    #[test]
    fn test_parse_output_full_json() {
        let raw = r#"{
            "systeminfo": "AVX = 1",
            "result": {"language": "en"},
            "transcription": [
                {
                    "timestamps": {"from": "00:00:00,000", "to": "00:00:02,500"},
                    "offsets": {"from": 0, "to": 2500},
                    "text": " Hello there.",
                    "tokens": [
                        {"text": "Hello", "p": 0.9},
                        {"text": "there", "p": 0.7}
                    ]
                },
                {
                    "offsets": {"from": 2500, "to": 4000},
                    "text": " General. "
                }
            ]
        }"#;

        let (segments, language) = parse_output(raw).unwrap();
        assert_eq!(language.as_deref(), Some("en"));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "Hello there.");
        assert!((segments[0].start - 0.0).abs() < 1e-9);
        assert!((segments[0].end - 2.5).abs() < 1e-9);
        assert!((segments[0].confidence.unwrap() - 0.8).abs() < 1e-6);
        assert_eq!(segments[1].text, "General.");
        assert!(segments[1].confidence.is_none());
    }

    #[test]
    fn test_parse_output_rejects_garbage() {
        assert!(parse_output("whisper exploded").is_err());
    }

    #[test]
    fn test_parse_output_empty_transcription() {
        let (segments, language) = parse_output(r#"{"transcription": []}"#).unwrap();
        assert!(segments.is_empty());
        assert!(language.is_none());
    }
}
