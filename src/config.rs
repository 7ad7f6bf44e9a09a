// Batch configuration.
//
// Everything the orchestration core needs to know about a run, assembled by
// the CLI shell from an optional JSON config file plus command-line
// overrides. The core never touches argv or the environment itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::WHISPER_MODELS;
use crate::output::OutputFormat;

/// Language codes accepted for the transcription hint.
pub const SUPPORTED_LANGUAGES: &[&str] = &[
    "auto", "zh", "en", "ja", "ko", "fr", "de", "es", "ru", "pt", "it", "ar", "hi",
];

/// Audio extraction parameters handed to ffmpeg. 16 kHz mono is what the
/// whisper family expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        AudioConfig {
            sample_rate: 16_000,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Working directory for extracted wav files. Defaults to the system
    /// temp dir under a tool-specific subdirectory.
    pub temp_dir: Option<PathBuf>,
    /// When set, successfully processed source files are moved here.
    pub done_dir: Option<PathBuf>,
    pub model: String,
    /// Directory holding ggml model files. Defaults to the user data dir.
    pub model_dir: Option<PathBuf>,
    pub language: String,
    pub workers: usize,
    pub skip_existing: bool,
    pub keep_temp: bool,
    pub recursive: bool,
    /// Output format name: txt, srt, vtt or json.
    pub format: String,
    /// Interleave [start --> end] markers in txt output.
    pub timestamps: bool,
    /// No engine output for this long means the engine is hung.
    pub stall_timeout_secs: u64,
    pub audio: AudioConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            temp_dir: None,
            done_dir: None,
            model: "medium".to_string(),
            model_dir: None,
            language: "auto".to_string(),
            workers: 1,
            skip_existing: false,
            keep_temp: false,
            recursive: true,
            format: "txt".to_string(),
            timestamps: false,
            stall_timeout_secs: 300,
            audio: AudioConfig::default(),
        }
    }
}

impl BatchConfig {
    /// Load a config file (JSON). Missing file is an error; the caller
    /// decides whether a config file is required at all.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: BatchConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn effective_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("vidscribe"))
    }

    /// Extracted wav files live in their own subdirectory so the stale-file
    /// sweep never touches anything else.
    pub fn temp_audio_dir(&self) -> PathBuf {
        self.effective_temp_dir().join("audio")
    }

    pub fn effective_model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("vidscribe")
                .join("models")
        })
    }

    /// Path of the ggml model file for the configured model name.
    pub fn model_path(&self) -> PathBuf {
        self.effective_model_dir()
            .join(format!("ggml-{}.bin", self.model))
    }

    pub fn output_format(&self) -> Option<OutputFormat> {
        OutputFormat::from_name(&self.format, self.timestamps)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs.max(1))
    }

    /// Check the configuration and return the list of problems found.
    /// Empty means the run can start.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if self.input_dir.as_os_str().is_empty() {
            issues.push("input directory is not set".to_string());
        } else if !self.input_dir.exists() {
            issues.push(format!(
                "input directory does not exist: {}",
                self.input_dir.display()
            ));
        } else if !self.input_dir.is_dir() {
            issues.push(format!(
                "input path is not a directory: {}",
                self.input_dir.display()
            ));
        }

        if self.output_dir.as_os_str().is_empty() {
            issues.push("output directory is not set".to_string());
        }

        if self.workers == 0 {
            issues.push("workers must be at least 1".to_string());
        }

        if !WHISPER_MODELS.contains(&self.model.as_str()) {
            issues.push(format!(
                "unknown model '{}' (available: {})",
                self.model,
                WHISPER_MODELS.join(", ")
            ));
        }

        if !SUPPORTED_LANGUAGES.contains(&self.language.as_str()) {
            issues.push(format!(
                "unsupported language '{}' (available: {})",
                self.language,
                SUPPORTED_LANGUAGES.join(", ")
            ));
        }

        if self.output_format().is_none() {
            issues.push(format!(
                "unknown output format '{}' (available: txt, srt, vtt, json)",
                self.format
            ));
        }

        issues
    }
}
