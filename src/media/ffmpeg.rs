// FFmpeg binding: locate the binary, probe media files by parsing the
// banner ffmpeg prints to stderr, and extract audio with `-progress pipe:1`
// monitoring through the progress bridge.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{AudioExtractor, MediaInfo};
use crate::config::AudioConfig;
use crate::error::TaskError;
use crate::files::remove_quietly;
use crate::progress::{run_supervised, ProgressEvent, ProgressSink};

/// "Duration: HH:MM:SS.cc" as printed in ffmpeg's stderr banner.
static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").unwrap()
});

/// Locate ffmpeg on PATH, falling back to the usual install locations.
pub fn find_ffmpeg() -> Option<PathBuf> {
    if let Ok(path) = which::which("ffmpeg") {
        return Some(path);
    }

    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\ffmpeg\bin\ffmpeg.exe",
            r"C:\Program Files\ffmpeg\bin\ffmpeg.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/usr/local/bin/ffmpeg",
            "/opt/homebrew/bin/ffmpeg",
            "/usr/bin/ffmpeg",
        ]
    } else {
        &["/usr/bin/ffmpeg", "/usr/local/bin/ffmpeg", "/snap/bin/ffmpeg"]
    };

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

pub struct FfmpegExtractor {
    binary: PathBuf,
    audio: AudioConfig,
    stall_timeout: Duration,
}

impl FfmpegExtractor {
    pub fn new(binary: PathBuf, audio: AudioConfig, stall_timeout: Duration) -> Self {
        FfmpegExtractor {
            binary,
            audio,
            stall_timeout,
        }
    }

    /// Build an extractor from whatever ffmpeg is installed.
    pub fn discover(audio: AudioConfig, stall_timeout: Duration) -> Result<Self> {
        let binary =
            find_ffmpeg().ok_or_else(|| anyhow!("ffmpeg not found; please install ffmpeg"))?;
        info!("using ffmpeg at {}", binary.display());
        Ok(Self::new(binary, audio, stall_timeout))
    }
}

/// Parse the stderr banner of `ffmpeg -i <file> -f null -`.
fn parse_probe_output(stderr: &str, size_bytes: u64) -> MediaInfo {
    let duration = DURATION_RE.captures(stderr).map_or(0.0, |caps| {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        let centis: f64 = caps[4].parse().unwrap_or(0.0);
        hours * 3600.0 + minutes * 60.0 + seconds + centis / 100.0
    });

    MediaInfo {
        duration,
        has_audio: stderr.contains("Audio:"),
        has_video: stderr.contains("Video:"),
        size_bytes,
    }
}

/// Parse one `-progress pipe:1` line. `out_time_ms` is microseconds despite
/// the name.
fn progress_event(line: &str, total_duration: f64) -> Option<ProgressEvent> {
    let line = line.trim();
    if let Some(value) = line.strip_prefix("out_time_ms=") {
        let micros: f64 = value.parse().ok()?;
        if total_duration > 0.0 {
            return Some(ProgressEvent::Fraction(micros / 1_000_000.0 / total_duration));
        }
        return None;
    }
    if line == "progress=end" {
        return Some(ProgressEvent::Completed);
    }
    None
}

#[async_trait]
impl AudioExtractor for FfmpegExtractor {
    async fn probe(&self, media: &Path) -> Result<MediaInfo> {
        let size_bytes = std::fs::metadata(media)
            .with_context(|| format!("cannot stat {}", media.display()))?
            .len();

        // The probe decodes to a null sink purely for the stderr banner;
        // the exit status is irrelevant here.
        let output = Command::new(&self.binary)
            .arg("-i")
            .arg(media)
            .args(["-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to run ffmpeg on {}", media.display()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        let info = parse_probe_output(&stderr, size_bytes);
        debug!(
            "probed {}: duration={:.2}s audio={} video={}",
            media.display(),
            info.duration,
            info.has_audio,
            info.has_video
        );
        Ok(info)
    }

    async fn extract(
        &self,
        media: &Path,
        wav_out: &Path,
        total_duration: f64,
        sink: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), TaskError> {
        let mut child = Command::new(&self.binary)
            .arg("-i")
            .arg(media)
            .arg("-vn")
            .args(["-acodec", "pcm_s16le"])
            .args(["-ar", &self.audio.sample_rate.to_string()])
            .args(["-ac", &self.audio.channels.to_string()])
            .args(["-progress", "pipe:1"])
            .arg("-y")
            .arg(wav_out)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TaskError::Extraction(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::Extraction("failed to capture ffmpeg stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TaskError::Extraction("failed to capture ffmpeg stderr".to_string()))?;

        let supervised = run_supervised(
            "ffmpeg",
            &mut child,
            stdout,
            stderr,
            |line| progress_event(line, total_duration),
            sink,
            self.stall_timeout,
            cancel,
        )
        .await;

        if let Err(failure) = supervised {
            // Never leave a truncated wav behind for the next stage.
            remove_quietly(wav_out);
            if failure.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            return Err(TaskError::Extraction(failure.to_string()));
        }

        let produced = std::fs::metadata(wav_out).map(|m| m.len()).unwrap_or(0);
        if produced == 0 {
            remove_quietly(wav_out);
            return Err(TaskError::Extraction(
                "extracted audio file is empty or missing".to_string(),
            ));
        }

        sink.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_BANNER: &str = r#"Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':
  Duration: 01:02:05.25, start: 0.000000, bitrate: 1205 kb/s
  Stream #0:0(und): Video: h264 (High) (avc1 / 0x31637661), yuv420p, 1280x720
  Stream #0:1(und): Audio: aac (LC) (mp4a / 0x6134706D), 44100 Hz, stereo, fltp, 128 kb/s
"#;

    #[test]
    fn test_parse_probe_output() {
        let info = parse_probe_output(SAMPLE_BANNER, 1024);
        assert!((info.duration - 3725.25).abs() < 1e-9);
        assert!(info.has_audio);
        assert!(info.has_video);
        assert_eq!(info.size_bytes, 1024);
    }

    #[test]
    fn test_parse_probe_output_without_audio() {
        let banner = "Duration: 00:00:10.00\n  Stream #0:0: Video: h264\n";
        let info = parse_probe_output(banner, 0);
        assert!(!info.has_audio);
        assert!((info.duration - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_probe_output_unknown_duration() {
        let info = parse_probe_output("Duration: N/A, bitrate: N/A\n", 0);
        assert_eq!(info.duration, 0.0);
    }

    #[test]
    fn test_progress_event_parsing() {
        // 30 of 60 seconds done.
        assert_eq!(
            progress_event("out_time_ms=30000000", 60.0),
            Some(ProgressEvent::Fraction(0.5))
        );
        assert_eq!(progress_event("progress=end", 60.0), Some(ProgressEvent::Completed));
        assert_eq!(progress_event("fps=25.0", 60.0), None);
        // Unknown total duration: no ratio to compute.
        assert_eq!(progress_event("out_time_ms=30000000", 0.0), None);
    }
}
