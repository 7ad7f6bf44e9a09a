// Filesystem helpers: output path mapping, temp audio paths, relocation
// of processed sources, and stale temp cleanup.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};

use crate::discovery::WorkItem;

/// Sanitize a filename to be safe for filesystem use
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Map a source file to its output path: the input-relative path mirrored
/// under the output root, with the format's extension and each component
/// sanitized. Sources outside the input root fall back to their file name.
pub fn output_path_for(
    input_root: &Path,
    output_root: &Path,
    source: &Path,
    extension: &str,
) -> PathBuf {
    let relative = source
        .strip_prefix(input_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(source.file_name().unwrap_or_default()));

    let mut sanitized = PathBuf::new();
    for component in relative.components() {
        if let Component::Normal(part) = component {
            sanitized.push(sanitize_filename(&part.to_string_lossy()));
        }
    }

    output_root.join(sanitized.with_extension(extension))
}

/// Per-item temp wav path, unique per file identity so concurrent tasks
/// never collide on the same source name.
pub fn temp_audio_path(temp_audio_dir: &Path, item: &WorkItem) -> PathBuf {
    let stem = item
        .path
        .file_stem()
        .map(|s| sanitize_filename(&s.to_string_lossy()))
        .unwrap_or_else(|| "audio".to_string());
    let identity = item.identity();
    temp_audio_dir.join(format!("{}_{}.wav", stem, &identity[..8]))
}

/// Move a processed source file into the done directory, resolving name
/// collisions with a numeric suffix instead of overwriting.
pub fn relocate(source: &Path, done_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(done_dir)
        .with_context(|| format!("failed to create done directory {}", done_dir.display()))?;

    let file_name = source
        .file_name()
        .context("source file has no file name")?
        .to_string_lossy()
        .to_string();
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| file_name.clone());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut dest = done_dir.join(&file_name);
    let mut counter = 1;
    while dest.exists() {
        dest = done_dir.join(format!("{}_{}{}", stem, counter, ext));
        counter += 1;
    }

    // rename fails across filesystems; fall back to copy + remove
    if std::fs::rename(source, &dest).is_err() {
        std::fs::copy(source, &dest)
            .with_context(|| format!("failed to copy {} to {}", source.display(), dest.display()))?;
        std::fs::remove_file(source)
            .with_context(|| format!("failed to remove {}", source.display()))?;
    }

    info!("moved {} -> {}", source.display(), dest.display());
    Ok(dest)
}

/// Delete a temp artifact; failures are logged, never escalated.
pub fn remove_quietly(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_file(path) {
        warn!("failed to remove temp file {}: {}", path.display(), e);
    }
}

/// Sweep stale wav files out of the temp audio directory, keeping the
/// `keep_recent` newest. Returns the number of files deleted.
pub fn cleanup_temp_files(temp_audio_dir: &Path, keep_recent: usize) -> usize {
    let entries = match std::fs::read_dir(temp_audio_dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut wavs: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().map(|e| e == "wav").unwrap_or(false) {
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((path, modified))
            } else {
                None
            }
        })
        .collect();

    // Newest first; keep the head, delete the tail.
    wavs.sort_by(|a, b| b.1.cmp(&a.1));

    let mut deleted = 0;
    for (path, _) in wavs.into_iter().skip(keep_recent) {
        match std::fs::remove_file(&path) {
            Ok(()) => deleted += 1,
            Err(e) => warn!("failed to delete temp file {}: {}", path.display(), e),
        }
    }

    if deleted > 0 {
        info!("cleaned up {} temporary audio files", deleted);
    }
    deleted
}
