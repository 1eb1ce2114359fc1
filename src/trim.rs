//! Per-file trim decision and execution.
//!
//! The decision itself is a pure function over three facts: whether the
//! filename already carries the unchecked marker, whether extraction
//! produced a record, and whether a canonical length was resolved. The
//! cut is delegated to an `ffmpeg` subprocess writing to a temp file
//! that atomically replaces the original.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use crate::metadata::{self, SongMetadata};
use crate::musicbrainz;

/// Filename prefix flagging a file that was examined but could not be
/// resolved, so it was intentionally left untrimmed.
pub const UNCHECKED_PREFIX: &str = "[UNCHECKED]_";

const FFMPEG_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum TrimError {
    #[error("{0}")]
    Io(String),
    #[error("ffmpeg timed out after {FFMPEG_TIMEOUT_SECS}s")]
    Timeout,
    #[error("ffmpeg failed: {0}")]
    Encoder(String),
}

/// What processing decided for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimAction {
    /// Filename already carries the unchecked marker; nothing to do.
    SkipMarked,
    /// No usable metadata; the file is left alone.
    SkipNoMetadata,
    /// No canonical length could be resolved; flag the file by renaming.
    MarkUnchecked,
    /// Canonical length equals the decoded length; no rewrite.
    AlreadyCorrect,
    /// Cut the file down to the canonical length and overwrite it.
    Cut { canonical_ms: u64 },
}

pub fn is_marked(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(UNCHECKED_PREFIX))
}

/// The per-file state machine. Idempotent: a marked file short-circuits,
/// and a previously trimmed file lands in `AlreadyCorrect` as long as
/// the external data is unchanged.
pub fn decide(marked: bool, meta: Option<&SongMetadata>, canonical_ms: Option<u64>) -> TrimAction {
    if marked {
        return TrimAction::SkipMarked;
    }
    let Some(meta) = meta else {
        return TrimAction::SkipNoMetadata;
    };
    match canonical_ms {
        None => TrimAction::MarkUnchecked,
        Some(ms) if ms == meta.length_ms => TrimAction::AlreadyCorrect,
        Some(ms) => TrimAction::Cut { canonical_ms: ms },
    }
}

/// Rename in place, prepending the unchecked marker. Content untouched.
pub fn mark_unchecked(path: &Path) -> Result<PathBuf, TrimError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| TrimError::Io(format!("file has no usable name: {}", path.display())))?;
    let new_path = path.with_file_name(format!("{UNCHECKED_PREFIX}{name}"));
    std::fs::rename(path, &new_path)
        .map_err(|e| TrimError::Io(format!("failed to rename {}: {e}", path.display())))?;
    Ok(new_path)
}

/// Generate a temp path in the same directory as the original for atomic rename.
/// Format: `.{stem}.trimdex-{pid}-{ms}.{ext}`
fn cut_temp_path(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = original
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("tmp");
    let pid = std::process::id();
    let ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let filename = format!(".{stem}.trimdex-{pid}-{ms}.{ext}");
    original.with_file_name(filename)
}

/// Cut `path` down to `canonical_ms` and overwrite it, carrying
/// artist/title/album/source forward as output tags. The cut is a hard
/// boundary, not fade-aware. Output goes to a temp file first and is
/// renamed over the original only after the encoder succeeds.
pub async fn cut_to_length(
    path: &Path,
    canonical_ms: u64,
    meta: &SongMetadata,
) -> Result<(), TrimError> {
    let temp_path = cut_temp_path(path);
    let duration = format!("{}.{:03}", canonical_ms / 1000, canonical_ms % 1000);

    let mut command = tokio::process::Command::new("ffmpeg");
    command
        .arg("-hide_banner")
        .args(["-loglevel", "error"])
        .arg("-y")
        .arg("-i")
        .arg(path)
        .arg("-t")
        .arg(&duration)
        .args(["-map_metadata", "-1"])
        .arg("-metadata")
        .arg(format!("artist={}", meta.artist))
        .arg("-metadata")
        .arg(format!("title={}", meta.title))
        .arg("-metadata")
        .arg(format!("album={}", meta.album))
        .arg("-metadata")
        .arg(format!("source={}", meta.source.as_deref().unwrap_or_default()))
        .arg(&temp_path);
    command.kill_on_drop(true);

    let output = match timeout(Duration::from_secs(FFMPEG_TIMEOUT_SECS), command.output()).await {
        Ok(result) => {
            result.map_err(|e| TrimError::Io(format!("failed to start ffmpeg: {e}")))?
        }
        Err(_) => {
            let _ = std::fs::remove_file(&temp_path);
            return Err(TrimError::Timeout);
        }
    };

    if !output.status.success() {
        let _ = std::fs::remove_file(&temp_path);
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(TrimError::Encoder(if stderr.is_empty() {
            "(no stderr output)".to_string()
        } else {
            stderr
        }));
    }

    std::fs::rename(&temp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        TrimError::Io(format!(
            "failed to atomically replace {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

/// Drive one file through extract → resolve → decide → apply.
pub async fn process_file(client: &Client, path: &Path) -> Result<TrimAction, TrimError> {
    if is_marked(path) {
        debug!(path = %path.display(), "already marked unchecked, skipping");
        return Ok(TrimAction::SkipMarked);
    }

    let Some(meta) = metadata::extract(path) else {
        return Ok(TrimAction::SkipNoMetadata);
    };

    let canonical = musicbrainz::resolve(client, &meta).await;
    let action = decide(false, Some(&meta), canonical);
    match action {
        TrimAction::MarkUnchecked => {
            mark_unchecked(path)?;
            info!(path = %path.display(), "no canonical length found, marked unchecked");
        }
        TrimAction::Cut { canonical_ms } => {
            cut_to_length(path, canonical_ms, &meta).await?;
            info!(
                path = %path.display(),
                from_ms = meta.length_ms,
                to_ms = canonical_ms,
                "trimmed to canonical length"
            );
        }
        TrimAction::AlreadyCorrect => {
            debug!(path = %path.display(), "length already correct");
        }
        TrimAction::SkipMarked | TrimAction::SkipNoMetadata => {}
    }
    Ok(action)
}
