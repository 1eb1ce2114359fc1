use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum WalkError {
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("failed to read directory {0}: {1}")]
    ReadDir(String, std::io::Error),
}

const COLLECTION_EXTENSIONS: &[&str] = &["flac", "mp3"];

/// Collect candidate audio files under `root`.
///
/// Only `.flac`/`.mp3` files (case-insensitive) are returned. Hidden
/// path components below `root` are skipped, as is any component whose
/// lowercase form appears in `ignore`. The result holds absolute paths,
/// sorted for deterministic batch order.
pub fn collect(root: &Path, ignore: &[String]) -> Result<Vec<PathBuf>, WalkError> {
    if !root.is_dir() {
        return Err(WalkError::NotADirectory(root.display().to_string()));
    }
    let root = fs::canonicalize(root)
        .map_err(|e| WalkError::ReadDir(root.display().to_string(), e))?;

    let ignore_set: HashSet<String> = ignore.iter().map(|s| s.trim().to_lowercase()).collect();

    let mut files = Vec::new();
    let mut dirs_to_scan = vec![root];

    while let Some(current_dir) = dirs_to_scan.pop() {
        let entries = fs::read_dir(&current_dir)
            .map_err(|e| WalkError::ReadDir(current_dir.display().to_string(), e))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| WalkError::ReadDir(current_dir.display().to_string(), e))?;
            let path = entry.path();

            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || ignore_set.contains(&name.to_lowercase()) {
                continue;
            }

            if path.is_dir() {
                dirs_to_scan.push(path);
                continue;
            }
            if !path.is_file() {
                continue;
            }

            let is_candidate = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| COLLECTION_EXTENSIONS.contains(&e.to_lowercase().as_str()));
            if is_candidate {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
