//! Batch drivers: catalog import, list-based removal, and the bounded
//! worker pool used by the trim pipeline.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Semaphore;

use crate::catalog::{self, CatalogConfig, CatalogError, InsertOutcome};
use crate::collection::{self, WalkError};
use crate::metadata;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Walk(#[from] WalkError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Candidate files found by the walker.
    pub scanned: usize,
    pub inserted: usize,
    pub duplicates: usize,
    /// Files that yielded no metadata record.
    pub unreadable: usize,
}

/// Import every candidate file under `root` into the catalog. Each
/// insert is independently idempotent: duplicates and unreadable files
/// are counted, never errors. Inserts run sequentially; the catalog is
/// a single-writer resource.
pub fn import_all(
    conn: &Connection,
    config: &CatalogConfig,
    root: &Path,
    ignore: &[String],
    force_source: Option<&str>,
) -> Result<ImportSummary, ImportError> {
    let files = collection::collect(root, ignore)?;
    let mut summary = ImportSummary {
        scanned: files.len(),
        ..Default::default()
    };

    for path in &files {
        let Some(meta) = metadata::extract(path) else {
            summary.unreadable += 1;
            continue;
        };
        let meta = match force_source {
            Some(source) => meta.with_source(source),
            None => meta,
        };
        match catalog::insert(conn, &meta, config)? {
            InsertOutcome::Inserted => summary.inserted += 1,
            InsertOutcome::Duplicate => summary.duplicates += 1,
        }
    }
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Removal lists
// ---------------------------------------------------------------------------

/// Parse a removal list: one `title[, artist]` entry per line, optional
/// whitespace around fields. Blank and title-less lines are skipped.
pub fn parse_removal_list(input: &str) -> Vec<(String, Option<String>)> {
    input
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, ',');
            let title = parts.next()?.trim();
            if title.is_empty() {
                return None;
            }
            let artist = parts
                .next()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string);
            Some((title.to_string(), artist))
        })
        .collect()
}

/// Remove each parsed entry, reporting per-entry success aligned by
/// index. One missing row never aborts the rest of the list.
pub fn remove_batch(
    conn: &Connection,
    entries: &[(String, Option<String>)],
) -> Result<Vec<bool>, rusqlite::Error> {
    entries
        .iter()
        .map(|(title, artist)| catalog::remove(conn, title, artist.as_deref()))
        .collect()
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PoolOutcome<R> {
    /// Per-item results, aligned by input index. `None` where the item
    /// failed or was not attempted.
    pub results: Vec<Option<R>>,
    /// (index, error) for every item whose task returned an error.
    pub failures: Vec<(usize, String)>,
    /// Items never started because the batch was cancelled.
    pub skipped: usize,
}

/// Run `task` over `items` with at most `workers` concurrent tasks.
///
/// One item's failure never aborts the batch: all results are collected
/// and partitioned into successes and per-index failures. Once `cancel`
/// is set, items that have not started yet are skipped while in-flight
/// ones run to completion.
pub async fn run_pooled<T, R, F, Fut>(
    items: Vec<T>,
    workers: usize,
    cancel: Arc<AtomicBool>,
    task: F,
) -> PoolOutcome<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, String>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let total = items.len();

    let mut handles = Vec::with_capacity(total);
    for item in items {
        let semaphore = semaphore.clone();
        let cancel = cancel.clone();
        let fut = task(item);
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return None;
            };
            if cancel.load(Ordering::SeqCst) {
                return None;
            }
            Some(fut.await)
        }));
    }

    let mut results: Vec<Option<R>> = (0..total).map(|_| None).collect();
    let mut failures = Vec::new();
    let mut skipped = 0;

    for (idx, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Some(Ok(value))) => results[idx] = Some(value),
            Ok(Some(Err(e))) => failures.push((idx, e)),
            Ok(None) => skipped += 1,
            Err(e) => failures.push((idx, format!("worker task failed: {e}"))),
        }
    }

    PoolOutcome {
        results,
        failures,
        skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::open_test;

    #[test]
    fn parse_removal_list_entries() {
        let input = "Haha, Hehe\nGlacier\n  Hoho  ,  Hehehe  \n\n, OnlyArtist\nTitle,\n";
        let entries = parse_removal_list(input);
        assert_eq!(
            entries,
            vec![
                ("Haha".to_string(), Some("Hehe".to_string())),
                ("Glacier".to_string(), None),
                ("Hoho".to_string(), Some("Hehehe".to_string())),
                ("Title".to_string(), None),
            ]
        );
    }

    #[test]
    fn remove_batch_reports_per_entry() {
        let config = CatalogConfig::default();
        let conn = open_test(&config);
        let song = crate::metadata::SongMetadata {
            artist: "Hehe".to_string(),
            title: "Haha".to_string(),
            track_id: None,
            album: "erstes Album".to_string(),
            length_ms: 10,
            source: Some("Spotify".to_string()),
        };
        catalog::insert(&conn, &song, &config).unwrap();

        let entries = vec![
            ("Haha".to_string(), Some("Hehe".to_string())),
            ("Missing".to_string(), None),
        ];
        let results = remove_batch(&conn, &entries).unwrap();
        assert_eq!(results, vec![true, false]);
        assert_eq!(catalog::song_count(&conn).unwrap(), 0);
    }

    #[tokio::test]
    async fn pool_partitions_failures_without_aborting() {
        let cancel = Arc::new(AtomicBool::new(false));
        let items: Vec<usize> = (0..10).collect();
        let outcome = run_pooled(items, 3, cancel, |n| async move {
            if n % 2 == 0 {
                Ok(n * 10)
            } else {
                Err(format!("odd input {n}"))
            }
        })
        .await;

        assert_eq!(outcome.results.len(), 10);
        assert_eq!(outcome.failures.len(), 5);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.results[4], Some(40));
        assert_eq!(outcome.results[5], None);
        assert!(outcome
            .failures
            .iter()
            .any(|(idx, e)| *idx == 5 && e.contains("odd input 5")));
    }

    #[tokio::test]
    async fn pool_cancellation_skips_unstarted_items() {
        let cancel = Arc::new(AtomicBool::new(true));
        let outcome = run_pooled(vec![1, 2, 3], 2, cancel, |n: i32| async move { Ok(n) }).await;
        assert_eq!(outcome.skipped, 3);
        assert!(outcome.failures.is_empty());
        assert!(outcome.results.iter().all(Option::is_none));
    }

    // -------------------------------------------------------------------
    // Import over a real (metadata-only) FLAC fixture
    // -------------------------------------------------------------------

    /// Minimal FLAC: magic + STREAMINFO + a last Vorbis-comment block.
    /// 4000 samples at 8 kHz mono 16-bit (500 ms), no audio frames.
    fn flac_bytes(title: &str, artist: &str, album: &str) -> Vec<u8> {
        let mut out = b"fLaC".to_vec();

        // STREAMINFO (type 0, 34 bytes)
        out.push(0x00);
        out.extend_from_slice(&[0x00, 0x00, 0x22]);
        out.extend_from_slice(&4096u16.to_be_bytes()); // min block size
        out.extend_from_slice(&4096u16.to_be_bytes()); // max block size
        out.extend_from_slice(&[0, 0, 0]); // min frame size (unknown)
        out.extend_from_slice(&[0, 0, 0]); // max frame size (unknown)
        // sample rate (20) | channels-1 (3) | bps-1 (5) | total samples (36)
        let packed: u64 = (8000u64 << 44) | (0u64 << 41) | (15u64 << 36) | 4000;
        out.extend_from_slice(&packed.to_be_bytes());
        out.extend_from_slice(&[0u8; 16]); // MD5 (unset)

        // VORBIS_COMMENT (type 4, last block)
        let mut body = Vec::new();
        let vendor = b"trimdex-test";
        body.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
        body.extend_from_slice(vendor);
        let comments = [
            format!("TITLE={title}"),
            format!("ARTIST={artist}"),
            format!("ALBUM={album}"),
        ];
        body.extend_from_slice(&(comments.len() as u32).to_le_bytes());
        for comment in &comments {
            body.extend_from_slice(&(comment.len() as u32).to_le_bytes());
            body.extend_from_slice(comment.as_bytes());
        }
        out.push(0x84);
        let len = body.len() as u32;
        out.extend_from_slice(&len.to_be_bytes()[1..]);
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn import_is_idempotent() {
        let config = CatalogConfig::default();
        let conn = open_test(&config);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("archangel.flac"),
            flac_bytes("Archangel", "Burial", "Untrue"),
        )
        .unwrap();

        let first = import_all(&conn, &config, dir.path(), &[], None).unwrap();
        assert_eq!(first.scanned, 1);
        assert_eq!(first.inserted, 1);
        assert_eq!(catalog::song_count(&conn).unwrap(), 1);

        let second = import_all(&conn, &config, dir.path(), &[], None).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(catalog::song_count(&conn).unwrap(), 1);
    }

    #[test]
    fn import_forces_source_on_every_record() {
        let config = CatalogConfig::default();
        let conn = open_test(&config);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("archangel.flac"),
            flac_bytes("Archangel", "Burial", "Untrue"),
        )
        .unwrap();

        import_all(&conn, &config, dir.path(), &[], Some("Spotify")).unwrap();
        let stored: i64 = conn
            .query_row("SELECT source_id FROM songs", [], |r| r.get(0))
            .unwrap();
        assert_eq!(Some(stored), catalog::source_id(&conn, "Spotify").unwrap());
    }

    #[test]
    fn import_skips_unreadable_files() {
        let config = CatalogConfig::default();
        let conn = open_test(&config);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.flac"), b"not a flac at all").unwrap();
        std::fs::write(
            dir.path().join("good.flac"),
            flac_bytes("Archangel", "Burial", "Untrue"),
        )
        .unwrap();

        let summary = import_all(&conn, &config, dir.path(), &[], None).unwrap();
        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.unreadable, 1);
    }

    #[test]
    fn import_rejects_invalid_root() {
        let config = CatalogConfig::default();
        let conn = open_test(&config);
        let err = import_all(&conn, &config, Path::new("/does/not/exist"), &[], None).unwrap_err();
        assert!(matches!(err, ImportError::Walk(WalkError::NotADirectory(_))));
    }
}
