use std::path::{Path, PathBuf};

use rusqlite::{ffi, params, Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::metadata::SongMetadata;

/// Seed data for a catalog. Passed explicitly to `open` so catalogs
/// with different seed sets can coexist.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Source names seeded at initialization, insert-or-ignore.
    pub sources: Vec<String>,
    /// Fallback for records whose source is absent or unrecognized.
    /// Named explicitly rather than derived from seed order.
    pub default_source: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            sources: ["Bandcamp", "YouTube", "Spotify", "Soundcloud"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            default_source: "YouTube".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    /// A row the insert protocol guarantees to exist is missing. This is
    /// a programming invariant violation, not a recoverable state.
    #[error("catalog integrity violation: {0}")]
    IntegrityGap(String),
}

pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trimdex")
        .join("recordings.sqlite3")
}

/// Open (or create) a catalog and ensure schema and seed sources exist.
/// Repeated opens against the same file are idempotent.
pub fn open(path: &Path, config: &CatalogConfig) -> Result<Connection, rusqlite::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| {
            rusqlite::Error::SqliteFailure(
                ffi::Error::new(ffi::SQLITE_CANTOPEN),
                Some(format!(
                    "failed to create parent directory {} for {}: {}",
                    parent.display(),
                    path.display(),
                    err
                )),
            )
        })?;
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    migrate(&conn, config)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_test(config: &CatalogConfig) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    migrate(&conn, config).unwrap();
    conn
}

/// Songs carry no uniqueness constraint: dedup lives in `insert` via
/// `contains`, on the (artist_id, title, album) key.
fn migrate(conn: &Connection, config: &CatalogConfig) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS artists (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS sources (
            id   INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );
        CREATE TABLE IF NOT EXISTS songs (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            artist_id INTEGER NOT NULL REFERENCES artists(id),
            title     TEXT NOT NULL,
            album     TEXT NOT NULL,
            source_id INTEGER NOT NULL REFERENCES sources(id)
        );",
    )?;
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO sources (name) VALUES (?1)")?;
    for source in &config.sources {
        stmt.execute(params![source])?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

pub fn artist_id(conn: &Connection, name: &str) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row("SELECT id FROM artists WHERE name = ?1", params![name], |r| r.get(0))
        .optional()
}

pub fn artist_name(conn: &Connection, id: i64) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT name FROM artists WHERE id = ?1", params![id], |r| r.get(0))
        .optional()
}

pub fn source_id(conn: &Connection, name: &str) -> Result<Option<i64>, rusqlite::Error> {
    conn.query_row("SELECT id FROM sources WHERE name = ?1", params![name], |r| r.get(0))
        .optional()
}

pub fn source_name(conn: &Connection, id: i64) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row("SELECT name FROM sources WHERE id = ?1", params![id], |r| r.get(0))
        .optional()
}

pub fn song_count(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM songs", [], |r| r.get(0))
}

/// Dedup check: a song is a duplicate iff a row with the same artist,
/// title and album exists. Comparison is case-sensitive; source is not
/// part of the key.
pub fn contains(conn: &Connection, song: &SongMetadata) -> Result<bool, rusqlite::Error> {
    let Some(artist_id) = artist_id(conn, &song.artist)? else {
        // No artist row means no song of theirs was ever stored.
        return Ok(false);
    };
    let found: Option<i64> = conn
        .query_row(
            "SELECT id FROM songs WHERE artist_id = ?1 AND title = ?2 AND album = ?3",
            params![artist_id, song.title, song.album],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

// ---------------------------------------------------------------------------
// Insertion / removal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Dedup check was positive; nothing was written.
    Duplicate,
}

pub fn insert(
    conn: &Connection,
    song: &SongMetadata,
    config: &CatalogConfig,
) -> Result<InsertOutcome, CatalogError> {
    if contains(conn, song)? {
        info!(artist = %song.artist, title = %song.title, "entry already exists, skipping");
        return Ok(InsertOutcome::Duplicate);
    }

    conn.execute(
        "INSERT OR IGNORE INTO artists (name) VALUES (?1)",
        params![song.artist],
    )?;
    let artist_id = artist_id(conn, &song.artist)?.ok_or_else(|| {
        CatalogError::IntegrityGap(format!("artist {:?} missing after insert", song.artist))
    })?;

    let source_name = song.source.as_deref().unwrap_or_default();
    let source_id = match source_id(conn, source_name)? {
        Some(id) => id,
        None => {
            warn!(
                source = source_name,
                fallback = %config.default_source,
                "unknown source, using fallback"
            );
            source_id(conn, &config.default_source)?.ok_or_else(|| {
                CatalogError::IntegrityGap(format!(
                    "default source {:?} is not seeded",
                    config.default_source
                ))
            })?
        }
    };

    conn.execute(
        "INSERT INTO songs (artist_id, title, album, source_id) VALUES (?1, ?2, ?3, ?4)",
        params![artist_id, song.title, song.album, source_id],
    )?;
    Ok(InsertOutcome::Inserted)
}

/// Delete one song row matching title (and artist, when given).
/// Returns whether a deletion occurred. With no artist the title alone
/// decides and the lowest id wins, so repeated calls peel off duplicate
/// titles one row at a time.
pub fn remove(
    conn: &Connection,
    title: &str,
    artist: Option<&str>,
) -> Result<bool, rusqlite::Error> {
    let song_id = match artist {
        Some(artist) => {
            let Some(artist_id) = artist_id(conn, artist)? else {
                return Ok(false);
            };
            conn.query_row(
                "SELECT id FROM songs WHERE title = ?1 AND artist_id = ?2 ORDER BY id LIMIT 1",
                params![title, artist_id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
        }
        None => conn
            .query_row(
                "SELECT id FROM songs WHERE title = ?1 ORDER BY id LIMIT 1",
                params![title],
                |r| r.get::<_, i64>(0),
            )
            .optional()?,
    };

    match song_id {
        Some(id) => {
            conn.execute("DELETE FROM songs WHERE id = ?1", params![id])?;
            Ok(true)
        }
        None => Ok(false),
    }
}
