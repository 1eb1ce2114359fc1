//! Metadata extraction using `lofty`.
//!
//! One extraction function per container format behind a single
//! extension-dispatched entry point. Extraction is read-only; a file
//! that cannot be read or carries neither artist nor title yields no
//! record (logged, never raised).

use std::path::Path;

use lofty::config::{ParseOptions, ParsingMode};
use lofty::file::TaggedFile;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, ItemValue, Tag, TagType};
use tracing::warn;

pub const UNKNOWN_TITLE: &str = "Unknown Title";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";

/// Normalized metadata for a single audio file.
///
/// Built once at extraction time and never mutated. `length_ms` is the
/// container's decoded duration, i.e. the file's *current* length, as
/// opposed to the canonical length resolved externally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SongMetadata {
    pub artist: String,
    pub title: String,
    /// MusicBrainz recording id, when the file carries one.
    pub track_id: Option<String>,
    pub album: String,
    pub length_ms: u64,
    pub source: Option<String>,
}

impl SongMetadata {
    /// Copy with the source overridden, for batches that force a fixed
    /// provenance on every record.
    pub fn with_source(&self, source: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            ..self.clone()
        }
    }
}

/// Container format, dispatched by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    Flac,
    Mp3,
    Wav,
}

impl FormatKind {
    /// Case-insensitive extension dispatch. `None` for anything the
    /// pipeline does not handle.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "flac" => Some(Self::Flac),
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            _ => None,
        }
    }
}

/// Extract a metadata record from an audio file.
///
/// Returns `None` when the extension is unsupported, the container is
/// unreadable, or the tags carry neither artist nor title. All three
/// cases are logged and recovered; a batch never fails on one file.
pub fn extract(path: &Path) -> Option<SongMetadata> {
    let Some(kind) = FormatKind::from_path(path) else {
        warn!(path = %path.display(), "unsupported file format, skipping");
        return None;
    };

    match extract_inner(path, kind) {
        Ok(Some(meta)) => Some(meta),
        Ok(None) => {
            warn!(path = %path.display(), "file carries neither artist nor title");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), "failed to read container: {e}");
            None
        }
    }
}

fn parse_options() -> ParseOptions {
    ParseOptions::new().parsing_mode(ParsingMode::BestAttempt)
}

fn extract_inner(path: &Path, kind: FormatKind) -> Result<Option<SongMetadata>, lofty::error::LoftyError> {
    let tagged_file = Probe::open(path)?.options(parse_options()).read()?;
    let length_ms = tagged_file.properties().duration().as_millis() as u64;

    Ok(match kind {
        FormatKind::Flac => extract_flac(&tagged_file, length_ms),
        FormatKind::Mp3 => extract_mp3(&tagged_file, length_ms),
        FormatKind::Wav => extract_wav(&tagged_file, length_ms),
    })
}

/// FLAC: Vorbis Comments (TITLE, ARTIST, ALBUM, MUSICBRAINZ_TRACKID).
fn extract_flac(file: &TaggedFile, length_ms: u64) -> Option<SongMetadata> {
    let tag = file.primary_tag().or_else(|| file.first_tag());
    let track_id = tag.and_then(|t| item_string(t, ItemKey::MusicBrainzRecordingId));
    build(
        tag.and_then(|t| field(t, ItemKey::TrackTitle)),
        tag.and_then(|t| field(t, ItemKey::TrackArtist)),
        tag.and_then(|t| field(t, ItemKey::AlbumTitle)),
        track_id,
        length_ms,
    )
}

/// MP3: ID3v2 (TIT2, TPE1, TALB); the track id comes from the
/// MusicBrainz recording UFID frame, falling back to the
/// `MusicBrainz Release Track Id` TXXX frame.
fn extract_mp3(file: &TaggedFile, length_ms: u64) -> Option<SongMetadata> {
    let tag = file.primary_tag().or_else(|| file.first_tag());
    let track_id = tag.and_then(|t| {
        item_string(t, ItemKey::MusicBrainzRecordingId)
            .or_else(|| item_string(t, ItemKey::MusicBrainzTrackId))
    });
    build(
        tag.and_then(|t| field(t, ItemKey::TrackTitle)),
        tag.and_then(|t| field(t, ItemKey::TrackArtist)),
        tag.and_then(|t| field(t, ItemKey::AlbumTitle)),
        track_id,
        length_ms,
    )
}

/// WAV: RIFF INFO (INAM, IART, IPRD). WAV files never carry a
/// MusicBrainz id.
fn extract_wav(file: &TaggedFile, length_ms: u64) -> Option<SongMetadata> {
    let tag = file.tag(TagType::RiffInfo);
    build(
        tag.and_then(|t| field(t, ItemKey::TrackTitle)),
        tag.and_then(|t| field(t, ItemKey::TrackArtist)),
        tag.and_then(|t| field(t, ItemKey::AlbumTitle)),
        None,
        length_ms,
    )
}

/// Read a text field, treating an empty value as absent.
fn field(tag: &Tag, key: ItemKey) -> Option<String> {
    tag.get_string(&key)
        .map(str::to_string)
        .filter(|s| !s.is_empty())
}

/// Read an item that may be stored as text or as a binary payload
/// (ID3v2 UFID frames hold the recording id as raw bytes).
fn item_string(tag: &Tag, key: ItemKey) -> Option<String> {
    let item = tag.get(&key)?;
    match item.value() {
        ItemValue::Text(s) | ItemValue::Locator(s) => Some(s.clone()),
        ItemValue::Binary(b) => std::str::from_utf8(b).ok().map(str::to_string),
    }
    .filter(|s| !s.is_empty())
}

/// Uniform strictness floor across all formats: individually missing
/// fields get placeholder values; a file missing BOTH title and artist
/// produces no record, since neither the length lookup nor the catalog
/// dedup key could do anything useful with it.
fn build(
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    track_id: Option<String>,
    length_ms: u64,
) -> Option<SongMetadata> {
    if title.is_none() && artist.is_none() {
        return None;
    }
    Some(SongMetadata {
        artist: artist.unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
        title: title.unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        track_id,
        album: album.unwrap_or_else(|| UNKNOWN_ALBUM.to_string()),
        length_ms,
        source: None,
    })
}
