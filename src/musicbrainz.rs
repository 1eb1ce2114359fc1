//! Canonical recording-length resolution against the MusicBrainz ws/2 API.
//!
//! Two lookup paths: a direct fetch when the file carries a recording
//! id, and a fuzzy recording search with a two-tier candidate selection
//! otherwise. Lookup failures always degrade to "unknown"; an
//! unreachable service must never abort a batch.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::metadata::SongMetadata;

const BASE_URL: &str = "https://musicbrainz.org/ws/2";
const SEARCH_LIMIT: u32 = 10;

/// MusicBrainz asks for at most one request per second.
const POLITENESS_DELAY: Duration = Duration::from_millis(1100);
const RETRY_PAUSE: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("MusicBrainz HTTP {0}")]
    Status(StatusCode),
    #[error("rate limited after retry")]
    RateLimited,
}

/// User-agent string in the form MusicBrainz requires:
/// `AppName/Version ( contact )`.
pub fn user_agent(contact: &str) -> String {
    format!(
        "{}/{} ( {contact} )",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )
}

pub fn client(user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
}

// ---------------------------------------------------------------------------
// Response shapes
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct RecordingResponse {
    length: Option<u64>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    recordings: Vec<SearchRecording>,
}

#[derive(Deserialize)]
struct SearchRecording {
    #[serde(default)]
    title: String,
    length: Option<u64>,
    #[serde(rename = "artist-credit", default)]
    artist_credit: Vec<ArtistCredit>,
    #[serde(default)]
    releases: Vec<Release>,
}

#[derive(Deserialize)]
struct ArtistCredit {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct Release {
    #[serde(default)]
    title: String,
}

/// One search result reduced to the fields the tier heuristic compares.
#[derive(Debug, Clone)]
pub struct RecordingCandidate {
    pub title: String,
    /// First credited artist, when any.
    pub artist: Option<String>,
    /// Title of the first associated release, when any.
    pub album: Option<String>,
    pub length_ms: Option<u64>,
}

impl From<SearchRecording> for RecordingCandidate {
    fn from(rec: SearchRecording) -> Self {
        Self {
            title: rec.title,
            artist: rec.artist_credit.into_iter().next().map(|c| c.name),
            album: rec.releases.into_iter().next().map(|r| r.title),
            length_ms: rec.length,
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate selection
// ---------------------------------------------------------------------------

/// Normalize a string for matching: strip surrounding whitespace, lowercase.
fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Two-tier selection over an ordered candidate list.
///
/// Tier 1: normalized title and artist both equal the record's.
/// Tier 2: normalized title and album both equal the record's. Artist is
/// left out of tier 2 on purpose: file tags often miss featured artists,
/// while title+album is discriminating enough.
///
/// Tier 1 always wins over tier 2, regardless of candidate order, so the
/// list is scanned in two passes. Candidates without a length cannot
/// command a cut and are never matched.
pub fn select_canonical_length(
    meta: &SongMetadata,
    candidates: &[RecordingCandidate],
) -> Option<u64> {
    let want_title = normalize(&meta.title);
    let want_artist = normalize(&meta.artist);
    let want_album = normalize(&meta.album);

    let title_matches =
        |c: &RecordingCandidate| c.length_ms.is_some() && normalize(&c.title) == want_title;

    for c in candidates {
        if title_matches(c) && c.artist.as_deref().map(normalize) == Some(want_artist.clone()) {
            return c.length_ms;
        }
    }
    for c in candidates {
        if title_matches(c) && c.album.as_deref().map(normalize) == Some(want_album.clone()) {
            return c.length_ms;
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Direct recording fetch by MusicBrainz id. `Ok(None)` when the
/// recording exists but has no length.
pub async fn length_by_track_id(client: &Client, track_id: &str) -> Result<Option<u64>, LookupError> {
    let url = format!("{BASE_URL}/recording/{}?fmt=json", encode(track_id));
    let resp = get_with_retry(client, &url).await?;
    let rec: RecordingResponse = resp.json().await?;
    Ok(rec.length)
}

/// Fuzzy recording search by artist + title + album, up to
/// `SEARCH_LIMIT` candidates in relevance order.
pub async fn search_recordings(
    client: &Client,
    meta: &SongMetadata,
) -> Result<Vec<RecordingCandidate>, LookupError> {
    let query = format!(
        r#"artist:"{}" AND recording:"{}" AND release:"{}""#,
        escape_phrase(&meta.artist),
        escape_phrase(&meta.title),
        escape_phrase(&meta.album),
    );
    let url = format!(
        "{BASE_URL}/recording?query={}&limit={SEARCH_LIMIT}&fmt=json",
        encode(&query)
    );
    let resp = get_with_retry(client, &url).await?;
    let data: SearchResponse = resp.json().await?;
    Ok(data.recordings.into_iter().map(Into::into).collect())
}

/// Resolve the canonical length for a record: direct id lookup when a
/// track id is present (never falls through to search), fuzzy search
/// plus tier selection otherwise. Any lookup error degrades to `None`.
pub async fn resolve(client: &Client, meta: &SongMetadata) -> Option<u64> {
    let outcome = match &meta.track_id {
        Some(id) => length_by_track_id(client, id).await,
        None => search_recordings(client, meta)
            .await
            .map(|candidates| select_canonical_length(meta, &candidates)),
    };
    match outcome {
        Ok(length) => length,
        Err(e) => {
            warn!(artist = %meta.artist, title = %meta.title, "length lookup failed: {e}");
            None
        }
    }
}

async fn get_with_retry(client: &Client, url: &str) -> Result<reqwest::Response, LookupError> {
    tokio::time::sleep(POLITENESS_DELAY).await;

    let resp = client.get(url).send().await?;
    // MusicBrainz signals rate limiting with 503.
    if resp.status() == StatusCode::SERVICE_UNAVAILABLE {
        warn!("MusicBrainz rate limited, waiting {}s before retrying", RETRY_PAUSE.as_secs());
        tokio::time::sleep(RETRY_PAUSE).await;
        let retry = client.get(url).send().await?;
        if !retry.status().is_success() {
            return Err(LookupError::RateLimited);
        }
        return Ok(retry);
    }
    if !resp.status().is_success() {
        return Err(LookupError::Status(resp.status()));
    }
    Ok(resp)
}

/// Escape a value for use inside a quoted Lucene phrase.
fn escape_phrase(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn encode(s: &str) -> String {
    use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
    const SET: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'-')
        .remove(b'_')
        .remove(b'.')
        .remove(b'~');
    utf8_percent_encode(s, SET).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(artist: &str, title: &str, album: &str) -> SongMetadata {
        SongMetadata {
            artist: artist.to_string(),
            title: title.to_string(),
            track_id: None,
            album: album.to_string(),
            length_ms: 200_000,
            source: None,
        }
    }

    fn candidate(
        title: &str,
        artist: Option<&str>,
        album: Option<&str>,
        length_ms: Option<u64>,
    ) -> RecordingCandidate {
        RecordingCandidate {
            title: title.to_string(),
            artist: artist.map(str::to_string),
            album: album.map(str::to_string),
            length_ms,
        }
    }

    #[test]
    fn tier1_match_returns_length() {
        let m = meta("Burial", "Archangel", "Untrue");
        let candidates = [candidate("Archangel", Some("Burial"), None, Some(238_000))];
        assert_eq!(select_canonical_length(&m, &candidates), Some(238_000));
    }

    #[test]
    fn tier2_match_when_artist_differs() {
        // Featured artist missing from the candidate credit: title+album
        // still matches.
        let m = meta("Burial", "Archangel", "Untrue");
        let candidates = [candidate(
            "Archangel",
            Some("Burial feat. Someone"),
            Some("Untrue"),
            Some(238_000),
        )];
        assert_eq!(select_canonical_length(&m, &candidates), Some(238_000));
    }

    #[test]
    fn tier1_beats_earlier_tier2() {
        // A tier-2 match appearing first in result order must not shadow
        // a later tier-1 match.
        let m = meta("Burial", "Archangel", "Untrue");
        let candidates = [
            candidate("Archangel", Some("Somebody Else"), Some("Untrue"), Some(111_000)),
            candidate("Archangel", Some("Burial"), Some("Compilation"), Some(238_000)),
        ];
        assert_eq!(select_canonical_length(&m, &candidates), Some(238_000));
    }

    #[test]
    fn first_tier1_match_wins_within_tier() {
        let m = meta("Burial", "Archangel", "Untrue");
        let candidates = [
            candidate("Archangel", Some("Burial"), None, Some(238_000)),
            candidate("Archangel", Some("Burial"), None, Some(240_000)),
        ];
        assert_eq!(select_canonical_length(&m, &candidates), Some(238_000));
    }

    #[test]
    fn matching_is_case_and_whitespace_insensitive() {
        let m = meta("  BURIAL ", "archangel", "untrue");
        let candidates = [candidate(" Archangel ", Some("Burial"), None, Some(238_000))];
        assert_eq!(select_canonical_length(&m, &candidates), Some(238_000));
    }

    #[test]
    fn candidate_without_length_is_not_a_match() {
        let m = meta("Burial", "Archangel", "Untrue");
        let candidates = [
            candidate("Archangel", Some("Burial"), Some("Untrue"), None),
            candidate("Archangel", None, Some("Untrue"), Some(238_000)),
        ];
        // The exact tier-1 candidate has no length; the tier-2 one wins.
        assert_eq!(select_canonical_length(&m, &candidates), Some(238_000));
    }

    #[test]
    fn no_match_is_unknown() {
        let m = meta("Burial", "Archangel", "Untrue");
        let candidates = [
            candidate("Endorphin", Some("Burial"), Some("Untrue"), Some(300_000)),
            candidate("Archangel", Some("Actress"), Some("R.I.P."), Some(238_000)),
        ];
        assert_eq!(select_canonical_length(&m, &candidates), None);
        assert_eq!(select_canonical_length(&m, &[]), None);
    }

    #[test]
    fn search_response_maps_to_candidates() {
        let json = r#"{
            "count": 2,
            "recordings": [
                {
                    "id": "x",
                    "title": "Archangel",
                    "length": 238000,
                    "artist-credit": [{"name": "Burial"}],
                    "releases": [{"title": "Untrue"}, {"title": "Other"}]
                },
                {
                    "id": "y",
                    "title": "Archangel (Live)"
                }
            ]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        let candidates: Vec<RecordingCandidate> =
            parsed.recordings.into_iter().map(Into::into).collect();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].title, "Archangel");
        assert_eq!(candidates[0].artist.as_deref(), Some("Burial"));
        assert_eq!(candidates[0].album.as_deref(), Some("Untrue"));
        assert_eq!(candidates[0].length_ms, Some(238_000));
        assert_eq!(candidates[1].artist, None);
        assert_eq!(candidates[1].length_ms, None);
    }

    #[test]
    fn recording_response_length_optional() {
        let with: RecordingResponse = serde_json::from_str(r#"{"id":"x","length":181000}"#).unwrap();
        assert_eq!(with.length, Some(181_000));
        let without: RecordingResponse = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
        assert_eq!(without.length, None);
    }

    #[test]
    fn phrase_escaping() {
        assert_eq!(escape_phrase(r#"say "hi""#), r#"say \"hi\""#);
        assert_eq!(escape_phrase(r"a\b"), r"a\\b");
    }

    #[test]
    fn user_agent_carries_contact() {
        let ua = user_agent("someone@example.com");
        assert!(ua.contains("trimdex/"));
        assert!(ua.contains("someone@example.com"));
    }
}
