//! Wire-format types for the remote document and its three sub-files.
//!
//! The remote store is one gist-style JSON document holding `feed.json`
//! (feed subscriptions), `state.json` (per-feed clear watermarks) and
//! `readlist.json` (the cross-device reading list). Sub-file payloads keep
//! the historical camelCase field names so documents written by older
//! clients keep loading.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const FEED_FILE: &str = "feed.json";
pub const STATE_FILE: &str = "state.json";
pub const READLIST_FILE: &str = "readlist.json";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document is missing sub-file '{0}'")]
    MissingFile(&'static str),

    #[error("Invalid JSON in '{file}': {source}")]
    Json {
        file: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// Sub-file payloads
// ============================================================================

/// One feed subscription from `feed.json`.
///
/// Identity is `id`, unique within the document. Read-mostly: written only
/// when the user edits their subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub icon: String,
    /// Fetch directly instead of through the CORS relay.
    #[serde(
        rename = "noCorsProxy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub no_cors_proxy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhance: Option<bool>,
    /// Substring filter: links whose title contains it are hidden.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Envelope of `feed.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedsFile {
    pub feeds: Vec<FeedConfig>,
}

/// `state.json`: the per-feed clear watermarks.
///
/// `updates[feed_id]` is the publication-date threshold at or below which a
/// feed's links are hidden. `raw_url` is the server's content pointer for
/// this sub-file; it is overwritten from every server response and used by
/// the out-of-band change probe, never round-tripped from stale data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedState {
    pub last_update: DateTime<Utc>,
    pub updates: HashMap<i64, DateTime<Utc>>,
    #[serde(default)]
    pub raw_url: String,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            last_update: sentinel_date(1990),
            updates: HashMap::new(),
            raw_url: String::new(),
        }
    }
}

impl FeedState {
    /// Clear watermark for a feed, if one was ever stored.
    pub fn clear_date(&self, feed_id: i64) -> Option<DateTime<Utc>> {
        self.updates.get(&feed_id).copied()
    }
}

/// One saved article in `readlist.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadListItem {
    pub id_feed: i64,
    pub title: String,
    pub url: String,
    pub publication_date: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other: Option<String>,
}

/// Midnight UTC on January 1st of `year`. Used for the fixed sentinel dates
/// the document format relies on (missing state, undated items).
pub fn sentinel_date(year: i32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

// ============================================================================
// Gist wire envelope
// ============================================================================

/// One sub-file as returned by `GET /gists/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GistFile {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub raw_url: String,
}

/// The full document as returned by GET and PATCH.
#[derive(Debug, Clone, Deserialize)]
pub struct GistEnvelope {
    pub files: HashMap<String, GistFile>,
    #[serde(default)]
    pub history: Vec<serde_json::Value>,
    pub updated_at: DateTime<Utc>,
}

/// PATCH request body: only the sub-files being changed.
#[derive(Debug, Serialize)]
pub struct GistPatch {
    pub description: String,
    pub files: HashMap<&'static str, GistPatchFile>,
}

#[derive(Debug, Serialize)]
pub struct GistPatchFile {
    pub content: String,
}

/// One entry of the update-check listing (`GET {updates}?since=...`).
#[derive(Debug, Clone, Deserialize)]
pub struct GistSummary {
    pub id: String,
    #[serde(default)]
    pub files: HashMap<String, GistFile>,
}

// ============================================================================
// Aggregate
// ============================================================================

/// The atomic unit fetched from and pushed to the remote store.
///
/// Invariant: `revision_count` mirrors the server's history length. A save
/// that comes back with history longer than `revision_count + 1` means
/// another writer raced us.
///
/// Serializable as a whole so the last-known-good document can be parked in
/// the local snapshot cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub feeds: Vec<FeedConfig>,
    pub state: FeedState,
    pub read_list: Vec<ReadListItem>,
    pub revision_count: usize,
}

impl Document {
    /// Decodes the three sub-files out of a fetched envelope.
    ///
    /// An empty `state.json` or `readlist.json` yields the respective
    /// default (fresh documents start with empty sub-files); a missing or
    /// malformed `feed.json` is an error because nothing works without
    /// subscriptions. The reading list arrives sorted by feed.
    pub fn from_envelope(envelope: &GistEnvelope) -> Result<Self, DocumentError> {
        let feeds_content = &envelope
            .files
            .get(FEED_FILE)
            .ok_or(DocumentError::MissingFile(FEED_FILE))?
            .content;
        let feeds: FeedsFile =
            serde_json::from_str(feeds_content).map_err(|source| DocumentError::Json {
                file: FEED_FILE,
                source,
            })?;

        let state_file = envelope
            .files
            .get(STATE_FILE)
            .ok_or(DocumentError::MissingFile(STATE_FILE))?;
        let mut state = if state_file.content.is_empty() {
            FeedState::default()
        } else {
            serde_json::from_str(&state_file.content).map_err(|source| DocumentError::Json {
                file: STATE_FILE,
                source,
            })?
        };
        state.raw_url = state_file.raw_url.clone();

        let readlist_content = envelope
            .files
            .get(READLIST_FILE)
            .map(|f| f.content.as_str())
            .unwrap_or_default();
        let mut read_list: Vec<ReadListItem> = if readlist_content.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(readlist_content).map_err(|source| DocumentError::Json {
                file: READLIST_FILE,
                source,
            })?
        };
        super::reading_list::sort_by_feed(&mut read_list);

        Ok(Self {
            feeds: feeds.feeds,
            state,
            read_list,
            revision_count: envelope.history.len(),
        })
    }
}

/// Serializes a sub-file payload the way the document has always been
/// written: pretty-printed with tab indentation.
pub fn to_tab_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    // serde_json emits valid UTF-8
    Ok(String::from_utf8_lossy(&out).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn envelope_with(files: &[(&str, &str, &str)]) -> GistEnvelope {
        let files = files
            .iter()
            .map(|(name, content, raw_url)| {
                (
                    name.to_string(),
                    GistFile {
                        content: content.to_string(),
                        raw_url: raw_url.to_string(),
                    },
                )
            })
            .collect();
        GistEnvelope {
            files,
            history: vec![serde_json::json!({}), serde_json::json!({})],
            updated_at: Utc::now(),
        }
    }

    const FEEDS_JSON: &str = r#"{"feeds":[
        {"id":1,"name":"Example","url":"https://example.com/rss","icon":"https://example.com/i.png"},
        {"id":2,"name":"Filtered","url":"https://other.com/atom","icon":"","noCorsProxy":true,"filter":"Sponsored"}
    ]}"#;

    #[test]
    fn test_from_envelope_decodes_all_files() {
        let envelope = envelope_with(&[
            (FEED_FILE, FEEDS_JSON, "https://raw/feed"),
            (
                STATE_FILE,
                r#"{"last_update":"2024-05-01T10:00:00Z","updates":{"1":"2024-04-30T08:00:00Z"},"raw_url":""}"#,
                "https://raw/state/abc",
            ),
            (
                READLIST_FILE,
                r#"[{"idFeed":2,"title":"b","url":"https://b","publicationDate":"2024-03-01T00:00:00Z","description":""},
                    {"idFeed":1,"title":"a","url":"https://a","publicationDate":"2024-02-01T00:00:00Z","description":""}]"#,
                "https://raw/readlist",
            ),
        ]);

        let doc = Document::from_envelope(&envelope).unwrap();
        assert_eq!(doc.feeds.len(), 2);
        assert_eq!(doc.feeds[1].no_cors_proxy, Some(true));
        assert_eq!(doc.feeds[1].filter.as_deref(), Some("Sponsored"));
        assert_eq!(doc.revision_count, 2);
        // raw_url comes from the envelope, not the payload
        assert_eq!(doc.state.raw_url, "https://raw/state/abc");
        assert_eq!(
            doc.state.clear_date(1).unwrap().to_rfc3339(),
            "2024-04-30T08:00:00+00:00"
        );
        // reading list sorted by feed on arrival
        assert_eq!(doc.read_list[0].id_feed, 1);
        assert_eq!(doc.read_list[1].id_feed, 2);
    }

    #[test]
    fn test_from_envelope_empty_state_and_readlist() {
        let envelope = envelope_with(&[
            (FEED_FILE, r#"{"feeds":[]}"#, ""),
            (STATE_FILE, "", "https://raw/state"),
            (READLIST_FILE, "", ""),
        ]);

        let doc = Document::from_envelope(&envelope).unwrap();
        assert_eq!(doc.state.last_update, sentinel_date(1990));
        assert!(doc.state.updates.is_empty());
        assert_eq!(doc.state.raw_url, "https://raw/state");
        assert!(doc.read_list.is_empty());
    }

    #[test]
    fn test_from_envelope_missing_feed_file_is_error() {
        let envelope = envelope_with(&[(STATE_FILE, "", "")]);
        let err = Document::from_envelope(&envelope).unwrap_err();
        assert!(matches!(err, DocumentError::MissingFile(FEED_FILE)));
    }

    #[test]
    fn test_feed_config_optional_fields_omitted_on_save() {
        let config = FeedConfig {
            id: 7,
            name: "n".into(),
            url: "https://u".into(),
            icon: String::new(),
            no_cors_proxy: None,
            enhance: None,
            filter: None,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("noCorsProxy"));
        assert!(!json.contains("enhance"));
        assert!(!json.contains("filter"));
    }

    #[test]
    fn test_read_list_item_wire_names() {
        let item = ReadListItem {
            id_feed: 3,
            title: "t".into(),
            url: "https://x".into(),
            publication_date: sentinel_date(2024),
            description: "d".into(),
            other: Some("cat".into()),
        };
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains("\"idFeed\":3"));
        assert!(json.contains("\"publicationDate\""));
    }

    #[test]
    fn test_to_tab_json_uses_tabs() {
        let state = FeedState::default();
        let json = to_tab_json(&state).unwrap();
        assert!(json.contains("\n\t\"last_update\""));
    }

    #[test]
    fn test_state_updates_survive_round_trip() {
        let mut state = FeedState::default();
        state.updates.insert(12, sentinel_date(2023));
        let json = to_tab_json(&state).unwrap();
        let back: FeedState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.updates, state.updates);
    }
}
