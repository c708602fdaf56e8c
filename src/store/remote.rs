//! The remote document store.
//!
//! One gist-style JSON document is the durable home of all shared state:
//! feed subscriptions, per-feed clear watermarks and the reading list. The
//! store fetches the document whole, patches it sub-file by sub-file, and
//! tracks an optimistic-concurrency revision counter (the server's history
//! length). It is the sole writer of that state: every mutation in the
//! crate goes through a method on this type, and saves serialize on an
//! internal write gate so a mutation issued during an in-flight save waits
//! instead of being lost.
//!
//! Failure posture: reads degrade to the local snapshot cache, writes
//! surface a notice and leave local state ahead of the remote, revision
//! races surface a conflict notice. Nothing here is fatal.

use chrono::{DateTime, SecondsFormat, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::event::{Notice, NoticeSender};
use crate::store::cache::SnapshotCache;
use crate::store::document::{
    to_tab_json, Document, DocumentError, FeedState, GistEnvelope, GistPatch, GistPatchFile,
    GistSummary, ReadListItem, READLIST_FILE, STATE_FILE,
};
use crate::store::reading_list;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error: status {0}")]
    HttpStatus(u16),

    #[error("Request timed out")]
    Timeout,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Failed to serialize sub-file: {0}")]
    Serialize(#[from] serde_json::Error),
}

struct Inner {
    document: Document,
    /// Server-side modification time of the document, used as the `since`
    /// floor for the out-of-band change probe.
    last_update: DateTime<Utc>,
}

/// Handle on the remote document. Shared as `Arc<RemoteStore>`; all
/// mutation goes through its methods.
pub struct RemoteStore {
    client: reqwest::Client,
    document_url: String,
    updates_url: Option<String>,
    document_id: String,
    token: Option<SecretString>,
    cache: Box<dyn SnapshotCache>,
    notices: NoticeSender,
    inner: Mutex<Inner>,
    /// Serializes writers: a second mutation during an in-flight save
    /// queues here rather than racing it.
    write_gate: Mutex<()>,
    /// Visible to `is_updated()` so our own PATCH is never reported as an
    /// out-of-band change.
    saving: AtomicBool,
}

impl RemoteStore {
    /// `api_base` is the document API root (e.g. `https://api.github.com`);
    /// `updates_path` the user-gists listing used by the change probe, or
    /// `None` to disable probing.
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        document_id: &str,
        updates_path: Option<&str>,
        token: Option<SecretString>,
        cache: Box<dyn SnapshotCache>,
        notices: NoticeSender,
    ) -> Self {
        let base = api_base.trim_end_matches('/');
        Self {
            client,
            document_url: format!("{}/gists/{}", base, document_id),
            updates_url: updates_path
                .map(|p| format!("{}/{}", base, p.trim_matches('/'))),
            document_id: document_id.to_string(),
            token,
            cache,
            notices,
            inner: Mutex::new(Inner {
                document: Document::default(),
                last_update: FeedState::default().last_update,
            }),
            write_gate: Mutex::new(()),
            saving: AtomicBool::new(false),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Fetches and decodes the document, falling back to the local
    /// snapshot when the remote is unreachable. Only when both fail does
    /// this return an error; the worst surviving case is a degraded
    /// read-only view from cache.
    pub async fn load(&self) -> Result<Document, StoreError> {
        match self.fetch_document().await {
            Ok(envelope) => {
                let document = Document::from_envelope(&envelope)?;
                {
                    let mut inner = self.inner.lock().await;
                    inner.document = document.clone();
                    inner.last_update = envelope.updated_at;
                }
                self.cache_snapshot(&document);
                tracing::info!(
                    feeds = document.feeds.len(),
                    read_list = document.read_list.len(),
                    revision = document.revision_count,
                    "Loaded remote document"
                );
                Ok(document)
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to load the remote document");
                let Some(snapshot) = self.cache.get() else {
                    return Err(err);
                };
                let Ok(document) = serde_json::from_str::<Document>(&snapshot) else {
                    tracing::warn!("Snapshot cache is unreadable, ignoring it");
                    return Err(err);
                };
                self.notices.send(Notice::LoadedFromCache);
                let mut inner = self.inner.lock().await;
                inner.document = document.clone();
                drop(inner);
                Ok(document)
            }
        }
    }

    async fn fetch_document(&self) -> Result<GistEnvelope, StoreError> {
        // Cache-busting query param: some CDN fronts serve stale documents
        let url = format!("{}?disable-cache={}", self.document_url, Utc::now().timestamp_millis());
        let request = self.authorize(self.client.get(&url));
        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(StoreError::Network)?;

        if !response.status().is_success() {
            return Err(StoreError::HttpStatus(response.status().as_u16()));
        }
        Ok(response.json::<GistEnvelope>().await?)
    }

    fn cache_snapshot(&self, document: &Document) {
        match to_tab_json(document) {
            Ok(snapshot) => self.cache.put(&snapshot),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize snapshot"),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub async fn document(&self) -> Document {
        self.inner.lock().await.document.clone()
    }

    pub async fn read_list(&self) -> Vec<ReadListItem> {
        self.inner.lock().await.document.read_list.clone()
    }

    pub async fn feed_state(&self) -> FeedState {
        self.inner.lock().await.document.state.clone()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Raises a feed's clear watermark in memory only. Used when the
    /// watermark will be persisted as part of a combined save.
    pub async fn update_feed_state(&self, feed_id: i64, date: DateTime<Utc>) {
        let mut inner = self.inner.lock().await;
        inner.document.state.updates.insert(feed_id, date);
    }

    /// Persists a feed's clear watermark to `state.json`.
    pub async fn save_feed_state(
        &self,
        feed_id: i64,
        feed_name: &str,
        date: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let content = {
            let mut inner = self.inner.lock().await;
            inner.document.state.updates.insert(feed_id, date);
            inner.document.state.last_update = Utc::now();
            let document = inner.document.clone();
            drop(inner);
            // Cache before the network call: a reload mid-flight must not
            // lose the edit.
            self.cache_snapshot(&document);
            to_tab_json(&document.state)?
        };

        let mut files = HashMap::new();
        files.insert(STATE_FILE, GistPatchFile { content });
        self.save_files(
            files,
            format!("Update publication date for feed \"{}\"", feed_name),
        )
        .await
    }

    /// Replaces the reading list (and optionally bundles the current feed
    /// state) in one PATCH.
    pub async fn save_reading_list(
        &self,
        read_list: Vec<ReadListItem>,
        description: &str,
        include_state: bool,
    ) -> Result<(), StoreError> {
        let (readlist_content, state_content) = {
            let mut inner = self.inner.lock().await;
            inner.document.read_list = read_list;
            if include_state {
                inner.document.state.last_update = Utc::now();
            }
            let document = inner.document.clone();
            drop(inner);
            self.cache_snapshot(&document);
            (
                to_tab_json(&document.read_list)?,
                include_state
                    .then(|| to_tab_json(&document.state))
                    .transpose()?,
            )
        };

        let mut files = HashMap::new();
        files.insert(
            READLIST_FILE,
            GistPatchFile {
                content: readlist_content,
            },
        );
        if let Some(content) = state_content {
            files.insert(STATE_FILE, GistPatchFile { content });
        }
        self.save_files(files, description.to_string()).await
    }

    /// Rolls the in-memory reading list back without touching the remote.
    /// Used when a reading-list PATCH failed and local state must return
    /// to what the remote last confirmed.
    pub async fn set_read_list_local(&self, read_list: Vec<ReadListItem>) {
        let mut inner = self.inner.lock().await;
        inner.document.read_list = read_list;
        let document = inner.document.clone();
        drop(inner);
        self.cache_snapshot(&document);
    }

    async fn save_files(
        &self,
        files: HashMap<&'static str, GistPatchFile>,
        description: String,
    ) -> Result<(), StoreError> {
        let _gate = self.write_gate.lock().await;
        self.saving.store(true, Ordering::Release);
        let result = self.push_patch(files, description).await;
        self.saving.store(false, Ordering::Release);

        match &result {
            Ok(()) => self.notices.send(Notice::Saved),
            Err(err) => {
                tracing::error!(error = %err, "Failed to save the document");
                self.notices.send(Notice::SaveFailed {
                    error: err.to_string(),
                });
            }
        }
        result
    }

    async fn push_patch(
        &self,
        files: HashMap<&'static str, GistPatchFile>,
        description: String,
    ) -> Result<(), StoreError> {
        let patch = GistPatch { description, files };
        let request = self.authorize(self.client.patch(&self.document_url).json(&patch));
        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(StoreError::Network)?;

        if !response.status().is_success() {
            return Err(StoreError::HttpStatus(response.status().as_u16()));
        }
        let envelope = response.json::<GistEnvelope>().await?;

        let mut inner = self.inner.lock().await;
        let expected = inner.document.revision_count + 1;
        let actual = envelope.history.len();
        if actual > expected {
            tracing::warn!(
                expected = expected,
                actual = actual,
                "Document history grew by more than one revision — another writer probably raced this save"
            );
            self.notices
                .send(Notice::ConflictSuspected { expected, actual });
        }
        inner.document.revision_count = actual;

        if let Some(state_file) = envelope.files.get(STATE_FILE) {
            inner.document.state.raw_url = state_file.raw_url.clone();
        }
        // Adopt the reading list the server now holds; it reflects our
        // patch plus anything another writer slipped in.
        if let Some(readlist_file) = envelope.files.get(READLIST_FILE) {
            if !readlist_file.content.is_empty() {
                match serde_json::from_str::<Vec<ReadListItem>>(&readlist_file.content) {
                    Ok(mut items) => {
                        reading_list::sort_by_feed(&mut items);
                        inner.document.read_list = items;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Server returned an unreadable reading list")
                    }
                }
            }
        }
        // The server stamps the stored document slightly later than the
        // PATCH response timestamp; skew past it so the change probe does
        // not see our own write.
        inner.last_update = envelope.updated_at + chrono::Duration::seconds(10);
        Ok(())
    }

    // ========================================================================
    // Out-of-band change probe
    // ========================================================================

    /// Whether another device changed the state file since we last talked
    /// to the server. Always false while one of our own saves is in
    /// flight, and false (with a warning) when the probe itself fails.
    pub async fn is_updated(&self) -> bool {
        if self.saving.load(Ordering::Acquire) {
            return false;
        }
        let Some(updates_url) = &self.updates_url else {
            return false;
        };

        let (since, current_raw_url) = {
            let inner = self.inner.lock().await;
            (
                inner.last_update + chrono::Duration::seconds(1),
                inner.document.state.raw_url.clone(),
            )
        };

        let url = format!(
            "{}?since={}",
            updates_url,
            since.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let summaries = match self.fetch_summaries(&url).await {
            Ok(summaries) => summaries,
            Err(err) => {
                tracing::warn!(error = %err, "Update probe failed");
                return false;
            }
        };

        summaries.iter().any(|summary| {
            summary.id == self.document_id
                && summary
                    .files
                    .get(STATE_FILE)
                    .map(|f| f.raw_url != current_raw_url)
                    .unwrap_or(false)
        })
    }

    async fn fetch_summaries(&self, url: &str) -> Result<Vec<GistSummary>, StoreError> {
        let request = self.authorize(self.client.get(url));
        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(StoreError::Network)?;
        if !response.status().is_success() {
            return Err(StoreError::HttpStatus(response.status().as_u16()));
        }
        Ok(response.json::<Vec<GistSummary>>().await?)
    }
}

impl std::fmt::Debug for RemoteStore {
    /// The bearer token must never reach logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("document_url", &self.document_url)
            .field("updates_url", &self.updates_url)
            .field("document_id", &self.document_id)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
