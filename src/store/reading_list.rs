//! The cross-device reading list.
//!
//! Mutations route through the remote store (it owns the list); this
//! manager adds the user-facing rules: the duplicate guard, rollback when
//! a removal fails to persist, and a single-slot undo buffer that lives in
//! memory only.

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::event::{Notice, NoticeSender};
use crate::store::document::ReadListItem;
use crate::store::remote::RemoteStore;

pub struct ReadingListManager {
    store: Arc<RemoteStore>,
    notices: NoticeSender,
    /// The one item whose removal can be undone.
    last_removed: Mutex<Option<ReadListItem>>,
}

impl ReadingListManager {
    pub fn new(store: Arc<RemoteStore>, notices: NoticeSender) -> Self {
        Self {
            store,
            notices,
            last_removed: Mutex::new(None),
        }
    }

    /// Appends an item and persists the list.
    ///
    /// An item whose URL already exists beyond the first position is
    /// rejected without touching the store. (An item sitting at index 0 is
    /// about to be cleared away and may be re-added — the historical
    /// behavior this list's documents were built on.)
    ///
    /// `include_state` bundles the current feed state into the same PATCH,
    /// for the save-and-clear gesture. Persistence failures are already
    /// surfaced as notices by the store; the add is fire-and-forget.
    pub async fn add(&self, item: ReadListItem, include_state: bool) {
        let mut read_list = self.store.read_list().await;
        let existing = read_list.iter().position(|i| i.url == item.url);
        if matches!(existing, Some(index) if index > 0) {
            tracing::debug!(url = %item.url, "Duplicate reading-list entry rejected");
            self.notices.send(Notice::DuplicateReadingItem {
                title: item.title.clone(),
            });
            return;
        }

        let description = format!("Add item \"{}\"", item.title);
        read_list.push(item);
        let _ = self
            .store
            .save_reading_list(read_list, &description, include_state)
            .await;
    }

    /// Removes an item by URL and persists the shortened list.
    ///
    /// On persistence failure the in-memory list is restored to exactly
    /// what the remote last confirmed (same length, same order) and the
    /// undo slot stays empty. On success the removed item is parked in the
    /// undo slot.
    pub async fn remove(&self, item: &ReadListItem) {
        let original = self.store.read_list().await;
        let Some(index) = original.iter().position(|i| i.url == item.url) else {
            return;
        };

        let mut shortened = original.clone();
        let removed = shortened.remove(index);

        let description = format!("Removing '{}' from reading list", removed.title);
        match self
            .store
            .save_reading_list(shortened, &description, false)
            .await
        {
            Ok(()) => {
                *self.last_removed.lock().await = Some(removed);
            }
            Err(_) => {
                // Store already emitted SaveFailed; undo the local removal.
                self.store.set_read_list_local(original).await;
            }
        }
    }

    /// Re-appends the last removed item. The undo slot is cleared only
    /// when the restore actually persisted.
    pub async fn restore_last(&self) {
        let item = { self.last_removed.lock().await.clone() };
        let Some(item) = item else { return };

        let mut read_list = self.store.read_list().await;
        let description = format!("Restoring item \"{}\"", item.title);
        read_list.push(item);

        if self
            .store
            .save_reading_list(read_list, &description, false)
            .await
            .is_ok()
        {
            *self.last_removed.lock().await = None;
        }
    }

    pub async fn can_restore(&self) -> bool {
        self.last_removed.lock().await.is_some()
    }
}

/// Stable sort, newest first.
pub fn sort_by_date(items: &mut [ReadListItem]) {
    items.sort_by(|a, b| b.publication_date.cmp(&a.publication_date));
}

/// Groups by feed id ascending, newest first within a feed.
pub fn sort_by_feed(items: &mut [ReadListItem]) {
    items.sort_by(|a, b| {
        a.id_feed
            .cmp(&b.id_feed)
            .then(b.publication_date.cmp(&a.publication_date))
    });
}
