//! Per-feed session: one feed's parsed links, clear watermark and display
//! mode, orchestrating fetch → parse → cadence estimation on every load.
//!
//! A session never propagates load failures: network and parse errors are
//! captured into `error` (with a degraded title) and the caller observes
//! the state, it does not catch exceptions. Each session is owned by a
//! single polling task, so loads are serialized per feed by construction.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::event::{Notice, NoticeSender};
use crate::feed::parser::{parse_feed, Link, SortOrder};
use crate::feed::relay::RelayClient;
use crate::feed::schedule::{estimate, RefreshCadence};
use crate::store::document::{sentinel_date, FeedConfig, ReadListItem};
use crate::store::reading_list::ReadingListManager;
use crate::store::remote::RemoteStore;

pub struct FeedSession {
    pub feed: FeedConfig,
    store: Arc<RemoteStore>,
    reading_list: Arc<ReadingListManager>,
    notices: NoticeSender,

    pub title: String,
    pub logo: String,
    pub website_url: Option<String>,
    /// Links newer than the clear watermark.
    pub links: Vec<Link>,
    /// Every link the last parse produced.
    pub all_links: Vec<Link>,
    pub error: Option<String>,
    pub clear_date: DateTime<Utc>,
    pub cadence: RefreshCadence,
    order: SortOrder,
    show_all: bool,
}

impl FeedSession {
    /// `offset_date` is the persisted clear watermark from the remote
    /// state file, when one exists.
    pub fn new(
        feed: FeedConfig,
        offset_date: Option<DateTime<Utc>>,
        order: SortOrder,
        store: Arc<RemoteStore>,
        reading_list: Arc<ReadingListManager>,
        notices: NoticeSender,
    ) -> Self {
        let title = if feed.name.is_empty() {
            feed.url.clone()
        } else {
            feed.name.clone()
        };
        let logo = feed.icon.clone();
        let mut session = Self {
            feed,
            store,
            reading_list,
            notices,
            title,
            logo,
            website_url: None,
            links: Vec::new(),
            all_links: Vec::new(),
            error: None,
            clear_date: sentinel_date(1900),
            cadence: RefreshCadence::Dormant,
            order,
            show_all: false,
        };
        if let Some(date) = offset_date {
            session.restore_clear_date(date);
        }
        session
    }

    /// Fetches and reparses the feed, then recomputes the refresh cadence.
    ///
    /// Always completes; failures land in `self.error`. A successful parse
    /// overwrites both link lists and backfills feed name/icon from the
    /// feed's own metadata when the subscription lacks them.
    pub async fn load_content(&mut self, relay: &RelayClient) {
        self.error = None;

        let xml = match relay.fetch_feed(&self.feed).await {
            Ok(xml) => xml,
            Err(err) => {
                let error = err.to_string();
                tracing::error!(feed = %self.title, error = %error, "Feed fetch failed");
                self.notices.send(Notice::FeedFailed {
                    feed: self.title.clone(),
                    error: error.clone(),
                });
                self.error = Some(error);
                return;
            }
        };

        match parse_feed(&xml, &self.feed, self.clear_date, self.order) {
            Ok(parsed) => {
                self.all_links = parsed.all_links;
                self.links = parsed.links;
                if parsed.website_url.is_some() {
                    self.website_url = parsed.website_url;
                }

                // The subscription wins; feed metadata only fills gaps.
                if self.feed.name.is_empty() {
                    self.title = parsed
                        .title
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| self.feed.url.clone());
                    self.feed.name = self.title.clone();
                }
                if self.feed.icon.is_empty() {
                    if let Some(parsed_logo) = parsed.logo {
                        self.logo = parsed_logo.clone();
                        self.feed.icon = parsed_logo;
                    }
                }

                if !self.links.is_empty() {
                    self.notices.send(Notice::NewLinks {
                        feed: self.title.clone(),
                        count: self.links.len(),
                    });
                }
            }
            Err(err) => {
                let name = if self.feed.name.is_empty() {
                    &self.feed.url
                } else {
                    &self.feed.name
                };
                let degraded = format!("{}: Parsing failed!", name);
                tracing::error!(feed = %self.feed.url, error = %err, "Feed parse failed");
                self.notices.send(Notice::FeedFailed {
                    feed: name.clone(),
                    error: err.to_string(),
                });
                self.error = Some(err.to_string());
                self.title = degraded;
                self.all_links.clear();
                self.links.clear();
            }
        }

        self.cadence = estimate(&self.all_links, Utc::now());
        match self.cadence {
            RefreshCadence::Dormant => {
                tracing::debug!(feed = %self.title, "No auto-refresh (feed dormant)")
            }
            RefreshCadence::Every(interval) => {
                tracing::debug!(feed = %self.title, interval_secs = interval.as_secs(), "Refresh cadence")
            }
        }
    }

    /// Raises the watermark to `date`, drops the hidden links and persists
    /// the new watermark.
    pub async fn clear_feed(&mut self, date: DateTime<Utc>) {
        self.apply_clear(date);
        let _ = self
            .store
            .save_feed_state(self.feed.id, &self.feed.name, date)
            .await;
    }

    /// Clears everything currently visible: the watermark becomes the
    /// newest link's date, or now when the feed is empty.
    pub async fn clear_all_feed(&mut self) {
        let date = match self.order {
            SortOrder::NewestFirst => self.links.first(),
            SortOrder::OldestFirst => self.links.last(),
        }
        .map(|l| l.publication_date)
        .unwrap_or_else(Utc::now);

        self.apply_clear(date);
        let _ = self
            .store
            .save_feed_state(self.feed.id, &self.feed.name, date)
            .await;
    }

    fn apply_clear(&mut self, date: DateTime<Utc>) {
        self.clear_date = date;
        self.links.retain(|l| l.publication_date > date);
        self.show_all = false;
    }

    /// Toggles between the watermark-filtered view and full history. Does
    /// not touch the watermark; toggling twice restores the original view.
    pub fn display_all_links(&mut self) {
        self.show_all = !self.show_all;
    }

    pub fn is_displaying_all_links(&self) -> bool {
        self.show_all || self.all_links.len() == self.links.len()
    }

    /// The list the UI should render: the selected view minus links caught
    /// by the subscription's title filter.
    pub fn links_to_display(&self) -> Vec<&Link> {
        let source = if self.show_all {
            &self.all_links
        } else {
            &self.links
        };
        source
            .iter()
            .filter(|l| match &self.feed.filter {
                Some(filter) => !l.title.contains(filter.as_str()),
                None => true,
            })
            .collect()
    }

    /// Saves an item to the reading list; `also_clear` additionally raises
    /// the watermark to the item's date, bundled into the same remote
    /// update.
    pub async fn add_to_reading_list(&mut self, item: ReadListItem, also_clear: bool) {
        if also_clear {
            self.apply_clear(item.publication_date);
            self.store
                .update_feed_state(self.feed.id, item.publication_date)
                .await;
        }
        self.reading_list.add(item, also_clear).await;
    }

    /// Adopts a watermark from a freshly loaded remote document. Only ever
    /// raises — a stale remote must not resurrect cleared links. Already
    /// loaded links below the new watermark are dropped.
    pub fn sync_clear_date(&mut self, date: DateTime<Utc>) {
        if self.clear_date < date {
            self.clear_date = date;
            self.links.retain(|l| l.publication_date > date);
        }
    }

    fn restore_clear_date(&mut self, date: DateTime<Utc>) {
        if self.clear_date < date {
            self.clear_date = date;
        }
    }
}
