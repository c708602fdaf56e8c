//! Headless personal RSS/Atom aggregator.
//!
//! Feeds are fetched through a CORS relay, parsed into a normalized link
//! model, and filtered against per-feed "clear date" watermarks. Watermarks
//! and a cross-device reading list live in one remote gist-style JSON
//! document with optimistic-concurrency revision tracking; each feed is
//! polled on a cadence estimated from its own publication history.

pub mod config;
pub mod event;
pub mod feed;
pub mod poll;
pub mod store;
pub mod util;

pub use config::Config;
pub use event::{Notice, NoticeSender};
pub use feed::{parse_feed, FeedSession, Link, ParseError, RefreshCadence, RelayClient, SortOrder};
pub use poll::{FeedCommand, PollerHandle};
pub use store::{Document, FeedConfig, FeedState, ReadListItem, ReadingListManager, RemoteStore};
