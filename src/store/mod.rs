//! The remote document store and everything persisted through it.
//!
//! - [`document`] - wire-format types for the document and its sub-files
//! - [`remote`] - fetch/patch with revision tracking and cache fallback
//! - [`cache`] - the local last-known-good snapshot
//! - [`reading_list`] - reading-list rules on top of the store

pub mod cache;
pub mod document;
pub mod reading_list;
pub mod remote;

pub use cache::{FileSnapshotCache, MemoryCache, SnapshotCache};
pub use document::{Document, FeedConfig, FeedState, ReadListItem};
pub use reading_list::ReadingListManager;
pub use remote::{RemoteStore, StoreError};
