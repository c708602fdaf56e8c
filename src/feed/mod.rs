//! Feed ingestion: fetching through the CORS relay, RSS/Atom parsing, the
//! per-feed session state machine and the adaptive refresh estimator.
//!
//! - [`parser`] - hand-rolled RSS/Atom parsing on `quick-xml` events
//! - [`relay`] - HTTP fetching through the CORS relay
//! - [`schedule`] - refresh cadence from publication history
//! - [`session`] - one feed's links, watermark and display mode

pub mod parser;
pub mod relay;
pub mod schedule;
pub mod session;

pub use parser::{parse_feed, Link, ParseError, ParsedFeed, SortOrder};
pub use relay::{RelayClient, RelayError};
pub use schedule::{estimate, RefreshCadence};
pub use session::FeedSession;
