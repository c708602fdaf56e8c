//! Shared helpers with no dependency on the feed or store layers.

mod text;

pub use text::{format_date, strip_html};
