//! RSS/Atom XML parsing into the normalized link model.
//!
//! The two formats disagree on almost everything — element names, date
//! formats, where the website link lives, which field carries the body —
//! so parsing is hand-rolled on `quick-xml` events rather than delegated to
//! a generic normalizer: the per-field fallback chains and sentinel dates
//! below are part of the observable behavior.
//!
//! XXE posture: quick-xml (0.37) never parses `<!ENTITY>` declarations.
//! Only the five XML builtins resolve; custom entity references surface as
//! unescape errors, which we report as [`ParseError::Xml`].

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashSet;
use thiserror::Error;

use crate::store::document::{sentinel_date, FeedConfig, ReadListItem};
use crate::util::strip_html;

/// Errors that end a parse. The feed session converts these into an error
/// display state; they never escape as panics.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document's root element is neither RSS nor Atom.
    #[error("Unrecognized feed format: root element <{0}>")]
    UnrecognizedRoot(String),

    /// Malformed XML, or an entity reference we refuse to expand.
    #[error("XML parse error: {0}")]
    Xml(String),
}

/// Direction both link lists are sorted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    OldestFirst,
    NewestFirst,
}

/// One normalized article. Ephemeral — rebuilt on every feed load, never
/// persisted individually. Two links are the same article iff their URLs
/// are equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub url: String,
    pub title: String,
    pub publication_date: DateTime<Utc>,
    /// Plain text: entity-decoded, tags stripped.
    pub description: String,
    /// The raw HTML body, kept for rich preview.
    pub content: String,
    /// Category text, when the feed provides one.
    pub other: Option<String>,
    pub id_feed: i64,
    pub icon_url: String,
    pub feed_name: String,
}

impl From<&Link> for ReadListItem {
    fn from(link: &Link) -> Self {
        ReadListItem {
            id_feed: link.id_feed,
            title: link.title.clone(),
            url: link.url.clone(),
            publication_date: link.publication_date,
            description: link.description.clone(),
            other: link.other.clone(),
        }
    }
}

/// Parse output: best-effort feed metadata plus both link sequences.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub website_url: Option<String>,
    pub logo: Option<String>,
    /// Every parsed item, deduplicated by URL (first occurrence wins).
    pub all_links: Vec<Link>,
    /// The subset with `publication_date > clear_date`.
    pub links: Vec<Link>,
}

/// Link-text substitutions routing paywalled domains through a library
/// proxy. Applied to RSS item links only.
const LINK_REWRITES: &[(&str, &str)] = &[
    ("www.mediapart.fr", "www-mediapart-fr.bnf.idm.oclc.org"),
    ("www.arretsurimages.net", "www-arretsurimages-net.bnf.idm.oclc.org"),
];

/// Website-link substitutions: some sites need an autologin entry point
/// instead of the URL their feed advertises.
const WEBSITE_REWRITES: &[(&str, &str)] = &[
    ("zdnet.fr", "https://www.zdnet.fr"),
    ("lemonde.fr", "https://www.lemonde.fr/autologin"),
    (
        "mediapart.fr",
        "https://bnf.idm.oclc.org/login?url=http://www.mediapart.fr/licence",
    ),
    (
        "arretsurimages.net",
        "https://bnf.idm.oclc.org/login?url=http://www.arretsurimages.net/autologin.php",
    ),
];

/// Parses raw feed XML into a [`ParsedFeed`].
///
/// The format is detected from the root element: `rss`/`rdf:RDF` parse under
/// RSS rules, `feed` under Atom rules, anything else is
/// [`ParseError::UnrecognizedRoot`]. Both output lists are sorted by
/// publication date (stable, so equal dates keep document order) and
/// deduplicated by URL.
pub fn parse_feed(
    xml: &str,
    feed: &FeedConfig,
    clear_date: DateTime<Utc>,
    order: SortOrder,
) -> Result<ParsedFeed, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut parsed = loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"rss" | b"rdf:RDF" => break parse_rss(&mut reader, feed)?,
                b"feed" => break parse_atom(&mut reader, feed)?,
                other => {
                    let root = String::from_utf8_lossy(other).into_owned();
                    return Err(ParseError::UnrecognizedRoot(root));
                }
            },
            Ok(Event::Eof) => return Err(ParseError::Xml("empty document".into())),
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
        buf.clear();
    };

    sort_links(&mut parsed.all_links, order);
    parsed.links = parsed
        .all_links
        .iter()
        .filter(|l| l.publication_date > clear_date)
        .cloned()
        .collect();
    Ok(parsed)
}

/// Stable sort by publication date; `NewestFirst` flips the direction but
/// ties still keep document order.
fn sort_links(links: &mut [Link], order: SortOrder) {
    match order {
        SortOrder::OldestFirst => links.sort_by(|a, b| a.publication_date.cmp(&b.publication_date)),
        SortOrder::NewestFirst => links.sort_by(|a, b| b.publication_date.cmp(&a.publication_date)),
    }
}

fn rewrite_link(url: Option<String>) -> String {
    let Some(url) = url.filter(|u| !u.is_empty()) else {
        return "#".to_string();
    };
    for (from, to) in LINK_REWRITES {
        if url.contains(from) {
            return url.replace(from, to);
        }
    }
    url
}

fn rewrite_website(url: Option<String>) -> Option<String> {
    let url = url.filter(|u| !u.is_empty())?;
    for (from, to) in WEBSITE_REWRITES {
        if url.contains(from) {
            return Some((*to).to_string());
        }
    }
    Some(url)
}

/// Feed dates in the wild are RFC 3339 (Atom, dc:date) or RFC 2822
/// (RSS pubDate); try both.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .or_else(|| DateTime::parse_from_rfc2822(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn text_of(e: &quick_xml::events::BytesText<'_>) -> Result<String, ParseError> {
    e.unescape()
        .map(|cow| cow.into_owned())
        .map_err(|e| ParseError::Xml(e.to_string()))
}

fn attribute_value(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    wanted: &[u8],
) -> Result<Option<String>, ParseError> {
    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed feed attribute");
                continue;
            }
        };
        if attr.key.as_ref() == wanted {
            let value = attr
                .decode_and_unescape_value(reader.decoder())
                .map_err(|e| ParseError::Xml(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn append(slot: &mut Option<String>, text: &str) {
    slot.get_or_insert_with(String::new).push_str(text);
}

// ============================================================================
// RSS
// ============================================================================

#[derive(Default)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    description: Option<String>,
    content_encoded: Option<String>,
    pub_date: Option<String>,
    dc_date: Option<String>,
    category: Option<String>,
}

/// RSS 2.0 and RDF (RSS 1.0) items. The caller has already consumed the
/// root start tag; both layouts put `<item>` elements somewhere below it,
/// with channel metadata as direct children of `<channel>`.
fn parse_rss(reader: &mut Reader<&[u8]>, feed: &FeedConfig) -> Result<ParsedFeed, ParseError> {
    let mut out = ParsedFeed::default();
    let mut seen_urls: HashSet<String> = HashSet::new();

    let mut path: Vec<String> = Vec::new();
    let mut item: Option<RssItem> = None;
    let mut channel_title: Option<String> = None;
    let mut channel_link: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "item" && item.is_none() {
                    item = Some(RssItem::default());
                }
                path.push(name);
            }
            Ok(Event::End(_)) => match path.pop() {
                Some(name) => {
                    if name == "item" {
                        if let Some(done) = item.take() {
                            push_rss_item(&mut out, &mut seen_urls, done, feed);
                        }
                    }
                }
                // Nothing left to pop: this is the root element closing.
                None => break,
            },
            Ok(Event::Text(e)) => {
                let text = text_of(&e)?;
                route_rss_text(&path, &mut item, &mut channel_title, &mut channel_link, &text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                route_rss_text(&path, &mut item, &mut channel_title, &mut channel_link, &text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
        buf.clear();
    }

    out.website_url = rewrite_website(channel_link);
    out.title = channel_title.filter(|t| !t.is_empty());
    out.logo = out
        .website_url
        .as_ref()
        .map(|site| format!("{}/favicon.ico", site.trim_end_matches('/')));
    Ok(out)
}

fn route_rss_text(
    path: &[String],
    item: &mut Option<RssItem>,
    channel_title: &mut Option<String>,
    channel_link: &mut Option<String>,
    text: &str,
) {
    if path.iter().any(|n| n == "item") {
        let Some(item) = item.as_mut() else { return };
        match path.last().map(String::as_str) {
            Some("title") => append(&mut item.title, text),
            Some("link") => append(&mut item.link, text),
            Some("description") => append(&mut item.description, text),
            Some("content:encoded") => append(&mut item.content_encoded, text),
            Some("pubDate") => append(&mut item.pub_date, text),
            Some("dc:date") => append(&mut item.dc_date, text),
            Some("category") => append(&mut item.category, text),
            _ => {}
        }
        return;
    }

    // Channel metadata: direct children only, so <image><title> and
    // friends don't leak into the feed title.
    let parent = path.len().checked_sub(2).map(|i| path[i].as_str());
    if parent == Some("channel") {
        match path.last().map(String::as_str) {
            Some("title") => append(channel_title, text),
            Some("link") => append(channel_link, text),
            _ => {}
        }
    }
}

fn push_rss_item(
    out: &mut ParsedFeed,
    seen_urls: &mut HashSet<String>,
    item: RssItem,
    feed: &FeedConfig,
) {
    let content = item
        .description
        .filter(|d| !d.is_empty())
        .or(item.content_encoded.filter(|c| !c.is_empty()))
        .unwrap_or_default();

    let publication_date = item
        .pub_date
        .as_deref()
        .and_then(parse_date)
        .or_else(|| item.dc_date.as_deref().and_then(parse_date))
        .unwrap_or_else(|| {
            tracing::warn!(feed = %feed.url, "Item has no parsable date, using sentinel");
            sentinel_date(2000)
        });

    let url = rewrite_link(item.link);
    if !seen_urls.insert(url.clone()) {
        return;
    }

    out.all_links.push(Link {
        url,
        title: item
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No title found".to_string()),
        publication_date,
        description: strip_html(&content),
        content,
        other: item.category.filter(|c| !c.is_empty()),
        id_feed: feed.id,
        icon_url: feed.icon.clone(),
        feed_name: feed.name.clone(),
    });
}

// ============================================================================
// Atom
// ============================================================================

#[derive(Default)]
struct AtomEntry {
    title: Option<String>,
    href: Option<String>,
    description: Option<String>,
    content: Option<String>,
    summary: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    category: Option<String>,
    media_thumbnail: Option<String>,
    media_description: Option<String>,
}

/// Atom entries. The caller has already consumed the `<feed>` start tag.
fn parse_atom(reader: &mut Reader<&[u8]>, feed: &FeedConfig) -> Result<ParsedFeed, ParseError> {
    let mut out = ParsedFeed::default();
    let mut seen_urls: HashSet<String> = HashSet::new();

    let mut path: Vec<String> = Vec::new();
    let mut entry: Option<AtomEntry> = None;
    let mut feed_title: Option<String> = None;
    let mut feed_icon: Option<String> = None;
    let mut website: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if name == "entry" && entry.is_none() {
                    entry = Some(AtomEntry::default());
                }
                route_atom_element(&e, reader, &path, &mut entry, &mut website)?;
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                route_atom_element(&e, reader, &path, &mut entry, &mut website)?;
            }
            Ok(Event::End(_)) => match path.pop() {
                Some(name) => {
                    if name == "entry" {
                        if let Some(done) = entry.take() {
                            push_atom_entry(&mut out, &mut seen_urls, done, feed);
                        }
                    }
                }
                None => break,
            },
            Ok(Event::Text(e)) => {
                let text = text_of(&e)?;
                route_atom_text(&path, &mut entry, &mut feed_title, &mut feed_icon, &text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(&e).into_owned();
                route_atom_text(&path, &mut entry, &mut feed_title, &mut feed_icon, &text);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ParseError::Xml(e.to_string())),
        }
        buf.clear();
    }

    out.title = feed_title.filter(|t| !t.is_empty());
    out.website_url = rewrite_website(website);
    out.logo = feed_icon.filter(|i| !i.is_empty()).or_else(|| {
        out.website_url
            .as_ref()
            .map(|site| format!("{}/favicon.ico", site.trim_end_matches('/')))
    });
    Ok(out)
}

/// Attribute-carrying Atom elements: `<link>` and the media extensions.
fn route_atom_element(
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    path: &[String],
    entry: &mut Option<AtomEntry>,
    website: &mut Option<String>,
) -> Result<(), ParseError> {
    let in_entry = path.iter().any(|n| n == "entry");
    match e.name().as_ref() {
        b"link" if in_entry => {
            // First link child wins, whatever its rel — feeds that only
            // publish rel="self" links still get a URL.
            if let Some(entry) = entry.as_mut() {
                if entry.href.is_none() {
                    entry.href = attribute_value(e, reader, b"href")?;
                }
            }
        }
        b"link" => {
            if website.is_none()
                && attribute_value(e, reader, b"rel")?.as_deref() == Some("alternate")
            {
                *website = attribute_value(e, reader, b"href")?;
            }
        }
        b"media:thumbnail" if in_entry => {
            if let Some(entry) = entry.as_mut() {
                if entry.media_thumbnail.is_none() {
                    entry.media_thumbnail = attribute_value(e, reader, b"url")?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn route_atom_text(
    path: &[String],
    entry: &mut Option<AtomEntry>,
    feed_title: &mut Option<String>,
    feed_icon: &mut Option<String>,
    text: &str,
) {
    if path.iter().any(|n| n == "entry") {
        let Some(entry) = entry.as_mut() else { return };
        match path.last().map(String::as_str) {
            Some("title") => append(&mut entry.title, text),
            Some("description") => append(&mut entry.description, text),
            Some("content") => append(&mut entry.content, text),
            Some("summary") => append(&mut entry.summary, text),
            Some("published") => append(&mut entry.published, text),
            Some("updated") => append(&mut entry.updated, text),
            Some("category") => append(&mut entry.category, text),
            Some("media:description") => append(&mut entry.media_description, text),
            _ => {}
        }
        return;
    }

    // Feed-level children sit at depth 1 (the root start tag was consumed
    // before this loop began).
    if path.len() == 1 {
        match path.last().map(String::as_str) {
            Some("title") => append(feed_title, text),
            Some("icon") => append(feed_icon, text),
            _ => {}
        }
    }
}

fn push_atom_entry(
    out: &mut ParsedFeed,
    seen_urls: &mut HashSet<String>,
    entry: AtomEntry,
    feed: &FeedConfig,
) {
    // Entries without a link cannot be opened; skip them.
    let Some(url) = entry.href.filter(|h| !h.is_empty()) else {
        return;
    };

    // Body priority: description, content, media group composed as HTML,
    // then summary.
    let content = entry
        .description
        .filter(|d| !d.is_empty())
        .or(entry.content.filter(|c| !c.is_empty()))
        .or_else(|| {
            entry.media_thumbnail.map(|thumb| {
                let caption = entry
                    .media_description
                    .as_deref()
                    .unwrap_or_default()
                    .replace('\n', "<br/>");
                format!("<img src=\"{}\" /><br/>{}", thumb, caption)
            })
        })
        .or(entry.summary.filter(|s| !s.is_empty()))
        .unwrap_or_default();

    let publication_date = entry
        .published
        .as_deref()
        .and_then(parse_date)
        .or_else(|| entry.updated.as_deref().and_then(parse_date))
        .unwrap_or_else(Utc::now);

    if !seen_urls.insert(url.clone()) {
        return;
    }

    out.all_links.push(Link {
        url,
        title: entry
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No title found".to_string()),
        publication_date,
        description: strip_html(&content),
        content,
        other: entry.category.filter(|c| !c.is_empty()),
        id_feed: feed.id,
        icon_url: feed.icon.clone(),
        feed_name: feed.name.clone(),
    });
}
