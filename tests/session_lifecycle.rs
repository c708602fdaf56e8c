//! End-to-end session tests: document load → relay fetch → parse →
//! watermark filtering → clear/save round trips, plus the out-of-band
//! change watcher. One wiremock server plays both the document API and
//! the CORS relay.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rill::event::{Notice, NoticeSender};
use rill::feed::{FeedSession, RelayClient, SortOrder};
use rill::store::{MemoryCache, ReadListItem, ReadingListManager, RemoteStore};

const DOC_ID: &str = "doc1";

fn document_envelope(watermark: &str) -> serde_json::Value {
    json!({
        "files": {
            "feed.json": {
                "content": json!({
                    "feeds": [{"id": 1, "name": "One", "url": "https://one.example/rss", "icon": ""}]
                }).to_string(),
                "raw_url": "https://raw/feed"
            },
            "state.json": {
                "content": json!({
                    "last_update": "2024-06-01T09:00:00Z",
                    "updates": {"1": watermark},
                    "raw_url": ""
                }).to_string(),
                "raw_url": "https://raw/state/r2"
            },
            "readlist.json": {"content": "", "raw_url": "https://raw/readlist"}
        },
        "history": [json!({}), json!({})],
        "updated_at": "2024-06-01T10:00:00Z"
    })
}

const FEED_XML: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>One</title>
    <link>https://one.example</link>
    <item><title>Old</title><link>https://one.example/old</link>
        <pubDate>Wed, 01 May 2024 00:00:00 GMT</pubDate><description>old</description></item>
    <item><title>Mid</title><link>https://one.example/mid</link>
        <pubDate>Mon, 03 Jun 2024 00:00:00 GMT</pubDate><description>mid</description></item>
    <item><title>New</title><link>https://one.example/new</link>
        <pubDate>Tue, 04 Jun 2024 00:00:00 GMT</pubDate><description>new</description></item>
</channel></rss>"#;

struct Rig {
    server: MockServer,
    store: Arc<RemoteStore>,
    relay: RelayClient,
    reading_list: Arc<ReadingListManager>,
    notices: NoticeSender,
    rx: mpsc::Receiver<Notice>,
}

/// Document GET + relay GET mounted; watermark hides "Old".
async fn rig() -> Rig {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/gists/{}", DOC_ID)))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(document_envelope("2024-06-01T00:00:00Z")),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/relay"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED_XML))
        .mount(&server)
        .await;

    let (tx, rx) = mpsc::channel(32);
    let notices = NoticeSender::new(tx);
    let store = Arc::new(RemoteStore::new(
        reqwest::Client::new(),
        &server.uri(),
        DOC_ID,
        Some("users/tester/gists"),
        None,
        Box::new(MemoryCache::new()),
        notices.clone(),
    ));
    let reading_list = Arc::new(ReadingListManager::new(store.clone(), notices.clone()));
    let relay = RelayClient::new(
        reqwest::Client::new(),
        format!("{}/relay?", server.uri()),
        "https://rill.example/",
        "rill",
    );
    Rig {
        server,
        store,
        relay,
        reading_list,
        notices,
        rx,
    }
}

async fn loaded_session(rig: &Rig) -> FeedSession {
    let document = rig.store.load().await.unwrap();
    let feed = document.feeds[0].clone();
    let mut session = FeedSession::new(
        feed.clone(),
        document.state.clear_date(feed.id),
        SortOrder::OldestFirst,
        rig.store.clone(),
        rig.reading_list.clone(),
        rig.notices.clone(),
    );
    session.load_content(&rig.relay).await;
    session
}

fn drain(rx: &mut mpsc::Receiver<Notice>) -> Vec<Notice> {
    let mut notices = Vec::new();
    while let Ok(notice) = rx.try_recv() {
        notices.push(notice);
    }
    notices
}

#[tokio::test]
async fn test_load_splits_links_on_persisted_watermark() {
    let rig = rig().await;
    let session = loaded_session(&rig).await;

    // Three parsed, one hidden by the 2024-06-01 watermark
    assert!(session.error.is_none());
    assert_eq!(session.all_links.len(), 3);
    assert_eq!(session.links.len(), 2);
    let shown: Vec<_> = session
        .links_to_display()
        .iter()
        .map(|l| l.title.clone())
        .collect();
    assert_eq!(shown, ["Mid", "New"]);
}

#[tokio::test]
async fn test_clear_feed_persists_watermark_and_drops_links() {
    let mut rig = rig().await;
    Mock::given(method("PATCH"))
        .and(path(format!("/gists/{}", DOC_ID)))
        .and(body_string_contains("state.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(document_envelope("2024-06-03T00:00:00Z")),
        )
        .expect(1)
        .mount(&rig.server)
        .await;

    let mut session = loaded_session(&rig).await;
    let mid = Utc.with_ymd_and_hms(2024, 6, 3, 0, 0, 0).unwrap();
    session.clear_feed(mid).await;

    assert_eq!(session.clear_date, mid);
    let shown: Vec<_> = session
        .links_to_display()
        .iter()
        .map(|l| l.title.clone())
        .collect();
    assert_eq!(shown, ["New"]);
    // the watermark reached the store
    assert_eq!(rig.store.feed_state().await.clear_date(1).unwrap(), mid);
    assert!(drain(&mut rig.rx).contains(&Notice::Saved));
}

#[tokio::test]
async fn test_clear_all_feed_uses_newest_link() {
    let rig = rig().await;
    Mock::given(method("PATCH"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(document_envelope("2024-06-04T00:00:00Z")),
        )
        .mount(&rig.server)
        .await;

    let mut session = loaded_session(&rig).await;
    session.clear_all_feed().await;

    assert_eq!(
        session.clear_date,
        Utc.with_ymd_and_hms(2024, 6, 4, 0, 0, 0).unwrap()
    );
    assert!(session.links.is_empty());
    assert_eq!(session.all_links.len(), 3);
}

#[tokio::test]
async fn test_show_all_survives_reload_filtering() {
    let rig = rig().await;
    let mut session = loaded_session(&rig).await;

    session.display_all_links();
    assert_eq!(session.links_to_display().len(), 3);
    assert!(session.is_displaying_all_links());

    session.display_all_links();
    assert_eq!(session.links_to_display().len(), 2);
}

#[tokio::test]
async fn test_save_and_clear_bundles_state_into_one_patch() {
    let mut rig = rig().await;
    // A single PATCH carrying both sub-files
    Mock::given(method("PATCH"))
        .and(body_string_contains("readlist.json"))
        .and(body_string_contains("state.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(document_envelope("2024-06-04T00:00:00Z")),
        )
        .expect(1)
        .mount(&rig.server)
        .await;

    let mut session = loaded_session(&rig).await;
    let newest = session.links.last().cloned().unwrap();
    let item = ReadListItem::from(&newest);

    session.add_to_reading_list(item, true).await;

    // Watermark advanced to the saved item's date and links re-filtered
    assert_eq!(session.clear_date, newest.publication_date);
    assert!(session.links.is_empty());
    assert_eq!(
        rig.store.feed_state().await.clear_date(1).unwrap(),
        newest.publication_date
    );
    assert!(drain(&mut rig.rx).contains(&Notice::Saved));
}

#[tokio::test]
async fn test_update_watcher_emits_remote_changed() {
    let mut rig = rig().await;
    // The state pointer on the server differs from the one we loaded
    Mock::given(method("GET"))
        .and(path("/users/tester/gists"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": DOC_ID, "files": {"state.json": {"raw_url": "https://raw/state/r9"}}}
        ])))
        .mount(&rig.server)
        .await;

    rig.store.load().await.unwrap();

    let relay = rig.relay.clone();
    let handle = rill::poll::spawn(
        Vec::new(),
        relay,
        rig.store.clone(),
        rig.notices.clone(),
        Some(Duration::from_millis(100)),
    );

    let mut seen = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if drain(&mut rig.rx).contains(&Notice::RemoteChanged) {
            seen = true;
            break;
        }
    }
    handle.stop().await;
    assert!(seen, "watcher never reported the out-of-band change");
}
