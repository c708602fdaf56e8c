//! Polling orchestrator: one cancellable task per feed plus a watcher for
//! out-of-band document changes.
//!
//! Each feed task owns its session outright. Manual refreshes and
//! watermark syncs arrive as commands on the task's channel and are
//! handled by the same loop as the automatic tick, so a feed can never
//! have two loads in flight. Cancellation is a broadcast: stopping the
//! handle tears every task down, and an in-flight response whose task is
//! gone simply has no one left to act on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::event::{Notice, NoticeSender};
use crate::feed::relay::RelayClient;
use crate::feed::schedule::RefreshCadence;
use crate::feed::session::FeedSession;
use crate::store::document::FeedState;
use crate::store::remote::RemoteStore;

/// Messages a feed task accepts between ticks.
#[derive(Debug, Clone, Copy)]
pub enum FeedCommand {
    /// Reload the feed now (manual refresh, or first load after dormancy).
    Refresh,
    /// Adopt a clear watermark from a freshly loaded remote document.
    /// Does not trigger a reload.
    SyncClearDate(DateTime<Utc>),
}

/// Owns every polling task. Dropping the handle leaks the tasks; call
/// [`PollerHandle::stop`] for an orderly shutdown.
pub struct PollerHandle {
    cancel_tx: broadcast::Sender<()>,
    joins: Vec<JoinHandle<()>>,
    commands: HashMap<i64, mpsc::Sender<FeedCommand>>,
}

impl PollerHandle {
    /// Asks one feed to reload now. Unknown ids are ignored.
    pub async fn refresh_feed(&self, feed_id: i64) {
        if let Some(tx) = self.commands.get(&feed_id) {
            let _ = tx.send(FeedCommand::Refresh).await;
        }
    }

    /// Pushes the watermarks of a freshly loaded state file to every feed
    /// task.
    pub async fn sync_clear_dates(&self, state: &FeedState) {
        for (feed_id, tx) in &self.commands {
            if let Some(date) = state.clear_date(*feed_id) {
                let _ = tx.send(FeedCommand::SyncClearDate(date)).await;
            }
        }
    }

    /// Cancels all tasks and waits for them to wind down.
    pub async fn stop(self) {
        let _ = self.cancel_tx.send(());
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::warn!(error = %e, "Polling task ended abnormally");
            }
        }
    }
}

/// Spawns one task per session plus the document-update watcher.
/// `update_check_interval = None` disables the watcher (no updates
/// endpoint configured).
pub fn spawn(
    sessions: Vec<FeedSession>,
    relay: RelayClient,
    store: Arc<RemoteStore>,
    notices: NoticeSender,
    update_check_interval: Option<Duration>,
) -> PollerHandle {
    let (cancel_tx, _) = broadcast::channel(1);
    let mut joins = Vec::new();
    let mut commands = HashMap::new();

    for session in sessions {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        commands.insert(session.feed.id, cmd_tx);
        joins.push(spawn_feed_task(
            session,
            relay.clone(),
            cmd_rx,
            cancel_tx.subscribe(),
        ));
    }

    if let Some(interval) = update_check_interval {
        joins.push(spawn_update_watcher(
            store,
            notices,
            interval,
            cancel_tx.subscribe(),
        ));
    }

    PollerHandle {
        cancel_tx,
        joins,
        commands,
    }
}

fn spawn_feed_task(
    mut session: FeedSession,
    relay: RelayClient,
    mut commands: mpsc::Receiver<FeedCommand>,
    mut cancel: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        'run: loop {
            session.load_content(&relay).await;

            // Wait for whichever comes first: the cadence timer, a manual
            // refresh, or shutdown. Watermark syncs are absorbed without
            // restarting the timer.
            let deadline = match session.cadence {
                RefreshCadence::Every(delay) => Some(tokio::time::Instant::now() + delay),
                RefreshCadence::Dormant => None,
            };
            loop {
                let command = if let Some(deadline) = deadline {
                    tokio::select! {
                        _ = cancel.recv() => break 'run,
                        _ = tokio::time::sleep_until(deadline) => break,
                        cmd = commands.recv() => cmd,
                    }
                } else {
                    tokio::select! {
                        _ = cancel.recv() => break 'run,
                        cmd = commands.recv() => cmd,
                    }
                };

                match command {
                    Some(FeedCommand::Refresh) => break,
                    Some(FeedCommand::SyncClearDate(date)) => session.sync_clear_date(date),
                    // All senders dropped: nothing can wake this task again
                    None => break 'run,
                }
            }
        }
        tracing::debug!(feed = %session.title, "Feed task stopped");
    })
}

fn spawn_update_watcher(
    store: Arc<RemoteStore>,
    notices: NoticeSender,
    interval: Duration,
    mut cancel: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        ticker.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.recv() => break,
                _ = ticker.tick() => {
                    if store.is_updated().await {
                        tracing::info!("Remote document changed out-of-band");
                        notices.send(Notice::RemoteChanged);
                    }
                }
            }
        }
        tracing::debug!("Update watcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::parser::SortOrder;
    use crate::store::cache::MemoryCache;
    use crate::store::document::FeedConfig;
    use crate::store::reading_list::ReadingListManager;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_store() -> Arc<RemoteStore> {
        Arc::new(RemoteStore::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            "doc",
            None,
            None,
            Box::new(MemoryCache::new()),
            NoticeSender::disabled(),
        ))
    }

    fn test_session(store: &Arc<RemoteStore>, url: &str) -> FeedSession {
        let reading_list = Arc::new(ReadingListManager::new(
            store.clone(),
            NoticeSender::disabled(),
        ));
        FeedSession::new(
            FeedConfig {
                id: 1,
                name: "Test".into(),
                url: url.into(),
                icon: String::new(),
                no_cors_proxy: Some(true),
                enhance: None,
                filter: None,
            },
            None,
            SortOrder::OldestFirst,
            store.clone(),
            reading_list,
            NoticeSender::disabled(),
        )
    }

    #[tokio::test]
    async fn test_stop_with_no_sessions_returns() {
        let handle = spawn(
            Vec::new(),
            RelayClient::new(reqwest::Client::new(), "http://r/?", "o", "u"),
            test_store(),
            NoticeSender::disabled(),
            None,
        );
        handle.stop().await;
    }

    #[tokio::test]
    async fn test_manual_refresh_triggers_second_load() {
        let now = Utc::now();
        let xml = format!(
            r#"<rss><channel><title>T</title>
                <item><title>A</title><link>https://e/a</link><pubDate>{}</pubDate></item>
            </channel></rss>"#,
            now.to_rfc2822()
        );

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(xml))
            .mount(&mock_server)
            .await;

        let store = test_store();
        let session = test_session(&store, &format!("{}/feed", mock_server.uri()));
        let relay = RelayClient::new(reqwest::Client::new(), "http://unused/?", "o", "u");

        let handle = spawn(vec![session], relay, store, NoticeSender::disabled(), None);

        // Fresh articles put the cadence at 10+ minutes, so within this
        // test only the initial load plus our manual refresh can occur.
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.refresh_feed(1).await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop().await;

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
    }
}
