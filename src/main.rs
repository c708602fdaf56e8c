use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use futures::stream::{self, StreamExt};
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use rill::config::Config;
use rill::event::{Notice, NoticeSender};
use rill::feed::{FeedSession, RelayClient, SortOrder};
use rill::store::{FileSnapshotCache, ReadingListManager, RemoteStore};
use rill::util::format_date;

/// Get the config directory path (~/.config/rill/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("rill"))
}

#[derive(Parser, Debug)]
#[command(
    name = "rill",
    about = "Headless RSS/Atom aggregator syncing read state through a remote gist document"
)]
struct Args {
    /// Config file path (defaults to ~/.config/rill/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Document profile to load (defaults to the "default" profile)
    #[arg(long)]
    profile: Option<String>,

    /// Run a single fetch pass, print the unread links, and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let profile = args.profile.as_deref();
    let Some(document_id) = config.document_id(profile) else {
        anyhow::bail!(
            "No document profile named '{}' in {} — add it under [document.profiles]",
            profile.unwrap_or("default"),
            config_path.display()
        );
    };

    let client = reqwest::Client::new();
    let cache_path = config
        .cache
        .path
        .clone()
        .unwrap_or_else(|| config_dir.join("snapshot.json"));

    let (notice_tx, mut notice_rx) = mpsc::channel::<Notice>(64);
    let notices = NoticeSender::new(notice_tx);

    let store = Arc::new(RemoteStore::new(
        client.clone(),
        &config.document.api_base,
        document_id,
        config.document.updates_path.as_deref(),
        config.document.token.clone().map(SecretString::from),
        Box::new(FileSnapshotCache::new(cache_path)),
        notices.clone(),
    ));

    let document = store
        .load()
        .await
        .context("Failed to load the document (remote unreachable and no usable snapshot)")?;

    let reading_list = Arc::new(ReadingListManager::new(store.clone(), notices.clone()));
    let relay = RelayClient::new(
        client,
        config.relay.url.clone(),
        config.relay.origin.clone(),
        config.relay.usage.clone(),
    );

    let sessions: Vec<FeedSession> = document
        .feeds
        .iter()
        .map(|feed| {
            FeedSession::new(
                feed.clone(),
                document.state.clear_date(feed.id),
                SortOrder::OldestFirst,
                store.clone(),
                reading_list.clone(),
                notices.clone(),
            )
        })
        .collect();

    // Initial load: up to 10 feeds in flight at once
    let mut sessions: Vec<FeedSession> = stream::iter(sessions.into_iter().map(|mut session| {
        let relay = relay.clone();
        async move {
            session.load_content(&relay).await;
            session
        }
    }))
    .buffer_unordered(10)
    .collect()
    .await;
    sessions.sort_by_key(|s| s.feed.id);

    print_summary(&sessions);

    if args.once {
        return Ok(());
    }

    let update_interval = config
        .document
        .updates_path
        .is_some()
        .then(|| Duration::from_secs(config.poll.update_check_secs));
    let handle = rill::poll::spawn(sessions, relay, store.clone(), notices.clone(), update_interval);

    // Drive notices until ctrl-c. The only notice needing action here is
    // RemoteChanged: reload the document and push the fresh watermarks to
    // the feed tasks.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notice_rx.recv() => match notice {
                Some(Notice::RemoteChanged) => {
                    tracing::info!("Remote document changed, reloading");
                    match store.load().await {
                        Ok(document) => handle.sync_clear_dates(&document.state).await,
                        Err(e) => tracing::warn!(error = %e, "Reload after remote change failed"),
                    }
                }
                Some(notice) => log_notice(&notice),
                None => break,
            }
        }
    }

    handle.stop().await;
    println!("Goodbye!");
    Ok(())
}

fn print_summary(sessions: &[FeedSession]) {
    let now = Utc::now();
    for session in sessions {
        match &session.error {
            Some(error) => println!("! {} — {}", session.title, error),
            None => {
                let links = session.links_to_display();
                println!("{} — {} unread", session.title, links.len());
                for link in links {
                    println!(
                        "  [{}] {}  {}",
                        format_date(link.publication_date, now),
                        link.title,
                        link.url
                    );
                }
            }
        }
    }
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::Saved => tracing::info!("Document saved"),
        Notice::SaveFailed { error } => tracing::warn!(error = %error, "Document save failed"),
        Notice::ConflictSuspected { expected, actual } => tracing::warn!(
            expected = expected,
            actual = actual,
            "Probable data loss: another writer raced the last save"
        ),
        Notice::DuplicateReadingItem { title } => {
            tracing::warn!(title = %title, "Duplicate reading-list entry rejected")
        }
        Notice::LoadedFromCache => tracing::warn!("Remote unreachable, using local snapshot"),
        Notice::RemoteChanged => {} // handled in the main loop
        Notice::FeedFailed { feed, error } => {
            tracing::warn!(feed = %feed, error = %error, "Feed failed")
        }
        Notice::NewLinks { feed, count } => {
            tracing::info!(feed = %feed, count = count, "New links")
        }
    }
}
