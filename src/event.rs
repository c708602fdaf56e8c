//! User-facing notices emitted by the core.
//!
//! Presentation (toasts, status lines) is outside this crate; the core only
//! pushes `Notice` values into an mpsc channel and whoever owns the receiver
//! decides how to show them. Senders never block and a dropped receiver is
//! harmless.

use tokio::sync::mpsc;

/// Events surfaced to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A document PATCH completed.
    Saved,
    /// A document PATCH failed; local state may be ahead of the remote.
    SaveFailed { error: String },
    /// The server's history grew by more than one revision across our save —
    /// another writer probably raced us and data may have been lost.
    ConflictSuspected { expected: usize, actual: usize },
    /// An add to the reading list was rejected because the URL is already
    /// present.
    DuplicateReadingItem { title: String },
    /// The remote document could not be fetched; the last local snapshot is
    /// being served instead.
    LoadedFromCache,
    /// The remote state file changed out-of-band (another device wrote it).
    RemoteChanged,
    /// A feed failed to load or parse.
    FeedFailed { feed: String, error: String },
    /// A feed load produced links newer than the clear watermark.
    NewLinks { feed: String, count: usize },
}

/// Cloneable sending half handed to every component that reports to the user.
#[derive(Clone)]
pub struct NoticeSender {
    tx: Option<mpsc::Sender<Notice>>,
}

impl NoticeSender {
    pub fn new(tx: mpsc::Sender<Notice>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that discards everything. For tests and one-shot runs.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Fire-and-forget send. A full or closed channel drops the notice —
    /// losing a toast must never stall feed or store work.
    pub fn send(&self, notice: Notice) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(notice) {
                tracing::debug!(error = %e, "Notice dropped (channel full or closed)");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_notice() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = NoticeSender::new(tx);
        sender.send(Notice::Saved);
        assert_eq!(rx.recv().await, Some(Notice::Saved));
    }

    #[test]
    fn test_disabled_sender_is_silent() {
        let sender = NoticeSender::disabled();
        sender.send(Notice::RemoteChanged); // must not panic
    }

    #[tokio::test]
    async fn test_full_channel_drops_without_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = NoticeSender::new(tx);
        sender.send(Notice::Saved);
        sender.send(Notice::RemoteChanged); // channel full, silently dropped
    }
}
