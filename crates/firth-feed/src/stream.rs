//! Content stream interface.
//!
//! A [`ContentStream`] is the seam between the feed engine and whatever
//! protocol client actually delivers content: given a [`FeedQuery`] it
//! yields batches of items over a channel until the subscription is
//! cancelled, completes, or fails.
//!
//! Opening a stream returns immediately. Connection establishment happens
//! inside the adapter's own task; a connection or query failure arrives as
//! a terminal [`StreamMessage::Failed`] on the channel rather than as an
//! `Err` from `open`. This keeps the trait object-safe and means the
//! aggregator has exactly one place to observe stream lifecycle: the
//! message channel.

use crate::query::FeedQuery;
use crate::Result;
use firth_core::ContentItem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Messages delivered by an open stream.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// A batch of content items, in delivery order.
    Batch(Vec<ContentItem>),
    /// End of initial sync: stored content has been replayed. Live streams
    /// stay open after this; bounded streams terminate shortly after.
    EndOfSync,
    /// Terminal failure (connection loss, query rejection). No further
    /// messages follow.
    Failed(String),
}

/// Cooperative cancellation flag shared between a stream handle and the
/// adapter task pumping it.
///
/// Adapters check the flag on their poll interval, so cancellation takes
/// effect within one interval rather than instantly.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Create a new, uncancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ownership of one open stream subscription.
///
/// Dropping the handle (or the receiver inside it) also ends the
/// subscription: adapters stop pumping when the channel closes.
#[derive(Debug)]
pub struct StreamHandle {
    /// Channel of stream messages, in delivery order.
    pub messages: mpsc::Receiver<StreamMessage>,
    /// Cancellation flag observed by the adapter task.
    pub cancel: CancelFlag,
}

impl StreamHandle {
    /// Bundle a receiver with its cancellation flag.
    pub fn new(messages: mpsc::Receiver<StreamMessage>, cancel: CancelFlag) -> Self {
        Self { messages, cancel }
    }

    /// Request cancellation of the underlying subscription.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// A cancellable producer of content batches.
///
/// Implementations must deliver batches in order on the returned channel
/// and must treat `until`-bounded queries as finite: after replaying
/// stored content they send [`StreamMessage::EndOfSync`] and close the
/// channel.
pub trait ContentStream: Send + Sync {
    /// Open a subscription for the given query.
    ///
    /// Returns an error only for caller-level problems (malformed query,
    /// unusable configuration). Runtime failures surface on the channel.
    fn open(&self, query: &FeedQuery) -> Result<StreamHandle>;
}
