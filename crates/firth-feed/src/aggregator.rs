//! Feed aggregation engine.
//!
//! [`FeedAggregator`] owns one active feed session at a time. It consumes
//! batches from a [`ContentStream`], deduplicates against the session's
//! seen-set, filters against the viewer's [`SocialGraph`], inserts in
//! descending timestamp order, and publishes the resulting list over a
//! watch channel after every batch.
//!
//! # Cancellation
//!
//! Every session mints a fresh generation number. Batch consumers, the
//! loading timeout, and pagination completion all capture the generation
//! they were spawned under and re-check it under the state lock before
//! mutating anything; a mismatch means the work is stale and is dropped
//! silently. Aborting the spawned tasks on supersession is resource
//! hygiene on top; the generation check is what makes a `start` racing an
//! in-flight batch safe.
//!
//! # Concurrency
//!
//! All session state lives behind one mutex that is never held across an
//! await. Both the initial live stream and any in-flight pagination page
//! funnel through the same ingest function, so there is exactly one
//! serialized consumption point per aggregator.

use crate::diversify::{DiversifyConfig, diversify};
use crate::mode::{FeedMode, QueryPlan};
use crate::pagination::{PageState, Watermark};
use crate::query::{FeedQuery, QueryInputs};
use crate::social::SocialGraph;
use crate::stream::{CancelFlag, ContentStream, StreamHandle, StreamMessage};
use crate::Result;
use firth_core::{AuthorId, ContentItem, ItemId};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Tunables for a feed aggregator.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// How long a session may sit without a first batch before loading is
    /// resolved anyway. Absence of data is not an error.
    pub loading_timeout: Duration,

    /// Stored items to request per pagination page.
    pub page_limit: usize,

    /// Stored items to request when a session opens.
    pub initial_limit: Option<usize>,

    /// Optional same-author burst avoidance applied to published
    /// snapshots. The stored list keeps strict timestamp order.
    pub diversify: Option<DiversifyConfig>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            loading_timeout: Duration::from_secs(10),
            page_limit: 50,
            initial_limit: Some(500),
            diversify: None,
        }
    }
}

/// One published view of the feed.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    /// Visible items, newest first (subject to optional diversification).
    pub items: Arc<Vec<ContentItem>>,
    /// True from session start until the first batch or the loading
    /// timeout, whichever comes first.
    pub is_loading: bool,
}

impl FeedSnapshot {
    fn empty() -> Self {
        Self {
            items: Arc::new(Vec::new()),
            is_loading: false,
        }
    }
}

/// Which stream a consume loop is draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamRole {
    /// The session's live, open-ended stream.
    Initial,
    /// A bounded pagination page.
    Page,
}

/// Mutable state of one aggregation session.
struct SessionState {
    mode: Option<FeedMode>,
    inputs: QueryInputs,
    generation: u64,
    items: Vec<ContentItem>,
    seen: HashSet<ItemId>,
    is_loading: bool,
    got_first_batch: bool,
    /// Resolved query of the active session, unbounded. Pagination
    /// re-bounds a clone of it.
    query: Option<FeedQuery>,
    stream_cancel: Option<CancelFlag>,
    consume_task: Option<JoinHandle<()>>,
    timeout_task: Option<JoinHandle<()>>,
    page: PageState,
    page_cancel: Option<CancelFlag>,
    page_task: Option<JoinHandle<()>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            mode: None,
            inputs: QueryInputs::default(),
            generation: 0,
            items: Vec::new(),
            seen: HashSet::new(),
            is_loading: false,
            got_first_batch: false,
            query: None,
            stream_cancel: None,
            consume_task: None,
            timeout_task: None,
            page: PageState::default(),
            page_cancel: None,
            page_task: None,
        }
    }

    /// Cancel and drop everything belonging to the current generation.
    fn supersede(&mut self) {
        if let Some(cancel) = self.stream_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.consume_task.take() {
            task.abort();
        }
        if let Some(task) = self.timeout_task.take() {
            task.abort();
        }
        if let Some(cancel) = self.page_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.page_task.take() {
            task.abort();
        }
        self.page.finish();
    }
}

struct Inner {
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<FeedSnapshot>,
    config: FeedConfig,
}

impl Inner {
    /// Publish the current list and loading flag. Called with the state
    /// lock held; the watch send itself never blocks.
    fn publish(&self, st: &SessionState) {
        let items = match self.config.diversify {
            Some(cfg) => diversify(&st.items, cfg),
            None => st.items.clone(),
        };
        self.snapshot_tx.send_replace(FeedSnapshot {
            items: Arc::new(items),
            is_loading: st.is_loading,
        });
    }

    /// Run one batch through dedup, mute, and web-of-trust filtering, then
    /// sorted insertion. Returns false when the batch was stale and the
    /// caller's consume loop should end.
    fn ingest_batch(
        &self,
        graph: &dyn SocialGraph,
        generation: u64,
        batch: Vec<ContentItem>,
    ) -> bool {
        let mut st = self.state.lock();
        if st.generation != generation {
            counter!("feed_stale_batches_total").increment(1);
            tracing::debug!(
                generation,
                current = st.generation,
                "discarding batch from superseded session"
            );
            return false;
        }

        counter!("feed_batches_total").increment(1);

        // Success overrides the timeout race: the first batch of the
        // session cancels the pending loading timeout.
        if !st.got_first_batch {
            st.got_first_batch = true;
            if let Some(task) = st.timeout_task.take() {
                task.abort();
            }
        }

        let network_wide = matches!(st.mode, Some(FeedMode::NetworkWide));
        // Fail-open: while trust data is still loading, network-wide
        // sessions admit every author rather than starving the feed.
        let wot_filtering = network_wide && graph.wot_ready();

        let mut admitted = 0usize;
        for item in batch {
            if !st.seen.insert(item.id) {
                counter!("feed_items_deduped_total").increment(1);
                continue;
            }
            if graph.is_muted(&item.author) {
                counter!("feed_items_muted_total").increment(1);
                continue;
            }
            if wot_filtering && !graph.is_in_web_of_trust(&item.author) {
                counter!("feed_items_untrusted_total").increment(1);
                continue;
            }
            let pos = st
                .items
                .partition_point(|existing| existing.feed_cmp(&item) == Ordering::Less);
            st.items.insert(pos, item);
            admitted += 1;
        }

        st.is_loading = false;
        counter!("feed_items_admitted_total").increment(admitted as u64);
        gauge!("feed_visible_items").set(st.items.len() as f64);
        self.publish(&st);
        true
    }

    /// Clear the pagination single-flight guard, generation-checked.
    fn finish_page(&self, generation: u64) {
        let mut st = self.state.lock();
        if st.generation != generation {
            return;
        }
        st.page.finish();
        st.page_cancel = None;
        st.page_task = None;
        tracing::debug!(generation, "pagination page complete");
    }
}

/// Drain one stream into the ingest pipeline until it ends or goes stale.
async fn consume(
    inner: Arc<Inner>,
    graph: Arc<dyn SocialGraph>,
    generation: u64,
    mut messages: mpsc::Receiver<StreamMessage>,
    role: StreamRole,
) {
    while let Some(msg) = messages.recv().await {
        match msg {
            StreamMessage::Batch(batch) => {
                if !inner.ingest_batch(graph.as_ref(), generation, batch) {
                    return;
                }
            }
            StreamMessage::EndOfSync => {
                tracing::debug!(generation, "end of initial sync");
                if role == StreamRole::Page {
                    inner.finish_page(generation);
                    return;
                }
            }
            StreamMessage::Failed(reason) => {
                // Terminal for this generation. No auto-retry; loading is
                // left to the timeout.
                counter!("feed_stream_failures_total").increment(1);
                tracing::warn!(generation, %reason, "stream session failed");
                if role == StreamRole::Page {
                    inner.finish_page(generation);
                }
                return;
            }
        }
    }
    if role == StreamRole::Page {
        inner.finish_page(generation);
    }
}

/// Resolve loading after the configured timeout if no batch arrived.
async fn loading_timeout(inner: Arc<Inner>, generation: u64, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let mut st = inner.state.lock();
    if st.generation != generation || !st.is_loading {
        return;
    }
    st.is_loading = false;
    counter!("feed_loading_timeouts_total").increment(1);
    tracing::debug!(generation, "loading timeout fired without content");
    inner.publish(&st);
}

/// Streaming feed aggregation engine.
///
/// See the module docs for the session and cancellation model. All methods
/// are cheap and non-blocking; long-lived work happens on spawned tasks.
pub struct FeedAggregator {
    inner: Arc<Inner>,
    stream: Arc<dyn ContentStream>,
    graph: Arc<dyn SocialGraph>,
    // Keeps the watch channel alive even with no external subscribers.
    snapshot_rx: watch::Receiver<FeedSnapshot>,
}

impl FeedAggregator {
    /// Create an aggregator over the given stream source and social graph.
    pub fn new(
        stream: Arc<dyn ContentStream>,
        graph: Arc<dyn SocialGraph>,
        config: FeedConfig,
    ) -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(FeedSnapshot::empty());
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState::new()),
                snapshot_tx,
                config,
            }),
            stream,
            graph,
            snapshot_rx,
        }
    }

    /// Subscribe to published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<FeedSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> FeedSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// The active session's mode, if any.
    pub fn current_mode(&self) -> Option<FeedMode> {
        self.inner.state.lock().mode.clone()
    }

    /// Whether a pagination page is currently in flight.
    pub fn pagination_in_flight(&self) -> bool {
        self.inner.state.lock().page.in_flight()
    }

    /// Start a session for `mode`, superseding any existing session.
    ///
    /// `preserve_existing` keeps the current visible list across the
    /// restart; it is only meaningful when the old and new modes draw from
    /// overlapping content families. When a prerequisite has not loaded
    /// (following mode before the follow list arrives) the session stays
    /// in its loading state and no stream opens; the caller re-invokes
    /// `start` when the prerequisite is ready.
    pub fn start(
        &self,
        mode: FeedMode,
        inputs: QueryInputs,
        preserve_existing: bool,
    ) -> Result<()> {
        let generation;
        let query = {
            let mut st = self.inner.state.lock();
            st.supersede();
            st.generation += 1;
            generation = st.generation;

            st.mode = Some(mode.clone());
            st.inputs = inputs.clone();
            st.seen.clear();
            if preserve_existing {
                // Re-seed so a redelivery of a preserved item cannot
                // duplicate it.
                let ids: Vec<ItemId> = st.items.iter().map(|it| it.id).collect();
                st.seen.extend(ids);
            } else {
                st.items.clear();
            }
            st.is_loading = true;
            st.got_first_batch = false;
            st.query = None;

            counter!("feed_sessions_started_total").increment(1);
            tracing::info!(
                mode = mode.name(),
                generation,
                preserve = preserve_existing,
                "starting feed session"
            );

            match mode.plan(&inputs, self.graph.as_ref()) {
                QueryPlan::Deferred => {
                    tracing::info!(generation, "prerequisite not loaded; session deferred");
                    self.inner.publish(&st);
                    return Ok(());
                }
                QueryPlan::Empty => {
                    st.is_loading = false;
                    tracing::info!(generation, "resolved author set empty; nothing to open");
                    self.inner.publish(&st);
                    return Ok(());
                }
                QueryPlan::Ready(query) => {
                    st.query = Some(query.clone());
                    self.inner.publish(&st);
                    query
                }
            }
        };

        let open_query = {
            let mut q = query;
            q.limit = q.limit.or(self.inner.config.initial_limit);
            q
        };

        let handle = match self.stream.open(&open_query) {
            Ok(handle) => handle,
            Err(e) => {
                let mut st = self.inner.state.lock();
                if st.generation == generation {
                    st.is_loading = false;
                    self.inner.publish(&st);
                }
                return Err(e);
            }
        };

        let mut st = self.inner.state.lock();
        if st.generation != generation {
            // Superseded while opening; tear down the orphan subscription.
            handle.cancel();
            return Ok(());
        }

        let StreamHandle { messages, cancel } = handle;
        st.stream_cancel = Some(cancel);
        st.timeout_task = Some(tokio::spawn(loading_timeout(
            Arc::clone(&self.inner),
            generation,
            self.inner.config.loading_timeout,
        )));
        st.consume_task = Some(tokio::spawn(consume(
            Arc::clone(&self.inner),
            Arc::clone(&self.graph),
            generation,
            messages,
            StreamRole::Initial,
        )));
        Ok(())
    }

    /// Tear down the active session. Idempotent.
    pub fn stop(&self) {
        let mut st = self.inner.state.lock();
        st.supersede();
        st.generation += 1;
        st.is_loading = false;
        st.query = None;
        tracing::info!(generation = st.generation, "feed session stopped");
        self.inner.publish(&st);
    }

    /// Switch the feed to a different mode.
    ///
    /// No-op when `new_mode` equals the current mode. The visible list is
    /// preserved only for the following → network-wide transition, so
    /// broadening scope does not flash the feed to empty.
    pub fn switch_mode(&self, new_mode: FeedMode) -> Result<()> {
        let (inputs, preserve) = {
            let st = self.inner.state.lock();
            if st.mode.as_ref() == Some(&new_mode) {
                tracing::debug!(mode = new_mode.name(), "switch_mode to current mode; no-op");
                return Ok(());
            }
            let preserve = st
                .mode
                .as_ref()
                .is_some_and(|current| current.preserves_into(&new_mode));
            (st.inputs.clone(), preserve)
        };
        self.stop();
        self.start(new_mode, inputs, preserve)
    }

    /// Remove every visible item whose author is in `newly_muted`.
    ///
    /// Synchronous and stream-independent. The seen-set is left untouched:
    /// a later un-mute does not resurrect already-delivered items, the
    /// stream would have to redeliver them.
    pub fn update_for_mute_list(&self, newly_muted: &HashSet<AuthorId>) {
        let mut st = self.inner.state.lock();
        let before = st.items.len();
        st.items.retain(|item| !newly_muted.contains(&item.author));
        let removed = before - st.items.len();
        if removed > 0 {
            counter!("feed_items_muted_total").increment(removed as u64);
            gauge!("feed_visible_items").set(st.items.len() as f64);
            tracing::debug!(removed, "removed items for updated mute list");
            self.inner.publish(&st);
        }
    }

    /// Request one page of older content below the current oldest item.
    ///
    /// Returns true when a page query was opened. No-ops (returning false)
    /// when there is no active session, the list is empty, or a page is
    /// already in flight.
    pub fn load_more(&self) -> Result<bool> {
        let (generation, page_query) = {
            let mut st = self.inner.state.lock();
            let Some(query) = st.query.clone() else {
                tracing::debug!("load_more without an active session; no-op");
                return Ok(false);
            };
            let Some(cursor) = Watermark::before_oldest(&st.items) else {
                tracing::debug!("load_more on empty list; no-op");
                return Ok(false);
            };
            if !st.page.try_begin() {
                tracing::debug!("load_more while a page is in flight; no-op");
                return Ok(false);
            }
            (
                st.generation,
                query.page(cursor.as_secs(), self.inner.config.page_limit),
            )
        };

        counter!("feed_pagination_requests_total").increment(1);
        tracing::info!(
            generation,
            until = page_query.until,
            "loading older content"
        );

        let handle = match self.stream.open(&page_query) {
            Ok(handle) => handle,
            Err(e) => {
                let mut st = self.inner.state.lock();
                if st.generation == generation {
                    st.page.finish();
                }
                return Err(e);
            }
        };

        let mut st = self.inner.state.lock();
        if st.generation != generation {
            handle.cancel();
            return Ok(false);
        }
        let StreamHandle { messages, cancel } = handle;
        st.page_cancel = Some(cancel);
        st.page_task = Some(tokio::spawn(consume(
            Arc::clone(&self.inner),
            Arc::clone(&self.graph),
            generation,
            messages,
            StreamRole::Page,
        )));
        Ok(true)
    }
}

impl Drop for FeedAggregator {
    fn drop(&mut self) {
        self.inner.state.lock().supersede();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::social::SharedSocialGraph;
    use tokio::sync::mpsc::Sender;

    fn author(n: u8) -> AuthorId {
        let mut id = [0u8; 32];
        id[0] = n;
        AuthorId(id)
    }

    fn item(id_byte: u8, author_byte: u8, created_at: u64) -> ContentItem {
        let mut id = [0u8; 32];
        id[0] = id_byte;
        ContentItem {
            id: ItemId(id),
            author: author(author_byte),
            created_at,
            payload: Arc::from("{}"),
        }
    }

    /// Records every opened query and hands the test the sending side of
    /// each subscription.
    #[derive(Default)]
    struct ScriptedStream {
        opened: Mutex<Vec<(FeedQuery, Sender<StreamMessage>)>>,
    }

    impl ScriptedStream {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn opened_count(&self) -> usize {
            self.opened.lock().len()
        }

        fn query(&self, i: usize) -> FeedQuery {
            self.opened.lock()[i].0.clone()
        }

        fn sender(&self, i: usize) -> Sender<StreamMessage> {
            self.opened.lock()[i].1.clone()
        }
    }

    impl ContentStream for ScriptedStream {
        fn open(&self, query: &FeedQuery) -> Result<StreamHandle> {
            let (tx, rx) = mpsc::channel(32);
            self.opened.lock().push((query.clone(), tx));
            Ok(StreamHandle::new(rx, CancelFlag::new()))
        }
    }

    fn aggregator_with(
        stream: Arc<ScriptedStream>,
        graph: Arc<SharedSocialGraph>,
    ) -> FeedAggregator {
        FeedAggregator::new(stream, graph, FeedConfig::default())
    }

    async fn wait_for<F>(rx: &mut watch::Receiver<FeedSnapshot>, pred: F) -> FeedSnapshot
    where
        F: Fn(&FeedSnapshot) -> bool,
    {
        loop {
            {
                let snap = rx.borrow_and_update().clone();
                if pred(&snap) {
                    return snap;
                }
            }
            tokio::time::timeout(Duration::from_secs(5), rx.changed())
                .await
                .expect("timed out waiting for snapshot")
                .expect("snapshot channel closed");
        }
    }

    fn ids(snap: &FeedSnapshot) -> Vec<u8> {
        snap.items.iter().map(|it| it.id.0[0]).collect()
    }

    #[tokio::test]
    async fn test_dedup_across_batches() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        let tx = stream.sender(0);

        tx.send(StreamMessage::Batch(vec![item(1, 1, 3000), item(2, 2, 2000)]))
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.items.len() == 2).await;

        // Redelivery of id 1 is skipped; id 3 is new
        tx.send(StreamMessage::Batch(vec![item(1, 1, 3000), item(3, 3, 1000)]))
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| s.items.len() == 3).await;
        assert_eq!(ids(&snap), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_descending_order_with_stable_ties() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        let tx = stream.sender(0);

        // Delivered out of timestamp order, with a tie at 2000
        tx.send(StreamMessage::Batch(vec![
            item(5, 1, 2000),
            item(9, 2, 3000),
            item(2, 3, 2000),
            item(7, 4, 1000),
        ]))
        .await
        .unwrap();
        let snap = wait_for(&mut rx, |s| s.items.len() == 4).await;

        for pair in snap.items.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
        // Tie at 2000 broken by id: 2 before 5
        assert_eq!(ids(&snap), vec![9, 2, 5, 7]);
    }

    #[tokio::test]
    async fn test_muted_authors_filtered_on_ingest() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        graph.mute(author(2));
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        stream
            .sender(0)
            .send(StreamMessage::Batch(vec![
                item(1, 1, 3000),
                item(2, 2, 2000),
                item(3, 3, 1000),
            ]))
            .await
            .unwrap();

        let snap = wait_for(&mut rx, |s| !s.is_loading).await;
        assert_eq!(ids(&snap), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_update_for_mute_list_sweeps_without_touching_seen() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        let tx = stream.sender(0);
        tx.send(StreamMessage::Batch(vec![item(1, 1, 3000), item(2, 2, 2000)]))
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.items.len() == 2).await;

        agg.update_for_mute_list(&HashSet::from([author(2)]));
        let snap = agg.snapshot();
        assert_eq!(ids(&snap), vec![1]);

        // The swept item stays in the seen-set: redelivery does not
        // resurrect it even after an un-mute
        tx.send(StreamMessage::Batch(vec![item(2, 2, 2000), item(3, 3, 1000)]))
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| s.items.len() == 2).await;
        assert_eq!(ids(&snap), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_wot_fail_open_and_no_retroactive_removal() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph.clone());
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        let tx = stream.sender(0);

        // Trust data unavailable: all three untrusted authors admitted
        tx.send(StreamMessage::Batch(vec![
            item(1, 1, 3000),
            item(2, 2, 2000),
            item(3, 3, 1000),
        ]))
        .await
        .unwrap();
        wait_for(&mut rx, |s| s.items.len() == 3).await;

        // Trust data arrives, trusting only author 9: nothing is removed
        graph.set_web_of_trust(HashSet::from([author(9)]));
        assert_eq!(agg.snapshot().items.len(), 3);

        // But new batches are filtered now
        tx.send(StreamMessage::Batch(vec![item(4, 4, 500), item(5, 9, 400)]))
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| s.items.len() == 4).await;
        assert_eq!(ids(&snap), vec![1, 2, 3, 5]);
    }

    #[tokio::test]
    async fn test_wot_does_not_filter_following_mode() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        graph.set_follows(HashSet::from([author(1)]));
        graph.set_web_of_trust(HashSet::from([author(9)]));
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::Following, QueryInputs::default(), false)
            .unwrap();
        stream
            .sender(0)
            .send(StreamMessage::Batch(vec![item(1, 1, 1000)]))
            .await
            .unwrap();

        // Author 1 is outside the web of trust but following mode does not
        // apply trust filtering
        let snap = wait_for(&mut rx, |s| !s.is_loading).await;
        assert_eq!(ids(&snap), vec![1]);
    }

    #[tokio::test]
    async fn test_new_start_discards_superseded_session() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        let old_tx = stream.sender(0);

        // Old session's batch races the restart; whether it lands before
        // or after supersession, nothing from it may survive
        let _ = old_tx.send(StreamMessage::Batch(vec![item(1, 1, 3000)])).await;

        agg.start(
            FeedMode::Hashtag("art".to_string()),
            QueryInputs::default(),
            false,
        )
        .unwrap();
        assert_eq!(stream.opened_count(), 2);

        stream
            .sender(1)
            .send(StreamMessage::Batch(vec![item(2, 2, 2000)]))
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| s.items.iter().any(|it| it.id.0[0] == 2)).await;
        assert_eq!(ids(&snap), vec![2]);
    }

    #[tokio::test]
    async fn test_first_batch_resolves_loading_even_when_empty() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        assert!(agg.snapshot().is_loading);

        stream
            .sender(0)
            .send(StreamMessage::Batch(Vec::new()))
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| !s.is_loading).await;
        assert!(snap.items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loading_timeout_resolves_empty_session() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        assert!(agg.snapshot().is_loading);

        // No batch ever arrives; advancing past the timeout resolves
        // loading without treating the empty session as an error
        tokio::time::sleep(Duration::from_secs(11)).await;
        let snap = agg.snapshot();
        assert!(!snap.is_loading);
        assert!(snap.items.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_failure_resolved_by_timeout() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        stream
            .sender(0)
            .send(StreamMessage::Failed("connection refused".to_string()))
            .await
            .unwrap();

        // Failure is terminal and silent; loading resolves via the timeout
        tokio::time::sleep(Duration::from_secs(11)).await;
        let snap = agg.snapshot();
        assert!(!snap.is_loading);
        assert!(snap.items.is_empty());
    }

    #[tokio::test]
    async fn test_empty_follow_list_never_opens_a_stream() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        graph.set_follows(HashSet::new());
        let agg = aggregator_with(stream.clone(), graph);

        agg.start(FeedMode::Following, QueryInputs::default(), false)
            .unwrap();

        let snap = agg.snapshot();
        assert!(!snap.is_loading);
        assert!(snap.items.is_empty());
        assert_eq!(stream.opened_count(), 0);
    }

    #[tokio::test]
    async fn test_deferred_follow_list_then_restart() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph.clone());

        agg.start(FeedMode::Following, QueryInputs::default(), false)
            .unwrap();
        assert!(agg.snapshot().is_loading);
        assert_eq!(stream.opened_count(), 0);

        // Caller re-invokes start once the follow list loads
        graph.set_follows(HashSet::from([author(1)]));
        agg.start(FeedMode::Following, QueryInputs::default(), false)
            .unwrap();
        assert_eq!(stream.opened_count(), 1);
        let authors = stream.query(0).authors.unwrap();
        assert!(authors.contains(&author(1)));
    }

    #[tokio::test]
    async fn test_switch_mode_preserves_only_documented_transition() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        graph.set_follows(HashSet::from([author(1)]));
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::Following, QueryInputs::default(), false)
            .unwrap();
        stream
            .sender(0)
            .send(StreamMessage::Batch(vec![item(1, 1, 3000)]))
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.items.len() == 1).await;

        // Broadening to network-wide keeps the list
        agg.switch_mode(FeedMode::NetworkWide).unwrap();
        assert_eq!(agg.snapshot().items.len(), 1);

        // A redelivery of the preserved item is still deduped
        stream
            .sender(1)
            .send(StreamMessage::Batch(vec![item(1, 1, 3000), item(2, 2, 2000)]))
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| s.items.len() == 2).await;
        assert_eq!(ids(&snap), vec![1, 2]);

        // Any other transition resets the list
        agg.switch_mode(FeedMode::Hashtag("art".to_string())).unwrap();
        assert!(agg.snapshot().items.is_empty());
    }

    #[tokio::test]
    async fn test_switch_mode_same_mode_is_noop() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        agg.switch_mode(FeedMode::NetworkWide).unwrap();
        assert_eq!(stream.opened_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        agg.stop();
        agg.stop();

        let snap = agg.snapshot();
        assert!(!snap.is_loading);
    }

    #[tokio::test]
    async fn test_load_more_cursor_single_flight_and_append() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        // Nothing to paginate from yet
        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        assert!(!agg.load_more().unwrap());

        stream
            .sender(0)
            .send(StreamMessage::Batch(vec![item(1, 1, 3000), item(2, 2, 2000)]))
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.items.len() == 2).await;

        assert!(agg.load_more().unwrap());
        assert!(agg.pagination_in_flight());
        // Second call while the page is in flight is suppressed
        assert!(!agg.load_more().unwrap());
        assert_eq!(stream.opened_count(), 2);

        let page_query = stream.query(1);
        assert_eq!(page_query.until, Some(1999));
        assert_eq!(page_query.limit, Some(FeedConfig::default().page_limit));

        let page_tx = stream.sender(1);
        // A redelivered boundary id is skipped; the older item appends
        page_tx
            .send(StreamMessage::Batch(vec![item(2, 2, 2000), item(3, 3, 1000)]))
            .await
            .unwrap();
        let snap = wait_for(&mut rx, |s| s.items.len() == 3).await;
        assert_eq!(ids(&snap), vec![1, 2, 3]);

        // Completion clears the single-flight guard
        page_tx.send(StreamMessage::EndOfSync).await.unwrap();
        wait_for_guard_clear(&agg).await;
        assert!(agg.load_more().unwrap());
        assert_eq!(stream.opened_count(), 3);
    }

    #[tokio::test]
    async fn test_failed_page_clears_single_flight_guard() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        stream
            .sender(0)
            .send(StreamMessage::Batch(vec![item(1, 1, 3000)]))
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.items.len() == 1).await;

        assert!(agg.load_more().unwrap());
        stream
            .sender(1)
            .send(StreamMessage::Failed("query rejected".to_string()))
            .await
            .unwrap();

        wait_for_guard_clear(&agg).await;
        assert!(agg.load_more().unwrap());
    }

    #[tokio::test]
    async fn test_page_query_reuses_session_filters() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let agg = aggregator_with(stream.clone(), graph);
        let mut rx = agg.subscribe();

        agg.start(
            FeedMode::Hashtag("foodstr".to_string()),
            QueryInputs::default(),
            false,
        )
        .unwrap();
        stream
            .sender(0)
            .send(StreamMessage::Batch(vec![item(1, 1, 3000)]))
            .await
            .unwrap();
        wait_for(&mut rx, |s| s.items.len() == 1).await;

        assert!(agg.load_more().unwrap());
        let page_query = stream.query(1);
        assert_eq!(page_query.hashtag.as_deref(), Some("foodstr"));
        assert_eq!(page_query.until, Some(2999));
    }

    async fn wait_for_guard_clear(agg: &FeedAggregator) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while agg.pagination_in_flight() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("pagination guard never cleared");
    }

    #[tokio::test]
    async fn test_diversified_view_keeps_stored_order_intact() {
        let stream = ScriptedStream::new();
        let graph = Arc::new(SharedSocialGraph::new());
        let config = FeedConfig {
            diversify: Some(DiversifyConfig { lookahead: 3 }),
            ..FeedConfig::default()
        };
        let agg = FeedAggregator::new(stream.clone(), graph, config);
        let mut rx = agg.subscribe();

        agg.start(FeedMode::NetworkWide, QueryInputs::default(), false)
            .unwrap();
        stream
            .sender(0)
            .send(StreamMessage::Batch(vec![
                item(1, 1, 4000),
                item(2, 1, 3000),
                item(3, 2, 2000),
                item(4, 1, 1000),
            ]))
            .await
            .unwrap();

        let snap = wait_for(&mut rx, |s| s.items.len() == 4).await;
        // Published view interleaves authors
        let authors: Vec<u8> = snap.items.iter().map(|it| it.author.0[0]).collect();
        assert_eq!(authors, vec![1, 2, 1, 1]);

        // Pagination still computes its cursor from the stored (strictly
        // ordered) list: oldest is ts 1000
        assert!(agg.load_more().unwrap());
        assert_eq!(stream.query(1).until, Some(999));
    }
}
