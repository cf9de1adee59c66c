//! Nostr relay stream adapter.
//!
//! Subscribes to relays via nostr-sdk and translates the notification
//! firehose into [`StreamMessage`] batches for the aggregation engine.
//!
//! # Batching
//!
//! Relays deliver one event per notification. Handing every event to the
//! engine individually would publish a snapshot per event, so the pump
//! coalesces: a batch is flushed when it reaches `batch_capacity` or when
//! `batch_window` has elapsed since the last flush, whichever comes first.
//!
//! # Bounded queries
//!
//! A query with an `until` bound is a pagination/backfill request. After
//! the subscription's first EOSE the pump sends
//! [`StreamMessage::EndOfSync`], waits one flush window for stragglers
//! from slower relays, and terminates. Unbounded subscriptions stay open
//! after EOSE and keep delivering live events.
//!
//! # Timestamp hygiene
//!
//! Events claiming creation before the Nostr genesis date are dropped.
//! Events claiming a time further in the future than the drift allowance
//! are clamped to receipt time so they cannot pin a feed's top position.

use crate::query::FeedQuery;
use crate::stream::{CancelFlag, ContentStream, StreamHandle, StreamMessage};
use crate::{Error, Result};
use firth_core::{ContentItem, FEED_GENESIS_TIMESTAMP, FUTURE_DRIFT_ALLOWANCE_SECS};
use nostr_sdk::prelude::*;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Configuration for the relay stream adapter.
#[derive(Debug, Clone)]
pub struct RelayStreamConfig {
    /// Relay URLs to connect to.
    pub relays: Vec<String>,

    /// How long to wait between cancellation checks while no
    /// notifications arrive.
    pub poll_interval: Duration,

    /// Flush a pending batch after this long even if it is small.
    pub batch_window: Duration,

    /// Flush a pending batch once it reaches this many items.
    pub batch_capacity: usize,

    /// Size of the notification channel buffer.
    ///
    /// Heavy subscriptions can overflow the broadcast channel faster than
    /// a pump drains it; increase this to reduce `Lagged` warnings.
    pub notification_channel_size: usize,
}

impl Default for RelayStreamConfig {
    fn default() -> Self {
        Self {
            relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://relay.nostr.band".to_string(),
                "wss://nos.lol".to_string(),
                "wss://relay.primal.net".to_string(),
            ],
            poll_interval: Duration::from_secs(1),
            batch_window: Duration::from_millis(250),
            batch_capacity: 64,
            notification_channel_size: 16384,
        }
    }
}

/// Relay-backed content stream.
///
/// One client (and relay pool) serves every subscription opened through
/// this adapter; each `open` call gets its own subscription id and pump
/// task.
pub struct RelayStream {
    config: RelayStreamConfig,
    client: Client,
}

impl RelayStream {
    /// Build the client, register the configured relays, and begin
    /// connecting.
    ///
    /// Connection establishment is asynchronous; subscriptions opened
    /// before a relay finishes connecting are delivered once it does.
    pub async fn connect(config: RelayStreamConfig) -> Result<Self> {
        for url in &config.relays {
            validate_relay_url(url)?;
        }

        let pool_opts = RelayPoolOptions::default()
            .notification_channel_size(config.notification_channel_size);
        let client = Client::builder()
            .opts(Options::new().pool(pool_opts))
            .build();

        for url in &config.relays {
            if let Err(e) = client.add_relay(url).await {
                tracing::warn!("Failed to add relay {}: {}", url, e);
            } else {
                tracing::debug!("Added relay: {}", url);
            }
        }
        client.connect().await;
        tracing::info!("Relay stream connecting to {} relays", config.relays.len());

        Ok(Self { config, client })
    }

    /// The underlying nostr-sdk client, for callers that need to add
    /// relays discovered at runtime.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ContentStream for RelayStream {
    fn open(&self, query: &FeedQuery) -> Result<StreamHandle> {
        let filter = build_filter(query)?;
        let exclusive_relay = match &query.relay {
            Some(url) => {
                validate_relay_url(url)?;
                Some(RelayUrl::parse(url).map_err(|e| Error::Config(e.to_string()))?)
            }
            None => None,
        };

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancelFlag::new();
        tokio::spawn(pump(
            self.client.clone(),
            self.config.clone(),
            filter,
            exclusive_relay,
            query.is_bounded(),
            tx,
            cancel.clone(),
        ));
        Ok(StreamHandle::new(rx, cancel))
    }
}

/// Translate a feed query into a Nostr filter.
fn build_filter(query: &FeedQuery) -> Result<Filter> {
    let mut filter = Filter::new();

    if let Some(authors) = &query.authors {
        let mut keys = Vec::with_capacity(authors.len());
        for author in authors {
            let key = PublicKey::from_slice(author.as_bytes()).map_err(|e| {
                Error::Config(format!("author {} is not a valid public key: {}", author, e))
            })?;
            keys.push(key);
        }
        filter = filter.authors(keys);
    }

    filter = filter.kinds(query.kinds.iter().map(|k| Kind::from(*k)));

    if let Some(tag) = &query.hashtag {
        filter = filter.hashtag(tag);
    }
    if let Some(until) = query.until {
        filter = filter.until(Timestamp::from(until));
    }
    if let Some(limit) = query.limit {
        filter = filter.limit(limit);
    }

    Ok(filter)
}

fn validate_relay_url(url: &str) -> Result<()> {
    if url.starts_with("wss://") || url.starts_with("ws://") {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "relay url must start with wss:// or ws://: {url}"
        )))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Flush pending items as one batch. Returns false when the receiving
/// side is gone and the pump should stop.
async fn flush(tx: &mpsc::Sender<StreamMessage>, pending: &mut Vec<ContentItem>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let batch = std::mem::take(pending);
    tx.send(StreamMessage::Batch(batch)).await.is_ok()
}

/// Subscription pump: subscribes, coalesces notifications into batches,
/// and handles EOSE/cancellation/termination.
async fn pump(
    client: Client,
    config: RelayStreamConfig,
    filter: Filter,
    exclusive_relay: Option<RelayUrl>,
    bounded: bool,
    tx: mpsc::Sender<StreamMessage>,
    cancel: CancelFlag,
) {
    // Subscribe before taking the notification receiver so no stored
    // events are missed.
    let mut notifications = client.notifications();

    let output = match &exclusive_relay {
        Some(relay_url) => {
            client
                .subscribe_to(vec![relay_url.clone()], filter, None)
                .await
        }
        None => client.subscribe(filter, None).await,
    };
    let sub_id = match output {
        Ok(output) => output.val,
        Err(e) => {
            tracing::warn!("Relay subscription failed: {}", e);
            let _ = tx.send(StreamMessage::Failed(e.to_string())).await;
            return;
        }
    };

    let bounded_label = if bounded { "true" } else { "false" };
    metrics::counter!("relay_stream_subscriptions_total", "bounded" => bounded_label)
        .increment(1);
    tracing::debug!("Subscribed with ID: {:?}, bounded={}", sub_id, bounded);

    let mut pending: Vec<ContentItem> = Vec::new();
    let mut last_flush = Instant::now();
    let mut saw_eose = false;
    // For bounded queries: when to stop collecting stragglers after EOSE.
    let mut linger_until: Option<Instant> = None;

    // Rate-limited lag warning (avoid log spam during bursts)
    let mut last_lag_warning = Instant::now();
    let mut lag_messages_since_warning = 0u64;
    let lag_warning_interval = Duration::from_secs(10);

    let poll = config.poll_interval.min(config.batch_window);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(deadline) = linger_until
            && Instant::now() >= deadline
        {
            break;
        }

        let notification = tokio::time::timeout(poll, notifications.recv()).await;

        match notification {
            Ok(Ok(RelayPoolNotification::Event {
                subscription_id,
                event,
                ..
            })) if subscription_id == sub_id => {
                metrics::counter!("relay_stream_events_total").increment(1);

                let mut item = ContentItem::from_event(&event);
                if item.created_at < FEED_GENESIS_TIMESTAMP {
                    metrics::counter!("relay_stream_events_bogus_total").increment(1);
                    tracing::debug!("Dropping pre-genesis event {}", item.id);
                    continue;
                }
                let now = unix_now();
                if item.created_at > now + FUTURE_DRIFT_ALLOWANCE_SECS {
                    metrics::counter!("relay_stream_events_clamped_total").increment(1);
                    tracing::debug!(
                        "Clamping future timestamp {} on event {}",
                        item.created_at,
                        item.id
                    );
                    item.created_at = now;
                }

                pending.push(item);
                if pending.len() >= config.batch_capacity {
                    if !flush(&tx, &mut pending).await {
                        break;
                    }
                    last_flush = Instant::now();
                }
            }

            Ok(Ok(RelayPoolNotification::Event { .. })) => {
                // Another subscription's event; not ours to deliver.
            }

            Ok(Ok(RelayPoolNotification::Message { message, .. })) => {
                if let RelayMessage::EndOfStoredEvents(sid) = &message
                    && sid.as_ref() == &sub_id
                    && !saw_eose
                {
                    saw_eose = true;
                    if !flush(&tx, &mut pending).await {
                        break;
                    }
                    last_flush = Instant::now();
                    if tx.send(StreamMessage::EndOfSync).await.is_err() {
                        break;
                    }
                    tracing::debug!("EOSE for {:?}", sub_id);
                    if bounded {
                        // Give slower relays one window to catch up.
                        linger_until = Some(Instant::now() + config.batch_window);
                    }
                }
            }

            Ok(Ok(RelayPoolNotification::Shutdown)) => {
                tracing::info!("Relay pool shut down");
                let _ = tx
                    .send(StreamMessage::Failed("relay pool shut down".to_string()))
                    .await;
                break;
            }

            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                tracing::info!("Notification channel closed");
                let _ = tx
                    .send(StreamMessage::Failed(
                        "notification channel closed".to_string(),
                    ))
                    .await;
                break;
            }

            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(count))) => {
                metrics::counter!("relay_stream_notifications_lagged_total").increment(count);
                lag_messages_since_warning += count;
                if last_lag_warning.elapsed() >= lag_warning_interval {
                    tracing::warn!(
                        "Notification receiver dropped {} messages in last {:?}",
                        lag_messages_since_warning,
                        last_lag_warning.elapsed()
                    );
                    last_lag_warning = Instant::now();
                    lag_messages_since_warning = 0;
                }
            }

            Err(_) => {
                // Timeout tick: fall through to the flush check.
            }
        }

        if !pending.is_empty() && last_flush.elapsed() >= config.batch_window {
            if !flush(&tx, &mut pending).await {
                break;
            }
            last_flush = Instant::now();
        }
    }

    let _ = flush(&tx, &mut pending).await;
    client.unsubscribe(&sub_id).await;
    tracing::debug!("Subscription {:?} closed", sub_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use firth_core::AuthorId;
    use std::collections::HashSet;

    // A structurally valid x-only public key (from a real event).
    const VALID_AUTHOR_HEX: &str =
        "35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf";

    #[test]
    fn test_validate_relay_url() {
        assert!(validate_relay_url("wss://relay.damus.io").is_ok());
        assert!(validate_relay_url("ws://localhost:7777").is_ok());
        assert!(validate_relay_url("https://relay.damus.io").is_err());
        assert!(validate_relay_url("relay.damus.io").is_err());
    }

    #[test]
    fn test_build_filter_broad() {
        let query = FeedQuery::broad(vec![1]);
        let filter = build_filter(&query).unwrap();
        assert_eq!(filter, Filter::new().kinds([Kind::from(1u16)]));
    }

    #[test]
    fn test_build_filter_full() {
        let author = AuthorId::from_hex(VALID_AUTHOR_HEX).unwrap();
        let mut query = FeedQuery::broad(vec![1, 6]);
        query.authors = Some(HashSet::from([author]));
        query.hashtag = Some("foodstr".to_string());
        query.until = Some(1700000000);
        query.limit = Some(50);

        let filter = build_filter(&query).unwrap();
        let expected = Filter::new()
            .authors([PublicKey::from_slice(author.as_bytes()).unwrap()])
            .kinds([Kind::from(1u16), Kind::from(6u16)])
            .hashtag("foodstr")
            .until(Timestamp::from(1700000000u64))
            .limit(50);
        assert_eq!(filter, expected);
    }

    #[test]
    fn test_build_filter_rejects_invalid_author() {
        // All-zero bytes are not a valid x-only public key
        let mut query = FeedQuery::broad(vec![1]);
        query.authors = Some(HashSet::from([AuthorId([0u8; 32])]));
        assert!(build_filter(&query).is_err());
    }

    #[test]
    fn test_default_config_is_sane() {
        let config = RelayStreamConfig::default();
        assert!(!config.relays.is_empty());
        assert!(config.batch_capacity > 0);
        assert!(config.batch_window < config.poll_interval);
    }
}
