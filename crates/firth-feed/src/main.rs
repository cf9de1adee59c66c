//! Firth feed daemon.
//!
//! Runs the aggregation engine against live Nostr relays and prints the
//! feed as it updates. Mostly useful for exercising the engine end to end
//! and for watching what a given mode actually admits.
//!
//! # Usage
//!
//! ```bash
//! # Network-wide text notes from the default relays
//! firth-feed
//!
//! # A hashtag feed
//! firth-feed --mode hashtag --hashtag foodstr
//!
//! # A following feed for a viewer, follow list from a file
//! firth-feed --mode following \
//!     --viewer 35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf \
//!     --follows-file ./follows.txt
//!
//! # Backfill two pages of history after the initial sync
//! firth-feed --pages 2
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) stops the session, prints a summary, and exits.

use anyhow::{Context, Result, bail};
use clap::Parser;
use firth_core::AuthorId;
use firth_core::metrics::{init_metrics, start_metrics_server};
use firth_feed::{
    DiversifyConfig, FeedAggregator, FeedConfig, FeedMode, FeedSnapshot, QueryInputs, RelayStream,
    RelayStreamConfig, SharedSocialGraph,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Firth feed daemon.
#[derive(Parser, Debug)]
#[command(name = "firth-feed")]
#[command(about = "Streaming feed aggregation daemon")]
#[command(version)]
struct Args {
    /// Feed mode: following, single-relay, curated-pack, network-wide,
    /// hashtag
    #[arg(long, default_value = "network-wide")]
    mode: String,

    /// Relay URLs (comma-separated, overrides defaults)
    #[arg(long, value_delimiter = ',')]
    relays: Option<Vec<String>>,

    /// Exclusive relay URL for single-relay mode
    #[arg(long)]
    relay: Option<String>,

    /// Hashtag for hashtag mode
    #[arg(long)]
    hashtag: Option<String>,

    /// Author hex ids for curated-pack mode (comma-separated)
    #[arg(long, value_delimiter = ',')]
    authors: Option<Vec<String>>,

    /// Viewer's hex id (included in following-mode author sets)
    #[arg(long)]
    viewer: Option<String>,

    /// File with one followed author hex id per line
    #[arg(long)]
    follows_file: Option<PathBuf>,

    /// File with one muted author hex id per line
    #[arg(long)]
    mutes_file: Option<PathBuf>,

    /// Content kinds to request (comma-separated)
    #[arg(long, value_delimiter = ',', default_value = "1")]
    kinds: Vec<u16>,

    /// Pages of older content to load after the initial sync
    #[arg(long, default_value = "0")]
    pages: usize,

    /// Items per pagination page
    #[arg(long, default_value = "50")]
    page_limit: usize,

    /// Loading timeout in seconds
    #[arg(long, default_value = "10")]
    loading_timeout: u64,

    /// Same-author burst avoidance lookahead (0 to disable)
    #[arg(long, default_value = "0")]
    diversify: usize,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs
    // are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("firth_feed=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Firth feed daemon starting...");

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle)
            .await
            .context("Failed to start metrics server")?;
    }

    // Set up graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Build the social graph from files
    let graph = Arc::new(SharedSocialGraph::new());
    if let Some(path) = &args.follows_file {
        let follows = load_author_file(path)
            .with_context(|| format!("Failed to load follows from {}", path.display()))?;
        tracing::info!("Loaded {} followed authors", follows.len());
        graph.set_follows(follows);
    }
    if let Some(path) = &args.mutes_file {
        let muted = load_author_file(path)
            .with_context(|| format!("Failed to load mutes from {}", path.display()))?;
        tracing::info!("Loaded {} muted authors", muted.len());
        graph.set_muted(muted);
    }

    let mode = build_mode(&args)?;
    let viewer = args
        .viewer
        .as_deref()
        .map(AuthorId::from_hex)
        .transpose()
        .context("Invalid viewer id")?;
    let inputs = QueryInputs {
        kinds: args.kinds.clone(),
        viewer,
    };

    let stream_config = RelayStreamConfig {
        relays: args.relays.clone().unwrap_or_else(|| {
            RelayStreamConfig::default().relays
        }),
        ..Default::default()
    };

    tracing::info!("Configuration:");
    tracing::info!("  Mode: {}", mode.name());
    tracing::info!("  Relays: {}", stream_config.relays.len());
    tracing::info!("  Kinds: {:?}", args.kinds);
    tracing::info!("  Pages: {}", args.pages);

    let stream = Arc::new(
        RelayStream::connect(stream_config)
            .await
            .context("Failed to set up relay stream")?,
    );

    let feed_config = FeedConfig {
        loading_timeout: Duration::from_secs(args.loading_timeout),
        page_limit: args.page_limit,
        diversify: (args.diversify > 0).then(|| DiversifyConfig {
            lookahead: args.diversify,
        }),
        ..Default::default()
    };

    let aggregator = FeedAggregator::new(stream, graph, feed_config);
    let mut snapshots = aggregator.subscribe();

    aggregator
        .start(mode, inputs, false)
        .context("Failed to start feed session")?;

    let mut pages_remaining = args.pages;
    let mut last_len = 0usize;

    while running.load(Ordering::SeqCst) {
        let changed = tokio::time::timeout(Duration::from_millis(500), snapshots.changed()).await;
        match changed {
            Ok(Ok(())) => {
                let snap = snapshots.borrow_and_update().clone();
                print_snapshot(&snap, last_len);
                last_len = snap.items.len();
            }
            Ok(Err(_)) => break, // aggregator dropped
            Err(_) => {}         // tick: re-check the running flag
        }

        // Once the initial sync resolves, request the configured history
        // pages one at a time. Checked on ticks too: a page that admits
        // nothing publishes no snapshot.
        let snap = aggregator.snapshot();
        if !snap.is_loading
            && pages_remaining > 0
            && !aggregator.pagination_in_flight()
            && aggregator.load_more()?
        {
            pages_remaining -= 1;
            tracing::info!("Requested history page ({} remaining)", pages_remaining);
        }
    }

    aggregator.stop();

    let snap = aggregator.snapshot();
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Visible items: {}", snap.items.len());
    if let Some(newest) = snap.items.first() {
        tracing::info!("Newest: {}", format_timestamp(newest.created_at));
    }
    if let Some(oldest) = snap.items.last() {
        tracing::info!("Oldest: {}", format_timestamp(oldest.created_at));
    }

    Ok(())
}

/// Map CLI arguments to a feed mode.
fn build_mode(args: &Args) -> Result<FeedMode> {
    match args.mode.as_str() {
        "following" => Ok(FeedMode::Following),
        "network-wide" => Ok(FeedMode::NetworkWide),
        "single-relay" => {
            let Some(url) = args.relay.clone() else {
                bail!("--relay is required for single-relay mode");
            };
            Ok(FeedMode::SingleRelay(url))
        }
        "curated-pack" => {
            let Some(hex_ids) = &args.authors else {
                bail!("--authors is required for curated-pack mode");
            };
            let mut authors = HashSet::new();
            for hex in hex_ids {
                authors.insert(AuthorId::from_hex(hex).context("Invalid author id")?);
            }
            Ok(FeedMode::CuratedPack(authors))
        }
        "hashtag" => {
            let Some(tag) = args.hashtag.clone() else {
                bail!("--hashtag is required for hashtag mode");
            };
            Ok(FeedMode::Hashtag(tag))
        }
        other => bail!("Unknown mode: {other}"),
    }
}

/// Read one author hex id per line, skipping blanks and `#` comments.
fn load_author_file(path: &Path) -> Result<HashSet<AuthorId>> {
    let contents = std::fs::read_to_string(path)?;
    let mut authors = HashSet::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        authors.insert(AuthorId::from_hex(line)?);
    }
    Ok(authors)
}

/// Print a one-line summary plus any newly visible head items.
fn print_snapshot(snap: &FeedSnapshot, last_len: usize) {
    tracing::info!(
        "Feed: {} items{}",
        snap.items.len(),
        if snap.is_loading { " (loading)" } else { "" }
    );
    let new_items = snap.items.len().saturating_sub(last_len);
    for item in snap.items.iter().take(new_items.min(5)) {
        tracing::info!(
            "  [{}] {}… {}",
            format_timestamp(item.created_at),
            &item.author.to_string()[..8],
            content_preview(&item.payload)
        );
    }
}

fn format_timestamp(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "invalid".to_string())
}

/// First line of the event's content field, truncated.
fn content_preview(payload: &str) -> String {
    let content = serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("content").and_then(|c| c.as_str()).map(String::from))
        .unwrap_or_default();
    let line = content.lines().next().unwrap_or("");
    let mut preview: String = line.chars().take(80).collect();
    if line.chars().count() > 80 {
        preview.push('…');
    }
    preview
}
