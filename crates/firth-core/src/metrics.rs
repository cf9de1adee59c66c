//! Prometheus metrics helpers for the Firth feed engine.
//!
//! This module provides centralized metrics initialization and the metric
//! definitions used across feed components.
//!
//! # Usage
//!
//! ```rust,ignore
//! use firth_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize the Prometheus recorder
//!     let handle = init_metrics();
//!
//!     // Start the HTTP server for /metrics endpoint
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     // Now use metrics anywhere in your code
//!     use metrics::counter;
//!     counter!("feed_batches_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`feed_`, `relay_stream_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: use sparingly to avoid cardinality explosion

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_feed_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port.
/// This spawns a background task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics used across the feed engine.
///
/// Called automatically by [`init_metrics`].
fn register_feed_metrics() {
    // =========================================================================
    // Aggregation Pipeline Metrics
    // =========================================================================

    describe_counter!(
        "feed_sessions_started_total",
        "Feed sessions started (one per generation)"
    );
    describe_counter!("feed_batches_total", "Batches ingested across all sessions");
    describe_counter!(
        "feed_items_admitted_total",
        "Items admitted to the visible list"
    );
    describe_counter!(
        "feed_items_deduped_total",
        "Items skipped because their id was already seen"
    );
    describe_counter!(
        "feed_items_muted_total",
        "Items skipped because their author is muted"
    );
    describe_counter!(
        "feed_items_untrusted_total",
        "Items skipped by web-of-trust filtering"
    );
    describe_counter!(
        "feed_stale_batches_total",
        "Batches discarded because their generation was superseded"
    );
    describe_counter!(
        "feed_loading_timeouts_total",
        "Loading timeouts that fired without a first batch"
    );
    describe_counter!(
        "feed_stream_failures_total",
        "Stream sessions that ended with a failure signal"
    );
    describe_counter!(
        "feed_pagination_requests_total",
        "Accepted load-more requests (single-flight suppressions excluded)"
    );
    describe_gauge!("feed_visible_items", "Items currently in the visible list");

    // =========================================================================
    // Relay Stream Adapter Metrics
    // =========================================================================

    describe_counter!(
        "relay_stream_events_total",
        "Raw events received from relay subscriptions"
    );
    describe_counter!(
        "relay_stream_events_bogus_total",
        "Events dropped for pre-genesis timestamps"
    );
    describe_counter!(
        "relay_stream_events_clamped_total",
        "Events with far-future timestamps clamped to receipt time"
    );
    describe_counter!(
        "relay_stream_notifications_lagged_total",
        "Relay notifications dropped due to receiver lag"
    );
    describe_counter!(
        "relay_stream_subscriptions_total",
        "Relay subscriptions opened (label: bounded)"
    );
}
