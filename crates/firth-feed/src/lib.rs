//! Firth streaming feed aggregation engine.
//!
//! This crate turns live, unbounded, batch-delivering content
//! subscriptions into a stable, deduplicated, filtered, ordered list
//! suitable for incremental display and load-more pagination.
//!
//! # Modules
//!
//! - [`aggregator`] - the session engine (dedup, filtering, ordering,
//!   lifecycle, pagination orchestration)
//! - [`mode`] - feed modes and query planning
//! - [`social`] - the viewer's social graph interface (mutes, follows,
//!   web of trust)
//! - [`stream`] - the content stream seam
//! - [`source`] - concrete stream adapters (Nostr relays)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ContentStream  │  (relay adapter, or anything batch-delivering)
//! └────────┬────────┘
//!          │ batches
//!          ▼
//! ┌─────────────────┐
//! │ FeedAggregator  │  dedup → mute → web-of-trust → sorted insert
//! └────────┬────────┘
//!          │ snapshots (watch channel)
//!          ▼
//! ┌─────────────────┐
//! │     Caller      │  renders visible items + loading state
//! └─────────────────┘
//! ```
//!
//! The aggregator owns one session at a time. Restarts mint a fresh
//! generation; continuations from superseded sessions are discarded at the
//! state lock, never surfaced.

pub mod aggregator;
pub mod diversify;
pub mod error;
pub mod mode;
pub mod pagination;
pub mod query;
pub mod social;
pub mod source;
pub mod stream;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use aggregator::{FeedAggregator, FeedConfig, FeedSnapshot};
pub use diversify::{DiversifyConfig, diversify};
pub use mode::{FeedMode, QueryPlan};
pub use pagination::Watermark;
pub use query::{FeedQuery, QueryInputs};
pub use social::{SharedSocialGraph, SocialGraph};
pub use source::{RelayStream, RelayStreamConfig};
pub use stream::{CancelFlag, ContentStream, StreamHandle, StreamMessage};
