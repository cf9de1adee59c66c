//! Core types and shared utilities for the Firth feed engine.
//!
//! This crate provides:
//! - Content item and identifier types shared by every feed component
//! - Conversion from validated Nostr events via the nostr crate
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod item;
pub mod metrics;

// ═══════════════════════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════════════════════

/// Nostr genesis date: November 7, 2020.
/// This is the date of the first Nostr commit. Items claiming a `created_at`
/// before this date are considered invalid/bogus.
pub const FEED_GENESIS_TIMESTAMP: u64 = 1604707200; // 2020-11-07 00:00:00 UTC

/// Maximum tolerated clock drift into the future, in seconds.
/// Items claiming a `created_at` further ahead than this are clamped to
/// receipt time so they cannot pin themselves to the top of a feed.
pub const FUTURE_DRIFT_ALLOWANCE_SECS: u64 = 900; // 15 minutes

pub use error::{Error, Result};
pub use item::{AuthorId, ContentItem, ItemId};
