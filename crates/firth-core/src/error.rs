//! Error types shared across the Firth feed engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or validating feed content.
#[derive(Error, Debug)]
pub enum Error {
    /// An identifier was not 64 lowercase hex characters.
    #[error("invalid {kind} id: {reason}")]
    InvalidId {
        /// Which identifier kind was being parsed ("item" or "author").
        kind: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// Item claims a creation time before the Nostr genesis date.
    #[error("bogus timestamp {claimed}: predates genesis {genesis}")]
    BogusTimestamp {
        /// The `created_at` claimed by the item.
        claimed: u64,
        /// The genesis cutoff it violates.
        genesis: u64,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nostr library error (event parsing / validation).
    #[error("nostr error: {0}")]
    Nostr(#[from] nostr::event::Error),
}
