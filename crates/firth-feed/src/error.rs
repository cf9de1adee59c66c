//! Error types for the feed engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running a feed session.
#[derive(Error, Debug)]
pub enum Error {
    /// Core type error (id parsing, event validation).
    #[error("core error: {0}")]
    Core(#[from] firth_core::Error),

    /// Nostr SDK error (relay client construction, subscription).
    #[error("nostr SDK error: {0}")]
    NostrSdk(#[from] nostr_sdk::client::Error),

    /// Malformed relay URL or other configuration problem.
    #[error("configuration error: {0}")]
    Config(String),

    /// A stream adapter could not be opened.
    #[error("stream error: {0}")]
    Stream(String),
}
