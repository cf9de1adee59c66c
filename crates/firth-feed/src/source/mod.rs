//! Stream adapters.
//!
//! Adapters implement [`ContentStream`](crate::stream::ContentStream) over
//! a concrete delivery protocol. The engine only ever sees the trait; the
//! adapter owns connections, subscriptions, and the translation from wire
//! notifications into content batches.
//!
//! # Available Adapters
//!
//! - [`RelayStream`] - subscribes to Nostr relays via nostr-sdk

mod relay;

pub use relay::{RelayStream, RelayStreamConfig};
