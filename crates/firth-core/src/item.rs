//! Content item and identifier types.
//!
//! A [`ContentItem`] is one unit of streamable content (post, video, ...)
//! reduced to the fields the feed engine actually interprets: a globally
//! unique id, the producing author, and the author-claimed creation time.
//! The payload is carried as an opaque JSON string and never inspected.
//!
//! Identifiers are raw 32-byte values rather than hex strings. Working with
//! raw bytes keeps seen-set lookups and ordering comparisons cheap; hex is
//! only produced at the display boundary.

use crate::error::{Error, Result};
use nostr::JsonUtil;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Unique identifier of a content item. Stable across redelivery.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub [u8; 32]);

/// Identifier of a content author.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuthorId(pub [u8; 32]);

/// Decode exactly 64 lowercase/uppercase hex characters into 32 bytes.
///
/// Identifiers are opaque here: unlike `nostr::PublicKey` parsing this does
/// not require the bytes to be a valid curve point, so ids from any content
/// family round-trip.
fn decode_hex32(s: &str, kind: &'static str) -> Result<[u8; 32]> {
    if s.len() != 64 {
        return Err(Error::InvalidId {
            kind,
            reason: format!("expected 64 hex chars, got {}", s.len()),
        });
    }
    let mut out = [0u8; 32];
    for (i, byte) in out.iter_mut().enumerate() {
        let pair = &s[i * 2..i * 2 + 2];
        *byte = u8::from_str_radix(pair, 16).map_err(|_| Error::InvalidId {
            kind,
            reason: format!("invalid hex at offset {}", i * 2),
        })?;
    }
    Ok(out)
}

fn fmt_hex(bytes: &[u8; 32], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for b in bytes {
        write!(f, "{b:02x}")?;
    }
    Ok(())
}

impl ItemId {
    /// Parse an id from its 64-character hex form.
    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(decode_hex32(s, "item")?))
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl AuthorId {
    /// Parse an author id from its 64-character hex form.
    pub fn from_hex(s: &str) -> Result<Self> {
        Ok(Self(decode_hex32(s, "author")?))
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({self})")
    }
}

impl fmt::Debug for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorId({self})")
    }
}

impl From<nostr::EventId> for ItemId {
    fn from(id: nostr::EventId) -> Self {
        Self(id.to_bytes())
    }
}

impl From<nostr::PublicKey> for AuthorId {
    fn from(pk: nostr::PublicKey) -> Self {
        Self(pk.to_bytes())
    }
}

/// One unit of streamed content.
///
/// Cheap to clone: the payload is reference-counted, everything else is a
/// few machine words.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentItem {
    /// Globally unique identifier, stable across redelivery.
    pub id: ItemId,
    /// Identifier of the producing author.
    pub author: AuthorId,
    /// Author-claimed creation time in Unix seconds. May arrive out of
    /// timestamp order; not receipt time.
    pub created_at: u64,
    /// Raw event JSON. Opaque to the feed engine.
    pub payload: Arc<str>,
}

impl ContentItem {
    /// Build a content item from an already-validated Nostr event.
    pub fn from_event(event: &nostr::Event) -> Self {
        Self {
            id: event.id.into(),
            author: event.pubkey.into(),
            created_at: event.created_at.as_u64(),
            payload: Arc::from(event.as_json().as_str()),
        }
    }

    /// Parse and validate event JSON into a content item.
    ///
    /// The nostr crate's `Event::from_json` verifies the event id and
    /// signature. On top of that, items claiming creation before the Nostr
    /// genesis date are rejected as bogus.
    pub fn from_json(json: &str) -> Result<Self> {
        let event = nostr::Event::from_json(json)?;
        let created_at = event.created_at.as_u64();
        if created_at < crate::FEED_GENESIS_TIMESTAMP {
            return Err(Error::BogusTimestamp {
                claimed: created_at,
                genesis: crate::FEED_GENESIS_TIMESTAMP,
            });
        }
        Ok(Self::from_event(&event))
    }

    /// Feed position ordering: newest first, ties broken by id so the order
    /// is stable regardless of delivery order.
    pub fn feed_cmp(&self, other: &Self) -> Ordering {
        other
            .created_at
            .cmp(&self.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Debug for ContentItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentItem")
            .field("id", &self.id)
            .field("author", &self.author)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}
