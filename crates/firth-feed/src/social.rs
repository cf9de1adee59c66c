//! Social graph interface: mutes, follows, and web-of-trust membership.
//!
//! The feed engine filters against a viewer's social graph but does not own
//! it. Each underlying data set (mute list, follow list, web-of-trust) may
//! be not-yet-loaded when a session starts and becomes available
//! asynchronously; the `*_ready` methods let the engine distinguish "not
//! loaded" from "loaded and empty".
//!
//! All methods are synchronous and non-mutating from the engine's
//! perspective. Implementations are expected to answer from in-memory
//! state.

use firth_core::AuthorId;
use parking_lot::RwLock;
use std::collections::HashSet;

/// Read-only view of the viewer's social graph.
pub trait SocialGraph: Send + Sync {
    /// Whether the viewer has muted this author.
    fn is_muted(&self, author: &AuthorId) -> bool;

    /// Whether this author is transitively trusted by the viewer's network.
    /// Only meaningful when [`wot_ready`](Self::wot_ready) returns true.
    fn is_in_web_of_trust(&self, author: &AuthorId) -> bool;

    /// Whether web-of-trust membership data has loaded.
    fn wot_ready(&self) -> bool;

    /// Whether the viewer's follow list has loaded.
    fn follows_ready(&self) -> bool;

    /// The viewer's follow list, or `None` while it is still loading.
    fn follows(&self) -> Option<HashSet<AuthorId>>;
}

/// Lock-backed [`SocialGraph`] fed by external subsystems.
///
/// The account/session subsystem pushes follow-list and web-of-trust
/// updates in; the mute-list store pushes mute updates in. Reads happen on
/// the aggregator's ingest path, so the read side stays lock-cheap.
#[derive(Default)]
pub struct SharedSocialGraph {
    muted: RwLock<HashSet<AuthorId>>,
    follows: RwLock<Option<HashSet<AuthorId>>>,
    wot: RwLock<Option<HashSet<AuthorId>>>,
}

impl SharedSocialGraph {
    /// Create an empty graph with no data sets loaded.
    ///
    /// The mute list starts loaded-and-empty (muting nobody is a valid
    /// state); follows and web-of-trust start not-yet-loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mute list.
    pub fn set_muted(&self, muted: HashSet<AuthorId>) {
        *self.muted.write() = muted;
    }

    /// Add a single author to the mute list.
    pub fn mute(&self, author: AuthorId) {
        self.muted.write().insert(author);
    }

    /// Mark the follow list as loaded with the given set.
    pub fn set_follows(&self, follows: HashSet<AuthorId>) {
        *self.follows.write() = Some(follows);
    }

    /// Mark web-of-trust membership as loaded with the given set.
    pub fn set_web_of_trust(&self, members: HashSet<AuthorId>) {
        *self.wot.write() = Some(members);
    }
}

impl SocialGraph for SharedSocialGraph {
    fn is_muted(&self, author: &AuthorId) -> bool {
        self.muted.read().contains(author)
    }

    fn is_in_web_of_trust(&self, author: &AuthorId) -> bool {
        match self.wot.read().as_ref() {
            Some(members) => members.contains(author),
            None => false,
        }
    }

    fn wot_ready(&self) -> bool {
        self.wot.read().is_some()
    }

    fn follows_ready(&self) -> bool {
        self.follows.read().is_some()
    }

    fn follows(&self) -> Option<HashSet<AuthorId>> {
        self.follows.read().clone()
    }
}
