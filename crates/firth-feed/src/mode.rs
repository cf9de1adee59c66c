//! Feed modes and query planning.
//!
//! Each screen selects a [`FeedMode`]; planning maps the mode plus the
//! caller's [`QueryInputs`] to a concrete [`FeedQuery`], or reports that
//! the session cannot start yet ([`QueryPlan::Deferred`]) or would be
//! trivially empty ([`QueryPlan::Empty`]).
//!
//! Planning does not watch for prerequisite readiness. When a following
//! feed is deferred because the follow list has not loaded, the caller
//! re-invokes `start` once it has; the engine stays in its loading state
//! until then.

use crate::query::{FeedQuery, QueryInputs};
use crate::social::SocialGraph;
use firth_core::AuthorId;
use std::collections::HashSet;

/// The content scope of a feed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMode {
    /// Content from the viewer's follow list (plus the viewer).
    Following,
    /// Everything from one exclusive relay.
    SingleRelay(String),
    /// Content from an explicit author set (a curated pack).
    CuratedPack(HashSet<AuthorId>),
    /// Broad network-wide content, filtered by web-of-trust when that data
    /// is available.
    NetworkWide,
    /// Content carrying one hashtag.
    Hashtag(String),
}

impl FeedMode {
    /// Short name for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            FeedMode::Following => "following",
            FeedMode::SingleRelay(_) => "single-relay",
            FeedMode::CuratedPack(_) => "curated-pack",
            FeedMode::NetworkWide => "network-wide",
            FeedMode::Hashtag(_) => "hashtag",
        }
    }

    /// Plan the concrete query for this mode.
    pub fn plan(&self, inputs: &QueryInputs, graph: &dyn SocialGraph) -> QueryPlan {
        match self {
            FeedMode::Following => {
                let Some(follows) = graph.follows() else {
                    return QueryPlan::Deferred;
                };
                let mut authors = follows;
                if let Some(viewer) = inputs.viewer {
                    authors.insert(viewer);
                }
                if authors.is_empty() {
                    return QueryPlan::Empty;
                }
                let mut query = FeedQuery::broad(inputs.kinds.clone());
                query.authors = Some(authors);
                QueryPlan::Ready(query)
            }
            FeedMode::SingleRelay(url) => {
                let mut query = FeedQuery::broad(inputs.kinds.clone());
                query.relay = Some(url.clone());
                QueryPlan::Ready(query)
            }
            FeedMode::CuratedPack(authors) => {
                if authors.is_empty() {
                    return QueryPlan::Empty;
                }
                let mut query = FeedQuery::broad(inputs.kinds.clone());
                query.authors = Some(authors.clone());
                QueryPlan::Ready(query)
            }
            FeedMode::NetworkWide => QueryPlan::Ready(FeedQuery::broad(inputs.kinds.clone())),
            FeedMode::Hashtag(tag) => {
                let mut query = FeedQuery::broad(inputs.kinds.clone());
                query.hashtag = Some(normalize_hashtag(tag));
                QueryPlan::Ready(query)
            }
        }
    }

    /// Whether a switch from `self` to `next` keeps the visible list.
    ///
    /// Only the following → network-wide transition preserves: both draw
    /// from the same content family, and broadening scope should not flash
    /// the list to empty. Every other transition resets.
    pub fn preserves_into(&self, next: &FeedMode) -> bool {
        matches!(
            (self, next),
            (FeedMode::Following, FeedMode::NetworkWide)
        )
    }
}

/// Result of planning a mode against the current social-graph state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// The session can open this query now.
    Ready(FeedQuery),
    /// A prerequisite (the follow list) has not loaded. Not an error: the
    /// caller re-invokes `start` when it is ready.
    Deferred,
    /// The resolved author set is empty; there is nothing to subscribe to.
    Empty,
}

/// Lowercase a hashtag and strip a leading `#`.
fn normalize_hashtag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}
