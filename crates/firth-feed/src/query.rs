//! Feed query types.
//!
//! A [`FeedQuery`] is the protocol-agnostic description of one content
//! subscription: which authors, which kinds, optional tag filter, optional
//! exclusive relay, and optional time bound. Stream adapters translate it
//! into their wire filters; the engine itself never interprets it beyond
//! cloning and re-bounding it for pagination.

use firth_core::AuthorId;
use std::collections::HashSet;

/// Screen-specific inputs the caller supplies alongside a feed mode.
#[derive(Debug, Clone)]
pub struct QueryInputs {
    /// Content kinds this screen shows (e.g. `[1]` for text notes).
    pub kinds: Vec<u16>,
    /// The viewer's own author id, if signed in. Included in the author set
    /// for following-mode feeds so the viewer sees their own content.
    pub viewer: Option<AuthorId>,
}

impl Default for QueryInputs {
    fn default() -> Self {
        Self {
            kinds: vec![1],
            viewer: None,
        }
    }
}

/// One concrete content subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    /// Restrict to these authors. `None` means no author restriction.
    pub authors: Option<HashSet<AuthorId>>,
    /// Content kinds to request.
    pub kinds: Vec<u16>,
    /// Normalized hashtag filter (lowercase, no leading `#`).
    pub hashtag: Option<String>,
    /// Exclusive single-relay selection. `None` means the adapter's full
    /// relay set.
    pub relay: Option<String>,
    /// Only content created at or before this Unix timestamp. Set for
    /// pagination queries; `None` for live sessions.
    pub until: Option<u64>,
    /// Maximum number of stored items to replay.
    pub limit: Option<usize>,
}

impl FeedQuery {
    /// A broad query for the given kinds: no author, tag, or relay
    /// restriction.
    pub fn broad(kinds: Vec<u16>) -> Self {
        Self {
            authors: None,
            kinds,
            hashtag: None,
            relay: None,
            until: None,
            limit: None,
        }
    }

    /// Re-bound this query for a pagination page: same filters, content at
    /// or before `until`, at most `limit` items.
    pub fn page(&self, until: u64, limit: usize) -> Self {
        let mut page = self.clone();
        page.until = Some(until);
        page.limit = Some(limit);
        page
    }

    /// Whether this is a bounded (pagination/backfill) query that the
    /// stream adapter should terminate after replaying stored content.
    pub fn is_bounded(&self) -> bool {
        self.until.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_keeps_filters() {
        let mut base = FeedQuery::broad(vec![1, 6]);
        base.hashtag = Some("introductions".to_string());

        let page = base.page(1700000000, 50);
        assert_eq!(page.kinds, vec![1, 6]);
        assert_eq!(page.hashtag.as_deref(), Some("introductions"));
        assert_eq!(page.until, Some(1700000000));
        assert_eq!(page.limit, Some(50));
        assert!(page.is_bounded());
        assert!(!base.is_bounded());
    }
}
