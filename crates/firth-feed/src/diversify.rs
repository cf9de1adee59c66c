//! Same-author burst avoidance.
//!
//! An optional reordering applied to the published view of a feed: when an
//! author posts a burst, strict timestamp order shows their items
//! back-to-back. This pass greedily picks, within a bounded lookahead
//! window, the next item whose author differs from the previously placed
//! one, falling back to the natural next item when the whole window is the
//! same author.
//!
//! The stored list keeps strict timestamp order; only the view handed to
//! subscribers is reordered. Disabled by default.

use firth_core::ContentItem;

/// Configuration for burst avoidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiversifyConfig {
    /// How many upcoming items may be considered when searching for a
    /// different author. A window of 1 disables reordering.
    pub lookahead: usize,
}

impl Default for DiversifyConfig {
    fn default() -> Self {
        Self { lookahead: 3 }
    }
}

/// Reorder `items` to avoid consecutive same-author entries where a
/// different author exists within the lookahead window.
///
/// The result is a permutation of the input: nothing is added, dropped, or
/// duplicated, and relative order among the non-promoted items is kept.
pub fn diversify(items: &[ContentItem], config: DiversifyConfig) -> Vec<ContentItem> {
    let window = config.lookahead.max(1);
    if window == 1 || items.len() < 3 {
        return items.to_vec();
    }

    let mut remaining: Vec<ContentItem> = items.to_vec();
    let mut out: Vec<ContentItem> = Vec::with_capacity(items.len());

    while !remaining.is_empty() {
        let pick = match out.last() {
            Some(prev) => {
                let prev_author = prev.author;
                remaining
                    .iter()
                    .take(window)
                    .position(|it| it.author != prev_author)
                    .unwrap_or(0)
            }
            None => 0,
        };
        out.push(remaining.remove(pick));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use firth_core::{AuthorId, ItemId};
    use std::sync::Arc;

    fn item(id_byte: u8, author_byte: u8, created_at: u64) -> ContentItem {
        let mut id = [0u8; 32];
        id[0] = id_byte;
        let mut author = [0u8; 32];
        author[0] = author_byte;
        ContentItem {
            id: ItemId(id),
            author: AuthorId(author),
            created_at,
            payload: Arc::from("{}"),
        }
    }

    fn authors(items: &[ContentItem]) -> Vec<u8> {
        items.iter().map(|it| it.author.0[0]).collect()
    }

    #[test]
    fn test_breaks_burst_when_alternative_in_window() {
        // a, a, b, a -> a, b, a, a
        let items = vec![
            item(1, 1, 4000),
            item(2, 1, 3000),
            item(3, 2, 2000),
            item(4, 1, 1000),
        ];
        let out = diversify(&items, DiversifyConfig { lookahead: 3 });
        assert_eq!(authors(&out), vec![1, 2, 1, 1]);
    }

    #[test]
    fn test_single_author_unchanged() {
        let items = vec![item(1, 1, 3000), item(2, 1, 2000), item(3, 1, 1000)];
        let out = diversify(&items, DiversifyConfig::default());
        assert_eq!(authors(&out), vec![1, 1, 1]);
        assert_eq!(out[0].id, items[0].id);
    }

    #[test]
    fn test_permutation_no_loss() {
        let items = vec![
            item(1, 1, 5000),
            item(2, 1, 4000),
            item(3, 1, 3000),
            item(4, 2, 2000),
            item(5, 3, 1000),
        ];
        let out = diversify(&items, DiversifyConfig { lookahead: 4 });
        assert_eq!(out.len(), items.len());

        let mut in_ids: Vec<_> = items.iter().map(|it| it.id).collect();
        let mut out_ids: Vec<_> = out.iter().map(|it| it.id).collect();
        in_ids.sort();
        out_ids.sort();
        assert_eq!(in_ids, out_ids);
    }

    #[test]
    fn test_lookahead_one_is_identity() {
        let items = vec![
            item(1, 1, 3000),
            item(2, 1, 2000),
            item(3, 2, 1000),
        ];
        let out = diversify(&items, DiversifyConfig { lookahead: 1 });
        assert_eq!(authors(&out), authors(&items));
    }

    #[test]
    fn test_burst_beyond_window_not_reordered() {
        // Different author sits outside the 2-item window; natural order kept
        let items = vec![
            item(1, 1, 5000),
            item(2, 1, 4000),
            item(3, 1, 3000),
            item(4, 2, 2000),
        ];
        let out = diversify(&items, DiversifyConfig { lookahead: 2 });
        assert_eq!(authors(&out)[0], 1);
        assert_eq!(authors(&out)[1], 1);
    }
}
