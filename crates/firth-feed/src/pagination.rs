//! Pagination support: watermark cursors and the single-flight guard.
//!
//! Load-more issues one bounded query at a time against the active
//! session's filters. The cursor excludes the boundary item itself by
//! stepping one second below the oldest visible timestamp; items sharing
//! that exact boundary timestamp with the excluded item may be skipped.
//! That tradeoff is accepted: the dedup set already guards against the
//! worse failure (duplicates), and re-fetching the boundary verbatim on
//! every page wastes a query slot.

use firth_core::ContentItem;

/// Timestamp boundary for requesting strictly older content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark(pub u64);

impl Watermark {
    /// Cursor positioned just below the oldest visible item.
    ///
    /// Returns `None` when the list is empty: there is nothing to paginate
    /// from.
    pub fn before_oldest(items: &[ContentItem]) -> Option<Self> {
        items
            .last()
            .map(|oldest| Self(oldest.created_at.saturating_sub(1)))
    }

    /// The cursor value as a Unix timestamp.
    pub fn as_secs(&self) -> u64 {
        self.0
    }
}

/// Single-flight state for load-more requests.
///
/// One page may be in flight per session at a time; the guard is cleared
/// when the bounded page stream completes or fails, and unconditionally on
/// session restart.
#[derive(Debug, Default)]
pub struct PageState {
    in_flight: bool,
}

impl PageState {
    /// Try to claim the in-flight slot. Returns false if a page is already
    /// loading.
    pub fn try_begin(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Release the in-flight slot.
    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Whether a page is currently loading.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firth_core::{AuthorId, ItemId};
    use std::sync::Arc;

    fn item(id_byte: u8, created_at: u64) -> ContentItem {
        let mut id = [0u8; 32];
        id[0] = id_byte;
        ContentItem {
            id: ItemId(id),
            author: AuthorId([7u8; 32]),
            created_at,
            payload: Arc::from("{}"),
        }
    }

    #[test]
    fn test_watermark_steps_below_oldest() {
        let items = vec![item(1, 3000), item(2, 2000), item(3, 1000)];
        let cursor = Watermark::before_oldest(&items).unwrap();
        assert_eq!(cursor.as_secs(), 999);
    }

    #[test]
    fn test_watermark_empty_list() {
        assert_eq!(Watermark::before_oldest(&[]), None);
    }

    #[test]
    fn test_watermark_saturates_at_zero() {
        let items = vec![item(1, 0)];
        let cursor = Watermark::before_oldest(&items).unwrap();
        assert_eq!(cursor.as_secs(), 0);
    }

    #[test]
    fn test_single_flight() {
        let mut state = PageState::default();
        assert!(!state.in_flight());

        assert!(state.try_begin());
        assert!(state.in_flight());
        // Second claim while in flight is refused
        assert!(!state.try_begin());

        state.finish();
        assert!(!state.in_flight());
        assert!(state.try_begin());
    }
}
