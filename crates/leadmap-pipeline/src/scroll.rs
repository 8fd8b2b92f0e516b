//! Feed cursor with identity re-anchoring.
//!
//! Scrolling can reflow previously rendered listings in some renderers, so
//! raw indices are not stable across a scroll. The tracker remembers the
//! stable identity (profile URL) of the last processed listing and, after
//! every scroll, re-anchors the cursor to wherever that identity now sits —
//! falling back to the previous count-based position when the identity is
//! unavailable or gone. Getting this wrong silently double-processes or
//! skips listings, which is why re-anchoring wins over index arithmetic.

use crate::driver::ElementHandle;

/// Cursor over the feed. Position is `None` before anything is processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollCursor {
    pub last_processed_position: Option<usize>,
    pub known_element_count: usize,
}

#[derive(Debug)]
pub struct ScrollPositionTracker {
    cursor: ScrollCursor,
    /// Stable identity of the last processed listing, when it had one.
    last_identity: Option<String>,
}

impl Default for ScrollPositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollPositionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cursor: ScrollCursor {
                last_processed_position: None,
                known_element_count: 0,
            },
            last_identity: None,
        }
    }

    /// The next listing past the cursor, or `None` when every rendered
    /// listing has been processed and the feed needs a scroll.
    pub fn next_unseen(&mut self, listings: &[ElementHandle]) -> Option<(usize, ElementHandle)> {
        self.cursor.known_element_count = listings.len();
        let next = self
            .cursor
            .last_processed_position
            .map_or(0, |p| p.saturating_add(1));
        listings.get(next).map(|handle| (next, *handle))
    }

    /// Advance the cursor past a processed (or terminally skipped) listing.
    pub fn mark_processed(&mut self, position: usize, identity: Option<String>) {
        self.cursor.last_processed_position = Some(position);
        self.last_identity = identity;
    }

    /// Re-anchor after a scroll, given the identities of the freshly
    /// rendered listings in feed order.
    pub fn re_anchor(&mut self, identities: &[Option<String>]) {
        self.cursor.known_element_count = identities.len();
        let Some(identity) = &self.last_identity else {
            return;
        };
        if let Some(position) = identities
            .iter()
            .position(|candidate| candidate.as_deref() == Some(identity.as_str()))
        {
            if self.cursor.last_processed_position != Some(position) {
                tracing::debug!(
                    from = ?self.cursor.last_processed_position,
                    to = position,
                    "feed reflowed — cursor re-anchored by identity"
                );
            }
            self.cursor.last_processed_position = Some(position);
        }
        // Identity not found: keep the count-based position.
    }

    #[must_use]
    pub fn cursor(&self) -> ScrollCursor {
        self.cursor
    }
}
