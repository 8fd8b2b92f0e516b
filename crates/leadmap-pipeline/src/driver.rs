//! The abstract automation-driver seam.
//!
//! The pipeline never talks to a concrete browser or renderer. Everything it
//! needs from the underlying automation session is expressed as the
//! capability-shaped operations below, and every selector is semantic
//! (roles, accessible labels, link shapes) — never a generated class name,
//! which churns across renderer releases.

use async_trait::async_trait;

use crate::error::PipelineError;

/// Accessible-label attribute key understood by [`AutomationDriver::read_attribute`].
pub const ATTR_LABEL: &str = "label";
/// Hyperlink target attribute key understood by [`AutomationDriver::read_attribute`].
pub const ATTR_HREF: &str = "href";

/// Opaque handle to one rendered element inside the driver's session.
///
/// Handles are only meaningful to the driver that issued them and only for
/// as long as the view they came from is still current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle {
    pub id: u64,
}

impl ElementHandle {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self { id }
    }
}

/// Semantic selector for [`AutomationDriver::find_within`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorSpec {
    /// Inline action affordance (button-like) with the given accessible
    /// label, e.g. `Website` or `Directions`.
    ActionLabel(String),
    /// Anchor pointing at a place/detail deep link.
    DeepLink,
    /// Element exposing an accessibility heading role.
    HeadingRole,
    /// Semantic heading tag (h1–h3 equivalent).
    HeadingTag,
    /// Image-role element whose accessible label mentions stars
    /// (the rating badge).
    StarImage,
    /// Anchor whose accessible label contains "Website" — the fallback for
    /// listings that render the website link without an action affordance.
    WebsiteLabelAnchor,
}

/// Capability contract over one automation session driving one results feed.
///
/// Each call may block on I/O and may fail transiently; callers are expected
/// to run these under [`crate::resilience::ResiliencePolicy`]. One session
/// drives one feed at a time — interleaving calls from concurrent tasks
/// would corrupt the driver's notion of the current view.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// All listing elements currently rendered in the feed, in feed order.
    async fn current_listings(&self) -> Result<Vec<ElementHandle>, PipelineError>;

    /// Scroll the feed to render more listings. Returns `true` when the
    /// feed reports more content below the fold.
    async fn scroll(&self) -> Result<bool, PipelineError>;

    /// Current feed scroll offset, for later restoration.
    async fn scroll_offset(&self) -> Result<i64, PipelineError>;

    /// Restore a previously recorded feed scroll offset.
    async fn restore_scroll(&self, offset: i64) -> Result<(), PipelineError>;

    /// Read a semantic attribute ([`ATTR_LABEL`], [`ATTR_HREF`]) of an
    /// element. `Ok(None)` when the element has no such attribute.
    async fn read_attribute(
        &self,
        handle: &ElementHandle,
        key: &str,
    ) -> Result<Option<String>, PipelineError>;

    /// Visible text content of an element's subtree.
    async fn read_text(&self, handle: &ElementHandle) -> Result<String, PipelineError>;

    /// Elements matching `selector` inside `handle`'s subtree, in document
    /// order.
    async fn find_within(
        &self,
        handle: &ElementHandle,
        selector: &SelectorSpec,
    ) -> Result<Vec<ElementHandle>, PipelineError>;

    /// Open a listing's detail view (click-through).
    async fn open(&self, handle: &ElementHandle) -> Result<(), PipelineError>;

    /// Navigate back from a detail view to the feed.
    async fn back(&self) -> Result<(), PipelineError>;

    /// Root element of the currently expanded detail view.
    ///
    /// Fails with [`PipelineError::DriverUnavailable`] when no detail view
    /// is open.
    async fn detail_root(&self) -> Result<ElementHandle, PipelineError>;
}
