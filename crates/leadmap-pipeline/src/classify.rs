//! Listing layout classification.
//!
//! The feed renders two listing layouts that expose facts differently:
//! *Standard* carries inline action affordances ("Website", "Directions"),
//! *Compact* hides everything behind its place deep link. Presence of an
//! inline action is the most reliable renderer-agnostic signal available,
//! so classification inspects affordances first and never looks at
//! generated identifiers.

use crate::driver::{AutomationDriver, ElementHandle, SelectorSpec, ATTR_HREF};
use crate::error::PipelineError;
use crate::fields::is_place_link;
use crate::strategy::Strategy;

/// Inline affordance labels that mark a listing as Standard layout.
const AFFORDANCE_LABELS: &[&str] = &["Website", "Directions"];

/// Decide which extraction strategy applies to `listing`.
///
/// # Errors
///
/// Returns [`PipelineError::ClassificationFailed`] when the listing exposes
/// neither an inline action affordance nor a valid place deep link — such a
/// listing cannot be extracted, is not worth retrying, and is skipped by the
/// orchestrator with a logged reason. Driver failures propagate as-is.
pub async fn classify(
    driver: &dyn AutomationDriver,
    listing: &ElementHandle,
) -> Result<Strategy, PipelineError> {
    for label in AFFORDANCE_LABELS {
        let actions = driver
            .find_within(listing, &SelectorSpec::ActionLabel((*label).to_string()))
            .await?;
        if !actions.is_empty() {
            return Ok(Strategy::Standard);
        }
    }

    for anchor in driver.find_within(listing, &SelectorSpec::DeepLink).await? {
        if let Some(href) = driver.read_attribute(&anchor, ATTR_HREF).await? {
            if is_place_link(&href) {
                return Ok(Strategy::Compact);
            }
        }
    }

    tracing::debug!(
        element = listing.id,
        "listing has no affordance and no deep link — unclassifiable"
    );
    Err(PipelineError::ClassificationFailed)
}
