//! The two interchangeable extraction strategies.
//!
//! Both produce the same normalized [`ExtractedListing`] from the shared
//! field extractor; they differ only in how website presence is settled.

use crate::driver::{AutomationDriver, ElementHandle};
use crate::error::PipelineError;
use crate::fields;
use crate::listing::ExtractedListing;

/// Extraction strategy selected per listing by [`crate::classify::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Inline action affordances are visible; their presence or absence
    /// settles every question definitively.
    Standard,
    /// No inline affordances; website presence may stay unresolved until a
    /// click-through into the detail view.
    Compact,
}

impl Strategy {
    /// Extract a normalized listing record.
    ///
    /// Single-field failures leave the field `None` and do not abort the
    /// other fields; a missing name aborts the listing.
    ///
    /// Standard: whatever the website rule found stands. An absent
    /// "Website" affordance next to a present "Directions" one is a
    /// confirmed absence, not an open question.
    ///
    /// Compact: a found website is trusted exactly as in Standard; a
    /// missing one is marked `needs_click_through_check` and left to the
    /// orchestrator, which owns the click-through policy decision.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ExtractionFailed`] when no usable name is
    /// found; propagates driver failures.
    pub async fn extract(
        self,
        driver: &dyn AutomationDriver,
        listing: &ElementHandle,
        source_position: usize,
    ) -> Result<ExtractedListing, PipelineError> {
        let Some(name) = fields::extract_name(driver, listing).await? else {
            return Err(PipelineError::ExtractionFailed {
                reason: format!("no usable name at feed position {source_position}"),
            });
        };

        let (rating, review_count) = fields::extract_rating_reviews(driver, listing).await?;
        let phone = fields::extract_phone(driver, listing).await?;
        let profile_url = fields::extract_profile_url(driver, listing).await?;
        let website = fields::extract_website(driver, listing).await?;

        let needs_click_through_check = match self {
            Strategy::Standard => false,
            Strategy::Compact => website.is_none(),
        };

        let mut extracted = ExtractedListing {
            name,
            rating,
            review_count,
            phone,
            has_website: website.is_some(),
            website,
            profile_url,
            needs_click_through_check,
            source_position,
        };
        extracted.finalize();
        Ok(extracted)
    }
}
