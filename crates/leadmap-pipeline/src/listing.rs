//! The normalized output of one extraction pass.

use serde::Serialize;

use leadmap_core::{make_identity_key, NewLead};

/// Structured facts pulled out of one rendered listing.
///
/// Invariants (enforced by [`ExtractedListing::finalize`]):
/// - `has_website == true` implies `website.is_some()`
/// - `needs_click_through_check == true` implies `has_website == false`
///   (website is unresolved, not confirmed absent)
/// - `rating` and `review_count` are both present or both absent
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedListing {
    pub name: String,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub has_website: bool,
    pub profile_url: Option<String>,
    pub needs_click_through_check: bool,
    /// Feed index at extraction time, for cursor bookkeeping.
    pub source_position: usize,
}

impl ExtractedListing {
    /// Reconcile raw per-field results into an invariant-respecting record.
    ///
    /// Rating and review count are extracted independently and may arrive
    /// alone; a half-fact ("4.5 stars" with no review count, or vice versa)
    /// is misleading to downstream consumers, so the odd one out is nulled
    /// here rather than at extraction time.
    pub fn finalize(&mut self) {
        if self.rating.is_some() != self.review_count.is_some() {
            self.rating = None;
            self.review_count = None;
        }
        if self.website.is_none() {
            self.has_website = false;
        }
        if self.has_website {
            self.needs_click_through_check = false;
        }
    }

    /// Record the outcome of a click-through resolution.
    ///
    /// `Some(url)` is a discovered website; `None` is a confirmed absence —
    /// both settle the question, so `needs_click_through_check` clears.
    pub fn apply_click_through(&mut self, website: Option<String>) {
        self.has_website = website.is_some();
        self.website = website;
        self.needs_click_through_check = false;
    }

    /// Build the store-facing insert record for this listing.
    #[must_use]
    pub fn to_new_lead(&self, location: &str, source: Option<&str>) -> NewLead {
        NewLead {
            identity_key: make_identity_key(&self.name, location),
            name: self.name.clone(),
            location: location.to_string(),
            rating: self.rating,
            review_count: self.review_count,
            phone: self.phone.clone(),
            website: self.website.clone(),
            has_website: self.has_website,
            profile_url: self.profile_url.clone(),
            source: source.map(ToString::to_string),
            raw_data: serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> ExtractedListing {
        ExtractedListing {
            name: "Five Star Painting".to_string(),
            rating: Some(5.0),
            review_count: Some(52),
            phone: Some("(402) 543-3239".to_string()),
            website: Some("https://fivestarpainting.com/omaha".to_string()),
            has_website: true,
            profile_url: Some("https://maps.example.com/place/five-star".to_string()),
            needs_click_through_check: false,
            source_position: 0,
        }
    }

    #[test]
    fn finalize_nulls_rating_without_review_count() {
        let mut l = listing();
        l.review_count = None;
        l.finalize();
        assert!(l.rating.is_none());
        assert!(l.review_count.is_none());
    }

    #[test]
    fn finalize_nulls_review_count_without_rating() {
        let mut l = listing();
        l.rating = None;
        l.finalize();
        assert!(l.rating.is_none());
        assert!(l.review_count.is_none());
    }

    #[test]
    fn finalize_keeps_complete_rating_pair() {
        let mut l = listing();
        l.finalize();
        assert_eq!(l.rating, Some(5.0));
        assert_eq!(l.review_count, Some(52));
    }

    #[test]
    fn finalize_clears_has_website_without_url() {
        let mut l = listing();
        l.website = None;
        l.finalize();
        assert!(!l.has_website);
    }

    #[test]
    fn apply_click_through_with_url_confirms_presence() {
        let mut l = listing();
        l.website = None;
        l.has_website = false;
        l.needs_click_through_check = true;

        l.apply_click_through(Some("https://acme.example".to_string()));
        assert!(l.has_website);
        assert_eq!(l.website.as_deref(), Some("https://acme.example"));
        assert!(!l.needs_click_through_check);
    }

    #[test]
    fn apply_click_through_with_none_confirms_absence() {
        let mut l = listing();
        l.website = None;
        l.has_website = false;
        l.needs_click_through_check = true;

        l.apply_click_through(None);
        assert!(!l.has_website);
        assert!(l.website.is_none());
        assert!(!l.needs_click_through_check);
    }

    #[test]
    fn to_new_lead_derives_identity_key_from_name_and_location() {
        let l = listing();
        let lead = l.to_new_lead("Omaha, NE", Some("painters omaha"));

        assert_eq!(
            lead.identity_key,
            leadmap_core::make_identity_key("Five Star Painting", "Omaha, NE")
        );
        assert_eq!(lead.location, "Omaha, NE");
        assert_eq!(lead.source.as_deref(), Some("painters omaha"));
        assert!(lead.raw_data.is_object());
    }
}
