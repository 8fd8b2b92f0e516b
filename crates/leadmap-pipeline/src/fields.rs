//! Per-fact field extraction with ordered fallback chains.
//!
//! Each fact (name, rating+reviews, phone, website) has its own chain of
//! structural rules tried in priority order; the first rule that yields a
//! validated value wins. Rules lean on accessible labels and semantic roles
//! only — generated identifiers churn across renderer releases and are
//! never consulted.
//!
//! A failed single-field extraction yields `None` for that field and never
//! aborts the other fields. Only the name is load-bearing: a nameless
//! record is useless regardless of its other facts, and that decision is
//! made by the strategy layer, not here.

use std::sync::LazyLock;

use regex::Regex;

use crate::driver::{AutomationDriver, ElementHandle, SelectorSpec, ATTR_HREF, ATTR_LABEL};
use crate::error::PipelineError;

static RATING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*star").expect("valid regex"));
static REVIEW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,]*)\s*review").expect("valid regex"));
/// Phone shapes in priority order: parenthesized area code, hyphenated,
/// international with a leading plus.
static PHONE_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"\(\d{3}\)\s*\d{3}-\d{4}").expect("valid regex"),
        Regex::new(r"\b\d{3}-\d{3}-\d{4}\b").expect("valid regex"),
        Regex::new(r"\+\d{1,3}[\s.-]?\d{2,4}[\s.-]?\d{3,4}[\s.-]?\d{3,4}").expect("valid regex"),
    ]
});

/// Separator used by the feed between the business name and trailing
/// metadata inside a deep-link anchor's accessible label.
const LABEL_SEPARATOR: char = '·';

/// Words that mark a candidate "name" as UI chrome rather than a business.
const UI_CHROME_WORDS: &[&str] = &[
    "website",
    "directions",
    "call",
    "save",
    "share",
    "menu",
    "order online",
    "sponsored",
];

/// Extract the business name.
///
/// Fallback chain:
/// 1. accessible label of the deep-link anchor, split on the known
///    separator and trimmed;
/// 2. first heading-role element's text;
/// 3. first semantic heading tag's text.
///
/// # Errors
///
/// Propagates driver failures; an absent name is `Ok(None)`.
pub(crate) async fn extract_name(
    driver: &dyn AutomationDriver,
    listing: &ElementHandle,
) -> Result<Option<String>, PipelineError> {
    // Rule 1: deep-link anchor label.
    if let Some(anchor) = driver
        .find_within(listing, &SelectorSpec::DeepLink)
        .await?
        .first()
    {
        if let Some(label) = driver.read_attribute(anchor, ATTR_LABEL).await? {
            if let Some(name) = name_from_label(&label) {
                return Ok(Some(name));
            }
        }
    }

    // Rule 2: heading-role element.
    if let Some(heading) = driver
        .find_within(listing, &SelectorSpec::HeadingRole)
        .await?
        .first()
    {
        let text = driver.read_text(heading).await?;
        if let Some(name) = validate_name(&text) {
            tracing::debug!(name, "name resolved via heading role fallback");
            return Ok(Some(name));
        }
    }

    // Rule 3: semantic heading tag.
    if let Some(heading) = driver
        .find_within(listing, &SelectorSpec::HeadingTag)
        .await?
        .first()
    {
        let text = driver.read_text(heading).await?;
        if let Some(name) = validate_name(&text) {
            tracing::debug!(name, "name resolved via heading tag fallback");
            return Ok(Some(name));
        }
    }

    Ok(None)
}

/// Extract rating and review count from the star badge's accessible label.
///
/// Both values are parsed from the same label with independent expressions,
/// and a partial result (one without the other) is accepted here — the
/// listing-level invariant check reconciles the pair later.
///
/// # Errors
///
/// Propagates driver failures.
pub(crate) async fn extract_rating_reviews(
    driver: &dyn AutomationDriver,
    listing: &ElementHandle,
) -> Result<(Option<f64>, Option<u32>), PipelineError> {
    let Some(badge) = driver
        .find_within(listing, &SelectorSpec::StarImage)
        .await?
        .first()
        .copied()
    else {
        return Ok((None, None));
    };

    match driver.read_attribute(&badge, ATTR_LABEL).await? {
        Some(label) => Ok(parse_rating_label(&label)),
        None => Ok((None, None)),
    }
}

/// Extract a phone number from the listing's visible text.
///
/// # Errors
///
/// Propagates driver failures.
pub(crate) async fn extract_phone(
    driver: &dyn AutomationDriver,
    listing: &ElementHandle,
) -> Result<Option<String>, PipelineError> {
    let text = driver.read_text(listing).await?;
    Ok(find_phone(&text))
}

/// Extract the business website URL.
///
/// Fallback chain:
/// 1. explicit "Website" action affordance whose href leaves the map
///    provider's own domain;
/// 2. anchor whose accessible label contains "Website", same domain
///    exclusion.
///
/// No further fallback — resolving an absent website (click-through) is the
/// strategy's and orchestrator's decision, not the field extractor's.
///
/// # Errors
///
/// Propagates driver failures.
pub(crate) async fn extract_website(
    driver: &dyn AutomationDriver,
    listing: &ElementHandle,
) -> Result<Option<String>, PipelineError> {
    let website_action = SelectorSpec::ActionLabel("Website".to_string());
    for selector in [&website_action, &SelectorSpec::WebsiteLabelAnchor] {
        if let Some(anchor) = driver.find_within(listing, selector).await?.first() {
            if let Some(href) = driver.read_attribute(anchor, ATTR_HREF).await? {
                if !is_provider_url(&href) {
                    return Ok(Some(href));
                }
                tracing::debug!(href, "ignoring website href on the provider's own domain");
            }
        }
    }
    Ok(None)
}

/// Extract the provider-issued deep link to the listing's detail view.
///
/// # Errors
///
/// Propagates driver failures.
pub(crate) async fn extract_profile_url(
    driver: &dyn AutomationDriver,
    listing: &ElementHandle,
) -> Result<Option<String>, PipelineError> {
    if let Some(anchor) = driver
        .find_within(listing, &SelectorSpec::DeepLink)
        .await?
        .first()
    {
        if let Some(href) = driver.read_attribute(anchor, ATTR_HREF).await? {
            if is_place_link(&href) {
                return Ok(Some(href));
            }
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Pure parsing and validation helpers
// ---------------------------------------------------------------------------

/// Take the business-name segment of a deep-link anchor's accessible label.
///
/// Labels look like `"Five Star Painting · 5.0 stars 52 Reviews"`; the name
/// is everything before the first separator.
pub(crate) fn name_from_label(label: &str) -> Option<String> {
    let candidate = label.split(LABEL_SEPARATOR).next().unwrap_or(label);
    validate_name(candidate)
}

/// Validate a candidate business name.
///
/// Rejected when shorter than 2 characters after trimming, when it is a
/// known UI-chrome word, or when it contains no alphabetic character.
pub(crate) fn validate_name(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    if trimmed.chars().count() < 2 {
        return None;
    }
    if !trimmed.chars().any(char::is_alphabetic) {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if UI_CHROME_WORDS.contains(&lower.as_str()) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Parse rating and review count out of a star badge label such as
/// `"5.0 stars 52 Reviews"` or `"4.8 stars 1,204 reviews"`.
///
/// The two values are matched independently; either may be absent.
pub(crate) fn parse_rating_label(label: &str) -> (Option<f64>, Option<u32>) {
    let rating = RATING_RE
        .captures(label)
        .and_then(|c| c[1].parse::<f64>().ok())
        .filter(|r| (0.0..=5.0).contains(r));

    let review_count = REVIEW_RE
        .captures(label)
        .and_then(|c| c[1].replace(',', "").parse::<u32>().ok());

    (rating, review_count)
}

/// Find the first phone-shaped substring in visible text.
///
/// Shapes are tried in priority order: parenthesized area code, hyphenated,
/// international with a leading plus.
pub(crate) fn find_phone(text: &str) -> Option<String> {
    PHONE_RES
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| m.as_str().to_string())
}

/// True when `url` points back into the map provider's own domain — such an
/// href is a navigation artifact, not the business's website.
pub(crate) fn is_provider_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let host = lower
        .split("://")
        .nth(1)
        .unwrap_or(&lower)
        .split('/')
        .next()
        .unwrap_or("");

    host == "google.com"
        || host.ends_with(".google.com")
        || host == "goo.gl"
        || host.ends_with(".goo.gl")
}

/// True when `url` looks like a place/detail deep link rather than an
/// arbitrary anchor.
pub(crate) fn is_place_link(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("/place/") || lower.contains("/maps/place")
}
