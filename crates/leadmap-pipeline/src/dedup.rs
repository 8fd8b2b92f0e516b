//! Cascading multi-key deduplication against the result store.
//!
//! Cascade order is deliberate: name+location is cheap and catches the
//! common case; profile URL is authoritative (provider-issued, stable) but
//! only usable when captured; phone+location is the weakest signal — phones
//! get reused and shared — so it runs last and only for real phone values.
//!
//! The cascade is a best-effort pre-check, not a substitute for the store's
//! uniqueness constraint. Two jobs can still race to the same `NEW`
//! decision; the loser's insert comes back as a conflict and is replayed
//! through [`forced_merge`].

use leadmap_core::{LeadRecord, MergePlan};

use crate::error::PipelineError;
use crate::listing::ExtractedListing;
use crate::store::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    New,
    Merge,
    Skip,
}

/// Which cascade step matched an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    ExactNameLocation,
    ProfileUrl,
    PhoneLocation,
}

#[derive(Debug, Clone)]
pub struct DedupDecision {
    pub outcome: DedupOutcome,
    pub matched_record_id: Option<i64>,
    pub match_strategy: Option<MatchStrategy>,
    pub merge_plan: MergePlan,
}

impl DedupDecision {
    fn new() -> Self {
        Self {
            outcome: DedupOutcome::New,
            matched_record_id: None,
            match_strategy: None,
            merge_plan: MergePlan::default(),
        }
    }

    fn matched(existing: &LeadRecord, strategy: MatchStrategy, plan: MergePlan) -> Self {
        let outcome = if plan.is_empty() {
            DedupOutcome::Skip
        } else {
            DedupOutcome::Merge
        };
        Self {
            outcome,
            matched_record_id: Some(existing.id),
            match_strategy: Some(strategy),
            merge_plan: plan,
        }
    }
}

/// Classify a candidate against the store.
///
/// Runs the match cascade, stopping at the first hit, and computes the
/// merge plan for a matched record.
///
/// # Errors
///
/// Propagates store lookup failures.
pub async fn decide(
    candidate: &ExtractedListing,
    location: &str,
    store: &dyn ResultStore,
) -> Result<DedupDecision, PipelineError> {
    // Step 1: case-insensitive exact (name, location).
    if let Some(existing) = store
        .find_by_name_location(&candidate.name, location)
        .await?
    {
        let plan = build_merge_plan(&existing, candidate);
        return Ok(DedupDecision::matched(
            &existing,
            MatchStrategy::ExactNameLocation,
            plan,
        ));
    }

    // Step 2: provider-issued profile URL.
    if let Some(profile_url) = &candidate.profile_url {
        if let Some(existing) = store.find_by_profile_url(profile_url).await? {
            let plan = build_merge_plan(&existing, candidate);
            return Ok(DedupDecision::matched(
                &existing,
                MatchStrategy::ProfileUrl,
                plan,
            ));
        }
    }

    // Step 3: (phone, location), gated on a real phone value.
    if let Some(phone) = candidate.phone.as_deref().filter(|p| !is_sentinel_phone(p)) {
        if let Some(existing) = store.find_by_phone_location(phone, location).await? {
            let plan = build_merge_plan(&existing, candidate);
            return Ok(DedupDecision::matched(
                &existing,
                MatchStrategy::PhoneLocation,
                plan,
            ));
        }
    }

    Ok(DedupDecision::new())
}

/// Re-run the cascade after an insert conflict.
///
/// An insert that hit the uniqueness constraint means another job persisted
/// this business between our lookup and our write; the record must exist
/// now, so a `New` result here is a store inconsistency.
///
/// # Errors
///
/// Propagates store lookup failures; returns [`PipelineError::Store`] when
/// no record matches despite the reported conflict.
pub async fn forced_merge(
    candidate: &ExtractedListing,
    location: &str,
    store: &dyn ResultStore,
) -> Result<DedupDecision, PipelineError> {
    let decision = decide(candidate, location, store).await?;
    if decision.outcome == DedupOutcome::New {
        return Err(PipelineError::Store {
            reason: format!(
                "insert conflict for \"{}\" but no cascade step matches an existing record",
                candidate.name
            ),
        });
    }
    Ok(decision)
}

/// Compare a candidate against a matched record field-by-field under the
/// non-destructive-update rule: an existing field is overwritten only when
/// the stored value is null/empty and the candidate has one, or when the
/// candidate is strictly better information (review count strictly
/// greater). Identity keys and the creation timestamp are never touched.
#[must_use]
pub fn build_merge_plan(existing: &LeadRecord, candidate: &ExtractedListing) -> MergePlan {
    let mut plan = MergePlan::default();

    if let Some(website) = &candidate.website {
        if existing.website.as_deref().is_none_or(str::is_empty) {
            plan.website = Some(website.clone());
        }
    }

    if let Some(phone) = &candidate.phone {
        if !is_sentinel_phone(phone) && existing.phone.as_deref().is_none_or(str::is_empty) {
            plan.phone = Some(phone.clone());
        }
    }

    if let Some(profile_url) = &candidate.profile_url {
        if existing.profile_url.as_deref().is_none_or(str::is_empty) {
            plan.profile_url = Some(profile_url.clone());
        }
    }

    if let Some(review_count) = candidate.review_count {
        let fresher = existing.review_count.is_none_or(|e| review_count > e);
        if fresher && existing.review_count != Some(review_count) {
            plan.review_count = Some(review_count);
            // A grown review count dates the stored rating; refresh it too.
            if let Some(rating) = candidate.rating {
                if existing.rating != Some(rating) {
                    plan.rating = Some(rating);
                }
            }
        }
    }

    if plan.rating.is_none() && existing.rating.is_none() {
        if let Some(rating) = candidate.rating {
            plan.rating = Some(rating);
        }
    }

    plan
}

/// Placeholder phone values that must never participate in matching.
fn is_sentinel_phone(phone: &str) -> bool {
    let trimmed = phone.trim();
    trimmed.is_empty() || trimmed == "-" || trimmed.eq_ignore_ascii_case("no phone")
}
