//! The abstract result-store seam.
//!
//! Lookups mirror the dedup cascade one-to-one so that backends can serve
//! each step from an index. The store — not this trait — owns the backstop
//! uniqueness constraint on identity keys; [`ResultStore::insert`] surfaces
//! a violated constraint as [`PipelineError::StoreConflict`] so the
//! orchestrator can re-run the race as a merge.

use async_trait::async_trait;

use leadmap_core::{LeadRecord, MergePlan, NewLead};

use crate::error::PipelineError;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Case-insensitive exact match on (business name, location).
    async fn find_by_name_location(
        &self,
        name: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError>;

    /// Exact match on the provider-issued profile URL.
    async fn find_by_profile_url(
        &self,
        profile_url: &str,
    ) -> Result<Option<LeadRecord>, PipelineError>;

    /// Exact match on (phone, location).
    async fn find_by_phone_location(
        &self,
        phone: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError>;

    /// Insert a new lead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StoreConflict`] when the identity key or
    /// profile URL already exists (a dedup race between concurrent jobs),
    /// [`PipelineError::Store`] for any other backend failure.
    async fn insert(&self, lead: &NewLead) -> Result<LeadRecord, PipelineError>;

    /// Apply a merge plan to an existing lead and refresh its
    /// last-seen timestamp. Identity key and creation timestamp are never
    /// touched.
    async fn update(&self, id: i64, plan: &MergePlan) -> Result<LeadRecord, PipelineError>;
}
