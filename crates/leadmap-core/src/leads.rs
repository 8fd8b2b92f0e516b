//! Shared lead record shapes and identity-key derivation.
//!
//! These types cross the boundary between the pipeline (which decides what
//! to persist) and the store backends (which persist it), so they live here
//! rather than in either crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted business lead as read back from a result store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: i64,
    pub public_id: Uuid,
    /// Stable dedup key over normalized name + location. Never rewritten.
    pub identity_key: String,
    pub name: String,
    pub location: String,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub has_website: bool,
    pub profile_url: Option<String>,
    /// Search term or feed that first surfaced this lead.
    pub source: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Input record for inserting a new lead.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub identity_key: String,
    pub name: String,
    pub location: String,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub has_website: bool,
    pub profile_url: Option<String>,
    pub source: Option<String>,
    /// Raw extraction payload, kept for operational debugging only.
    pub raw_data: serde_json::Value,
}

/// Fields on an existing lead that a merge should overwrite.
///
/// `None` means "leave the stored value alone"; `Some` means the candidate
/// carried strictly better information. Identity keys and creation
/// timestamps never appear here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub profile_url: Option<String>,
}

impl MergePlan {
    /// True when the merge would not change any field.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rating.is_none()
            && self.review_count.is_none()
            && self.phone.is_none()
            && self.website.is_none()
            && self.profile_url.is_none()
    }
}

/// Compute a stable dedup key for a lead.
///
/// SHA-256 over `name || location`, both trimmed and lower-cased.
/// Hex-encoded. Case differences in either component must not produce
/// distinct keys — the dedup cascade treats name+location matches as
/// case-insensitive.
#[must_use]
pub fn make_identity_key(name: &str, location: &str) -> String {
    use sha2::{Digest, Sha256};
    let input = format!(
        "{}\x00{}",
        name.trim().to_lowercase(),
        location.trim().to_lowercase(),
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}
