//! Database operations for the `leads` table, plus the Postgres-backed
//! `ResultStore` the pipeline persists through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use leadmap_core::{LeadRecord, MergePlan, NewLead};
use leadmap_pipeline::{PipelineError, ResultStore};

use crate::{map_sqlx_error, DbError};

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

/// A row from the `leads` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LeadRow {
    pub id: i64,
    pub public_id: Uuid,
    pub identity_key: String,
    pub name: String,
    pub location: String,
    pub rating: Option<f64>,
    pub review_count: Option<i32>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub has_website: bool,
    pub profile_url: Option<String>,
    pub source: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LeadRow {
    /// Converts the storage row into the domain record. A negative
    /// `review_count` cannot come from the pipeline; treat it as absent.
    #[must_use]
    pub fn into_record(self) -> LeadRecord {
        LeadRecord {
            id: self.id,
            public_id: self.public_id,
            identity_key: self.identity_key,
            name: self.name,
            location: self.location,
            rating: self.rating,
            review_count: self.review_count.and_then(|c| u32::try_from(c).ok()),
            phone: self.phone,
            website: self.website,
            has_website: self.has_website,
            profile_url: self.profile_url,
            source: self.source,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
            created_at: self.created_at,
        }
    }
}

const LEAD_COLUMNS: &str = "id, public_id, identity_key, name, location, rating, review_count, \
     phone, website, has_website, profile_url, source, first_seen_at, last_seen_at, created_at";

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Case-insensitive lookup by business name within a location.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_lead_by_name_location(
    pool: &PgPool,
    name: &str,
    location: &str,
) -> Result<Option<LeadRow>, DbError> {
    let row = sqlx::query_as::<_, LeadRow>(&format!(
        "SELECT {LEAD_COLUMNS} \
         FROM leads \
         WHERE lower(name) = lower($1) AND lower(location) = lower($2)",
    ))
    .bind(name)
    .bind(location)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Exact lookup by the stable per-business profile URL.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_lead_by_profile_url(
    pool: &PgPool,
    profile_url: &str,
) -> Result<Option<LeadRow>, DbError> {
    let row = sqlx::query_as::<_, LeadRow>(&format!(
        "SELECT {LEAD_COLUMNS} \
         FROM leads \
         WHERE profile_url = $1",
    ))
    .bind(profile_url)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Exact phone match within a location. Callers gate out sentinel phone
/// values before reaching this query.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_lead_by_phone_location(
    pool: &PgPool,
    phone: &str,
    location: &str,
) -> Result<Option<LeadRow>, DbError> {
    let row = sqlx::query_as::<_, LeadRow>(&format!(
        "SELECT {LEAD_COLUMNS} \
         FROM leads \
         WHERE phone = $1 AND lower(location) = lower($2)",
    ))
    .bind(phone)
    .bind(location)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts a new lead.
///
/// # Errors
///
/// Returns [`DbError::UniqueViolation`] when the identity key or profile URL
/// collides with an existing row, [`DbError::Sqlx`] on any other failure.
pub async fn insert_lead(pool: &PgPool, lead: &NewLead) -> Result<LeadRow, DbError> {
    let review_count = lead
        .review_count
        .map(|c| i32::try_from(c).unwrap_or(i32::MAX));
    let row = sqlx::query_as::<_, LeadRow>(&format!(
        "INSERT INTO leads \
             (identity_key, name, location, rating, review_count, phone, website, \
              has_website, profile_url, source, raw_data) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING {LEAD_COLUMNS}",
    ))
    .bind(&lead.identity_key)
    .bind(&lead.name)
    .bind(&lead.location)
    .bind(lead.rating)
    .bind(review_count)
    .bind(&lead.phone)
    .bind(&lead.website)
    .bind(lead.has_website)
    .bind(&lead.profile_url)
    .bind(&lead.source)
    .bind(&lead.raw_data)
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row)
}

/// Applies a merge plan to an existing lead and bumps `last_seen_at`.
/// Absent plan fields leave the stored value untouched.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no lead has the given id,
/// [`DbError::Sqlx`] on any other failure.
pub async fn merge_lead(pool: &PgPool, id: i64, plan: &MergePlan) -> Result<LeadRow, DbError> {
    let review_count = plan
        .review_count
        .map(|c| i32::try_from(c).unwrap_or(i32::MAX));
    let row = sqlx::query_as::<_, LeadRow>(&format!(
        "UPDATE leads \
         SET rating = COALESCE($2, rating), \
             review_count = COALESCE($3, review_count), \
             phone = COALESCE($4, phone), \
             website = COALESCE($5, website), \
             has_website = has_website OR $5 IS NOT NULL, \
             profile_url = COALESCE($6, profile_url), \
             last_seen_at = NOW() \
         WHERE id = $1 \
         RETURNING {LEAD_COLUMNS}",
    ))
    .bind(id)
    .bind(plan.rating)
    .bind(review_count)
    .bind(&plan.phone)
    .bind(&plan.website)
    .bind(&plan.profile_url)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    row.ok_or(DbError::NotFound)
}

// ---------------------------------------------------------------------------
// ResultStore implementation
// ---------------------------------------------------------------------------

/// Postgres-backed [`ResultStore`].
///
/// Lookup and write failures surface as [`PipelineError::Store`] so the
/// pipeline's resilience policy can retry them; a unique-constraint
/// violation on insert surfaces as [`PipelineError::StoreConflict`], which
/// the orchestrator replays as a merge.
#[derive(Debug, Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn store_error(error: &DbError) -> PipelineError {
    PipelineError::Store {
        reason: error.to_string(),
    }
}

#[async_trait]
impl ResultStore for PgLeadStore {
    async fn find_by_name_location(
        &self,
        name: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        find_lead_by_name_location(&self.pool, name, location)
            .await
            .map(|row| row.map(LeadRow::into_record))
            .map_err(|e| store_error(&e))
    }

    async fn find_by_profile_url(
        &self,
        profile_url: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        find_lead_by_profile_url(&self.pool, profile_url)
            .await
            .map(|row| row.map(LeadRow::into_record))
            .map_err(|e| store_error(&e))
    }

    async fn find_by_phone_location(
        &self,
        phone: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        find_lead_by_phone_location(&self.pool, phone, location)
            .await
            .map(|row| row.map(LeadRow::into_record))
            .map_err(|e| store_error(&e))
    }

    async fn insert(&self, lead: &NewLead) -> Result<LeadRecord, PipelineError> {
        match insert_lead(&self.pool, lead).await {
            Ok(row) => Ok(row.into_record()),
            Err(DbError::UniqueViolation { .. }) => Err(PipelineError::StoreConflict {
                identity_key: lead.identity_key.clone(),
            }),
            Err(e) => Err(store_error(&e)),
        }
    }

    async fn update(&self, id: i64, plan: &MergePlan) -> Result<LeadRecord, PipelineError> {
        merge_lead(&self.pool, id, plan)
            .await
            .map(LeadRow::into_record)
            .map_err(|e| store_error(&e))
    }
}
