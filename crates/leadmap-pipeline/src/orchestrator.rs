//! Per-job pipeline orchestration.
//!
//! Composes the scroll tracker, classifier, strategies, click-through
//! resolver, and deduplicator into the per-listing flow, and owns the job
//! state machine (`Idle → Running → {Completed, Cancelled, Failed}`). All
//! job state lives in this context object and dies with the call stack —
//! there is no process-wide job table.
//!
//! Failure policy: per-listing errors (unclassifiable, nameless, timed-out
//! click-through) skip that listing and never abort the job. Dependency
//! errors escalate through the resilience policies; an open circuit is
//! job-fatal, and exhausted retries are job-fatal only on writes — a
//! failing read is simply retried on the next iteration.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use leadmap_core::AppConfig;

use crate::classify::classify;
use crate::clickthrough::ClickThroughResolver;
use crate::dedup::{self, DedupOutcome};
use crate::driver::{AutomationDriver, ElementHandle};
use crate::error::PipelineError;
use crate::fields;
use crate::listing::ExtractedListing;
use crate::resilience::{ResilienceConfig, ResilienceError, ResiliencePolicy};
use crate::scroll::ScrollPositionTracker;
use crate::store::ResultStore;

/// Per-job knobs, handed in by the job orchestration layer.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Location string attached to every lead from this job, and half of
    /// the name+location identity key.
    pub location: String,
    /// Search term or feed descriptor recorded on inserted leads.
    pub source: Option<String>,
    pub target_count: usize,
    pub runtime_budget: Duration,
    pub enable_click_through: bool,
    pub max_empty_scrolls: u32,
    pub click_through_step_timeout: Duration,
}

impl JobConfig {
    /// Job defaults with an explicit location; click-through off.
    #[must_use]
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            source: None,
            target_count: 20,
            runtime_budget: Duration::from_secs(300),
            enable_click_through: false,
            max_empty_scrolls: 3,
            click_through_step_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &AppConfig, location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            source: None,
            target_count: config.job_target_count,
            runtime_budget: Duration::from_secs(config.job_runtime_budget_secs),
            enable_click_through: config.job_enable_click_through,
            max_empty_scrolls: config.job_max_empty_scrolls,
            click_through_step_timeout: Duration::from_millis(config.click_through_step_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// What happened to one listing, reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingOutcome {
    Inserted,
    Merged,
    DuplicateSkipped,
    Unclassifiable,
    ExtractionFailed,
}

/// Final job result. `processed_count` counts listings that reached a
/// persistence decision, so partial progress survives a failure.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub status: JobStatus,
    pub processed_count: usize,
    pub last_error_kind: Option<&'static str>,
}

/// `(processed, known feed size, last outcome)`.
pub type ProgressCallback = Box<dyn Fn(usize, usize, ListingOutcome) + Send + Sync>;

/// How a pipeline step's failure affects the job.
enum StepFailure {
    /// Abort the job with this taxonomy kind.
    Fatal(&'static str),
    /// Leave the cursor alone and retry on the next iteration.
    Transient(&'static str),
}

pub struct PipelineOrchestrator {
    driver: Arc<dyn AutomationDriver>,
    store: Arc<dyn ResultStore>,
    config: JobConfig,
    driver_policy: ResiliencePolicy,
    store_policy: ResiliencePolicy,
    resolver: ClickThroughResolver,
    progress: Option<ProgressCallback>,
    status: JobStatus,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(
        driver: Arc<dyn AutomationDriver>,
        store: Arc<dyn ResultStore>,
        config: JobConfig,
        driver_resilience: ResilienceConfig,
        store_resilience: ResilienceConfig,
    ) -> Self {
        let resolver = ClickThroughResolver::new(config.click_through_step_timeout);
        Self {
            driver,
            store,
            config,
            driver_policy: ResiliencePolicy::new("driver", driver_resilience),
            store_policy: ResiliencePolicy::new("store", store_resilience),
            resolver,
            progress: None,
            status: JobStatus::Idle,
        }
    }

    /// Install a progress callback invoked after every processed listing.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// Health view of the two guarded dependency classes, for the
    /// job orchestration layer's periodic inspection.
    #[must_use]
    pub fn health(&self) -> (crate::resilience::HealthSnapshot, crate::resilience::HealthSnapshot)
    {
        (
            self.driver_policy.health_snapshot(),
            self.store_policy.health_snapshot(),
        )
    }

    /// Run the job to completion, cancellation, budget exhaustion, feed
    /// exhaustion, or dependency failure.
    ///
    /// Cancellation is cooperative: the token is checked between
    /// iterations, never mid-extraction, so it can take up to one
    /// listing's processing time to observe. Already-persisted records
    /// always remain.
    pub async fn run(&mut self, cancel: CancellationToken) -> JobReport {
        self.status = JobStatus::Running;
        let started = Instant::now();
        let mut tracker = ScrollPositionTracker::new();
        let mut processed: usize = 0;
        let mut empty_scrolls: u32 = 0;
        let mut last_error_kind: Option<&'static str> = None;

        let status = loop {
            if cancel.is_cancelled() {
                tracing::info!(processed, "cancellation observed, stopping job");
                break JobStatus::Cancelled;
            }
            if started.elapsed() >= self.config.runtime_budget {
                tracing::info!(processed, "runtime budget exceeded, completing with partial count");
                break JobStatus::Completed;
            }
            if processed >= self.config.target_count {
                tracing::info!(processed, "target count reached");
                break JobStatus::Completed;
            }

            let listings = match self.read_listings().await {
                Ok(listings) => listings,
                Err(StepFailure::Fatal(kind)) => {
                    last_error_kind = Some(kind);
                    break JobStatus::Failed;
                }
                Err(StepFailure::Transient(kind)) => {
                    last_error_kind = Some(kind);
                    continue;
                }
            };

            let Some((position, element)) = tracker.next_unseen(&listings) else {
                match self.advance_feed(&mut tracker, listings.len()).await {
                    Ok(true) => empty_scrolls = 0,
                    Ok(false) => {
                        empty_scrolls += 1;
                        if empty_scrolls >= self.config.max_empty_scrolls {
                            tracing::info!(
                                processed,
                                attempts = empty_scrolls,
                                "feed exhausted, completing with partial count"
                            );
                            break JobStatus::Completed;
                        }
                    }
                    Err(StepFailure::Fatal(kind)) => {
                        last_error_kind = Some(kind);
                        break JobStatus::Failed;
                    }
                    Err(StepFailure::Transient(kind)) => {
                        last_error_kind = Some(kind);
                    }
                }
                continue;
            };

            match self.process_listing(position, element, &mut tracker).await {
                Ok(outcome) => {
                    if matches!(
                        outcome,
                        ListingOutcome::Inserted
                            | ListingOutcome::Merged
                            | ListingOutcome::DuplicateSkipped
                    ) {
                        processed += 1;
                    }
                    if let Some(callback) = &self.progress {
                        callback(processed, tracker.cursor().known_element_count, outcome);
                    }
                }
                Err(StepFailure::Fatal(kind)) => {
                    last_error_kind = Some(kind);
                    break JobStatus::Failed;
                }
                Err(StepFailure::Transient(kind)) => {
                    last_error_kind = Some(kind);
                }
            }
        };

        self.status = status;
        if status == JobStatus::Failed {
            tracing::error!(
                processed,
                last_error_kind = last_error_kind.unwrap_or("unknown"),
                "job failed"
            );
        }
        JobReport {
            status,
            processed_count: processed,
            last_error_kind,
        }
    }

    async fn read_listings(&self) -> Result<Vec<ElementHandle>, StepFailure> {
        let driver = Arc::clone(&self.driver);
        self.driver_policy
            .execute(|| {
                let driver = Arc::clone(&driver);
                async move { driver.current_listings().await }
            })
            .await
            .map_err(|e| Self::classify_read_failure(&e))
    }

    /// Scroll, wait for the renderer, and re-anchor the cursor. Returns
    /// `true` when new elements appeared.
    async fn advance_feed(
        &self,
        tracker: &mut ScrollPositionTracker,
        known_before: usize,
    ) -> Result<bool, StepFailure> {
        let driver = Arc::clone(&self.driver);
        self.driver_policy
            .execute(|| {
                let driver = Arc::clone(&driver);
                async move { driver.scroll().await }
            })
            .await
            .map_err(|e| Self::classify_read_failure(&e))?;

        let fresh = self.read_listings().await?;

        // Identity probing is best-effort: a failed read degrades the
        // re-anchor to the count-based fallback instead of aborting.
        let mut identities = Vec::with_capacity(fresh.len());
        for element in &fresh {
            let identity = fields::extract_profile_url(self.driver.as_ref(), element)
                .await
                .ok()
                .flatten();
            identities.push(identity);
        }
        tracker.re_anchor(&identities);

        Ok(fresh.len() > known_before)
    }

    async fn process_listing(
        &self,
        position: usize,
        element: ElementHandle,
        tracker: &mut ScrollPositionTracker,
    ) -> Result<ListingOutcome, StepFailure> {
        let driver = Arc::clone(&self.driver);

        // Classify.
        let classified = self
            .driver_policy
            .execute(|| {
                let driver = Arc::clone(&driver);
                async move { classify(driver.as_ref(), &element).await }
            })
            .await;
        let strategy = match classified {
            Ok(strategy) => strategy,
            Err(ResilienceError::Operation {
                source: PipelineError::ClassificationFailed,
            }) => {
                tracing::warn!(position, "skipping unclassifiable listing");
                tracker.mark_processed(position, None);
                return Ok(ListingOutcome::Unclassifiable);
            }
            Err(e) => return Err(Self::classify_read_failure(&e)),
        };

        // Extract.
        let extracted = self
            .driver_policy
            .execute(|| {
                let driver = Arc::clone(&driver);
                async move { strategy.extract(driver.as_ref(), &element, position).await }
            })
            .await;
        let mut listing = match extracted {
            Ok(listing) => listing,
            Err(ResilienceError::Operation { source }) => {
                tracing::warn!(position, error = %source, "skipping listing, extraction failed");
                tracker.mark_processed(position, None);
                return Ok(ListingOutcome::ExtractionFailed);
            }
            Err(e) => return Err(Self::classify_read_failure(&e)),
        };

        // Click-through, when the compact layout left the website open and
        // the job opted in.
        if listing.needs_click_through_check && self.config.enable_click_through {
            let resolved = self
                .driver_policy
                .execute(|| {
                    let driver = Arc::clone(&driver);
                    async move { self.resolver.resolve(driver.as_ref(), &element).await }
                })
                .await;
            match resolved {
                Ok(website) => listing.apply_click_through(website),
                Err(ResilienceError::CircuitOpen { .. }) => {
                    return Err(StepFailure::Fatal("circuit_open"));
                }
                // Unresolved, not a false negative: keep the check flag.
                Err(e) => {
                    tracing::warn!(
                        position,
                        name = %listing.name,
                        error = %e,
                        "click-through failed, website stays unresolved"
                    );
                }
            }
        }

        let outcome = self.persist(&listing).await?;
        tracker.mark_processed(position, listing.profile_url.clone());
        Ok(outcome)
    }

    /// Dedup-classify the listing and write the decision to the store.
    async fn persist(&self, listing: &ExtractedListing) -> Result<ListingOutcome, StepFailure> {
        let decision = self
            .store_policy
            .execute(|| dedup::decide(listing, &self.config.location, self.store.as_ref()))
            .await
            .map_err(|e| Self::classify_read_failure(&e))?;

        match decision.outcome {
            DedupOutcome::New => {
                let lead = listing.to_new_lead(&self.config.location, self.config.source.as_deref());
                let inserted = self
                    .store_policy
                    .execute(|| self.store.insert(&lead))
                    .await;
                match inserted {
                    Ok(record) => {
                        tracing::debug!(name = %record.name, id = record.id, "lead inserted");
                        Ok(ListingOutcome::Inserted)
                    }
                    Err(ResilienceError::Operation {
                        source: PipelineError::StoreConflict { identity_key },
                    }) => {
                        // Another job won the insert race; replay as merge.
                        tracing::debug!(
                            name = %listing.name,
                            identity_key,
                            "insert conflict, replaying as merge"
                        );
                        self.merge_after_conflict(listing).await
                    }
                    Err(e) => Err(Self::classify_write_failure(&e)),
                }
            }
            DedupOutcome::Merge => {
                let id = decision
                    .matched_record_id
                    .ok_or(StepFailure::Fatal("store_error"))?;
                self.store_policy
                    .execute(|| self.store.update(id, &decision.merge_plan))
                    .await
                    .map_err(|e| Self::classify_write_failure(&e))?;
                tracing::debug!(name = %listing.name, id, "lead merged");
                Ok(ListingOutcome::Merged)
            }
            DedupOutcome::Skip => {
                tracing::debug!(name = %listing.name, "duplicate with nothing new, skipped");
                Ok(ListingOutcome::DuplicateSkipped)
            }
        }
    }

    /// Forced-merge path after a racy insert conflict.
    async fn merge_after_conflict(
        &self,
        listing: &ExtractedListing,
    ) -> Result<ListingOutcome, StepFailure> {
        let decision = self
            .store_policy
            .execute(|| dedup::forced_merge(listing, &self.config.location, self.store.as_ref()))
            .await
            .map_err(|e| Self::classify_write_failure(&e))?;

        if decision.outcome == DedupOutcome::Merge {
            let id = decision
                .matched_record_id
                .ok_or(StepFailure::Fatal("store_error"))?;
            self.store_policy
                .execute(|| self.store.update(id, &decision.merge_plan))
                .await
                .map_err(|e| Self::classify_write_failure(&e))?;
            Ok(ListingOutcome::Merged)
        } else {
            Ok(ListingOutcome::DuplicateSkipped)
        }
    }

    /// Read-side failures: an open circuit is job-fatal, everything else
    /// is retried on a later iteration.
    fn classify_read_failure(error: &ResilienceError) -> StepFailure {
        match error {
            ResilienceError::CircuitOpen { .. } => StepFailure::Fatal("circuit_open"),
            other => {
                tracing::warn!(error = %other, "transient read failure, will retry next iteration");
                StepFailure::Transient(other.kind())
            }
        }
    }

    /// Write-side failures are job-fatal: a lead that reached a decision
    /// but could not be persisted must not be silently dropped.
    fn classify_write_failure(error: &ResilienceError) -> StepFailure {
        StepFailure::Fatal(error.kind())
    }
}
