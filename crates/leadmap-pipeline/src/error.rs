use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction failed: {reason}")]
    ExtractionFailed { reason: String },

    #[error("listing has neither an action affordance nor a place deep link")]
    ClassificationFailed,

    #[error("click-through step \"{step}\" timed out after {timeout_ms}ms")]
    ClickThroughTimeout { step: &'static str, timeout_ms: u64 },

    #[error("automation driver unavailable: {reason}")]
    DriverUnavailable { reason: String },

    #[error("store uniqueness conflict on identity key {identity_key}")]
    StoreConflict { identity_key: String },

    #[error("result store error: {reason}")]
    Store { reason: String },
}

impl PipelineError {
    /// Returns `true` if `self` represents a transient dependency condition
    /// that [`crate::resilience::ResiliencePolicy`] should retry after a
    /// backoff delay.
    ///
    /// Retriable errors:
    /// - [`PipelineError::DriverUnavailable`] — the automation driver did not
    ///   answer (timeout, stale session, crashed renderer).
    /// - [`PipelineError::Store`] — the result store did not answer.
    ///
    /// Non-retriable errors (propagated immediately):
    /// - [`PipelineError::ExtractionFailed`] — the listing has no usable
    ///   name; re-reading the same subtree returns the same answer.
    /// - [`PipelineError::ClassificationFailed`] — same reasoning.
    /// - [`PipelineError::ClickThroughTimeout`] — recoverable per listing;
    ///   the website simply stays unresolved.
    /// - [`PipelineError::StoreConflict`] — a dedup race, handled by the
    ///   orchestrator as a forced merge, not by blind retry.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PipelineError::DriverUnavailable { .. } | PipelineError::Store { .. }
        )
    }

    /// Short stable name for this error's taxonomy kind, reported in
    /// [`crate::orchestrator::JobReport`] so partial progress is never
    /// discarded without a cause attached.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ExtractionFailed { .. } => "extraction_failed",
            PipelineError::ClassificationFailed => "classification_failed",
            PipelineError::ClickThroughTimeout { .. } => "click_through_timeout",
            PipelineError::DriverUnavailable { .. } => "driver_unavailable",
            PipelineError::StoreConflict { .. } => "store_conflict",
            PipelineError::Store { .. } => "store_error",
        }
    }
}
