//! On-demand click-through resolution for compact listings.
//!
//! Browses into a listing's detail view to reveal a website link the feed
//! summary hides, then restores the prior feed view no matter how the
//! detail read went. Each step runs under a short fixed timeout; a timeout
//! fails this one listing, never the job.

use std::time::Duration;

use tokio::time::timeout;

use crate::driver::{AutomationDriver, ElementHandle};
use crate::error::PipelineError;
use crate::fields;

pub struct ClickThroughResolver {
    step_timeout: Duration,
}

impl ClickThroughResolver {
    #[must_use]
    pub fn new(step_timeout: Duration) -> Self {
        Self { step_timeout }
    }

    /// Resolve a listing's website via its detail view.
    ///
    /// Protocol: record the feed scroll offset, open the detail view,
    /// re-run the website rule against the detail subtree, then
    /// unconditionally navigate back and restore the recorded offset —
    /// including when the detail read failed.
    ///
    /// `Ok(None)` is a confirmed absence: the detail view rendered and had
    /// no website link.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ClickThroughTimeout`] when a step exceeds the
    /// configured timeout; driver failures propagate as-is.
    pub async fn resolve(
        &self,
        driver: &dyn AutomationDriver,
        listing: &ElementHandle,
    ) -> Result<Option<String>, PipelineError> {
        let offset = self.bounded("record_offset", driver.scroll_offset()).await?;

        let result = self.open_and_read(driver, listing).await;

        // Restoration is unconditional; a failure here is logged, not
        // propagated, so it cannot mask the detail-read outcome.
        if let Err(e) = self.bounded("back", driver.back()).await {
            tracing::warn!(error = %e, "failed to navigate back after click-through");
        }
        if let Err(e) = self
            .bounded("restore_scroll", driver.restore_scroll(offset))
            .await
        {
            tracing::warn!(error = %e, offset, "failed to restore feed scroll offset");
        }

        result
    }

    async fn open_and_read(
        &self,
        driver: &dyn AutomationDriver,
        listing: &ElementHandle,
    ) -> Result<Option<String>, PipelineError> {
        self.bounded("open", driver.open(listing)).await?;
        let detail = self.bounded("detail_root", driver.detail_root()).await?;
        self.bounded("read_website", fields::extract_website(driver, &detail))
            .await
    }

    /// Run one protocol step under the per-step timeout.
    async fn bounded<T>(
        &self,
        step: &'static str,
        fut: impl std::future::Future<Output = Result<T, PipelineError>>,
    ) -> Result<T, PipelineError> {
        match timeout(self.step_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::ClickThroughTimeout {
                step,
                timeout_ms: u64::try_from(self.step_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
