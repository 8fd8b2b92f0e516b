//! Listing extraction and deduplication pipeline.
//!
//! Walks an incrementally rendered map-search feed through an abstract
//! [`AutomationDriver`], classifies each listing card into an extraction
//! strategy, pulls out the business facts (name, rating, reviews, phone,
//! website), and persists each business exactly once through a
//! [`ResultStore`] via a cascading duplicate match. Driver and store
//! traffic run under per-class [`resilience::ResiliencePolicy`] circuit
//! breakers.

pub mod classify;
pub mod clickthrough;
pub mod dedup;
pub mod driver;
pub mod error;
mod fields;
pub mod listing;
pub mod orchestrator;
pub mod resilience;
pub mod scroll;
pub mod store;
pub mod strategy;
pub mod testing;

pub use classify::classify;
pub use clickthrough::ClickThroughResolver;
pub use dedup::{DedupDecision, DedupOutcome, MatchStrategy};
pub use driver::{AutomationDriver, ElementHandle, SelectorSpec};
pub use error::PipelineError;
pub use listing::ExtractedListing;
pub use orchestrator::{
    JobConfig, JobReport, JobStatus, ListingOutcome, PipelineOrchestrator, ProgressCallback,
};
pub use resilience::{CircuitState, HealthSnapshot, ResilienceConfig, ResilienceError, ResiliencePolicy};
pub use scroll::{ScrollCursor, ScrollPositionTracker};
pub use store::ResultStore;
pub use strategy::Strategy;
