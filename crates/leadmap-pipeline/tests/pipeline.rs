//! End-to-end tests for `PipelineOrchestrator::run`.
//!
//! Drives the full per-listing flow over the scripted `FakeDriver` and
//! in-memory `FakeStore`: classification, extraction, click-through,
//! deduplication, persistence, stop conditions, and dependency-failure
//! escalation. No real browser session or database is involved, and every
//! test runs on a paused `tokio` clock so backoff delays cost nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use leadmap_core::{make_identity_key, LeadRecord, MergePlan, NewLead};
use leadmap_pipeline::orchestrator::{
    JobConfig, JobStatus, ListingOutcome, PipelineOrchestrator,
};
use leadmap_pipeline::resilience::ResilienceConfig;
use leadmap_pipeline::testing::{FakeDriver, FakeListing, FakeStore};
use leadmap_pipeline::{AutomationDriver, PipelineError, ResultStore};

const LOCATION: &str = "Omaha, NE";

/// Job defaults used across tests: click-through off, generous budget.
fn test_job(target: usize) -> JobConfig {
    let mut config = JobConfig::new(LOCATION);
    config.target_count = target;
    config.runtime_budget = Duration::from_secs(600);
    config.max_empty_scrolls = 2;
    config
}

/// Low-threshold resilience for failure-escalation tests.
fn tight_resilience() -> ResilienceConfig {
    ResilienceConfig {
        failure_threshold: 2,
        cooldown: Duration::from_secs(30),
        max_retries: 3,
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(100),
        unhealthy_probe_threshold: 3,
    }
}

fn orchestrator(
    driver: Arc<FakeDriver>,
    store: Arc<FakeStore>,
    config: JobConfig,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(
        driver,
        store,
        config,
        ResilienceConfig::default(),
        ResilienceConfig::default(),
    )
}

fn names(records: &[LeadRecord]) -> Vec<String> {
    records.iter().map(|r| r.name.clone()).collect()
}

// ---------------------------------------------------------------------------
// Happy paths and stop conditions
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn stops_at_target_count() {
    let driver = Arc::new(FakeDriver::new(vec![
        FakeListing::standard("Ace Plumbing", Some("https://aceplumbing.example")),
        FakeListing::standard("Best Roofing", None),
        FakeListing::standard("Crown Dental", Some("https://crowndental.example")),
        FakeListing::standard("Delta Movers", None),
        FakeListing::standard("Echo Electric", None),
    ]));
    let store = Arc::new(FakeStore::new());

    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(3))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.processed_count, 3);
    assert_eq!(report.last_error_kind, None);

    let records = store.records();
    assert_eq!(
        names(&records),
        vec!["Ace Plumbing", "Best Roofing", "Crown Dental"]
    );
    // Facts from the standard layout land on the record.
    assert_eq!(records[0].rating, Some(5.0));
    assert_eq!(records[0].review_count, Some(52));
    assert_eq!(records[0].phone.as_deref(), Some("(402) 543-3239"));
    assert_eq!(
        records[0].website.as_deref(),
        Some("https://aceplumbing.example")
    );
    assert!(records[0].has_website);
    assert!(!records[1].has_website);
}

#[tokio::test(start_paused = true)]
async fn scrolls_to_reveal_more_listings() {
    let driver = Arc::new(FakeDriver::with_window(
        vec![
            FakeListing::standard("Ace Plumbing", None),
            FakeListing::standard("Best Roofing", None),
            FakeListing::standard("Crown Dental", None),
            FakeListing::standard("Delta Movers", None),
        ],
        2,
        2,
    ));
    let store = Arc::new(FakeStore::new());

    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(4))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.processed_count, 4);
    assert_eq!(
        names(&store.records()),
        vec!["Ace Plumbing", "Best Roofing", "Crown Dental", "Delta Movers"]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_feed_completes_with_partial_count() {
    let driver = Arc::new(FakeDriver::new(vec![
        FakeListing::standard("Ace Plumbing", None),
        FakeListing::standard("Best Roofing", None),
    ]));
    let store = Arc::new(FakeStore::new());

    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(10))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.processed_count, 2);
    assert_eq!(store.records().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn zero_budget_completes_immediately() {
    let driver = Arc::new(FakeDriver::new(vec![FakeListing::standard(
        "Ace Plumbing",
        None,
    )]));
    let store = Arc::new(FakeStore::new());

    let mut config = test_job(5);
    config.runtime_budget = Duration::ZERO;
    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), config)
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.processed_count, 0);
    assert!(store.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancellation_preserves_already_persisted_leads() {
    let driver = Arc::new(FakeDriver::new(vec![
        FakeListing::standard("Ace Plumbing", None),
        FakeListing::standard("Best Roofing", None),
        FakeListing::standard("Crown Dental", None),
    ]));
    let store = Arc::new(FakeStore::new());
    let cancel = CancellationToken::new();

    // Cancel from the progress callback after the first persisted lead.
    let observer = cancel.clone();
    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(3))
        .with_progress(Box::new(move |_, _, _| observer.cancel()))
        .run(cancel)
        .await;

    assert_eq!(report.status, JobStatus::Cancelled);
    assert_eq!(report.processed_count, 1);
    assert_eq!(names(&store.records()), vec!["Ace Plumbing"]);
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rerun_over_same_feed_inserts_nothing_new() {
    let listings = vec![
        FakeListing::standard("Ace Plumbing", Some("https://aceplumbing.example")),
        FakeListing::standard("Best Roofing", None),
    ];
    let store = Arc::new(FakeStore::new());

    let first = orchestrator(
        Arc::new(FakeDriver::new(listings.clone())),
        Arc::clone(&store),
        test_job(2),
    )
    .run(CancellationToken::new())
    .await;
    assert_eq!(first.status, JobStatus::Completed);
    assert_eq!(store.records().len(), 2);

    // A fresh session over the same feed finds only duplicates.
    let mut outcomes = Vec::new();
    let sink = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink_writer = Arc::clone(&sink);
    let second = orchestrator(
        Arc::new(FakeDriver::new(listings)),
        Arc::clone(&store),
        test_job(2),
    )
    .with_progress(Box::new(move |_, _, outcome| {
        sink_writer.lock().unwrap().push(outcome);
    }))
    .run(CancellationToken::new())
    .await;
    outcomes.extend(sink.lock().unwrap().iter().copied());

    assert_eq!(second.status, JobStatus::Completed);
    assert_eq!(store.records().len(), 2);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ListingOutcome::DuplicateSkipped | ListingOutcome::Merged)));
}

#[tokio::test(start_paused = true)]
async fn merge_enriches_sparse_existing_lead() {
    // Seed the store with a lead that was captured before it had a website
    // or phone on file.
    let store = Arc::new(FakeStore::new());
    let seeded = store
        .insert(&NewLead {
            identity_key: make_identity_key("Ace Plumbing", LOCATION),
            name: "Ace Plumbing".to_string(),
            location: LOCATION.to_string(),
            rating: None,
            review_count: None,
            phone: None,
            website: None,
            has_website: false,
            profile_url: None,
            source: None,
            raw_data: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let driver = Arc::new(FakeDriver::new(vec![FakeListing::standard(
        "Ace Plumbing",
        Some("https://aceplumbing.example"),
    )]));
    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(1))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    let records = store.records();
    assert_eq!(records.len(), 1);
    let merged = &records[0];
    assert_eq!(merged.id, seeded.id);
    assert_eq!(merged.website.as_deref(), Some("https://aceplumbing.example"));
    assert!(merged.has_website);
    assert_eq!(merged.phone.as_deref(), Some("(402) 543-3239"));
    assert_eq!(merged.rating, Some(5.0));
    assert_eq!(merged.review_count, Some(52));
}

#[tokio::test(start_paused = true)]
async fn feed_reflow_never_persists_a_business_twice() {
    let driver = Arc::new(FakeDriver::with_window(
        vec![
            FakeListing::standard("Ace Plumbing", None),
            FakeListing::standard("Best Roofing", None),
            FakeListing::standard("Crown Dental", None),
        ],
        2,
        1,
    ));
    let store = Arc::new(FakeStore::new());

    // Prepend a new listing after the first persisted lead, shifting every
    // position under the cursor.
    let reflow_driver = Arc::clone(&driver);
    let reflowed = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let reflowed_flag = Arc::clone(&reflowed);
    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(4))
        .with_progress(Box::new(move |_, _, _| {
            if !reflowed_flag.swap(true, std::sync::atomic::Ordering::SeqCst) {
                reflow_driver.reflow_prepend(FakeListing::standard("Zenith Paving", None));
            }
        }))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    // No business appears twice, whatever the reflow did to positions.
    let mut seen = names(&store.records());
    let total = seen.len();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), total);
    assert!(seen.contains(&"Ace Plumbing".to_string()));
    assert!(seen.contains(&"Best Roofing".to_string()));
    assert!(seen.contains(&"Crown Dental".to_string()));
}

/// Store wrapper that simulates losing an insert race: the first insert is
/// beaten by a concurrent job persisting a sparse copy of the same
/// business, so the caller sees a uniqueness conflict.
struct RacingStore {
    inner: FakeStore,
    raced: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl ResultStore for RacingStore {
    async fn find_by_name_location(
        &self,
        name: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        self.inner.find_by_name_location(name, location).await
    }

    async fn find_by_profile_url(
        &self,
        profile_url: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        self.inner.find_by_profile_url(profile_url).await
    }

    async fn find_by_phone_location(
        &self,
        phone: &str,
        location: &str,
    ) -> Result<Option<LeadRecord>, PipelineError> {
        self.inner.find_by_phone_location(phone, location).await
    }

    async fn insert(&self, lead: &NewLead) -> Result<LeadRecord, PipelineError> {
        if !self.raced.swap(true, std::sync::atomic::Ordering::SeqCst) {
            let sparse = NewLead {
                website: None,
                has_website: false,
                rating: None,
                review_count: None,
                ..lead.clone()
            };
            self.inner.insert(&sparse).await?;
        }
        self.inner.insert(lead).await
    }

    async fn update(&self, id: i64, plan: &MergePlan) -> Result<LeadRecord, PipelineError> {
        self.inner.update(id, plan).await
    }
}

#[tokio::test(start_paused = true)]
async fn insert_race_is_replayed_as_merge() {
    let driver = Arc::new(FakeDriver::new(vec![FakeListing::standard(
        "Ace Plumbing",
        Some("https://aceplumbing.example"),
    )]));
    let store = Arc::new(RacingStore {
        inner: FakeStore::new(),
        raced: std::sync::atomic::AtomicBool::new(false),
    });

    let report = PipelineOrchestrator::new(
        driver,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        test_job(1),
        ResilienceConfig::default(),
        ResilienceConfig::default(),
    )
    .run(CancellationToken::new())
    .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.processed_count, 1);
    let records = store.inner.records();
    assert_eq!(records.len(), 1);
    // The losing insert's richer facts were merged back in.
    assert_eq!(
        records[0].website.as_deref(),
        Some("https://aceplumbing.example")
    );
    assert_eq!(records[0].rating, Some(5.0));
}

// ---------------------------------------------------------------------------
// Per-listing failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn unclassifiable_listing_is_skipped_not_fatal() {
    let mut decorative = FakeListing::compact("Sponsored");
    decorative.deep_link = None;
    decorative.label = None;
    decorative.visible_text = String::new();

    let driver = Arc::new(FakeDriver::new(vec![
        decorative,
        FakeListing::standard("Best Roofing", None),
    ]));
    let store = Arc::new(FakeStore::new());

    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(5))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.processed_count, 1);
    assert_eq!(names(&store.records()), vec!["Best Roofing"]);
}

#[tokio::test(start_paused = true)]
async fn nameless_listing_is_skipped_not_fatal() {
    // A deep link whose label is pure UI chrome extracts no usable name.
    let mut nameless = FakeListing::compact("ignored");
    nameless.label = Some("Directions".to_string());

    let driver = Arc::new(FakeDriver::new(vec![
        nameless,
        FakeListing::standard("Best Roofing", None),
    ]));
    let store = Arc::new(FakeStore::new());

    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(5))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(names(&store.records()), vec!["Best Roofing"]);
}

// ---------------------------------------------------------------------------
// Click-through
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn click_through_reveals_detail_only_website() {
    let mut compact = FakeListing::compact("Hidden Gems Bakery");
    compact.detail_website = Some("https://hiddengems.example".to_string());

    let driver = Arc::new(FakeDriver::new(vec![compact]));
    let store = Arc::new(FakeStore::new());

    let mut config = test_job(1);
    config.enable_click_through = true;
    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), config)
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    let records = store.records();
    assert_eq!(records[0].website.as_deref(), Some("https://hiddengems.example"));
    assert!(records[0].has_website);
    // The detail view was closed again before persistence.
    assert!(!driver.detail_open());
}

#[tokio::test(start_paused = true)]
async fn click_through_failure_leaves_website_unresolved() {
    let compact = FakeListing::compact("Hidden Gems Bakery");
    let driver = Arc::new(FakeDriver::new(vec![compact]));
    driver.fail_detail_root();
    let store = Arc::new(FakeStore::new());

    let mut config = test_job(1);
    config.enable_click_through = true;
    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), config)
        .run(CancellationToken::new())
        .await;

    // The lead is still persisted; only the website stays unknown.
    assert_eq!(report.status, JobStatus::Completed);
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].website, None);
    assert!(!records[0].has_website);
    assert!(!driver.detail_open());
}

// ---------------------------------------------------------------------------
// Dependency failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_driver_failure_is_retried_through() {
    let driver = Arc::new(FakeDriver::new(vec![FakeListing::standard(
        "Ace Plumbing",
        None,
    )]));
    driver.inject_listing_failures(1);
    let store = Arc::new(FakeStore::new());

    let report = orchestrator(Arc::clone(&driver), Arc::clone(&store), test_job(1))
        .run(CancellationToken::new())
        .await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(store.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn persistent_driver_failure_opens_circuit_and_fails_job() {
    let driver = Arc::new(FakeDriver::new(vec![FakeListing::standard(
        "Ace Plumbing",
        None,
    )]));
    driver.inject_listing_failures(20);
    let store = Arc::new(FakeStore::new());

    let report = PipelineOrchestrator::new(
        Arc::clone(&driver) as Arc<dyn AutomationDriver>,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        test_job(1),
        tight_resilience(),
        ResilienceConfig::default(),
    )
    .run(CancellationToken::new())
    .await;

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.last_error_kind, Some("circuit_open"));
    assert!(store.records().is_empty());
}

#[tokio::test(start_paused = true)]
async fn persistent_store_write_failure_fails_job_with_partial_progress() {
    let driver = Arc::new(FakeDriver::new(vec![
        FakeListing::standard("Ace Plumbing", None),
        FakeListing::standard("Best Roofing", None),
    ]));
    let store = Arc::new(FakeStore::new());

    let report = PipelineOrchestrator::new(
        Arc::clone(&driver) as Arc<dyn AutomationDriver>,
        Arc::clone(&store) as Arc<dyn ResultStore>,
        test_job(2),
        ResilienceConfig::default(),
        tight_resilience(),
    )
    .with_progress(Box::new({
        // Break the store after the first persisted lead.
        let store = Arc::clone(&store);
        move |_, _, _| store.inject_insert_failures(20)
    }))
    .run(CancellationToken::new())
    .await;

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.last_error_kind, Some("retries_exhausted"));
    // Partial progress survives the failure.
    assert_eq!(report.processed_count, 1);
    assert_eq!(names(&store.records()), vec!["Ace Plumbing"]);
}
