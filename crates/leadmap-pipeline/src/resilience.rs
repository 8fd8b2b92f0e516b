//! Retry, backoff, and circuit-breaker wrapper for collaborator calls.
//!
//! Every operation that talks to the automation driver or the result store
//! runs through a [`ResiliencePolicy`]. Transient failures are retried with
//! exponential backoff plus uniform jitter; a streak of failures opens the
//! circuit, after which calls fail fast until a cool-down elapses and a
//! half-open probe decides whether the dependency recovered. Failed probes
//! re-open the circuit with a doubled, capped cool-down.
//!
//! Outcomes are a tagged result, not an exception chain: callers match on
//! [`ResilienceError`] variants and the compiler keeps the handling
//! exhaustive.

use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::Instant;

use leadmap_core::AppConfig;

use crate::error::PipelineError;

/// Cool-down doubling is capped at this multiple of the base cool-down.
const MAX_COOLDOWN_MULTIPLIER: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct ResilienceConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Base cool-down while the circuit is open.
    pub cooldown: Duration,
    /// Retries after the first attempt, while the circuit is closed.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Consecutive unhealthy probes after which the snapshot flags the
    /// dependency for external recovery.
    pub unhealthy_probe_threshold: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(30),
            unhealthy_probe_threshold: 3,
        }
    }
}

impl ResilienceConfig {
    /// Knobs for the automation-driver operation class.
    #[must_use]
    pub fn for_driver(config: &AppConfig) -> Self {
        Self {
            failure_threshold: config.driver_failure_threshold,
            cooldown: Duration::from_secs(config.driver_cooldown_secs),
            max_retries: config.resilience_max_retries,
            backoff_base: Duration::from_millis(config.resilience_backoff_base_ms),
            backoff_cap: Duration::from_millis(config.resilience_backoff_cap_ms),
            unhealthy_probe_threshold: 3,
        }
    }

    /// Knobs for the result-store operation class.
    #[must_use]
    pub fn for_store(config: &AppConfig) -> Self {
        Self {
            failure_threshold: config.store_failure_threshold,
            cooldown: Duration::from_secs(config.store_cooldown_secs),
            max_retries: config.resilience_max_retries,
            backoff_base: Duration::from_millis(config.resilience_backoff_base_ms),
            backoff_cap: Duration::from_millis(config.resilience_backoff_cap_ms),
            unhealthy_probe_threshold: 3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResilienceError {
    /// The circuit is open; the operation was not attempted.
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// Every attempt failed transiently and the retry budget is spent.
    #[error("retries exhausted: {source}")]
    RetriesExhausted { source: PipelineError },

    /// The operation failed with a non-transient error; retrying would not
    /// change the answer, so it is propagated after the first attempt.
    #[error(transparent)]
    Operation { source: PipelineError },
}

impl ResilienceError {
    /// Taxonomy kind for job reporting.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::CircuitOpen { .. } => "circuit_open",
            ResilienceError::RetriesExhausted { .. } => "retries_exhausted",
            ResilienceError::Operation { source } => source.kind(),
        }
    }
}

/// Point-in-time view of a policy's circuit, for the periodic health check.
#[derive(Debug, Clone, Copy)]
pub struct HealthSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    /// The dependency has been unhealthy past the second, longer threshold;
    /// the operational layer owns whatever recovery action follows.
    pub needs_recovery: bool,
    pub retry_after: Option<Duration>,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    next_probe_at: Option<Instant>,
    current_cooldown: Duration,
    unhealthy_probes: u32,
}

/// One circuit per guarded operation class, never shared across classes or
/// jobs.
pub struct ResiliencePolicy {
    class: &'static str,
    config: ResilienceConfig,
    inner: Mutex<Inner>,
}

impl ResiliencePolicy {
    #[must_use]
    pub fn new(class: &'static str, config: ResilienceConfig) -> Self {
        Self {
            class,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                next_probe_at: None,
                current_cooldown: config.cooldown,
                unhealthy_probes: 0,
            }),
        }
    }

    /// Execute `operation` under this policy.
    ///
    /// While closed: transient failures retry up to the configured budget
    /// with exponential backoff plus jitter, each retry re-invoking the
    /// operation. While open: fail fast without invoking anything. A call
    /// arriving after the cool-down runs as the half-open probe.
    ///
    /// # Errors
    ///
    /// [`ResilienceError::CircuitOpen`] without invoking the operation,
    /// [`ResilienceError::RetriesExhausted`] when the budget is spent, or
    /// [`ResilienceError::Operation`] carrying a non-transient failure.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, ResilienceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        let probing = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed => false,
                CircuitState::HalfOpen => true,
                CircuitState::Open => {
                    let now = Instant::now();
                    match inner.next_probe_at {
                        Some(at) if now < at => {
                            return Err(ResilienceError::CircuitOpen {
                                retry_after: at - now,
                            });
                        }
                        _ => {
                            tracing::info!(class = self.class, "cool-down elapsed, half-open");
                            inner.state = CircuitState::HalfOpen;
                            true
                        }
                    }
                }
            }
        };

        if probing {
            return match operation().await {
                Ok(value) => {
                    self.close_circuit();
                    Ok(value)
                }
                Err(e) if e.is_retriable() => {
                    self.reopen_after_failed_probe();
                    Err(ResilienceError::RetriesExhausted { source: e })
                }
                // The dependency answered; the operation itself was bad.
                Err(e) => {
                    self.close_circuit();
                    Err(ResilienceError::Operation { source: e })
                }
            };
        }

        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(e) if !e.is_retriable() => {
                    return Err(ResilienceError::Operation { source: e });
                }
                Err(e) => {
                    if self.record_failure() {
                        tracing::warn!(
                            class = self.class,
                            error = %e,
                            "failure streak reached threshold, circuit opened"
                        );
                        return Err(ResilienceError::RetriesExhausted { source: e });
                    }
                    if attempt >= self.config.max_retries {
                        return Err(ResilienceError::RetriesExhausted { source: e });
                    }
                    let delay = backoff_delay(attempt, &self.config);
                    tracing::warn!(
                        class = self.class,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "transient failure, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Current circuit state for the periodic health check.
    #[must_use]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let inner = self.lock();
        let retry_after = match inner.state {
            CircuitState::Open => inner
                .next_probe_at
                .map(|at| at.saturating_duration_since(Instant::now())),
            _ => None,
        };
        HealthSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
            needs_recovery: inner.unhealthy_probes >= self.config.unhealthy_probe_threshold,
            retry_after,
        }
    }

    /// Feed an out-of-band health probe result into the circuit.
    ///
    /// A healthy report while open forces half-open early, letting the next
    /// call probe without waiting out the cool-down. Unhealthy reports
    /// accumulate toward `needs_recovery`; the recovery action itself
    /// belongs to the operational layer, not this policy.
    pub fn record_probe(&self, healthy: bool) {
        let mut inner = self.lock();
        if healthy {
            inner.unhealthy_probes = 0;
            if inner.state == CircuitState::Open {
                tracing::info!(class = self.class, "dependency reports healthy, half-open");
                inner.state = CircuitState::HalfOpen;
                inner.next_probe_at = None;
            }
        } else {
            inner.unhealthy_probes += 1;
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
    }

    /// Returns `true` when this failure opened the circuit.
    fn record_failure(&self) -> bool {
        let mut inner = self.lock();
        inner.failure_count += 1;
        if inner.state == CircuitState::Closed
            && inner.failure_count >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.next_probe_at = Some(Instant::now() + inner.current_cooldown);
            return true;
        }
        false
    }

    fn close_circuit(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.next_probe_at = None;
        inner.current_cooldown = self.config.cooldown;
    }

    fn reopen_after_failed_probe(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Open;
        inner.failure_count += 1;
        let cap = self.config.cooldown * MAX_COOLDOWN_MULTIPLIER;
        inner.current_cooldown = (inner.current_cooldown * 2).min(cap);
        inner.next_probe_at = Some(Instant::now() + inner.current_cooldown);
        tracing::warn!(
            class = self.class,
            cooldown_ms = u64::try_from(inner.current_cooldown.as_millis()).unwrap_or(u64::MAX),
            "probe failed, circuit reopened with doubled cool-down"
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("resilience policy lock poisoned")
    }
}

/// Exponential backoff with uniform jitter: `base * 2^attempt`, capped,
/// plus a random addend of up to half the capped delay.
fn backoff_delay(attempt: u32, config: &ResilienceConfig) -> Duration {
    let exp = config
        .backoff_base
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(config.backoff_cap);
    let half_ms = u64::try_from(exp.as_millis() / 2).unwrap_or(u64::MAX);
    let jitter_ms = if half_ms == 0 {
        0
    } else {
        rand::rng().random_range(0..=half_ms)
    };
    exp + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn fast_config(failure_threshold: u32, max_retries: u32) -> ResilienceConfig {
        ResilienceConfig {
            failure_threshold,
            cooldown: Duration::from_secs(10),
            max_retries,
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(100),
            unhealthy_probe_threshold: 3,
        }
    }

    fn driver_down() -> PipelineError {
        PipelineError::DriverUnavailable {
            reason: "simulated".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_try_without_retrying() {
        let policy = ResiliencePolicy::new("driver", fast_config(5, 3));
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, PipelineError>(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let policy = ResiliencePolicy::new("driver", fast_config(10, 3));
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(driver_down())
                    } else {
                        Ok::<u32, PipelineError>(9)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 9);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_is_not_retried() {
        let policy = ResiliencePolicy::new("driver", fast_config(5, 3));
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, PipelineError>(PipelineError::ExtractionFailed {
                        reason: "no name".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(ResilienceError::Operation {
                source: PipelineError::ExtractionFailed { .. }
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_the_last_error() {
        let policy = ResiliencePolicy::new("driver", fast_config(10, 2));
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, PipelineError>(driver_down())
                }
            })
            .await;

        // max_retries = 2 means 3 attempts total.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(ResilienceError::RetriesExhausted { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_streak_opens_the_circuit_and_calls_fail_fast() {
        let policy = ResiliencePolicy::new("driver", fast_config(3, 0));
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let c = Arc::clone(&calls);
            let result = policy
                .execute(|| {
                    let c = Arc::clone(&c);
                    async move {
                        c.fetch_add(1, Ordering::SeqCst);
                        Err::<u32, PipelineError>(driver_down())
                    }
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(policy.health_snapshot().state, CircuitState::Open);

        // While open, the operation must not be invoked at all.
        let c = Arc::clone(&calls);
        let result = policy
            .execute(|| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, PipelineError>(1)
                }
            })
            .await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn streak_opens_the_circuit_mid_retry_loop() {
        let policy = ResiliencePolicy::new("driver", fast_config(2, 5));
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);

        let result = policy
            .execute(|| {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, PipelineError>(driver_down())
                }
            })
            .await;

        // The breaker stops the retry loop before the budget is spent.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(ResilienceError::RetriesExhausted { .. })
        ));
        assert_eq!(policy.health_snapshot().state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_cooldown_probes_half_open_then_closes_on_success() {
        let policy = ResiliencePolicy::new("driver", fast_config(1, 0));

        let result = policy
            .execute(|| async { Err::<u32, PipelineError>(driver_down()) })
            .await;
        assert!(result.is_err());
        assert_eq!(policy.health_snapshot().state, CircuitState::Open);

        tokio::time::advance(Duration::from_secs(11)).await;

        let result = policy.execute(|| async { Ok::<u32, PipelineError>(3) }).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(policy.health_snapshot().state, CircuitState::Closed);
        assert_eq!(policy.health_snapshot().failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens_with_doubled_cooldown() {
        let policy = ResiliencePolicy::new("driver", fast_config(1, 0));

        let _ = policy
            .execute(|| async { Err::<u32, PipelineError>(driver_down()) })
            .await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let result = policy
            .execute(|| async { Err::<u32, PipelineError>(driver_down()) })
            .await;
        assert!(matches!(
            result,
            Err(ResilienceError::RetriesExhausted { .. })
        ));

        let snapshot = policy.health_snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        // Doubled cool-down: 10s base became 20s.
        let retry_after = snapshot.retry_after.expect("open circuit has a probe time");
        assert!(retry_after > Duration::from_secs(10));
        assert!(retry_after <= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_probe_report_forces_half_open_early() {
        let policy = ResiliencePolicy::new("driver", fast_config(1, 0));

        let _ = policy
            .execute(|| async { Err::<u32, PipelineError>(driver_down()) })
            .await;
        assert_eq!(policy.health_snapshot().state, CircuitState::Open);

        policy.record_probe(true);
        assert_eq!(policy.health_snapshot().state, CircuitState::HalfOpen);

        // The next call probes immediately, long before the cool-down.
        let result = policy.execute(|| async { Ok::<u32, PipelineError>(4) }).await;
        assert_eq!(result.unwrap(), 4);
        assert_eq!(policy.health_snapshot().state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_unhealthy_probes_flag_recovery() {
        let policy = ResiliencePolicy::new("driver", fast_config(5, 0));

        policy.record_probe(false);
        policy.record_probe(false);
        assert!(!policy.health_snapshot().needs_recovery);

        policy.record_probe(false);
        assert!(policy.health_snapshot().needs_recovery);

        policy.record_probe(true);
        assert!(!policy.health_snapshot().needs_recovery);
    }

    #[test]
    fn backoff_grows_exponentially_with_bounded_jitter() {
        let config = ResilienceConfig {
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(10),
            ..ResilienceConfig::default()
        };
        for attempt in 0..5u32 {
            let exp = Duration::from_millis(100 * 2u64.pow(attempt));
            let delay = backoff_delay(attempt, &config);
            assert!(delay >= exp, "attempt {attempt}: {delay:?} < {exp:?}");
            assert!(
                delay <= exp + exp / 2,
                "attempt {attempt}: {delay:?} exceeds jitter bound"
            );
        }
    }

    #[test]
    fn backoff_respects_the_cap() {
        let config = ResilienceConfig {
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(2),
            ..ResilienceConfig::default()
        };
        let delay = backoff_delay(10, &config);
        assert!(delay <= Duration::from_secs(3));
    }
}
