#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub log_level: String,

    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,

    /// Default number of unique leads a job tries to collect.
    pub job_target_count: usize,
    /// Wall-clock budget per job, checked between pipeline iterations.
    pub job_runtime_budget_secs: u64,
    /// Whether compact listings with an unresolved website trigger a
    /// click-through into the detail view. Off by default for throughput.
    pub job_enable_click_through: bool,
    /// Consecutive no-new-element scrolls before a feed counts as exhausted.
    pub job_max_empty_scrolls: u32,

    pub driver_failure_threshold: u32,
    pub driver_cooldown_secs: u64,
    pub store_failure_threshold: u32,
    pub store_cooldown_secs: u64,
    pub resilience_max_retries: u32,
    pub resilience_backoff_base_ms: u64,
    pub resilience_backoff_cap_ms: u64,
    pub click_through_step_timeout_ms: u64,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("database_url", &"[redacted]")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("job_target_count", &self.job_target_count)
            .field("job_runtime_budget_secs", &self.job_runtime_budget_secs)
            .field("job_enable_click_through", &self.job_enable_click_through)
            .field("job_max_empty_scrolls", &self.job_max_empty_scrolls)
            .field("driver_failure_threshold", &self.driver_failure_threshold)
            .field("driver_cooldown_secs", &self.driver_cooldown_secs)
            .field("store_failure_threshold", &self.store_failure_threshold)
            .field("store_cooldown_secs", &self.store_cooldown_secs)
            .field("resilience_max_retries", &self.resilience_max_retries)
            .field("resilience_backoff_base_ms", &self.resilience_backoff_base_ms)
            .field("resilience_backoff_cap_ms", &self.resilience_backoff_cap_ms)
            .field(
                "click_through_step_timeout_ms",
                &self.click_through_step_timeout_ms,
            )
            .finish()
    }
}
