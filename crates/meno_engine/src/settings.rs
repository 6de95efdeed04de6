use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use meno_core::BackoffPolicy;

/// Source of "now" for timestamps and backoff deadlines.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HydrationSettings {
    /// Workers per run.
    pub concurrency: usize,
    /// Summaries requested per run.
    pub summary_count: usize,
}

impl Default for HydrationSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            summary_count: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxSettings {
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Flush right after every local mutation.
    pub flush_on_mutation: bool,
    /// Move an operation to the dead-letter list once it failed this many times.
    pub dead_letter_after: Option<u32>,
}

impl Default for OutboxSettings {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            base_backoff: policy.base,
            max_backoff: policy.max,
            flush_on_mutation: true,
            dead_letter_after: None,
        }
    }
}

impl OutboxSettings {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: self.base_backoff,
            max: self.max_backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub base_url: String,
    pub user_id: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8787".to_string(),
            user_id: "dev-user".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub hydration: HydrationSettings,
    pub outbox: OutboxSettings,
    /// `None` keeps the cookbook local-only.
    pub backend: Option<BackendSettings>,
    pub data_dir: PathBuf,
}

impl EngineConfig {
    pub fn default_with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            hydration: HydrationSettings::default(),
            outbox: OutboxSettings::default(),
            backend: None,
            data_dir,
        }
    }
}
