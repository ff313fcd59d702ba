use bangumi_sync_models::{CollectionType, Scope, SubjectType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Largest `limit` the collections endpoint accepts
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bangumi: BangumiConfig,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BangumiConfig {
    pub username: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Subject type codes to sync (1 book, 2 anime, 3 music, 4 game, 6 real)
    #[serde(default = "default_subject_types")]
    pub subject_types: Vec<u8>,
    /// Collection type codes to sync (1 wish, 2 done, 3 doing, 4 on hold, 5 dropped)
    #[serde(default = "default_collection_types")]
    pub collection_types: Vec<u8>,
    /// Number of (category, status) pairs synced concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Ignore saved cursors and start every pair from offset 0
    #[serde(default)]
    pub full_resync: bool,
    /// Append every inserted or updated analytics row to a JSON-lines outbox
    #[serde(default)]
    pub analytics_outbox: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_rate_limit_retries")]
    pub rate_limit_retries: u32,
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    #[serde(default = "default_storage_retries")]
    pub storage_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.bgm.tv".to_string()
}

fn default_user_agent() -> String {
    format!("bangumi-sync/{}", env!("CARGO_PKG_VERSION"))
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_subject_types() -> Vec<u8> {
    vec![1, 2, 3]
}

fn default_collection_types() -> Vec<u8> {
    vec![1, 2, 3, 4]
}

fn default_workers() -> usize {
    1
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_rate_limit_retries() -> u32 {
    5
}

fn default_transient_retries() -> u32 {
    3
}

fn default_storage_retries() -> u32 {
    3
}

fn default_schedule() -> String {
    "0 0 */6 * * *".to_string() // Every 6 hours (sec min hour dom mon dow)
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            subject_types: default_subject_types(),
            collection_types: default_collection_types(),
            workers: default_workers(),
            full_resync: false,
            analytics_outbox: false,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            rate_limit_retries: default_rate_limit_retries(),
            transient_retries: default_transient_retries(),
            storage_retries: default_storage_retries(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

pub fn default_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        schedule: default_schedule(),
        run_on_startup: default_true(),
    }
}

impl BangumiConfig {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            page_size: default_page_size(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Config {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            bangumi: BangumiConfig::new(username),
            sync: SyncOptions::default(),
            retry: RetryConfig::default(),
            scheduler: None,
        }
    }

    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bangumi.username.trim().is_empty() {
            return Err(anyhow::anyhow!("bangumi.username is required"));
        }
        if self.bangumi.page_size == 0 || self.bangumi.page_size > MAX_PAGE_SIZE {
            return Err(anyhow::anyhow!(
                "bangumi.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE,
                self.bangumi.page_size
            ));
        }
        if self.bangumi.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("bangumi.request_timeout_seconds must be positive"));
        }
        if self.sync.workers == 0 {
            return Err(anyhow::anyhow!("sync.workers must be at least 1"));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(anyhow::anyhow!("retry.base_delay_ms must be positive"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(anyhow::anyhow!("retry.max_delay_ms must not be smaller than retry.base_delay_ms"));
        }
        if let Some(scheduler) = &self.scheduler {
            if scheduler.schedule.trim().is_empty() {
                return Err(anyhow::anyhow!("scheduler.schedule cannot be empty"));
            }
        }
        if self.scopes()?.is_empty() {
            return Err(anyhow::anyhow!("sync.subject_types and sync.collection_types cannot be empty"));
        }
        Ok(())
    }

    /// Every configured (category, status) pair, sorted and deduplicated
    pub fn scopes(&self) -> anyhow::Result<Vec<Scope>> {
        let mut subject_types = self
            .sync
            .subject_types
            .iter()
            .map(|&code| SubjectType::from_code(code as i64))
            .collect::<Result<Vec<_>, _>>()?;
        let mut collection_types = self
            .sync
            .collection_types
            .iter()
            .map(|&code| CollectionType::from_code(code as i64))
            .collect::<Result<Vec<_>, _>>()?;
        subject_types.sort();
        subject_types.dedup();
        collection_types.sort();
        collection_types.dedup();

        let mut scopes = Vec::with_capacity(subject_types.len() * collection_types.len());
        for &st in &subject_types {
            for &ct in &collection_types {
                scopes.push(Scope::new(st, ct));
            }
        }
        Ok(scopes)
    }
}
